// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Poll loop behaviour against in-process allocator and segment store.

use std::time::{Duration, Instant};

use smem_source::layout::{
    encode_frame, AudioParams, StreamDescriptor, StreamMedia, StreamTable, VideoParams,
    FRAME_HEADER_SIZE,
};
use smem_source::timeline::{Rational, OUTPUT_TIME_BASE};
use smem_source::{Error, HeapSegmentStore, LocalPool, SmemSource, SourceConfig};

type Source = SmemSource<LocalPool, HeapSegmentStore>;

fn video(index: i32, time_base: Rational) -> StreamDescriptor {
    StreamDescriptor {
        index,
        codec_id: 27,
        time_base,
        media: StreamMedia::Video(VideoParams {
            width: 1280,
            height: 720,
            pixel_format: 0,
            extradata: vec![0, 0, 0, 1, 0x67],
        }),
    }
}

fn audio(index: i32, sample_rate: i32) -> StreamDescriptor {
    StreamDescriptor {
        index,
        codec_id: 86018,
        time_base: Rational::new(1, sample_rate),
        media: StreamMedia::Audio(AudioParams {
            sample_rate,
            channels: 2,
            sample_format: 8,
            extradata: Vec::new(),
        }),
    }
}

fn config(timeout_ms: u64) -> SourceConfig {
    SourceConfig::default()
        .with_timeout(Duration::from_millis(timeout_ms))
        .with_poll_interval(Duration::from_micros(50))
}

/// Source whose segment 1 holds `streams`; `frames` get ids 2, 3, ...
fn source_with(streams: Vec<StreamDescriptor>, frames: Vec<Vec<u8>>, cfg: SourceConfig) -> Source {
    let (pool, store) = parts_with(streams, frames);
    SmemSource::with_parts(cfg, pool, store).unwrap()
}

fn parts_with(streams: Vec<StreamDescriptor>, frames: Vec<Vec<u8>>) -> (LocalPool, HeapSegmentStore) {
    let mut store = HeapSegmentStore::new();
    let mut pool = LocalPool::new();
    store.insert(1, StreamTable { streams }.encode().unwrap());
    pool.publish(1);
    for (i, frame) in frames.into_iter().enumerate() {
        let id = i as i32 + 2;
        store.insert(id, frame);
        pool.publish(id);
    }
    (pool, store)
}

fn frame(stream: i32, dts: i64, payload: &[u8]) -> Vec<u8> {
    encode_frame(stream, dts, dts, false, payload).unwrap()
}

// ===========================================================================
// Startup
// ===========================================================================

#[test]
fn unsupported_stream_is_skipped_at_startup() {
    let streams = vec![
        video(0, OUTPUT_TIME_BASE),
        StreamDescriptor {
            index: 1,
            codec_id: 94213,
            time_base: Rational::new(1, 1000),
            media: StreamMedia::Unsupported { kind: 3 },
        },
        audio(2, 48_000),
    ];
    let src = source_with(streams, Vec::new(), config(50));

    let indices: Vec<usize> = src.streams().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 2]);
    assert!(src.registry().get(1).is_err());
    assert_eq!(src.allocator().outstanding(), 0);
}

#[test]
fn nominal_durations_follow_stream_kind() {
    let src = source_with(
        vec![video(0, OUTPUT_TIME_BASE), audio(1, 48_000), audio(2, 8_000)],
        Vec::new(),
        config(50),
    );
    let reg = src.registry();
    assert_eq!(reg.timeline(0).unwrap().nominal_duration(), 40_000);
    assert_eq!(reg.timeline(1).unwrap().nominal_duration(), 21_333);
    // Sample rates below 11025 are clamped.
    assert_eq!(reg.timeline(2).unwrap().nominal_duration(), 92_879);
}

#[test]
fn empty_stream_table_registers_nothing() {
    let mut src = source_with(Vec::new(), vec![frame(0, 0, b"x")], config(20));
    assert!(src.registry().is_empty());
    assert!(src.read_packet().unwrap_err().is_end_of_stream());
    assert_eq!(src.stats().discarded, 1);
}

#[test]
fn startup_times_out_without_a_table() {
    let started = Instant::now();
    let err = SmemSource::with_parts(config(30), LocalPool::new(), HeapSegmentStore::new())
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn startup_connection_failure_is_fatal() {
    let mut pool = LocalPool::new();
    pool.break_connection("allocator unreachable");
    let err = SmemSource::with_parts(config(50), pool, HeapSegmentStore::new()).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, Error::Connection(_)));
}

#[test]
fn malformed_table_segment_fails_startup() {
    let mut store = HeapSegmentStore::new();
    store.insert(1, vec![0xFF; 12]);
    store.insert(2, StreamTable { streams: vec![video(0, OUTPUT_TIME_BASE)] }.encode().unwrap());
    let pool = LocalPool::with_ready([1, 2]);

    let err = SmemSource::with_parts(config(50), pool, store).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn bad_table_is_not_replaced_by_the_next_frame() {
    let mut table = StreamTable { streams: vec![video(0, OUTPUT_TIME_BASE)] }.encode().unwrap();
    // video_extradata_size of the first record, beyond the inline buffer.
    let at = FRAME_HEADER_SIZE + 32;
    table[at..at + 4].copy_from_slice(&200i32.to_ne_bytes());

    let mut store = HeapSegmentStore::new();
    store.insert(1, table);
    store.insert(2, frame(0, 0, b"f0"));
    store.insert(3, frame(0, 40_000, b"f1"));
    let mut pool = LocalPool::with_ready([1, 2, 3]);

    let err = SmemSource::with_parts(config(20), &mut pool, store).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    // The table segment went back; the frames were never claimed.
    assert_eq!(pool.released(), &[1]);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.pending(), 2);
}

// ===========================================================================
// Reading
// ===========================================================================

#[test]
fn frames_are_delivered_in_claim_order_with_rebuilt_timestamps() {
    let frames = vec![
        frame(0, 1_000_000, b"a"),
        frame(0, 1_040_000, b"b"),
        frame(0, 1_080_000, b"c"),
        frame(0, 1_330_000, b"d"),
        frame(0, 1_370_000, b"e"),
    ];
    let mut src = source_with(vec![video(0, OUTPUT_TIME_BASE)], frames, config(20));

    let packets: Vec<_> = src.packets().collect::<Result<_, _>>().unwrap();
    let data: Vec<&[u8]> = packets.iter().map(|p| p.data.as_slice()).collect();
    assert_eq!(data, vec![&b"a"[..], b"b", b"c", b"d", b"e"]);

    let dts: Vec<i64> = packets.iter().map(|p| p.dts).collect();
    assert_eq!(dts, vec![40_000, 80_000, 120_000, 160_000, 200_000]);
    for p in &packets {
        assert_eq!(p.pts - p.dts, 80_000);
        assert_eq!(p.stream_index, 0);
    }
    assert_eq!(src.stats().delivered, 5);
    assert_eq!(src.allocator().outstanding(), 0);
}

#[test]
fn streams_keep_independent_timelines() {
    let frames = vec![
        encode_frame(0, 0, 0, true, b"v0").unwrap(),
        encode_frame(1, 0, 0, true, b"a0").unwrap(),
        encode_frame(0, 3_600, 3_600, false, b"v1").unwrap(),
        encode_frame(1, 1_024, 1_024, false, b"a1").unwrap(),
    ];
    let mut src = source_with(
        vec![video(0, Rational::new(1, 90_000)), audio(1, 48_000)],
        frames,
        config(20),
    );

    let packets: Vec<_> = src.packets().map(Result::unwrap).collect();
    let by_stream = |s: usize| -> Vec<i64> {
        packets.iter().filter(|p| p.stream_index == s).map(|p| p.dts).collect()
    };
    assert_eq!(by_stream(0), vec![0, 40_000]);
    assert_eq!(by_stream(1), vec![0, 21_333]);
    assert!(packets[0].key && !packets[2].key);
}

#[test]
fn timeout_is_reported_after_the_deadline() {
    let mut src = source_with(vec![video(0, OUTPUT_TIME_BASE)], Vec::new(), config(100));
    let started = Instant::now();
    let err = src.read_packet().unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(100)));
    assert!(err.is_end_of_stream());
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn reading_resumes_after_a_timeout() {
    let mut src = source_with(vec![video(0, OUTPUT_TIME_BASE)], Vec::new(), config(10));
    assert!(src.read_packet().is_err());

    src.store_mut().insert(7, frame(0, 0, b"late"));
    src.allocator_mut().publish(7);
    assert_eq!(src.read_packet().unwrap().data, b"late");
}

#[test]
fn map_failure_releases_the_segment_and_continues() {
    let (pool, mut store) = parts_with(
        vec![video(0, OUTPUT_TIME_BASE)],
        vec![frame(0, 0, b"unreachable"), frame(0, 40_000, b"second")],
    );
    store.fail_next_map(2);
    let mut src = SmemSource::with_parts(config(50), pool, store).unwrap();

    assert_eq!(src.read_packet().unwrap().data, b"second");
    assert_eq!(src.stats().map_failures, 1);
    assert_eq!(src.allocator().outstanding(), 0);
    assert_eq!(src.allocator().released(), &[1, 2, 3]);
}

#[test]
fn map_failures_wait_between_attempts() {
    // A burst of ids whose segments cannot be attached.
    let (mut pool, store) = parts_with(vec![video(0, OUTPUT_TIME_BASE)], Vec::new());
    for id in 100..200 {
        pool.publish(id);
    }
    let cfg = config(20).with_poll_interval(Duration::from_millis(5));
    let mut src = SmemSource::with_parts(cfg, pool, store).unwrap();

    assert!(src.read_packet().unwrap_err().is_end_of_stream());
    let failures = src.stats().map_failures;
    assert!((1..=10).contains(&failures), "{failures} map attempts in 20ms");
    assert!(src.allocator().pending() > 0);
    assert_eq!(src.allocator().outstanding(), 0);
}

#[test]
fn payload_survives_segment_release() {
    let payload: Vec<u8> = (0..=255).collect();
    let mut src = source_with(
        vec![video(0, OUTPUT_TIME_BASE)],
        vec![frame(0, 0, &payload)],
        config(20),
    );
    let pkt = src.read_packet().unwrap();
    assert_eq!(src.store().mapped(), 0);
    assert_eq!(pkt.data, payload);
}

#[test]
fn unmap_failure_still_delivers_by_default() {
    let (pool, mut store) = parts_with(
        vec![video(0, OUTPUT_TIME_BASE)],
        vec![frame(0, 0, b"first"), frame(0, 40_000, b"second")],
    );
    store.fail_next_unmap(2);
    let mut src = SmemSource::with_parts(config(20), pool, store).unwrap();

    assert_eq!(src.read_packet().unwrap().data, b"first");
    assert_eq!(src.stats().release_failures, 1);
    assert_eq!(src.allocator().outstanding(), 0);
}

#[test]
fn strict_release_drops_frames_from_unclean_segments() {
    let (pool, mut store) = parts_with(
        vec![video(0, OUTPUT_TIME_BASE)],
        vec![frame(0, 0, b"first"), frame(0, 40_000, b"second")],
    );
    store.fail_next_unmap(2);
    let cfg = config(20).with_strict_release(true);
    let mut src = SmemSource::with_parts(cfg, pool, store).unwrap();

    assert_eq!(src.read_packet().unwrap().data, b"second");
    let stats = src.stats();
    assert_eq!((stats.release_failures, stats.discarded), (1, 1));
    // The dropped frame never touched the timeline.
    assert_eq!(src.registry().timeline(0).unwrap().last_input_dts(), 40_000);
}

#[test]
fn lost_connection_ends_iteration_with_the_error() {
    let mut src = source_with(
        vec![video(0, OUTPUT_TIME_BASE)],
        vec![frame(0, 0, b"only")],
        config(20),
    );
    assert!(src.read_packet().is_ok());
    src.allocator_mut().break_connection("producer went away");

    let mut it = src.packets();
    assert!(matches!(it.next(), Some(Err(Error::Connection(_)))));
    assert!(it.next().is_none());
}

#[test]
fn discards_do_not_extend_the_deadline() {
    // A steady stream of undecodable segments must not keep the read alive.
    let frames: Vec<Vec<u8>> = (0..200).map(|_| vec![0u8; 4]).collect();
    let mut src = source_with(vec![video(0, OUTPUT_TIME_BASE)], frames, config(0));
    let err = src.read_packet().unwrap_err();
    assert!(err.is_end_of_stream());
    assert_eq!(src.stats().discarded, 1);
    assert_eq!(src.allocator().outstanding(), 0);
}
