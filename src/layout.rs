// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fixed binary layout at the head of every segment.
//
// The producer writes its native in-memory structs, so offsets follow
// `#[repr(C)]` rules and integers are native-endian. Every field read is
// bounds checked against the mapped length; nothing is trusted.

use std::mem::{offset_of, size_of};

use crate::error::{Error, Result};
use crate::timeline::Rational;

/// Maximum number of streams in a stream table.
pub const MAX_STREAMS: usize = 64;

/// Size of the inline extradata buffers in a stream record.
pub const MAX_EXTRADATA: usize = 128;

// Media kind codes used by the producer.
pub const KIND_VIDEO: i32 = 0;
pub const KIND_AUDIO: i32 = 1;

// ---------------------------------------------------------------------------
// Wire structs (must match the producer exactly)
// ---------------------------------------------------------------------------

/// Header at offset 0 of every segment.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawFrameHeader {
    pub index: i32,
    pub pts: i64,
    pub dts: i64,
    pub stream_table_offset: i32,
    pub stream_table_count: i32,
    pub payload_offset: i32,
    pub payload_len: i32,
    pub key: i32,
}

/// One record of the stream table.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStreamRecord {
    pub index: i32,
    pub kind: i32,
    pub codec_id: i32,
    pub time_base_num: i32,
    pub time_base_den: i32,
    pub width: i32,
    pub height: i32,
    pub pixel_format: i32,
    pub video_extradata_size: i32,
    pub video_extradata: [u8; MAX_EXTRADATA],
    pub sample_rate: i32,
    pub channels: i32,
    pub sample_format: i32,
    pub audio_extradata_size: i32,
    pub audio_extradata: [u8; MAX_EXTRADATA],
}

pub const FRAME_HEADER_SIZE: usize = size_of::<RawFrameHeader>();
pub const STREAM_RECORD_SIZE: usize = size_of::<RawStreamRecord>();

const _: () = assert!(FRAME_HEADER_SIZE == 48);
const _: () = assert!(STREAM_RECORD_SIZE == 308);

fn read_i32(buf: &[u8], at: usize) -> Result<i32> {
    buf.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_ne_bytes)
        .ok_or_else(|| Error::decode(format!("i32 at {at} beyond segment of {} bytes", buf.len())))
}

fn read_i64(buf: &[u8], at: usize) -> Result<i64> {
    buf.get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(i64::from_ne_bytes)
        .ok_or_else(|| Error::decode(format!("i64 at {at} beyond segment of {} bytes", buf.len())))
}

fn write_bytes(buf: &mut [u8], at: usize, bytes: &[u8]) -> Result<()> {
    let len = buf.len();
    buf.get_mut(at..at + bytes.len())
        .ok_or_else(|| Error::decode(format!("write at {at} beyond buffer of {len} bytes")))?
        .copy_from_slice(bytes);
    Ok(())
}

fn non_negative(value: i32, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::decode(format!("negative {what}: {value}")))
}

impl RawFrameHeader {
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(Error::decode(format!(
                "segment of {} bytes is shorter than the {FRAME_HEADER_SIZE}-byte header",
                buf.len()
            )));
        }
        Ok(Self {
            index: read_i32(buf, offset_of!(Self, index))?,
            pts: read_i64(buf, offset_of!(Self, pts))?,
            dts: read_i64(buf, offset_of!(Self, dts))?,
            stream_table_offset: read_i32(buf, offset_of!(Self, stream_table_offset))?,
            stream_table_count: read_i32(buf, offset_of!(Self, stream_table_count))?,
            payload_offset: read_i32(buf, offset_of!(Self, payload_offset))?,
            payload_len: read_i32(buf, offset_of!(Self, payload_len))?,
            key: read_i32(buf, offset_of!(Self, key))?,
        })
    }

    /// Serialize into the head of `buf` (padding is left untouched).
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        write_bytes(buf, offset_of!(Self, index), &self.index.to_ne_bytes())?;
        write_bytes(buf, offset_of!(Self, pts), &self.pts.to_ne_bytes())?;
        write_bytes(buf, offset_of!(Self, dts), &self.dts.to_ne_bytes())?;
        write_bytes(buf, offset_of!(Self, stream_table_offset), &self.stream_table_offset.to_ne_bytes())?;
        write_bytes(buf, offset_of!(Self, stream_table_count), &self.stream_table_count.to_ne_bytes())?;
        write_bytes(buf, offset_of!(Self, payload_offset), &self.payload_offset.to_ne_bytes())?;
        write_bytes(buf, offset_of!(Self, payload_len), &self.payload_len.to_ne_bytes())?;
        write_bytes(buf, offset_of!(Self, key), &self.key.to_ne_bytes())
    }
}

// ---------------------------------------------------------------------------
// Frame descriptor
// ---------------------------------------------------------------------------

/// Per-frame metadata decoded from a claimed segment.
///
/// Offsets are only meaningful while the segment stays mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub stream_index: i32,
    pub pts: i64,
    pub dts: i64,
    pub payload_offset: usize,
    pub payload_len: usize,
    pub key: bool,
}

impl FrameDescriptor {
    /// Decode the header of `segment` and check that the payload lies inside it.
    pub fn decode(segment: &[u8]) -> Result<Self> {
        let raw = RawFrameHeader::read_from(segment)?;
        let payload_offset = non_negative(raw.payload_offset, "payload offset")?;
        let payload_len = non_negative(raw.payload_len, "payload length")?;
        match payload_offset.checked_add(payload_len) {
            Some(end) if end <= segment.len() => {}
            _ => {
                return Err(Error::decode(format!(
                    "payload {payload_offset}+{payload_len} beyond segment of {} bytes",
                    segment.len()
                )))
            }
        }
        Ok(Self {
            stream_index: raw.index,
            pts: raw.pts,
            dts: raw.dts,
            payload_offset,
            payload_len,
            key: raw.key != 0,
        })
    }

    /// The payload bytes inside `segment`.
    pub fn payload<'a>(&self, segment: &'a [u8]) -> &'a [u8] {
        &segment[self.payload_offset..self.payload_offset + self.payload_len]
    }
}

// ---------------------------------------------------------------------------
// Stream descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Unsupported(i32),
}

impl From<i32> for MediaKind {
    fn from(code: i32) -> Self {
        match code {
            KIND_VIDEO => Self::Video,
            KIND_AUDIO => Self::Audio,
            other => Self::Unsupported(other),
        }
    }
}

impl MediaKind {
    pub fn code(self) -> i32 {
        match self {
            Self::Video => KIND_VIDEO,
            Self::Audio => KIND_AUDIO,
            Self::Unsupported(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParams {
    pub width: i32,
    pub height: i32,
    pub pixel_format: i32,
    pub extradata: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: i32,
    pub channels: i32,
    pub sample_format: i32,
    pub extradata: Vec<u8>,
}

/// Kind-specific stream parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMedia {
    Video(VideoParams),
    Audio(AudioParams),
    Unsupported { kind: i32 },
}

/// Static description of one producer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Index the producer wrote into the record.
    pub index: i32,
    pub codec_id: i32,
    /// Native time unit of the stream's timestamps.
    pub time_base: Rational,
    pub media: StreamMedia,
}

impl StreamDescriptor {
    pub fn kind(&self) -> MediaKind {
        match &self.media {
            StreamMedia::Video(_) => MediaKind::Video,
            StreamMedia::Audio(_) => MediaKind::Audio,
            StreamMedia::Unsupported { kind } => MediaKind::Unsupported(*kind),
        }
    }

    /// Decode the record starting at `at`.
    fn read_from(buf: &[u8], at: usize) -> Result<Self> {
        type R = RawStreamRecord;
        let i32_at = |off: usize| read_i32(buf, at + off);

        let index = i32_at(offset_of!(R, index))?;
        let kind = i32_at(offset_of!(R, kind))?;
        let codec_id = i32_at(offset_of!(R, codec_id))?;
        let time_base = Rational::new(i32_at(offset_of!(R, time_base_num))?, i32_at(offset_of!(R, time_base_den))?);

        let extradata = |size_off: usize, data_off: usize| -> Result<Vec<u8>> {
            let size = i32_at(size_off)?;
            let len = usize::try_from(size)
                .ok()
                .filter(|&n| n <= MAX_EXTRADATA)
                .ok_or_else(|| Error::decode(format!("stream {index}: extradata size {size} out of range")))?;
            let start = at + data_off;
            buf.get(start..start + len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::decode(format!("stream {index}: extradata beyond segment")))
        };

        let media = match MediaKind::from(kind) {
            MediaKind::Video => StreamMedia::Video(VideoParams {
                width: i32_at(offset_of!(R, width))?,
                height: i32_at(offset_of!(R, height))?,
                pixel_format: i32_at(offset_of!(R, pixel_format))?,
                extradata: extradata(offset_of!(R, video_extradata_size), offset_of!(R, video_extradata))?,
            }),
            MediaKind::Audio => StreamMedia::Audio(AudioParams {
                sample_rate: i32_at(offset_of!(R, sample_rate))?,
                channels: i32_at(offset_of!(R, channels))?,
                sample_format: i32_at(offset_of!(R, sample_format))?,
                extradata: extradata(offset_of!(R, audio_extradata_size), offset_of!(R, audio_extradata))?,
            }),
            MediaKind::Unsupported(kind) => StreamMedia::Unsupported { kind },
        };

        if !matches!(media, StreamMedia::Unsupported { .. }) && !time_base.is_valid() {
            return Err(Error::decode(format!(
                "stream {index}: invalid time base {}/{}",
                time_base.num, time_base.den
            )));
        }

        Ok(Self { index, codec_id, time_base, media })
    }

    /// Serialize as a wire record at `at`. Extradata longer than the inline
    /// buffer is rejected.
    pub fn write_to(&self, buf: &mut [u8], at: usize) -> Result<()> {
        type R = RawStreamRecord;
        let mut put = |off: usize, v: i32| write_bytes(buf, at + off, &v.to_ne_bytes());
        put(offset_of!(R, index), self.index)?;
        put(offset_of!(R, kind), self.kind().code())?;
        put(offset_of!(R, codec_id), self.codec_id)?;
        put(offset_of!(R, time_base_num), self.time_base.num)?;
        put(offset_of!(R, time_base_den), self.time_base.den)?;

        let (size_off, data_off, extradata) = match &self.media {
            StreamMedia::Video(v) => {
                put(offset_of!(R, width), v.width)?;
                put(offset_of!(R, height), v.height)?;
                put(offset_of!(R, pixel_format), v.pixel_format)?;
                (offset_of!(R, video_extradata_size), offset_of!(R, video_extradata), v.extradata.as_slice())
            }
            StreamMedia::Audio(a) => {
                put(offset_of!(R, sample_rate), a.sample_rate)?;
                put(offset_of!(R, channels), a.channels)?;
                put(offset_of!(R, sample_format), a.sample_format)?;
                (offset_of!(R, audio_extradata_size), offset_of!(R, audio_extradata), a.extradata.as_slice())
            }
            StreamMedia::Unsupported { .. } => return Ok(()),
        };
        if extradata.len() > MAX_EXTRADATA {
            return Err(Error::decode(format!(
                "stream {}: {} bytes of extradata exceed {MAX_EXTRADATA}",
                self.index,
                extradata.len()
            )));
        }
        put(size_off, extradata.len() as i32)?;
        write_bytes(buf, at + data_off, extradata)
    }
}

/// The stream table carried by the first segment of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTable {
    pub streams: Vec<StreamDescriptor>,
}

impl StreamTable {
    pub fn decode(segment: &[u8]) -> Result<Self> {
        let raw = RawFrameHeader::read_from(segment)?;
        let offset = non_negative(raw.stream_table_offset, "stream table offset")?;
        let count = non_negative(raw.stream_table_count, "stream count")?;
        if count > MAX_STREAMS {
            return Err(Error::decode(format!("{count} streams exceed the maximum of {MAX_STREAMS}")));
        }
        let end = offset + count * STREAM_RECORD_SIZE;
        if end > segment.len() {
            return Err(Error::decode(format!(
                "stream table {offset}..{end} beyond segment of {} bytes",
                segment.len()
            )));
        }

        let streams = (0..count)
            .map(|i| StreamDescriptor::read_from(segment, offset + i * STREAM_RECORD_SIZE))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { streams })
    }

    /// Bytes needed to hold a header plus this table.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.streams.len() * STREAM_RECORD_SIZE
    }

    /// Serialize as a startup segment: header followed by the records.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.streams.len() > MAX_STREAMS {
            return Err(Error::decode(format!("{} streams exceed {MAX_STREAMS}", self.streams.len())));
        }
        let mut buf = vec![0u8; self.encoded_len()];
        RawFrameHeader {
            stream_table_offset: FRAME_HEADER_SIZE as i32,
            stream_table_count: self.streams.len() as i32,
            ..RawFrameHeader::default()
        }
        .write_to(&mut buf)?;
        for (i, stream) in self.streams.iter().enumerate() {
            stream.write_to(&mut buf, FRAME_HEADER_SIZE + i * STREAM_RECORD_SIZE)?;
        }
        Ok(buf)
    }
}

/// Build a frame segment: header immediately followed by the payload.
pub fn encode_frame(stream_index: i32, pts: i64, dts: i64, key: bool, payload: &[u8]) -> Result<Vec<u8>> {
    let payload_len = i32::try_from(payload.len())
        .map_err(|_| Error::decode(format!("payload of {} bytes too large", payload.len())))?;
    let mut buf = vec![0u8; FRAME_HEADER_SIZE + payload.len()];
    RawFrameHeader {
        index: stream_index,
        pts,
        dts,
        payload_offset: FRAME_HEADER_SIZE as i32,
        payload_len,
        key: key as i32,
        ..RawFrameHeader::default()
    }
    .write_to(&mut buf)?;
    buf[FRAME_HEADER_SIZE..].copy_from_slice(payload);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_offsets_match_producer() {
        assert_eq!(offset_of!(RawFrameHeader, pts), 8);
        assert_eq!(offset_of!(RawFrameHeader, dts), 16);
        assert_eq!(offset_of!(RawFrameHeader, stream_table_offset), 24);
        assert_eq!(offset_of!(RawFrameHeader, key), 40);
        assert_eq!(offset_of!(RawStreamRecord, video_extradata), 36);
        assert_eq!(offset_of!(RawStreamRecord, sample_rate), 164);
        assert_eq!(offset_of!(RawStreamRecord, audio_extradata), 180);
    }

    #[test]
    fn frame_header_fields() {
        let seg = encode_frame(2, 9000, 6000, true, b"abc").unwrap();
        let fd = FrameDescriptor::decode(&seg).unwrap();
        assert_eq!(fd.stream_index, 2);
        assert_eq!((fd.pts, fd.dts), (9000, 6000));
        assert!(fd.key);
        assert_eq!(fd.payload(&seg), b"abc");
    }

    #[test]
    fn short_segment_is_rejected() {
        let err = FrameDescriptor::decode(&[0u8; 20]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn payload_beyond_segment_is_rejected() {
        let mut seg = encode_frame(0, 0, 0, false, b"xyz").unwrap();
        seg.truncate(seg.len() - 1);
        assert!(FrameDescriptor::decode(&seg).is_err());
    }

    #[test]
    fn negative_payload_length_is_rejected() {
        let mut seg = vec![0u8; 64];
        RawFrameHeader { payload_offset: 48, payload_len: -4, ..Default::default() }
            .write_to(&mut seg)
            .unwrap();
        assert!(FrameDescriptor::decode(&seg).is_err());
    }

    #[test]
    fn media_kind_codes() {
        assert_eq!(MediaKind::from(0), MediaKind::Video);
        assert_eq!(MediaKind::from(1), MediaKind::Audio);
        assert_eq!(MediaKind::from(3), MediaKind::Unsupported(3));
        assert_eq!(MediaKind::Unsupported(-1).code(), -1);
    }
}
