// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Output timeline reconstruction.
//
// Producer timestamps may jump, stall or restart. Each stream keeps the last
// input dts it saw and the last output dts it produced; an observed step in
// [0, 5 * nominal] is carried over as-is, anything else advances the output
// by exactly one nominal frame duration. Output dts therefore never
// decreases, whatever the producer clock does.

/// Ticks per second of the common output time unit.
pub const OUTPUT_TICKS_PER_SECOND: i64 = 1_000_000;

/// The common output time unit, 1/1,000,000 s.
pub const OUTPUT_TIME_BASE: Rational = Rational { num: 1, den: OUTPUT_TICKS_PER_SECOND as i32 };

/// Frame rate assumed for video streams (the table carries none).
pub const DEFAULT_FRAME_RATE: i64 = 25;

/// Samples per audio frame used to derive the audio nominal duration.
pub const AUDIO_FRAME_SAMPLES: i64 = 1024;

/// Largest accepted dts step, in nominal durations (inclusive).
pub const MAX_STEP_FACTOR: i64 = 5;

/// Fixed pts lead over dts added after rebasing, in nominal durations.
pub const PTS_MARGIN_FACTOR: i64 = 2;

/// A time unit `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Both terms strictly positive.
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Convert `value` from time unit `from` to time unit `to`.
///
/// Exact integer arithmetic: `value * from.num * to.den / (from.den * to.num)`
/// rounded half away from zero, saturating at the `i64` range. Returns 0
/// for a degenerate divisor.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if from == to {
        return value;
    }
    let mut mul = from.num as i128 * to.den as i128;
    let mut div = from.den as i128 * to.num as i128;
    if div == 0 {
        return 0;
    }
    if div < 0 {
        mul = -mul;
        div = -div;
    }

    let n = value as i128 * mul;
    let half = div / 2;
    let q = if n >= 0 { (n + half) / div } else { -((-n + half) / div) };
    q.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Nominal video frame spacing in output ticks.
pub fn video_nominal_duration(frame_rate: i64) -> i64 {
    OUTPUT_TICKS_PER_SECOND / frame_rate.clamp(1, 60)
}

/// Nominal audio frame spacing in output ticks.
pub fn audio_nominal_duration(sample_rate: i32) -> i64 {
    OUTPUT_TICKS_PER_SECOND * AUDIO_FRAME_SAMPLES / (sample_rate as i64).clamp(11025, 48000)
}

/// Output timestamps for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconstructed {
    pub pts: i64,
    pub dts: i64,
    /// The input step was out of range and the output advanced by one
    /// nominal duration instead.
    pub resync: bool,
}

/// Timeline history of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTimeline {
    time_base: Rational,
    nominal_duration: i64,
    last_input_dts: i64,
    last_output_dts: i64,
    resync_anchor: Option<i64>,
    resyncs: u64,
}

impl StreamTimeline {
    /// Fresh history: no input seen, output starting at 0.
    pub fn new(time_base: Rational, nominal_duration: i64) -> Self {
        Self {
            time_base,
            nominal_duration,
            last_input_dts: 0,
            last_output_dts: 0,
            resync_anchor: None,
            resyncs: 0,
        }
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn nominal_duration(&self) -> i64 {
        self.nominal_duration
    }

    /// Last rescaled input dts (0 before the first frame).
    pub fn last_input_dts(&self) -> i64 {
        self.last_input_dts
    }

    /// Last output dts produced (0 before the first frame).
    pub fn last_output_dts(&self) -> i64 {
        self.last_output_dts
    }

    /// Output dts of the most recent discontinuity, if any.
    pub fn resync_anchor(&self) -> Option<i64> {
        self.resync_anchor
    }

    /// Number of discontinuities seen so far.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Whether a rescaled dts step is carried over unchanged.
    pub fn in_range(&self, delta: i64) -> bool {
        (0..=self.nominal_duration.saturating_mul(MAX_STEP_FACTOR)).contains(&delta)
    }

    /// Map one frame's native pts/dts onto the output timeline and record it.
    pub fn reconstruct(&mut self, pts: i64, dts: i64) -> Reconstructed {
        let pts = rescale(pts, self.time_base, OUTPUT_TIME_BASE);
        let dts = rescale(dts, self.time_base, OUTPUT_TIME_BASE);

        let delta = dts.saturating_sub(self.last_input_dts);
        let resync = !self.in_range(delta);
        let out_dts = if resync {
            self.last_output_dts.saturating_add(self.nominal_duration)
        } else {
            self.last_output_dts.saturating_add(delta)
        };
        if resync {
            self.resync_anchor = Some(out_dts);
            self.resyncs += 1;
        }

        let out_pts = out_dts
            .saturating_add(pts.saturating_sub(dts))
            .saturating_add(self.nominal_duration.saturating_mul(PTS_MARGIN_FACTOR));

        self.last_input_dts = dts;
        self.last_output_dts = out_dts;

        Reconstructed { pts: out_pts, dts: out_dts, resync }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_identity() {
        assert_eq!(rescale(123_456_789, OUTPUT_TIME_BASE, OUTPUT_TIME_BASE), 123_456_789);
        assert_eq!(rescale(-5, OUTPUT_TIME_BASE, OUTPUT_TIME_BASE), -5);
    }

    #[test]
    fn rescale_mpeg_clock() {
        // 90 kHz → µs
        assert_eq!(rescale(90_000, Rational::new(1, 90_000), OUTPUT_TIME_BASE), 1_000_000);
        assert_eq!(rescale(3_600, Rational::new(1, 90_000), OUTPUT_TIME_BASE), 40_000);
    }

    #[test]
    fn rescale_rounds_half_away_from_zero() {
        let half_second = Rational::new(1, 2);
        // 1 tick of 1/3 s in 1/2 s units = 0.666.. → 1
        assert_eq!(rescale(1, Rational::new(1, 3), half_second), 1);
        // 1 tick of 1/4 s in 1/2 s units = 0.5 → 1, and -0.5 → -1
        assert_eq!(rescale(1, Rational::new(1, 4), half_second), 1);
        assert_eq!(rescale(-1, Rational::new(1, 4), half_second), -1);
    }

    #[test]
    fn rescale_saturates() {
        assert_eq!(rescale(i64::MAX, Rational::new(1, 1), OUTPUT_TIME_BASE), i64::MAX);
        assert_eq!(rescale(i64::MIN, Rational::new(1, 1), OUTPUT_TIME_BASE), i64::MIN);
    }

    #[test]
    fn nominal_durations() {
        assert_eq!(video_nominal_duration(DEFAULT_FRAME_RATE), 40_000);
        assert_eq!(video_nominal_duration(0), 1_000_000);
        assert_eq!(video_nominal_duration(120), 16_666);
        assert_eq!(audio_nominal_duration(48_000), 21_333);
        assert_eq!(audio_nominal_duration(96_000), 21_333);
        assert_eq!(audio_nominal_duration(8_000), 92_879);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let tl = StreamTimeline::new(OUTPUT_TIME_BASE, 40_000);
        assert!(tl.in_range(0));
        assert!(tl.in_range(200_000));
        assert!(!tl.in_range(200_001));
        assert!(!tl.in_range(-1));
    }

    #[test]
    fn first_frame_far_from_zero_bootstraps_as_gap() {
        let mut tl = StreamTimeline::new(OUTPUT_TIME_BASE, 40_000);
        let out = tl.reconstruct(10_000_000, 10_000_000);
        assert!(out.resync);
        assert_eq!(out.dts, 40_000);
        assert_eq!(out.pts, 40_000 + 80_000);
        assert_eq!(tl.resync_anchor(), Some(40_000));
        assert_eq!(tl.last_input_dts(), 10_000_000);
    }

    #[test]
    fn steady_steps_carry_over() {
        let mut tl = StreamTimeline::new(OUTPUT_TIME_BASE, 40_000);
        tl.reconstruct(1_000_000, 1_000_000);
        let a = tl.reconstruct(1_040_000, 1_040_000);
        let b = tl.reconstruct(1_070_000, 1_070_000);
        assert!(!a.resync && !b.resync);
        assert_eq!(b.dts - a.dts, 30_000);
        assert_eq!(tl.resyncs(), 1);
    }

    #[test]
    fn backwards_step_advances_one_nominal() {
        let mut tl = StreamTimeline::new(OUTPUT_TIME_BASE, 40_000);
        tl.reconstruct(500_000, 500_000);
        let before = tl.last_output_dts();
        let out = tl.reconstruct(100_000, 100_000);
        assert!(out.resync);
        assert_eq!(out.dts, before + 40_000);
    }
}
