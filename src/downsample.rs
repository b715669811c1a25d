//! Bounded-size decimation for interactive displays.
//!
//! Waveform channels can run to hundreds of thousands of points; charts want
//! a bounded, evenly strided subsequence. The same algorithm feeds the live
//! preview and playback paths.

/// Budget for the telemetry-bound live waveform preview.
pub const LIVE_PREVIEW_POINTS: usize = 1500;

/// Budget for on-demand chart series updates (live and playback).
pub const CHART_SERIES_POINTS: usize = 1000;

/// One chart-series point: elapsed microseconds against sample value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChartPoint {
    pub time_us: f64,
    pub value: f64,
}

/// Return an evenly strided subsequence of at most `max_points + 1` elements.
///
/// The first element is always preserved and the picked indices are strictly
/// increasing, so the shape of the sequence survives decimation.
/// Deterministic and side-effect-free.
pub fn downsample<T: Copy>(values: &[T], max_points: usize) -> Vec<T> {
    values.iter().copied().step_by(stride(values.len(), max_points)).collect()
}

/// Map a channel to chart points, decimating to at most `max_points`
/// elements.
///
/// Sample index `i` maps to time `i * (1_000_000 / rate_hz)` microseconds;
/// the index used is the position in the *original* sequence, so decimation
/// never distorts the time axis.
pub fn series_points<T: Copy + Into<f64>>(
    values: &[T],
    rate_hz: u32,
    max_points: usize,
) -> Vec<ChartPoint> {
    let period_us = 1_000_000.0 / f64::from(rate_hz.max(1));
    values
        .iter()
        .enumerate()
        .step_by(stride(values.len(), max_points))
        .map(|(i, &v)| ChartPoint { time_us: i as f64 * period_us, value: v.into() })
        .collect()
}

fn stride(len: usize, max_points: usize) -> usize {
    let max_points = max_points.max(1);
    len.div_ceil(max_points).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_input_passes_through() {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        assert_eq!(downsample(&values, 1000), values);
    }

    #[test]
    fn long_input_is_strided() {
        let values: Vec<i64> = (0..3000).collect();
        let out = downsample(&values, 1000);
        assert_eq!(out.len(), 1000);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 3);
        assert_eq!(out[999], 2997);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(downsample::<f64>(&[], 1000).is_empty());
        assert!(series_points::<f64>(&[], 100, 1000).is_empty());
    }

    #[test]
    fn time_axis_uses_original_indices() {
        let values: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let points = series_points(&values, 100, 5);

        // stride 2 at 100 Hz: 10_000 us per sample, 20_000 us between picks
        let times: Vec<f64> = points.iter().map(|p| p.time_us).collect();
        assert_eq!(times, vec![0.0, 20_000.0, 40_000.0, 60_000.0, 80_000.0]);
        assert_eq!(points[1].value, 2.0);
    }

    #[test]
    fn zero_rate_is_clamped() {
        let points = series_points(&[1.0f64, 2.0], 0, 10);
        assert_eq!(points[1].time_us, 1_000_000.0);
    }

    proptest! {
        #[test]
        fn bounded_ordered_and_first_preserving(
            values in prop::collection::vec(any::<f64>(), 1..4000),
            max_points in 1usize..2000,
        ) {
            let out = downsample(&values, max_points);

            prop_assert!(!out.is_empty());
            prop_assert!(out.len() <= max_points + 1);
            prop_assert_eq!(out[0].to_bits(), values[0].to_bits());

            // picked elements form a strictly increasing index subsequence
            let stride = values.len().div_ceil(max_points).max(1);
            for (k, v) in out.iter().enumerate() {
                prop_assert_eq!(v.to_bits(), values[k * stride].to_bits());
            }
        }
    }
}
