//! Render-time sampling of a position buffer
//!
//! Remote entities are drawn `delay` milliseconds in the past so there are
//! almost always two samples bracketing the render time. Outside the buffered
//! range the result clamps to the nearest end; there is no extrapolation.

use crate::game::position_buffer::PositionBuffer;
use crate::game::state::Timestamp;
use crate::util::vec2::Vec2;

/// Position at `render_time`, or `None` for an empty buffer
pub fn interpolate(buffer: &PositionBuffer, render_time: Timestamp) -> Option<Vec2> {
    let samples = buffer.samples();
    let first = samples.first()?;
    let last = samples.last()?;

    if samples.len() == 1 || render_time <= first.timestamp {
        return Some(first.position);
    }
    if render_time >= last.timestamp {
        return Some(last.position);
    }

    // First sample strictly after render_time; its predecessor is at or before it.
    let upper = samples.partition_point(|s| s.timestamp <= render_time);
    let to = samples[upper];
    let from = samples[upper - 1];

    let span = (to.timestamp - from.timestamp) as f64;
    if span <= 0.0 {
        return Some(to.position);
    }
    let t = (render_time - from.timestamp) as f64 / span;
    Some(from.position.lerp(to.position, t as f32))
}

/// Sample at `now - delay`
pub fn sample_delayed(buffer: &PositionBuffer, now: Timestamp, delay_ms: u64) -> Option<Vec2> {
    interpolate(buffer, now.saturating_sub(delay_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::position_buffer::PositionSample;
    use rand::Rng;

    fn buffer_of(points: &[(f32, f32, Timestamp)]) -> PositionBuffer {
        let mut buffer = PositionBuffer::new(10);
        for &(x, y, ts) in points {
            buffer.push(PositionSample::new(Vec2::new(x, y), ts));
        }
        buffer
    }

    #[test]
    fn test_empty_buffer() {
        assert!(interpolate(&PositionBuffer::new(10), 100).is_none());
    }

    #[test]
    fn test_single_sample_returned_directly() {
        let buffer = buffer_of(&[(7.0, 9.0, 500)]);
        assert_eq!(interpolate(&buffer, 0), Some(Vec2::new(7.0, 9.0)));
        assert_eq!(interpolate(&buffer, 500), Some(Vec2::new(7.0, 9.0)));
        assert_eq!(interpolate(&buffer, 9_000), Some(Vec2::new(7.0, 9.0)));
    }

    #[test]
    fn test_midpoint() {
        let buffer = buffer_of(&[(0.0, 0.0, 100), (100.0, 50.0, 200)]);
        let p = interpolate(&buffer, 150).unwrap();
        assert!(p.approx_eq(Vec2::new(50.0, 25.0), 1e-4));
    }

    #[test]
    fn test_clamps_before_oldest_and_after_newest() {
        let buffer = buffer_of(&[(10.0, 10.0, 100), (20.0, 20.0, 200), (30.0, 30.0, 300)]);
        assert_eq!(interpolate(&buffer, 50), Some(Vec2::new(10.0, 10.0)));
        assert_eq!(interpolate(&buffer, 100), Some(Vec2::new(10.0, 10.0)));
        assert_eq!(interpolate(&buffer, 300), Some(Vec2::new(30.0, 30.0)));
        assert_eq!(interpolate(&buffer, 10_000), Some(Vec2::new(30.0, 30.0)));
    }

    #[test]
    fn test_exact_interior_timestamp_hits_sample() {
        let buffer = buffer_of(&[(0.0, 0.0, 100), (40.0, 0.0, 200), (0.0, 0.0, 300)]);
        assert_eq!(interpolate(&buffer, 200), Some(Vec2::new(40.0, 0.0)));
    }

    #[test]
    fn test_sample_delayed_applies_delay() {
        let buffer = buffer_of(&[(0.0, 0.0, 1000), (100.0, 0.0, 1100)]);
        let p = sample_delayed(&buffer, 1150, 100).unwrap();
        assert!(p.approx_eq(Vec2::new(50.0, 0.0), 1e-4));
        // Saturates instead of underflowing near the clock origin
        assert_eq!(sample_delayed(&buffer, 20, 100), Some(Vec2::ZERO));
    }

    #[test]
    fn test_random_samples_stay_on_segment() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let count = rng.gen_range(2..=10);
            let mut ts: Timestamp = rng.gen_range(0..10_000);
            let mut points = Vec::with_capacity(count);
            for _ in 0..count {
                points.push((
                    rng.gen_range(-500.0..500.0),
                    rng.gen_range(-500.0..500.0),
                    ts,
                ));
                ts += rng.gen_range(1..200);
            }
            let buffer = buffer_of(&points);

            let seg = rng.gen_range(0..count - 1);
            let (x0, y0, t0) = points[seg];
            let (x1, y1, t1) = points[seg + 1];
            if t1 - t0 < 2 {
                continue;
            }
            let render = rng.gen_range(t0 + 1..t1);
            let ratio = (render - t0) as f32 / (t1 - t0) as f32;
            let expected = Vec2::new(x0 + (x1 - x0) * ratio, y0 + (y1 - y0) * ratio);

            let got = interpolate(&buffer, render).unwrap();
            assert!(
                got.approx_eq(expected, 1e-2),
                "render {} between {} and {}: got {:?}, expected {:?}",
                render,
                t0,
                t1,
                got,
                expected
            );
        }
    }

    #[test]
    fn test_duplicate_samples_do_not_move_result() {
        let once = buffer_of(&[(0.0, 0.0, 100), (80.0, 40.0, 200)]);
        let twice = buffer_of(&[(0.0, 0.0, 100), (80.0, 40.0, 200), (80.0, 40.0, 200)]);
        for t in [50, 100, 125, 150, 199, 200, 400] {
            assert_eq!(interpolate(&once, t), interpolate(&twice, t));
        }
    }
}
