//! Nearest-timestamp frame sampling.

use std::sync::Arc;

use crate::ingest::Frame;

/// Selects `count` frames from an ordered batch by nearest-timestamp over an
/// evenly spaced grid across the batch's time span.
///
/// For each grid point `t0 + i * (tn - t0) / (count - 1)` the frame with the
/// closest relative timestamp is chosen; ties break toward the earlier
/// frame. A `count` of 1 picks the first frame of the batch. Duplicate picks
/// are possible when `count` exceeds the batch length.
#[must_use]
pub fn sample_batch(frames: &[Arc<Frame>], count: usize) -> Vec<Arc<Frame>> {
    if frames.is_empty() || count == 0 {
        return Vec::new();
    }
    if count == 1 || frames.len() == 1 {
        return vec![Arc::clone(&frames[0])];
    }

    let t0 = frames[0].relative_ms as f64;
    let tn = frames[frames.len() - 1].relative_ms as f64;
    let span = tn - t0;
    let step = span / (count as f64 - 1.0);

    let mut picks = Vec::with_capacity(count);
    for i in 0..count {
        let target = t0 + i as f64 * step;
        let mut best = 0usize;
        let mut best_dist = f64::INFINITY;
        for (idx, frame) in frames.iter().enumerate() {
            let dist = (frame.relative_ms as f64 - target).abs();
            // Strict comparison keeps the earlier frame on ties.
            if dist < best_dist {
                best_dist = dist;
                best = idx;
            }
        }
        picks.push(Arc::clone(&frames[best]));
    }
    picks
}
