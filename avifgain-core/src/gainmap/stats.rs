//! Outlier-robust range estimation for gain map authoring.

use crate::limits::MAX_HISTOGRAM_BUCKETS;
use crate::types::{Error, Result};

/// Width of one histogram bucket, in log2 gain units.
pub const BUCKET_SIZE: f32 = 0.01;

/// Fraction of samples treated as potential outliers (split across both tails).
pub const OUTLIER_RATIO: f32 = 0.001;

/// Estimate the `[min, max]` range of `values`, ignoring a small number of
/// isolated extremes.
///
/// Up to `OUTLIER_RATIO / 2` of the samples on each side may be dropped, but
/// only when they are separated from the bulk of the distribution by an empty
/// histogram bucket. Inputs with a narrow spread are returned unchanged.
///
/// Returns an error for empty input or non-finite samples.
pub fn find_min_max_without_outliers(values: &[f32]) -> Result<(f32, f32)> {
    if values.is_empty() {
        return Err(Error::InvalidArgument("no samples to estimate a range from".into()));
    }

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in values {
        if !v.is_finite() {
            return Err(Error::InvalidArgument(alloc::format!("non-finite sample {}", v)));
        }
        min = min.min(v);
        max = max.max(v);
    }

    let range = max - min;
    let max_outliers_on_each_side = (values.len() as f32 * OUTLIER_RATIO / 2.0).round() as usize;
    if range <= BUCKET_SIZE * 2.0 || max_outliers_on_each_side == 0 {
        return Ok((min, max));
    }

    let num_buckets = ((range / BUCKET_SIZE).ceil() as usize).min(MAX_HISTOGRAM_BUCKETS);
    let mut histogram = crate::types::try_alloc_zeroed::<u32>(num_buckets)?;
    // Bucket `i` covers [bucket_value(i), bucket_value(i + 1)); max lands in the last one.
    for &v in values {
        let bucket = (((v - min) / range) * num_buckets as f32).floor() as usize;
        histogram[bucket.min(num_buckets - 1)] += 1;
    }

    let bucket_value = |idx: usize| idx as f32 * range / num_buckets as f32 + min;

    let mut range_min = min;
    let mut left_outliers = 0usize;
    for (i, &count) in histogram.iter().enumerate() {
        left_outliers += count as usize;
        if left_outliers > max_outliers_on_each_side {
            break;
        }
        if count == 0 {
            // Everything below an empty bucket is an isolated tail.
            range_min = bucket_value(i + 1);
        }
    }

    let mut range_max = max;
    let mut right_outliers = 0usize;
    for (i, &count) in histogram.iter().enumerate().rev() {
        right_outliers += count as usize;
        if right_outliers > max_outliers_on_each_side {
            break;
        }
        if count == 0 {
            range_max = bucket_value(i);
        }
    }

    tracing::trace!(min, max, range_min, range_max, num_buckets, "gain range estimate");
    Ok((range_min, range_max))
}
