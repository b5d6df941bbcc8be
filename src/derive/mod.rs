use std::collections::BTreeMap;
use std::fmt;

/// Share of the total below which a proportion slice moves to the
/// detached secondary legend.
const DETACH_THRESHOLD: f64 = 0.01;

/// Prefix sums of a per-bucket metric.
pub fn cumulative(values: &[f64]) -> Vec<f64> {
    let mut total = 0.0;
    values
        .iter()
        .map(|v| {
            total += v;
            total
        })
        .collect()
}

/// Per-bucket ratio of two metrics; buckets with a zero denominator are
/// defined as ratio 0, not a division fault.
pub fn ratio(numerator: &[f64], denominator: &[f64]) -> Vec<f64> {
    numerator
        .iter()
        .zip(denominator)
        .map(|(&n, &d)| if d == 0.0 { 0.0 } else { n / d })
        .collect()
}

/// Running ratio: prefix sum of the numerator over prefix sum of the
/// denominator, with the same zero-denominator rule.
pub fn cumulative_ratio(numerator: &[f64], denominator: &[f64]) -> Vec<f64> {
    ratio(&cumulative(numerator), &cumulative(denominator))
}

/// Remaining-work curve: the seeded backlog minus cumulative completions.
pub fn remaining(seed: f64, completed: &[f64]) -> Vec<f64> {
    cumulative(completed)
        .into_iter()
        .map(|done| seed - done)
        .collect()
}

/// Category key after grouping: a real value or the folded "Other".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category<K> {
    Value(K),
    Other,
}

impl<K: fmt::Display> fmt::Display for Category<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(k) => k.fmt(f),
            Self::Other => f.write_str("Other"),
        }
    }
}

/// Group rows by a categorical key, ascending, optionally folding groups
/// below a minimum relative frequency into a trailing "Other" category.
pub fn split_by_key<T, K, F>(
    rows: &[T],
    key: F,
    threshold: Option<f64>,
) -> Vec<(Category<K>, Vec<&T>)>
where
    K: Ord + Copy,
    F: Fn(&T) -> K,
{
    let mut groups: BTreeMap<K, Vec<&T>> = BTreeMap::new();
    for row in rows {
        groups.entry(key(row)).or_default().push(row);
    }

    let Some(threshold) = threshold else {
        return groups
            .into_iter()
            .map(|(k, v)| (Category::Value(k), v))
            .collect();
    };

    let total = rows.len() as f64;
    let mut kept = Vec::new();
    let mut other: Vec<&T> = Vec::new();

    for (k, v) in groups {
        if total > 0.0 && (v.len() as f64 / total) >= threshold {
            kept.push((Category::Value(k), v));
        } else {
            other.extend(v);
        }
    }

    if !other.is_empty() {
        kept.push((Category::Other, other));
    }

    kept
}

/// A proportional breakdown ready for pie rendering.
#[derive(Debug, Clone)]
pub struct Breakdown {
    pub labels: Vec<String>,
    /// Clamped to zero; slightly inconsistent timestamps can produce
    /// negative phase sums.
    pub values: Vec<f64>,
    /// Slices below 1% of the total exist; the renderer should move all
    /// labels into a secondary legend to keep the chart legible.
    pub detached_legend: bool,
}

/// Build a proportional breakdown from named phase-duration sums.
pub fn proportions<L: Into<String>>(parts: Vec<(L, f64)>) -> Breakdown {
    let mut labels = Vec::with_capacity(parts.len());
    let mut values = Vec::with_capacity(parts.len());

    for (label, value) in parts {
        labels.push(label.into());
        values.push(value.max(0.0));
    }

    let total: f64 = values.iter().sum();
    let detached_legend =
        total > 0.0 && values.iter().any(|&v| v / total < DETACH_THRESHOLD);

    Breakdown {
        labels,
        values,
        detached_legend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cumulative_prefix_sum() {
        assert_eq!(cumulative(&[1.0, 2.0, 3.0]), vec![1.0, 3.0, 6.0]);
        assert_eq!(cumulative(&[]), Vec::<f64>::new());
    }

    #[test]
    fn test_ratio_zero_denominator_is_zero() {
        let r = ratio(&[4.0, 5.0, 6.0], &[2.0, 0.0, 3.0]);
        assert_eq!(r, vec![2.0, 0.0, 2.0]);
    }

    #[test]
    fn test_cumulative_ratio() {
        // Buckets (1,1) and (3,1): running ratios 1/1 then 4/2.
        let r = cumulative_ratio(&[1.0, 3.0], &[1.0, 1.0]);
        assert_eq!(r, vec![1.0, 2.0]);
    }

    #[test]
    fn test_remaining_is_non_increasing() {
        let curve = remaining(10.0, &[0.0, 3.0, 0.0, 2.0, 5.0]);
        assert_eq!(curve, vec![10.0, 7.0, 7.0, 5.0, 0.0]);
        assert!(curve.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_split_without_threshold_unchanged() {
        let rows = vec![3_i64, 1, 3, 2, 1, 3];
        let groups = split_by_key(&rows, |&c| c, None);

        let keys: Vec<_> = groups.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![Category::Value(1), Category::Value(2), Category::Value(3)]
        );
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1.len(), 1);
        assert_eq!(groups[2].1.len(), 3);
    }

    #[test]
    fn test_split_threshold_zero_folds_nothing() {
        let rows = vec![5_i64, 6, 5];
        let groups = split_by_key(&rows, |&c| c, Some(0.0));
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|(k, _)| *k != Category::Other));
    }

    #[test]
    fn test_split_threshold_one_folds_all_but_sole_dominant() {
        // Mixed categories: nothing reaches 100%, everything folds.
        let rows = vec![1_i64, 2, 3];
        let groups = split_by_key(&rows, |&c| c, Some(1.0));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, Category::Other);
        assert_eq!(groups[0].1.len(), 3);

        // A single category holds 100% and survives alone.
        let rows = vec![7_i64, 7, 7];
        let groups = split_by_key(&rows, |&c| c, Some(1.0));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, Category::Value(7));
    }

    #[test]
    fn test_split_folds_small_groups_into_trailing_other() {
        // 8 of one code, 1 each of two others; 20% threshold folds the
        // two small groups into a trailing Other.
        let mut rows = vec![0_i64; 8];
        rows.push(143);
        rows.push(211);

        let groups = split_by_key(&rows, |&c| c, Some(0.2));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, Category::Value(0));
        assert_eq!(groups[0].1.len(), 8);
        assert_eq!(groups[1].0, Category::Other);
        assert_eq!(groups[1].1.len(), 2);
    }

    #[test]
    fn test_proportions_clamp_negatives() {
        let b = proportions(vec![("a", 5.0), ("b", -2.0), ("c", 5.0)]);
        assert_eq!(b.values, vec![5.0, 0.0, 5.0]);
    }

    #[test]
    fn test_proportions_detached_legend_flag() {
        // One slice below 1% of the total.
        let b = proportions(vec![("big", 990.0), ("tiny", 5.0)]);
        assert!(b.detached_legend);

        let b = proportions(vec![("a", 50.0), ("b", 50.0)]);
        assert!(!b.detached_legend);

        // All-zero totals never detach.
        let b = proportions(vec![("a", 0.0), ("b", -1.0)]);
        assert!(!b.detached_legend);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(Category::Value(139).to_string(), "139");
        assert_eq!(Category::<i64>::Other.to_string(), "Other");
    }
}
