//! Score arithmetic used by reports.

use serde::{Deserialize, Serialize};

/// Highest valid score.
pub const MAX_SCORE: f64 = 10.0;

/// `score` in hundredths, rounded to the nearest.
///
/// Exact for scores with at most two decimals.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn hundredths(score: f64) -> i64 {
    (score * 100.0).round() as i64
}

/// Sum of the three stage scores in hundredths, a missing stage counting
/// as zero.
///
/// The per-record average is this total over three. Thresholds are compared
/// against the total scaled by three, so a record averaging exactly 5 is
/// never taken for 4.999...
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScoreTotal(i64);

impl ScoreTotal {
    #[must_use]
    pub fn of(score1: Option<f64>, score2: Option<f64>, score3: Option<f64>) -> Self {
        Self(
            [score1, score2, score3]
                .into_iter()
                .map(|s| hundredths(s.unwrap_or(0.0)))
                .sum(),
        )
    }

    #[must_use]
    pub fn hundredths(self) -> i64 {
        self.0
    }

    /// The per-record average.
    ///
    /// This is not the mean of the available values: a record with only
    /// `score1 = 7.5` averages to `2.5`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average(self) -> f64 {
        self.0 as f64 / 300.0
    }

    /// Whether the average is strictly below `threshold`.
    #[must_use]
    pub fn is_below(self, threshold: f64) -> bool {
        self.0 < hundredths(threshold).saturating_mul(3)
    }

    #[must_use]
    pub fn bucket(self) -> ScoreBucket {
        ScoreBucket::of(self)
    }
}

/// Average of the three stage scores, counting a missing stage as zero.
#[must_use]
pub fn record_average(score1: Option<f64>, score2: Option<f64>, score3: Option<f64>) -> f64 {
    ScoreTotal::of(score1, score2, score3).average()
}

/// Whether `score` lies within `[0, 10]`.
#[must_use]
pub fn is_valid_score(score: f64) -> bool {
    (0.0..=MAX_SCORE).contains(&score)
}

/// Histogram bucket of a per-record average.
///
/// Buckets are `[0,4)`, `[4,5)`, `[5,6.5)`, `[6.5,8)` and `[8,10]`. Totals
/// below zero fall in the first bucket, totals above thirty in the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBucket {
    Poor,
    Weak,
    Fair,
    Good,
    Excellent,
}

impl ScoreBucket {
    pub const ALL: [ScoreBucket; 5] = [
        Self::Poor,
        Self::Weak,
        Self::Fair,
        Self::Good,
        Self::Excellent,
    ];

    /// Bucket of the average `total / 3`, decided on the exact total.
    #[must_use]
    pub fn of(total: ScoreTotal) -> Self {
        let t = total.hundredths();
        if t < 1_200 {
            Self::Poor
        } else if t < 1_500 {
            Self::Weak
        } else if t < 1_950 {
            Self::Fair
        } else if t < 2_400 {
            Self::Good
        } else {
            Self::Excellent
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Poor => "[0,4)",
            Self::Weak => "[4,5)",
            Self::Fair => "[5,6.5)",
            Self::Good => "[6.5,8)",
            Self::Excellent => "[8,10]",
        }
    }
}

/// Counts per [`ScoreBucket`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    pub poor: u32,
    pub weak: u32,
    pub fair: u32,
    pub good: u32,
    pub excellent: u32,
}

impl Histogram {
    pub fn record(&mut self, total: ScoreTotal) {
        *self.slot(total.bucket()) += 1;
    }

    #[must_use]
    pub fn count(&self, bucket: ScoreBucket) -> u32 {
        match bucket {
            ScoreBucket::Poor => self.poor,
            ScoreBucket::Weak => self.weak,
            ScoreBucket::Fair => self.fair,
            ScoreBucket::Good => self.good,
            ScoreBucket::Excellent => self.excellent,
        }
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        ScoreBucket::ALL.iter().map(|b| self.count(*b)).sum()
    }

    fn slot(&mut self, bucket: ScoreBucket) -> &mut u32 {
        match bucket {
            ScoreBucket::Poor => &mut self.poor,
            ScoreBucket::Weak => &mut self.weak,
            ScoreBucket::Fair => &mut self.fair,
            ScoreBucket::Good => &mut self.good,
            ScoreBucket::Excellent => &mut self.excellent,
        }
    }
}

impl FromIterator<ScoreTotal> for Histogram {
    fn from_iter<I: IntoIterator<Item = ScoreTotal>>(iter: I) -> Self {
        let mut histogram = Self::default();
        for total in iter {
            histogram.record(total);
        }
        histogram
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn flat(score: f64) -> ScoreTotal {
        ScoreTotal::of(Some(score), Some(score), Some(score))
    }

    #[test]
    fn average_of_all_three_stages() {
        let avg = record_average(Some(7.5), Some(8.0), Some(8.5));
        assert!((avg - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_stages_count_as_zero() {
        let avg = record_average(Some(7.5), None, None);
        assert!((avg - 2.5).abs() < f64::EPSILON);
        assert_eq!(ScoreTotal::of(None, None, None), ScoreTotal::default());
    }

    #[test]
    fn boundary_averages_are_exact() {
        // In binary floating point this sum divides to 4.999999999999999.
        let total = ScoreTotal::of(Some(0.2), Some(8.2), Some(6.6));
        assert_eq!(total.hundredths(), 1_500);
        assert!((total.average() - 5.0).abs() < f64::EPSILON);
        assert_eq!(total.bucket(), ScoreBucket::Fair);
        assert!(!total.is_below(5.0));
        assert!(total.is_below(5.01));

        let good = ScoreTotal::of(Some(6.1), Some(6.7), Some(6.7));
        assert_eq!(good.bucket(), ScoreBucket::Good);
        let weak = ScoreTotal::of(Some(4.0), Some(4.1), Some(3.9));
        assert_eq!(weak.bucket(), ScoreBucket::Weak);
    }

    #[test]
    fn bucket_boundaries_are_half_open() {
        assert_eq!(flat(0.0).bucket(), ScoreBucket::Poor);
        assert_eq!(flat(3.99).bucket(), ScoreBucket::Poor);
        assert_eq!(flat(4.0).bucket(), ScoreBucket::Weak);
        assert_eq!(flat(5.0).bucket(), ScoreBucket::Fair);
        assert_eq!(flat(6.49).bucket(), ScoreBucket::Fair);
        assert_eq!(flat(6.5).bucket(), ScoreBucket::Good);
        assert_eq!(flat(8.0).bucket(), ScoreBucket::Excellent);
        assert_eq!(flat(10.0).bucket(), ScoreBucket::Excellent);
    }

    #[test]
    fn histogram_counts() {
        let histogram: Histogram = [1.0, 4.5, 6.5, 6.5, 9.0].into_iter().map(flat).collect();
        assert_eq!(histogram.poor, 1);
        assert_eq!(histogram.weak, 1);
        assert_eq!(histogram.fair, 0);
        assert_eq!(histogram.good, 2);
        assert_eq!(histogram.excellent, 1);
        assert_eq!(histogram.total(), 5);
    }

    #[test]
    fn score_range() {
        assert!(is_valid_score(0.0));
        assert!(is_valid_score(10.0));
        assert!(!is_valid_score(10.5));
        assert!(!is_valid_score(-0.1));
    }

    proptest! {
        #[test]
        fn one_decimal_scores_bucket_by_exact_average(a in 0u32..=100, b in 0u32..=100, c in 0u32..=100) {
            let tenth = |n: u32| Some(f64::from(n) / 10.0);
            let total = ScoreTotal::of(tenth(a), tenth(b), tenth(c));
            // Sum in tenths; the average in tenths is sum / 3.
            let sum = a + b + c;
            let expected = if sum < 120 {
                ScoreBucket::Poor
            } else if sum < 150 {
                ScoreBucket::Weak
            } else if sum < 195 {
                ScoreBucket::Fair
            } else if sum < 240 {
                ScoreBucket::Good
            } else {
                ScoreBucket::Excellent
            };
            prop_assert_eq!(total.bucket(), expected);
            prop_assert_eq!(total.is_below(5.0), sum < 150);
        }
    }
}
