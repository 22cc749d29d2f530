use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Grade every scale maps the pass percentage onto.
pub const PASS_GRADE: f64 = 4.0;

/// One-decimal rounding used for every grade and percentage we report:
/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaleConfig {
    pub min_grade: f64,
    pub pass_percentage: f64,
    pub max_grade: f64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            min_grade: 1.0,
            pass_percentage: 60.0,
            max_grade: 7.0,
        }
    }
}

impl ScaleConfig {
    /// Checks the scale is usable for reporting. `to_grade` itself accepts
    /// anything; this is the gate applied to persisted and requested scales.
    pub fn validate(&self) -> Result<(), String> {
        let all_finite = [self.min_grade, self.pass_percentage, self.max_grade]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err("scale values must be finite numbers".to_string());
        }
        if !(0.0..=100.0).contains(&self.pass_percentage) {
            return Err("passPercentage must be in 0..=100".to_string());
        }
        if self.min_grade > PASS_GRADE || self.max_grade < PASS_GRADE {
            return Err(format!(
                "scale must satisfy minGrade <= {PASS_GRADE} <= maxGrade"
            ));
        }
        Ok(())
    }

    pub fn grade_for(&self, percentage: f64) -> f64 {
        to_grade(
            percentage,
            self.min_grade,
            self.pass_percentage,
            self.max_grade,
        )
    }
}

// Saturating clamp that never panics, unlike f64::clamp with lo > hi.
// NaN input lands on `lo`.
fn saturate(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

/// Maps a 0..=100 percentage onto a bounded grade with two linear segments:
/// `(0 -> min_grade) .. (pass -> 4.0) .. (100 -> max_grade)`.
///
/// Out-of-range input saturates instead of erroring. A degenerate segment
/// (pass at 0 or 100) resolves to the pass grade at the pass point and to the
/// segment's far end otherwise. The result is clamped to
/// `[min_grade, max_grade]` and rounded to one decimal; a clamped value is
/// returned as the bound itself.
pub fn to_grade(percentage: f64, min_grade: f64, pass_percentage: f64, max_grade: f64) -> f64 {
    let pct = saturate(percentage, 0.0, 100.0);
    let pass = saturate(pass_percentage, 0.0, 100.0);

    let raw = if pct >= pass {
        let span = 100.0 - pass;
        if span <= 0.0 {
            if pct == pass {
                PASS_GRADE
            } else {
                max_grade
            }
        } else {
            PASS_GRADE + (pct - pass) * (max_grade - PASS_GRADE) / span
        }
    } else if pass <= 0.0 {
        min_grade
    } else {
        min_grade + pct * (PASS_GRADE - min_grade) / pass
    };

    let bounded = saturate(raw, min_grade, max_grade);
    if bounded <= min_grade || bounded >= max_grade {
        return bounded;
    }
    // Bounds off the one-decimal grid would otherwise round past themselves.
    saturate(round_off_1_decimal(bounded), min_grade, max_grade)
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("assessment has non-positive max score ({max_score})")]
    InvalidAssessment { max_score: f64 },
    #[error("assessment has invalid weight ({weight})")]
    InvalidWeight { weight: f64 },
    #[error("no weighted grades to average")]
    NoGrades,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredResult {
    pub score: f64,
    pub max_score: f64,
    pub weight: f64,
}

/// Weight-normalised average of `score / max_score`, as a percentage.
///
/// Terms are summed in a canonical order so any permutation of `results`
/// yields the same bits.
pub fn weighted_percentage<I>(results: I) -> Result<f64, CalcError>
where
    I: IntoIterator<Item = ScoredResult>,
{
    let mut terms: Vec<(f64, f64)> = Vec::new();
    for r in results {
        if !r.max_score.is_finite() || r.max_score <= 0.0 {
            return Err(CalcError::InvalidAssessment {
                max_score: r.max_score,
            });
        }
        if !r.weight.is_finite() || r.weight < 0.0 {
            return Err(CalcError::InvalidWeight { weight: r.weight });
        }
        terms.push((r.score / r.max_score * r.weight, r.weight));
    }

    terms.sort_by(|a, b| match a.0.total_cmp(&b.0) {
        Ordering::Equal => a.1.total_cmp(&b.1),
        other => other,
    });

    let mut weighted_sum = 0.0_f64;
    let mut weight_total = 0.0_f64;
    for (term, weight) in &terms {
        weighted_sum += term;
        weight_total += weight;
    }

    if weight_total <= 0.0 {
        return Err(CalcError::NoGrades);
    }
    Ok(100.0 * weighted_sum / weight_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn r(score: f64, max_score: f64, weight: f64) -> ScoredResult {
        ScoredResult {
            score,
            max_score,
            weight,
        }
    }

    #[test]
    fn round_off_half_up() {
        assert_eq!(round_off_1_decimal(0.0), 0.0);
        assert_eq!(round_off_1_decimal(3.54), 3.5);
        assert_eq!(round_off_1_decimal(3.55), 3.6);
        assert_eq!(round_off_1_decimal(4.9999), 5.0);
    }

    #[test]
    fn chilean_scale_reference_points() {
        let s = ScaleConfig::default();
        assert_eq!(s.grade_for(0.0), 1.0);
        assert_eq!(s.grade_for(60.0), 4.0);
        assert_eq!(s.grade_for(100.0), 7.0);
        assert_eq!(s.grade_for(30.0), 2.5);
        assert_eq!(s.grade_for(80.0), 5.5);
    }

    #[test]
    fn out_of_range_percentages_saturate() {
        let s = ScaleConfig::default();
        assert_eq!(s.grade_for(-15.0), 1.0);
        assert_eq!(s.grade_for(140.0), 7.0);
        assert_eq!(s.grade_for(f64::NAN), 1.0);
    }

    #[test]
    fn degenerate_upper_segment_when_pass_is_100() {
        assert_eq!(to_grade(100.0, 1.0, 100.0, 7.0), 4.0);
        assert_eq!(to_grade(99.0, 1.0, 100.0, 7.0), 4.0);
        assert_eq!(to_grade(0.0, 1.0, 100.0, 7.0), 1.0);
    }

    #[test]
    fn degenerate_lower_segment_when_pass_is_0() {
        assert_eq!(to_grade(0.0, 1.0, 0.0, 7.0), 4.0);
        assert_eq!(to_grade(100.0, 1.0, 0.0, 7.0), 7.0);
        assert_eq!(to_grade(50.0, 1.0, 0.0, 7.0), 5.5);
    }

    #[test]
    fn bounds_off_the_decimal_grid_are_not_crossed() {
        let s = ScaleConfig {
            min_grade: 1.05,
            pass_percentage: 60.0,
            max_grade: 6.95,
        };
        assert!(s.validate().is_ok());
        assert_eq!(s.grade_for(0.0), 1.05);
        assert_eq!(s.grade_for(140.0), 6.95);
        assert_eq!(s.grade_for(60.0), 4.0);
        for pct in [1.0, 99.0, 99.9, 100.0] {
            let g = s.grade_for(pct);
            assert!(g >= 1.05 && g <= 6.95, "grade {g} for {pct}% leaves the scale");
        }
    }

    #[test]
    fn inverted_scale_does_not_panic() {
        let g = to_grade(50.0, 7.0, 60.0, 1.0);
        assert!(g.is_finite());
    }

    #[test]
    fn scale_validation() {
        assert!(ScaleConfig::default().validate().is_ok());
        let bad_pass = ScaleConfig {
            pass_percentage: 120.0,
            ..ScaleConfig::default()
        };
        assert!(bad_pass.validate().is_err());
        let bad_min = ScaleConfig {
            min_grade: 4.5,
            ..ScaleConfig::default()
        };
        assert!(bad_min.validate().is_err());
        let bad_nan = ScaleConfig {
            max_grade: f64::NAN,
            ..ScaleConfig::default()
        };
        assert!(bad_nan.validate().is_err());
    }

    #[test]
    fn equal_weights_average() {
        let pct = weighted_percentage(vec![r(50.0, 100.0, 1.0), r(100.0, 100.0, 1.0)])
            .expect("weighted");
        assert_eq!(pct, 75.0);
    }

    #[test]
    fn weights_and_max_scores_are_respected() {
        let pct = weighted_percentage(vec![r(60.0, 100.0, 1.0), r(80.0, 100.0, 2.0)])
            .expect("weighted");
        assert!((pct - 73.333_333).abs() < 1e-4);

        let pct = weighted_percentage(vec![r(15.0, 20.0, 1.0)]).expect("weighted");
        assert!((pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn zero_weight_results_do_not_move_the_average() {
        let base = weighted_percentage(vec![r(70.0, 100.0, 1.0)]).expect("base");
        let with_zero =
            weighted_percentage(vec![r(70.0, 100.0, 1.0), r(0.0, 100.0, 0.0)]).expect("zero");
        assert_eq!(base, with_zero);
    }

    #[test]
    fn no_grades_when_empty_or_weightless() {
        assert_eq!(
            weighted_percentage(Vec::<ScoredResult>::new()),
            Err(CalcError::NoGrades)
        );
        assert_eq!(
            weighted_percentage(vec![r(10.0, 100.0, 0.0), r(90.0, 100.0, 0.0)]),
            Err(CalcError::NoGrades)
        );
    }

    #[test]
    fn non_positive_max_score_is_rejected() {
        let e = weighted_percentage(vec![r(10.0, 100.0, 1.0), r(5.0, 0.0, 1.0)]);
        assert_eq!(e, Err(CalcError::InvalidAssessment { max_score: 0.0 }));
        let e = weighted_percentage(vec![r(5.0, -10.0, 1.0)]);
        assert!(matches!(e, Err(CalcError::InvalidAssessment { .. })));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let e = weighted_percentage(vec![r(10.0, 100.0, -1.0)]);
        assert_eq!(e, Err(CalcError::InvalidWeight { weight: -1.0 }));
    }

    fn arb_scale() -> impl Strategy<Value = ScaleConfig> {
        (0.0f64..=4.0, 1u32..=99, 4.0f64..=10.0).prop_map(|(min, pass, max)| ScaleConfig {
            min_grade: min,
            pass_percentage: f64::from(pass),
            max_grade: max,
        })
    }

    /// Bounds on the one-decimal grid, where the endpoints are exact.
    fn arb_decimal_scale() -> impl Strategy<Value = ScaleConfig> {
        (10u32..=40, 1u32..=99, 40u32..=100).prop_map(|(min, pass, max)| ScaleConfig {
            min_grade: f64::from(min) / 10.0,
            pass_percentage: f64::from(pass),
            max_grade: f64::from(max) / 10.0,
        })
    }

    fn arb_result() -> impl Strategy<Value = ScoredResult> {
        (0u32..=200, 1u32..=200, 0u32..=5).prop_map(|(score, max, weight)| ScoredResult {
            score: f64::from(score.min(max)),
            max_score: f64::from(max),
            weight: f64::from(weight) * 0.5,
        })
    }

    proptest! {
        #[test]
        fn grade_stays_within_bounds(scale in arb_scale(), pct in 0.0f64..=100.0) {
            let g = scale.grade_for(pct);
            prop_assert!(g >= scale.min_grade && g <= scale.max_grade);
        }

        #[test]
        fn pass_point_maps_to_pass_grade(scale in arb_scale()) {
            prop_assert_eq!(scale.grade_for(scale.pass_percentage), PASS_GRADE);
        }

        #[test]
        fn endpoints_map_to_bounds(scale in arb_decimal_scale()) {
            prop_assert_eq!(scale.grade_for(0.0), scale.min_grade);
            prop_assert_eq!(scale.grade_for(100.0), scale.max_grade);
        }

        #[test]
        fn conversion_is_monotonic(scale in arb_scale(), a in 0.0f64..=100.0, b in 0.0f64..=100.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(scale.grade_for(lo) <= scale.grade_for(hi));
        }

        #[test]
        fn aggregation_ignores_input_order(
            results in prop::collection::vec(arb_result(), 1..12),
            seed in any::<u64>(),
        ) {
            let mut shuffled = results.clone();
            // Deterministic Fisher-Yates driven by the proptest seed.
            let mut state = seed | 1;
            for i in (1..shuffled.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let j = (state % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }
            prop_assert_eq!(weighted_percentage(results), weighted_percentage(shuffled));
        }
    }
}
