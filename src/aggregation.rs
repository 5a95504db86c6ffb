use polars::prelude::*;
use serde::Serialize;

use crate::error::{NpactError, Result};
use crate::schema::{agg, study};

/// Consistency constant for the median absolute deviation, matching the
/// R `mad()` default scaling for normal data.
pub const MAD_CONSISTENCY: f64 = 1.4826;

/// Summary statistic computed per (field, year) group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Median,
    Mad,
    Min,
    Max,
    Sum,
    Count,
    /// Maximum-a-posteriori estimate via the half-sample mode, a
    /// continuous-variable mode estimator. Applied to the NHST-eligible
    /// IRAP subset only.
    MapEstimate,
}

impl Statistic {
    pub fn name(self) -> &'static str {
        match self {
            Self::Median => "median",
            Self::Mad => "mad",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::MapEstimate => "map_estimate",
        }
    }

    fn compute(self, values: &mut Vec<f64>) -> f64 {
        values.sort_by(f64::total_cmp);
        match self {
            Self::Median => median_sorted(values),
            Self::Mad => mad_sorted(values),
            Self::Min => values[0],
            Self::Max => values[values.len() - 1],
            Self::Sum => values.iter().sum(),
            Self::Count => values.len() as f64,
            Self::MapEstimate => half_sample_mode(values),
        }
    }
}

/// Round toward positive infinity at the tie, i.e. `0.5 → 1`, `1.5 → 2`,
/// `-0.5 → 0`. Published report numbers were produced with this rule;
/// banker's rounding would not reproduce them.
///
/// Decimal ties such as 0.285 land just below the true tie in binary
/// (`0.285 * 100 == 28.499999999999996`); the epsilon nudge absorbs that
/// representation error before flooring, matching R's
/// `janitor::round_half_up`.
pub fn round_half_up(x: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (x * factor + 0.5 + f64::EPSILON.sqrt()).floor() / factor
}

/// Group `df` by (field, publication year) and compute `statistic` over the
/// non-null values of `metric`, plus the distinct-study count backing each
/// group.
///
/// Groups whose every `metric` value is null are a [`NpactError::MissingData`]
/// error: a median over nothing would misrepresent sample coverage. Groups
/// entirely absent from `df` simply do not appear in the output; the table
/// builder renders those as empty cells.
pub fn aggregate(df: &DataFrame, metric: &str, statistic: Statistic) -> Result<DataFrame> {
    let partitions = df.partition_by([study::FIELD, study::YEAR], true)?;

    let mut fields: Vec<String> = Vec::with_capacity(partitions.len());
    let mut years: Vec<i32> = Vec::with_capacity(partitions.len());
    let mut values: Vec<f64> = Vec::with_capacity(partitions.len());
    let mut counts: Vec<u32> = Vec::with_capacity(partitions.len());

    for partition in &partitions {
        let field = partition
            .column(study::FIELD)?
            .str()?
            .get(0)
            .unwrap_or_default()
            .to_string();
        let year = partition
            .column(study::YEAR)?
            .i32()?
            .get(0)
            .unwrap_or_default();

        let metric_values = partition
            .column(metric)?
            .as_materialized_series()
            .cast(&DataType::Float64)?;
        let mut group_values: Vec<f64> = metric_values.f64()?.into_iter().flatten().collect();

        if group_values.is_empty() {
            return Err(NpactError::MissingData {
                statistic: statistic.name().to_string(),
                field,
                year,
            });
        }

        let k = partition
            .column(study::KEY)?
            .as_materialized_series()
            .n_unique()? as u32;

        fields.push(field);
        years.push(year);
        values.push(statistic.compute(&mut group_values));
        counts.push(k);
    }

    let out = DataFrame::new(vec![
        Series::new(study::FIELD.into(), fields).into(),
        Series::new(study::YEAR.into(), years).into(),
        Series::new(agg::VALUE.into(), values).into(),
        Series::new(agg::K_STUDIES.into(), counts).into(),
    ])?;

    Ok(out.sort(
        [study::FIELD, study::YEAR],
        SortMultipleOptions::default(),
    )?)
}

/// A field together with its across-years aggregate (median of the
/// per-year medians). The vector order produced by [`field_ordering`] is
/// the display order of every output table.
#[derive(Debug, Clone, Serialize)]
pub struct FieldAggregate {
    pub field: String,
    pub aggregate: f64,
}

/// Per-field median across the per-(field, year) values of a long
/// aggregate table, sorted ascending by aggregate and then reversed, so
/// the field with the largest aggregate comes first.
///
/// This value is threaded explicitly to the table builder and the trend
/// models rather than recovered from a previously rendered table.
pub fn field_ordering(long: &DataFrame) -> Result<Vec<FieldAggregate>> {
    let partitions = long.partition_by([study::FIELD], true)?;

    let mut ordering: Vec<FieldAggregate> = Vec::with_capacity(partitions.len());
    for partition in &partitions {
        let field = partition
            .column(study::FIELD)?
            .str()?
            .get(0)
            .unwrap_or_default()
            .to_string();
        let mut values: Vec<f64> = partition
            .column(agg::VALUE)?
            .f64()?
            .into_iter()
            .flatten()
            .collect();
        if values.is_empty() {
            return Err(NpactError::MissingData {
                statistic: "median".to_string(),
                field,
                year: 0,
            });
        }
        values.sort_by(f64::total_cmp);
        ordering.push(FieldAggregate {
            field,
            aggregate: median_sorted(&values),
        });
    }

    ordering.sort_by(|a, b| a.aggregate.total_cmp(&b.aggregate));
    ordering.reverse();
    Ok(ordering)
}

// ── Statistic kernels (sorted input) ────────────────────────────────────────

fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn mad_sorted(sorted: &[f64]) -> f64 {
    let center = median_sorted(sorted);
    let mut deviations: Vec<f64> = sorted.iter().map(|v| (v - center).abs()).collect();
    deviations.sort_by(f64::total_cmp);
    MAD_CONSISTENCY * median_sorted(&deviations)
}

/// Half-sample mode: repeatedly narrow to the densest half of the sorted
/// sample until three or fewer values remain.
fn half_sample_mode(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        1 => sorted[0],
        2 => (sorted[0] + sorted[1]) / 2.0,
        3 => {
            let lower_gap = sorted[1] - sorted[0];
            let upper_gap = sorted[2] - sorted[1];
            if lower_gap < upper_gap {
                (sorted[0] + sorted[1]) / 2.0
            } else if upper_gap < lower_gap {
                (sorted[1] + sorted[2]) / 2.0
            } else {
                sorted[1]
            }
        }
        _ => {
            let half = n.div_ceil(2);
            let mut best_start = 0;
            let mut best_width = sorted[half - 1] - sorted[0];
            for start in 1..=(n - half) {
                let width = sorted[start + half - 1] - sorted[start];
                if width < best_width {
                    best_width = width;
                    best_start = start;
                }
            }
            half_sample_mode(&sorted[best_start..best_start + half])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::fixture;
    use crate::model::is_nhst_eligible;
    use crate::schema::journal;

    #[test]
    fn round_half_up_breaks_ties_upward() {
        assert_eq!(round_half_up(0.5, 0), 1.0);
        assert_eq!(round_half_up(1.5, 0), 2.0);
        assert_eq!(round_half_up(-0.5, 0), 0.0);
        assert_eq!(round_half_up(2.4, 0), 2.0);
    }

    #[test]
    fn round_half_up_handles_inexact_decimal_ties() {
        // These ties sit just below .5 in binary and would floor down
        // without the epsilon correction.
        assert_eq!(round_half_up(0.285, 2), 0.29);
        assert_eq!(round_half_up(1.005, 2), 1.01);
        assert_eq!(round_half_up(2.675, 2), 2.68);
        assert_eq!(round_half_up(-0.285, 2), -0.28);
    }

    #[test]
    fn median_is_invariant_under_reordering_and_duplication() {
        let mut a = vec![40.0, 20.0, 30.0];
        let mut b = vec![30.0, 40.0, 20.0];
        assert_eq!(Statistic::Median.compute(&mut a), 30.0);
        assert_eq!(Statistic::Median.compute(&mut b), 30.0);

        let mut doubled = vec![20.0, 20.0, 30.0, 30.0, 40.0, 40.0];
        assert_eq!(Statistic::Median.compute(&mut doubled), 30.0);
    }

    #[test]
    fn mad_uses_consistency_scaling() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let got = Statistic::Mad.compute(&mut values);
        assert!((got - MAD_CONSISTENCY).abs() < 1e-12);
    }

    #[test]
    fn half_sample_mode_finds_the_dense_cluster() {
        let mut values = vec![1.0, 10.0, 10.5, 11.0, 50.0, 100.0];
        let got = Statistic::MapEstimate.compute(&mut values);
        assert!((10.0..=11.0).contains(&got), "got {got}");
    }

    #[test]
    fn aggregate_computes_median_and_distinct_study_count() {
        let data = fixture(&[
            ("a", journal::IRAP, 2011, Some(20), "between", Some(2), true, None),
            ("b", journal::IRAP, 2011, Some(30), "between", Some(2), true, None),
            ("c", journal::IRAP, 2011, Some(40), "between", Some(2), true, None),
            ("d", journal::IRAP, 2012, Some(50), "between", Some(2), true, None),
        ]);
        let eligible = data.subset(is_nhst_eligible()).unwrap();
        let long = aggregate(&eligible, crate::schema::study::N, Statistic::Median).unwrap();

        assert_eq!(long.height(), 2);
        let values = long.column(agg::VALUE).unwrap().f64().unwrap();
        let counts = long.column(agg::K_STUDIES).unwrap().u32().unwrap();
        assert_eq!(values.get(0), Some(30.0));
        assert_eq!(counts.get(0), Some(3));
        assert_eq!(values.get(1), Some(50.0));
        assert_eq!(counts.get(1), Some(1));
    }

    #[test]
    fn aggregate_fails_on_group_with_no_eligible_values() {
        let data = fixture(&[
            ("a", journal::IRAP, 2011, None, "between", Some(2), true, None),
        ]);
        let err = aggregate(data.records(), crate::schema::study::N, Statistic::Median)
            .unwrap_err();
        assert!(matches!(err, NpactError::MissingData { year: 2011, .. }));
    }

    #[test]
    fn field_ordering_sorts_ascending_then_reverses() {
        let long = df![
            study::FIELD => ["A", "A", "B", "B"],
            study::YEAR => [2011, 2012, 2011, 2012],
            agg::VALUE => [38.0, 42.0, 24.0, 26.0],
            agg::K_STUDIES => [3u32, 3, 3, 3],
        ]
        .unwrap();
        let ordering = field_ordering(&long).unwrap();
        assert_eq!(ordering[0].field, "A");
        assert_eq!(ordering[0].aggregate, 40.0);
        assert_eq!(ordering[1].field, "B");
        assert_eq!(ordering[1].aggregate, 25.0);
    }
}
