use std::fmt::Write as FmtWrite;

use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::aggregation::{aggregate, field_ordering, round_half_up, FieldAggregate, Statistic};
use crate::config::AnalysisConfig;
use crate::error::{NpactError, Result};
use crate::model::{
    has_between_contrast, is_eligible_social_psych_comparison, is_irap, is_nhst_eligible,
    StudyData,
};
use crate::power::{correlation_power, false_discovery_rate, power_percent, two_sample_power};
use crate::schema::{agg, field, study, year_label};
use crate::table::{build_wide_table, WideRow, WideTable};
use crate::trend::{
    fit_field_interaction, fit_year_trend, years_until_power, PowerProjection, TrendFit,
};

/// Which report to produce. The expanded variant restricts the comparison
/// corpus to the eligible social-psychology subset and adds the trend
/// models; everything else is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum ReportVariant {
    Original,
    Expanded,
}

/// Every derived output of one report run.
///
/// The wide tables are presentation-ready; the long DataFrames are the
/// per-(field, year) aggregates the trend models and figures consume.
pub struct Report {
    pub variant: ReportVariant,
    /// Field order established by the first table and threaded to every
    /// later stage.
    pub field_ordering: Vec<FieldAggregate>,
    pub n_per_study: WideTable,
    pub n_per_cell: WideTable,
    pub power_per_cell: WideTable,
    pub power_per_study: WideTable,
    pub fdr_snapshots: FdrTable,
    pub irap_descriptives: WideTable,
    pub long_median_n: DataFrame,
    pub long_median_n_per_cell: DataFrame,
    pub long_power_per_cell: DataFrame,
    pub long_power_per_study: DataFrame,
    pub trends: Option<TrendSummaries>,
}

/// Regression summaries produced by the expanded variant.
#[derive(Debug, Clone, Serialize)]
pub struct TrendSummaries {
    /// Median N per study vs year, field interaction (IRAP as reference).
    pub median_n: TrendFit,
    /// Implied per-cell power (proportion) vs year, field interaction.
    pub power_per_cell: TrendFit,
    /// Implied per-cell power vs year within the IRAP field alone.
    pub irap_power: TrendFit,
    /// Extrapolation of the IRAP power trend to the target power.
    pub projection: PowerProjection,
}

/// Run the full pipeline over normalized study data.
pub fn run_report(
    data: &StudyData,
    variant: ReportVariant,
    config: &AnalysisConfig,
) -> Result<Report> {
    config.validate()?;
    info!(?variant, "running report pipeline");

    // Per-study analyses operate on the NHST-eligible subset.
    let nhst = data.subset(is_nhst_eligible())?;
    let long_median_n = aggregate(&nhst, study::N, Statistic::Median)?;

    // The first table fixes the field ordering for every later table.
    let ordering = field_ordering(&long_median_n)?;
    let n_per_study = build_wide_table(
        &long_median_n,
        &ordering,
        "Median sample size per study (NHST-eligible)",
        0,
    )?;

    // Per-cell analyses additionally need a between-groups contrast, and
    // only rows with a defined N-per-cell ratio enter the groups; the
    // expanded variant further restricts the comparison corpus.
    let per_cell_predicate = match variant {
        ReportVariant::Original => is_nhst_eligible().and(has_between_contrast()),
        ReportVariant::Expanded => is_nhst_eligible().and(is_eligible_social_psych_comparison()),
    };
    let per_cell = data.subset(per_cell_predicate.and(col(study::N_PER_CELL).is_not_null()))?;
    let long_median_n_per_cell = aggregate(&per_cell, study::N_PER_CELL, Statistic::Median)?;
    let n_per_cell = build_wide_table(
        &long_median_n_per_cell,
        &ordering,
        "Median sample size per cell (between-groups contrasts)",
        0,
    )?;

    // Implied power from the fixed effect-size conventions.
    let long_power_per_cell = map_values(&long_median_n_per_cell, |n| {
        two_sample_power(n, config.effect_size_d, config.alpha)
    })?;
    let long_power_per_study = map_values(&long_median_n, |n| {
        correlation_power(n, config.effect_size_r, config.alpha)
    })?;

    let power_per_cell = build_wide_table(
        &map_values(&long_power_per_cell, |p| Ok(power_percent(p)))?,
        &ordering,
        "Implied power (%) at the per-cell median, d = 0.408",
        0,
    )?;
    let power_per_study = build_wide_table(
        &map_values(&long_power_per_study, |p| Ok(power_percent(p)))?,
        &ordering,
        "Implied power (%) at the per-study median, r = 0.20",
        0,
    )?;

    let fdr_snapshots = build_fdr_table(&long_power_per_cell, &ordering, config)?;
    let irap_descriptives = build_irap_descriptives(data)?;

    let trends = match variant {
        ReportVariant::Original => None,
        ReportVariant::Expanded => Some(fit_trends(
            &long_median_n,
            &long_power_per_cell,
            config,
        )?),
    };

    Ok(Report {
        variant,
        field_ordering: ordering,
        n_per_study,
        n_per_cell,
        power_per_cell,
        power_per_study,
        fdr_snapshots,
        irap_descriptives,
        long_median_n,
        long_median_n_per_cell,
        long_power_per_cell,
        long_power_per_study,
        trends,
    })
}

/// Machine-readable form of the rendered tables, written alongside the
/// markdown report.
#[derive(Debug, Clone, Serialize)]
pub struct TableExport<'a> {
    pub variant: ReportVariant,
    pub field_ordering: &'a [FieldAggregate],
    pub n_per_study: &'a WideTable,
    pub n_per_cell: &'a WideTable,
    pub power_per_cell: &'a WideTable,
    pub power_per_study: &'a WideTable,
    pub fdr_snapshots: &'a FdrTable,
    pub irap_descriptives: &'a WideTable,
}

// ── FDR snapshots ───────────────────────────────────────────────────────────

/// Estimated false-discovery rates at the first and last year of interest,
/// two columns per year (one per assumed null prior).
#[derive(Debug, Clone, Serialize)]
pub struct FdrTable {
    pub title: String,
    pub column_labels: Vec<String>,
    pub rows: Vec<FdrRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FdrRow {
    pub field: String,
    pub cells: Vec<Option<f64>>,
}

impl FdrTable {
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "### {}", self.title);
        let _ = writeln!(out);
        let _ = write!(out, "| Field |");
        for label in &self.column_labels {
            let _ = write!(out, " {label} |");
        }
        let _ = writeln!(out);
        let _ = write!(out, "|---|");
        for _ in &self.column_labels {
            let _ = write!(out, "---|");
        }
        let _ = writeln!(out);
        for row in &self.rows {
            let _ = write!(out, "| {} |", row.field);
            for cell in &row.cells {
                match cell {
                    Some(v) => {
                        let _ = write!(out, " {v:.2} |");
                    }
                    None => {
                        let _ = write!(out, "  |");
                    }
                }
            }
            let _ = writeln!(out);
        }
        out
    }
}

fn build_fdr_table(
    long_power: &DataFrame,
    ordering: &[FieldAggregate],
    config: &AnalysisConfig,
) -> Result<FdrTable> {
    let years = long_power.column(study::YEAR)?.i32()?;
    let (first_year, last_year) = match (years.min(), years.max()) {
        (Some(min), Some(max)) => (min, max),
        _ => {
            return Err(NpactError::Validation(
                "cannot take FDR snapshots of an empty power table".to_string(),
            ))
        }
    };

    let fields = long_power.column(study::FIELD)?.str()?;
    let values = long_power.column(agg::VALUE)?.f64()?;
    let power_at = |field_name: &str, year: i32| -> Option<f64> {
        (0..long_power.height()).find_map(|i| {
            match (fields.get(i), years.get(i), values.get(i)) {
                (Some(f), Some(y), Some(v)) if f == field_name && y == year => Some(v),
                _ => None,
            }
        })
    };

    let mut column_labels = Vec::new();
    for year in [first_year, last_year] {
        for prior in &config.null_priors {
            column_labels.push(format!("{} (π₀ = {prior:.2})", year_label(year)));
        }
    }

    let mut rows = Vec::with_capacity(ordering.len());
    for entry in ordering {
        let mut cells = Vec::with_capacity(column_labels.len());
        for year in [first_year, last_year] {
            for &prior in &config.null_priors {
                let cell = match power_at(&entry.field, year) {
                    Some(power) => Some(round_half_up(
                        false_discovery_rate(power, prior, config.alpha)?,
                        2,
                    )),
                    None => None,
                };
                cells.push(cell);
            }
        }
        rows.push(FdrRow {
            field: entry.field.clone(),
            cells,
        });
    }

    Ok(FdrTable {
        title: format!(
            "Estimated false-discovery rate at {} and {}",
            year_label(first_year),
            year_label(last_year)
        ),
        column_labels,
        rows,
    })
}

// ── IRAP descriptives ───────────────────────────────────────────────────────

/// Per-year descriptive statistics of IRAP sample sizes over the
/// NHST-eligible IRAP subset, one row per statistic. The MAP (half-sample
/// mode) estimator is applied to this subset only.
fn build_irap_descriptives(data: &StudyData) -> Result<WideTable> {
    let irap = data.subset(is_irap().and(is_nhst_eligible()))?;

    let statistics = [
        Statistic::Median,
        Statistic::Mad,
        Statistic::Min,
        Statistic::Max,
        Statistic::MapEstimate,
        Statistic::Count,
    ];

    let mut year_labels: Vec<String> = Vec::new();
    let mut rows: Vec<WideRow> = Vec::with_capacity(statistics.len());
    for statistic in statistics {
        let long = aggregate(&irap, study::N, statistic)?;
        let relabeled = long
            .lazy()
            .with_column(lit(statistic.name()).alias(study::FIELD))
            .collect()?;
        let table = build_wide_table(
            &relabeled,
            &[FieldAggregate {
                field: statistic.name().to_string(),
                aggregate: median_of(&relabeled)?,
            }],
            "",
            1,
        )?;
        year_labels = table.year_labels.clone();
        rows.extend(table.rows);
    }

    Ok(WideTable {
        title: "IRAP sample size descriptives (NHST-eligible subset)".to_string(),
        year_labels,
        rows,
    })
}

fn median_of(long: &DataFrame) -> Result<f64> {
    let mut values: Vec<f64> = long
        .column(agg::VALUE)?
        .f64()?
        .into_iter()
        .flatten()
        .collect();
    if values.is_empty() {
        return Err(NpactError::Validation(
            "no values to summarize in descriptives".to_string(),
        ));
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    Ok(if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    })
}

// ── Trends ──────────────────────────────────────────────────────────────────

fn fit_trends(
    long_median_n: &DataFrame,
    long_power_per_cell: &DataFrame,
    config: &AnalysisConfig,
) -> Result<TrendSummaries> {
    let median_n = fit_field_interaction(long_median_n, "median_n", field::IRAP)?;
    let power_interaction =
        fit_field_interaction(long_power_per_cell, "power_per_cell", field::IRAP)?;

    let irap_power_long = long_power_per_cell
        .clone()
        .lazy()
        .filter(col(study::FIELD).eq(lit(field::IRAP)))
        .collect()?;
    let irap_power = fit_year_trend(&irap_power_long, "irap_power_per_cell")?;

    let last_year = irap_power_long
        .column(study::YEAR)?
        .i32()?
        .max()
        .ok_or_else(|| {
            NpactError::Validation("no IRAP power data to extrapolate".to_string())
        })?;
    let reference_power = irap_power.predict(f64::from(last_year - irap_power.base_year));
    let projection = years_until_power(
        last_year,
        reference_power,
        irap_power.slope().estimate,
        config.target_power,
    )?;

    Ok(TrendSummaries {
        median_n,
        power_per_cell: power_interaction,
        irap_power,
        projection,
    })
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Map the value column of a long aggregate table through `f`, keeping
/// the group keys and study counts.
fn map_values<F>(long: &DataFrame, f: F) -> Result<DataFrame>
where
    F: Fn(f64) -> Result<f64>,
{
    let values = long.column(agg::VALUE)?.f64()?;
    let mapped: Vec<f64> = values
        .into_iter()
        .map(|v| match v {
            Some(v) => f(v),
            None => Err(NpactError::Validation(
                "null value in aggregate table".to_string(),
            )),
        })
        .collect::<Result<_>>()?;

    let mut out = long.clone();
    out.replace(agg::VALUE, Series::new(agg::VALUE.into(), mapped))?;
    Ok(out)
}

impl Report {
    /// The tables in serializable form, borrowed from the report.
    pub fn tables(&self) -> TableExport<'_> {
        TableExport {
            variant: self.variant,
            field_ordering: &self.field_ordering,
            n_per_study: &self.n_per_study,
            n_per_cell: &self.n_per_cell,
            power_per_cell: &self.power_per_cell,
            power_per_study: &self.power_per_study,
            fdr_snapshots: &self.fdr_snapshots,
            irap_descriptives: &self.irap_descriptives,
        }
    }

    /// Render the whole report as one markdown document.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# N-pact report ({:?} variant)", self.variant);
        let _ = writeln!(out);
        for table in [
            &self.n_per_study,
            &self.n_per_cell,
            &self.power_per_cell,
            &self.power_per_study,
            &self.irap_descriptives,
        ] {
            let _ = writeln!(out, "{}", table.to_markdown());
        }
        let _ = writeln!(out, "{}", self.fdr_snapshots.to_markdown());

        if let Some(trends) = &self.trends {
            let _ = writeln!(out, "## Trend models");
            let _ = writeln!(out);
            for fit in [&trends.median_n, &trends.power_per_cell, &trends.irap_power] {
                let _ = writeln!(out, "### {} ~ year (base {})", fit.response, fit.base_year);
                let _ = writeln!(out);
                for c in &fit.coefficients {
                    let _ = writeln!(
                        out,
                        "- {}: {:.4} [{:.4}, {:.4}], p = {:.4}",
                        c.term, c.estimate, c.ci_low, c.ci_high, c.p_value
                    );
                }
                let _ = writeln!(out);
            }
            let p = &trends.projection;
            let _ = writeln!(
                out,
                "At the fitted rate of change ({:.4}/year), predicted power first reaches \
                 {:.0}% in {} ({} years from {}).",
                p.slope_per_year,
                p.target_power * 100.0,
                p.target_year,
                p.years_until_target,
                p.reference_year
            );
        }
        out
    }
}
