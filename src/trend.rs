use polars::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{NpactError, Result};
use crate::schema::{agg, study};

/// One fitted regression term.
#[derive(Debug, Clone, Serialize)]
pub struct Coefficient {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub p_value: f64,
}

/// Ordinary-least-squares fit of an aggregate statistic against
/// recentered publication year.
///
/// Year is recentered by subtracting `base_year` (the earliest observed
/// year), so the intercept is the fitted value for that calendar year.
#[derive(Debug, Clone, Serialize)]
pub struct TrendFit {
    pub response: String,
    pub base_year: i32,
    pub residual_df: f64,
    pub coefficients: Vec<Coefficient>,
}

impl TrendFit {
    pub fn intercept(&self) -> &Coefficient {
        &self.coefficients[0]
    }

    pub fn slope(&self) -> &Coefficient {
        &self.coefficients[1]
    }

    /// The year×field interaction term, present only on interaction fits.
    pub fn interaction(&self) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.term.contains(':'))
    }

    /// Model prediction at a recentered year.
    pub fn predict(&self, year_recentered: f64) -> f64 {
        self.intercept().estimate + self.slope().estimate * year_recentered
    }
}

/// Fit `value ~ year_recentered` over the rows of a long aggregate table.
/// Intended for a single-field table; rows from every field present are
/// pooled.
pub fn fit_year_trend(long: &DataFrame, response: &str) -> Result<TrendFit> {
    let years = column_i32(long, study::YEAR)?;
    let values = column_f64(long, agg::VALUE)?;

    let base_year = *years
        .iter()
        .min()
        .ok_or_else(|| NpactError::Validation(format!("no rows to fit trend for {response}")))?;

    let design: Vec<Vec<f64>> = years
        .iter()
        .map(|&y| vec![1.0, f64::from(y - base_year)])
        .collect();

    let (coefficients, residual_df) = ols(
        &design,
        &values,
        &["(intercept)".to_string(), "year".to_string()],
    )?;

    Ok(TrendFit {
        response: response.to_string(),
        base_year,
        residual_df,
        coefficients,
    })
}

/// Fit `value ~ year_recentered * field` over a two-field long aggregate
/// table, with `reference_field` releveled as the reference category.
///
/// The interaction coefficient tests whether the rate of change differs
/// between the two fields.
pub fn fit_field_interaction(
    long: &DataFrame,
    response: &str,
    reference_field: &str,
) -> Result<TrendFit> {
    let fields = long.column(study::FIELD)?.str()?;
    let years = column_i32(long, study::YEAR)?;
    let values = column_f64(long, agg::VALUE)?;

    let base_year = *years
        .iter()
        .min()
        .ok_or_else(|| NpactError::Validation(format!("no rows to fit trend for {response}")))?;

    let mut other_field: Option<String> = None;
    let mut design: Vec<Vec<f64>> = Vec::with_capacity(values.len());
    for (i, &year) in years.iter().enumerate() {
        let field = fields.get(i).ok_or_else(|| {
            NpactError::Validation("null field in aggregate table".to_string())
        })?;
        let is_other = if field == reference_field {
            0.0
        } else {
            match &other_field {
                Some(existing) if existing != field => {
                    return Err(NpactError::Validation(format!(
                        "interaction model expects two fields, found '{existing}', '{field}' \
                         besides '{reference_field}'"
                    )))
                }
                _ => {
                    other_field.get_or_insert_with(|| field.to_string());
                    1.0
                }
            }
        };
        let year_c = f64::from(year - base_year);
        design.push(vec![1.0, year_c, is_other, year_c * is_other]);
    }

    let other = other_field.ok_or_else(|| {
        NpactError::Validation(format!(
            "interaction model needs a second field besides '{reference_field}'"
        ))
    })?;

    let (coefficients, residual_df) = ols(
        &design,
        &values,
        &[
            "(intercept)".to_string(),
            "year".to_string(),
            format!("field[{other}]"),
            format!("year:field[{other}]"),
        ],
    )?;

    Ok(TrendFit {
        response: response.to_string(),
        base_year,
        residual_df,
        coefficients,
    })
}

/// Years until the fitted power trend first reaches the target.
#[derive(Debug, Clone, Serialize)]
pub struct PowerProjection {
    pub reference_year: i32,
    pub reference_power: f64,
    pub slope_per_year: f64,
    pub target_power: f64,
    pub years_until_target: u32,
    pub target_year: i32,
}

/// Whole years (rounded up) until the linear power trend, anchored at an
/// explicit reference year and that year's predicted power, first reaches
/// or exceeds `target_power`.
pub fn years_until_power(
    reference_year: i32,
    reference_power: f64,
    slope_per_year: f64,
    target_power: f64,
) -> Result<PowerProjection> {
    let years_until_target = if reference_power >= target_power {
        0
    } else if slope_per_year <= 0.0 {
        return Err(NpactError::Validation(format!(
            "power trend slope {slope_per_year} never reaches target {target_power}"
        )));
    } else {
        ((target_power - reference_power) / slope_per_year).ceil() as u32
    };

    Ok(PowerProjection {
        reference_year,
        reference_power,
        slope_per_year,
        target_power,
        years_until_target,
        target_year: reference_year + years_until_target as i32,
    })
}

// ── OLS core ────────────────────────────────────────────────────────────────

const CI_LEVEL: f64 = 0.95;

fn ols(design: &[Vec<f64>], y: &[f64], terms: &[String]) -> Result<(Vec<Coefficient>, f64)> {
    let n = y.len();
    let k = terms.len();
    if n <= k {
        return Err(NpactError::Validation(format!(
            "{n} observations cannot support {k} regression terms"
        )));
    }

    // Normal equations: beta = (X'X)^-1 X'y
    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, &yi) in design.iter().zip(y) {
        for j in 0..k {
            xty[j] += row[j] * yi;
            for l in 0..k {
                xtx[j][l] += row[j] * row[l];
            }
        }
    }

    let inv = invert(xtx).ok_or_else(|| {
        NpactError::Validation("singular design matrix in trend fit".to_string())
    })?;

    let beta: Vec<f64> = (0..k)
        .map(|j| (0..k).map(|l| inv[j][l] * xty[l]).sum())
        .collect();

    let rss: f64 = design
        .iter()
        .zip(y)
        .map(|(row, &yi)| {
            let fitted: f64 = row.iter().zip(&beta).map(|(x, b)| x * b).sum();
            (yi - fitted).powi(2)
        })
        .sum();

    let residual_df = (n - k) as f64;
    let sigma2 = rss / residual_df;

    let t_dist = StudentsT::new(0.0, 1.0, residual_df)
        .map_err(|e| NpactError::Validation(format!("Student-t with df {residual_df}: {e}")))?;
    let t_crit = t_dist.inverse_cdf(0.5 + CI_LEVEL / 2.0);

    let coefficients = terms
        .iter()
        .enumerate()
        .map(|(j, term)| {
            let estimate = beta[j];
            let std_error = (sigma2 * inv[j][j]).sqrt();
            let p_value = if std_error == 0.0 {
                0.0
            } else {
                2.0 * (1.0 - t_dist.cdf((estimate / std_error).abs()))
            };
            Coefficient {
                term: term.clone(),
                estimate,
                std_error,
                ci_low: estimate - t_crit * std_error,
                ci_high: estimate + t_crit * std_error,
                p_value,
            }
        })
        .collect();

    Ok((coefficients, residual_df))
}

/// Gauss-Jordan inverse with partial pivoting; the matrices here are at
/// most 4×4.
fn invert(mut m: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let k = m.len();
    let mut inv: Vec<Vec<f64>> = (0..k)
        .map(|i| (0..k).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..k {
        let pivot_row = (col..k)
            .max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let pivot = m[col][col];
        for j in 0..k {
            m[col][j] /= pivot;
            inv[col][j] /= pivot;
        }
        for row in 0..k {
            if row != col {
                let factor = m[row][col];
                for j in 0..k {
                    m[row][j] -= factor * m[col][j];
                    inv[row][j] -= factor * inv[col][j];
                }
            }
        }
    }
    Some(inv)
}

fn column_i32(df: &DataFrame, name: &str) -> Result<Vec<i32>> {
    Ok(df.column(name)?.i32()?.into_iter().flatten().collect())
}

fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    Ok(df.column(name)?.f64()?.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_field_long(years: &[i32], values: &[f64]) -> DataFrame {
        df![
            study::FIELD => vec!["IRAP research"; years.len()],
            study::YEAR => years,
            agg::VALUE => values,
            agg::K_STUDIES => vec![3u32; years.len()],
        ]
        .unwrap()
    }

    #[test]
    fn recentered_intercept_is_the_earliest_year_fit() {
        let years: Vec<i32> = (2006..=2022).collect();
        let values: Vec<f64> = years
            .iter()
            .map(|&y| 5.0 + 2.0 * f64::from(y - 2006))
            .collect();
        let fit = fit_year_trend(&single_field_long(&years, &values), "median_n").unwrap();

        assert_eq!(fit.base_year, 2006);
        assert!((fit.intercept().estimate - 5.0).abs() < 1e-9);
        assert!((fit.slope().estimate - 2.0).abs() < 1e-9);
        assert!((fit.predict(0.0) - fit.intercept().estimate).abs() < 1e-12);
    }

    #[test]
    fn noisy_trend_recovers_slope_with_finite_ci() {
        let years: Vec<i32> = (2010..=2020).collect();
        let values: Vec<f64> = years
            .iter()
            .enumerate()
            .map(|(i, &y)| 10.0 + 1.5 * f64::from(y - 2010) + if i % 2 == 0 { 0.3 } else { -0.3 })
            .collect();
        let fit = fit_year_trend(&single_field_long(&years, &values), "median_n").unwrap();

        let slope = fit.slope();
        assert!((slope.estimate - 1.5).abs() < 0.1);
        assert!(slope.ci_low < slope.estimate && slope.estimate < slope.ci_high);
        assert!(slope.p_value < 0.001);
    }

    #[test]
    fn interaction_model_measures_the_slope_difference() {
        let mut fields = Vec::new();
        let mut years = Vec::new();
        let mut values = Vec::new();
        for y in 2010..=2020 {
            fields.push("IRAP research");
            years.push(y);
            values.push(20.0 + 2.0 * f64::from(y - 2010));
            fields.push("Social Psychology");
            years.push(y);
            values.push(35.0 + 3.0 * f64::from(y - 2010));
        }
        let long = df![
            study::FIELD => fields,
            study::YEAR => years,
            agg::VALUE => values,
            agg::K_STUDIES => vec![3u32; 22],
        ]
        .unwrap();

        let fit = fit_field_interaction(&long, "median_n", "IRAP research").unwrap();
        assert!((fit.slope().estimate - 2.0).abs() < 1e-9);
        let interaction = fit.interaction().unwrap();
        assert_eq!(interaction.term, "year:field[Social Psychology]");
        assert!((interaction.estimate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn interaction_model_rejects_a_third_field() {
        let long = df![
            study::FIELD => ["A", "B", "C", "A", "B", "C"],
            study::YEAR => [2010, 2010, 2010, 2011, 2011, 2011],
            agg::VALUE => [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            agg::K_STUDIES => vec![1u32; 6],
        ]
        .unwrap();
        assert!(fit_field_interaction(&long, "median_n", "A").is_err());
    }

    #[test]
    fn years_until_power_rounds_up_whole_years() {
        let projection = years_until_power(2022, 0.12, 0.007, 0.80).unwrap();
        assert_eq!(projection.years_until_target, 98);
        assert_eq!(projection.target_year, 2120);

        let at_target = years_until_power(2022, 0.85, 0.007, 0.80).unwrap();
        assert_eq!(at_target.years_until_target, 0);

        assert!(years_until_power(2022, 0.12, 0.0, 0.80).is_err());
        assert!(years_until_power(2022, 0.12, -0.01, 0.80).is_err());
    }
}
