use std::collections::HashMap;
use std::fmt::Write as FmtWrite;

use polars::prelude::*;
use serde::Serialize;

use crate::aggregation::{round_half_up, FieldAggregate};
use crate::error::{NpactError, Result};
use crate::schema::{agg, study, year_label};

/// Wide per-year summary table: one row per field, one column per year
/// label across the full observed range, plus the per-field aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct WideTable {
    pub title: String,
    pub year_labels: Vec<String>,
    pub rows: Vec<WideRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WideRow {
    pub field: String,
    /// One cell per year label; `None` where the field has no data for
    /// that year. An empty cell is not a zero.
    pub cells: Vec<Option<String>>,
    pub aggregate: String,
}

/// Reshape a long (field, year, value, k) aggregate table into a wide
/// per-year table.
///
/// Cells are formatted `"{value} ({k})"` with the value rounded half-up to
/// `digits` decimal places. Columns cover every year from the earliest to
/// the latest observed, including intervening years with no data. Row
/// order follows `ordering` (largest aggregate first, per the
/// ascending-sort-then-reverse rule).
pub fn build_wide_table(
    long: &DataFrame,
    ordering: &[FieldAggregate],
    title: &str,
    digits: i32,
) -> Result<WideTable> {
    let fields = long.column(study::FIELD)?.str()?;
    let years = long.column(study::YEAR)?.i32()?;
    let values = long.column(agg::VALUE)?.f64()?;
    let counts = long.column(agg::K_STUDIES)?.u32()?;

    let (min_year, max_year) = match (years.min(), years.max()) {
        (Some(min), Some(max)) => (min, max),
        _ => {
            return Err(NpactError::Validation(format!(
                "cannot build table '{title}' from an empty aggregate"
            )))
        }
    };

    let mut cells: HashMap<(String, i32), String> = HashMap::new();
    for i in 0..long.height() {
        if let (Some(field), Some(year), Some(value), Some(k)) =
            (fields.get(i), years.get(i), values.get(i), counts.get(i))
        {
            cells.insert(
                (field.to_string(), year),
                format!("{} ({k})", format_value(value, digits)),
            );
        }
    }

    let year_range: Vec<i32> = (min_year..=max_year).collect();
    let rows = ordering
        .iter()
        .map(|entry| WideRow {
            field: entry.field.clone(),
            cells: year_range
                .iter()
                .map(|year| cells.get(&(entry.field.clone(), *year)).cloned())
                .collect(),
            aggregate: format_value(entry.aggregate, digits),
        })
        .collect();

    Ok(WideTable {
        title: title.to_string(),
        year_labels: year_range.iter().copied().map(year_label).collect(),
        rows,
    })
}

impl WideTable {
    /// Render as a GitHub-flavored markdown table.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "### {}", self.title);
        let _ = writeln!(out);

        let _ = write!(out, "| Field |");
        for label in &self.year_labels {
            let _ = write!(out, " {label} |");
        }
        let _ = writeln!(out, " Aggregate |");

        let _ = write!(out, "|---|");
        for _ in &self.year_labels {
            let _ = write!(out, "---|");
        }
        let _ = writeln!(out, "---|");

        for row in &self.rows {
            let _ = write!(out, "| {} |", row.field);
            for cell in &row.cells {
                let _ = write!(out, " {} |", cell.as_deref().unwrap_or(""));
            }
            let _ = writeln!(out, " {} |", row.aggregate);
        }
        out
    }
}

fn format_value(value: f64, digits: i32) -> String {
    let rounded = round_half_up(value, digits);
    format!("{rounded:.prec$}", prec = digits.max(0) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_fixture() -> DataFrame {
        df![
            study::FIELD => ["A", "A", "B"],
            study::YEAR => [2011, 2014, 2012],
            agg::VALUE => [30.5, 41.0, 25.0],
            agg::K_STUDIES => [3u32, 2, 4],
        ]
        .unwrap()
    }

    fn ordering() -> Vec<FieldAggregate> {
        vec![
            FieldAggregate {
                field: "A".into(),
                aggregate: 40.0,
            },
            FieldAggregate {
                field: "B".into(),
                aggregate: 25.0,
            },
        ]
    }

    #[test]
    fn spans_full_year_range_without_gaps() {
        let table = build_wide_table(&long_fixture(), &ordering(), "t", 0).unwrap();
        assert_eq!(table.year_labels, vec!["'11", "'12", "'13", "'14"]);
    }

    #[test]
    fn rows_follow_descending_aggregate_order() {
        let table = build_wide_table(&long_fixture(), &ordering(), "t", 0).unwrap();
        assert_eq!(table.rows[0].field, "A");
        assert_eq!(table.rows[1].field, "B");
    }

    #[test]
    fn absent_groups_are_empty_cells_not_zero() {
        let table = build_wide_table(&long_fixture(), &ordering(), "t", 0).unwrap();
        // A has data for '11 and '14 only
        assert_eq!(table.rows[0].cells[0].as_deref(), Some("31 (3)"));
        assert_eq!(table.rows[0].cells[1], None);
        assert_eq!(table.rows[0].cells[2], None);
        assert_eq!(table.rows[0].cells[3].as_deref(), Some("41 (2)"));
        // B has data for '12 only
        assert_eq!(table.rows[1].cells[1].as_deref(), Some("25 (4)"));
    }

    #[test]
    fn markdown_rendering_keeps_empty_cells_blank() {
        let table = build_wide_table(&long_fixture(), &ordering(), "t", 0).unwrap();
        let md = table.to_markdown();
        assert!(md.contains("| A | 31 (3) |  |  | 41 (2) | 40 |"));
        assert!(md.contains("| '11 | '12 | '13 | '14 | Aggregate |"));
    }

    #[test]
    fn empty_aggregate_is_an_error() {
        let empty = df![
            study::FIELD => Vec::<String>::new(),
            study::YEAR => Vec::<i32>::new(),
            agg::VALUE => Vec::<f64>::new(),
            agg::K_STUDIES => Vec::<u32>::new(),
        ]
        .unwrap();
        assert!(build_wide_table(&empty, &ordering(), "t", 0).is_err());
    }
}
