use std::path::Path;

use polars::prelude::*;
use tracing::{debug, info};

use crate::error::{NpactError, Result};
use crate::schema::{design, field, journal, source, study};

/// The normalized study table plus the filter predicates that select the
/// analysis subsets from it.
///
/// Loaded once, immutable thereafter; every subset and aggregate downstream
/// is a pure derivation.
#[derive(Debug)]
pub struct StudyData {
    records: DataFrame,
}

impl StudyData {
    /// Load and normalize the study CSV.
    ///
    /// The file is read with every column as String, then explicitly cast:
    /// numeric fields become nullable integers (absent means "not reported",
    /// never zero), `used_inferential_statistics` becomes Boolean, and the
    /// short design codes `b`/`w`/`m` are mapped to their category names.
    /// Unmapped design or journal values are fatal here, before any
    /// aggregation can run on them.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let raw = read_csv_as_strings(path)?;
        require_columns(&raw, &source::REQUIRED)?;
        info!(rows = raw.height(), path = %path.display(), "loaded study CSV");

        let typed = raw
            .clone()
            .lazy()
            .rename(
                [source::N_PARTICIPANTS, source::DESIGN],
                [study::N, study::DESIGN],
                true,
            )
            .with_columns([
                parse_int(study::YEAR).cast(DataType::Int32),
                parse_int(study::N),
                parse_int(study::N_GROUPS_BETWEEN),
                parse_int(study::SOCIAL_PS),
                map_bool(study::USED_INFERENTIAL),
                map_design(study::DESIGN),
            ])
            .with_columns([
                derive_field(),
                col(study::N).is_not_null().alias(study::REPORTED_N),
                derive_n_per_cell(),
            ])
            .collect()?;

        validate_design(&raw, &typed)?;
        validate_bool(&raw, &typed)?;
        validate_int(&raw, source::PUBLICATION_YEAR, &typed, study::YEAR)?;
        validate_int(&raw, source::N_PARTICIPANTS, &typed, study::N)?;
        validate_int(&raw, source::N_GROUPS_BETWEEN, &typed, study::N_GROUPS_BETWEEN)?;
        validate_int(&raw, source::SOCIAL_PS, &typed, study::SOCIAL_PS)?;
        validate_year_present(&typed)?;
        validate_journal(&typed)?;
        validate_n(&typed)?;

        debug!(rows = typed.height(), "normalized study records");
        Ok(Self { records: typed })
    }

    /// Build directly from an already-normalized DataFrame (tests, fixtures).
    pub fn from_records(records: DataFrame) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &DataFrame {
        &self.records
    }

    /// Records matching a predicate expression.
    pub fn subset(&self, predicate: Expr) -> Result<DataFrame> {
        Ok(self.records.clone().lazy().filter(predicate).collect()?)
    }
}

// ── Filter predicates ───────────────────────────────────────────────────────

/// Record belongs to the IRAP corpus.
pub fn is_irap() -> Expr {
    col(study::JOURNAL).eq(lit(journal::IRAP))
}

/// Study ran null-hypothesis significance tests and reported its N.
pub fn is_nhst_eligible() -> Expr {
    col(study::USED_INFERENTIAL).and(col(study::REPORTED_N))
}

/// IRAP study with a between-groups contrast (between-subjects or mixed;
/// mixed-design IRAP publications also report a between-groups comparison).
pub fn is_between_or_mixed_irap() -> Expr {
    is_irap().and(
        col(study::DESIGN)
            .eq(lit(design::BETWEEN))
            .or(col(study::DESIGN).eq(lit(design::MIXED))),
    )
}

/// Record reports a between-groups contrast: between-or-mixed for IRAP,
/// between-subjects for every comparison journal.
pub fn has_between_contrast() -> Expr {
    is_between_or_mixed_irap().or(is_irap()
        .not()
        .and(col(study::DESIGN).eq(lit(design::BETWEEN))))
}

/// Eligibility for the between-groups comparison set.
///
/// The constrained comparison journal contributes only its between-subjects
/// records that are flagged as social-psychology content (a missing flag
/// passes); other comparison journals contribute every between-subjects
/// record; IRAP records must be between-or-mixed and NHST-eligible.
/// A record with a null design never passes any branch.
pub fn is_eligible_social_psych_comparison() -> Expr {
    let constrained = col(study::JOURNAL)
        .eq(lit(journal::SOCIAL_PS_CONSTRAINED))
        .and(col(study::DESIGN).eq(lit(design::BETWEEN)))
        .and(
            col(study::SOCIAL_PS)
                .eq(lit(1))
                .or(col(study::SOCIAL_PS).is_null()),
        );

    let other_comparison = col(study::JOURNAL)
        .neq(lit(journal::IRAP))
        .and(col(study::JOURNAL).neq(lit(journal::SOCIAL_PS_CONSTRAINED)))
        .and(col(study::DESIGN).eq(lit(design::BETWEEN)));

    let irap = is_between_or_mixed_irap().and(is_nhst_eligible());

    constrained.or(other_comparison).or(irap)
}

// ── Normalization expressions ───────────────────────────────────────────────

/// Parse a string column to Int64, treating blanks as missing.
fn parse_int(column: &str) -> Expr {
    let trimmed = col(column).str().strip_chars(lit(" \t\r\n"));
    when(trimmed.clone().eq(lit("")))
        .then(lit(NULL))
        .otherwise(trimmed)
        .cast(DataType::Int64)
        .alias(column)
}

/// Map true/false (or 1/0) strings to Boolean; unrecognized values become
/// null and are caught by [`validate_bool`].
fn map_bool(column: &str) -> Expr {
    let lc = col(column)
        .str()
        .strip_chars(lit(" \t\r\n"))
        .str()
        .to_lowercase();
    when(lc.clone().eq(lit("true")).or(lc.clone().eq(lit("1"))))
        .then(lit(true))
        .when(lc.clone().eq(lit("false")).or(lc.eq(lit("0"))))
        .then(lit(false))
        .otherwise(lit(NULL).cast(DataType::Boolean))
        .alias(column)
}

/// Map the short design codes to category names. Full category names pass
/// through unchanged; anything else becomes null and is caught by
/// [`validate_design`].
fn map_design(column: &str) -> Expr {
    let lc = col(column)
        .str()
        .strip_chars(lit(" \t\r\n"))
        .str()
        .to_lowercase();
    when(
        lc.clone()
            .eq(lit(design::CODE_BETWEEN))
            .or(lc.clone().eq(lit(design::BETWEEN))),
    )
    .then(lit(design::BETWEEN))
    .when(
        lc.clone()
            .eq(lit(design::CODE_WITHIN))
            .or(lc.clone().eq(lit(design::WITHIN))),
    )
    .then(lit(design::WITHIN))
    .when(
        lc.clone()
            .eq(lit(design::CODE_MIXED))
            .or(lc.eq(lit(design::MIXED))),
    )
    .then(lit(design::MIXED))
    .otherwise(lit(NULL).cast(DataType::String))
    .alias(column)
}

fn derive_field() -> Expr {
    when(is_irap())
        .then(lit(field::IRAP))
        .otherwise(lit(field::SOCIAL_PSYCHOLOGY))
        .alias(study::FIELD)
}

/// N divided by the number of between-subjects cells. Null whenever N is
/// missing or the divisor is zero/missing, so no downstream aggregate can
/// see a sentinel.
fn derive_n_per_cell() -> Expr {
    when(
        col(study::N)
            .is_not_null()
            .and(col(study::N_GROUPS_BETWEEN).gt(lit(0))),
    )
    .then(col(study::N).cast(DataType::Float64) / col(study::N_GROUPS_BETWEEN).cast(DataType::Float64))
    .otherwise(lit(NULL).cast(DataType::Float64))
    .alias(study::N_PER_CELL)
}

// ── Load-time validation ────────────────────────────────────────────────────

fn read_csv_as_strings(path: &Path) -> Result<DataFrame> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0)) // all columns as String
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    // Trim whitespace from column names
    let trimmed: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    df.set_column_names(trimmed)?;

    Ok(df)
}

fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &col_name in required {
        if df.column(col_name).is_err() {
            return Err(NpactError::MissingColumn(col_name.to_string()));
        }
    }
    Ok(())
}

/// A design code that mapped to null while the raw value was non-blank is
/// an unmapped category, fatal at load.
fn validate_design(raw: &DataFrame, typed: &DataFrame) -> Result<()> {
    first_unmapped(raw, source::DESIGN, typed, study::DESIGN)
        .map_or(Ok(()), |value| {
            Err(NpactError::UnmappedCategory {
                kind: "design",
                value,
            })
        })
}

fn validate_bool(raw: &DataFrame, typed: &DataFrame) -> Result<()> {
    first_unmapped(raw, source::USED_INFERENTIAL, typed, study::USED_INFERENTIAL)
        .map_or(Ok(()), |value| {
            Err(NpactError::UnmappedCategory {
                kind: "used_inferential_statistics",
                value,
            })
        })
}

/// A numeric cell that parsed to null while the raw value was non-blank is
/// unparseable garbage, fatal at load. Blank raw cells stay null (missing,
/// never zero).
fn validate_int(
    raw: &DataFrame,
    raw_col: &'static str,
    typed: &DataFrame,
    typed_col: &str,
) -> Result<()> {
    first_unmapped(raw, raw_col, typed, typed_col).map_or(Ok(()), |value| {
        Err(NpactError::UnmappedCategory {
            kind: raw_col,
            value,
        })
    })
}

/// Every record must carry a publication year; a null year would silently
/// stretch the wide tables' year range toward year zero.
fn validate_year_present(typed: &DataFrame) -> Result<()> {
    let nulls = typed.column(study::YEAR)?.null_count();
    if nulls > 0 {
        return Err(NpactError::Validation(format!(
            "publication_year is required for every record, {nulls} missing"
        )));
    }
    Ok(())
}

/// First raw value whose normalized counterpart is null while the raw value
/// itself is non-blank.
fn first_unmapped(
    raw: &DataFrame,
    raw_col: &str,
    typed: &DataFrame,
    typed_col: &str,
) -> Option<String> {
    let raw_vals = raw.column(raw_col).ok()?.str().ok()?.clone();
    let typed_vals = typed.column(typed_col).ok()?.clone();

    for i in 0..raw.height() {
        let raw_val = raw_vals.get(i);
        let typed_is_null = matches!(typed_vals.get(i), Ok(AnyValue::Null) | Err(_));
        if let Some(v) = raw_val {
            if !v.trim().is_empty() && typed_is_null {
                return Some(v.trim().to_string());
            }
        }
    }
    None
}

fn validate_journal(typed: &DataFrame) -> Result<()> {
    let journals = typed.column(study::JOURNAL)?.str()?;
    for value in journals.into_iter().flatten() {
        if !journal::RECOGNIZED.contains(&value) {
            return Err(NpactError::UnmappedCategory {
                kind: "journal",
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_n(typed: &DataFrame) -> Result<()> {
    let n = typed.column(study::N)?.i64()?;
    if let Some(min) = n.min() {
        if min < 0 {
            return Err(NpactError::Validation(format!(
                "n_participants_after_exclusions must be non-negative, found {min}"
            )));
        }
    }
    Ok(())
}
