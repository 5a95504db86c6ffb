/// Column-name and category constants for the study dataset.
/// Single source of truth for every pipeline stage.

// ── Source CSV columns (before renaming) ────────────────────────────────────
pub mod source {
    pub const KEY: &str = "key";
    pub const TITLE: &str = "title";
    pub const JOURNAL: &str = "journal";
    pub const PUBLICATION_YEAR: &str = "publication_year";
    pub const N_PARTICIPANTS: &str = "n_participants_after_exclusions";
    pub const DESIGN: &str = "study_design_ignoring_trial_type_comparisons";
    pub const N_GROUPS_BETWEEN: &str = "n_groups_between";
    pub const USED_INFERENTIAL: &str = "used_inferential_statistics";
    pub const SOCIAL_PS: &str = "social_ps";

    pub const REQUIRED: [&str; 9] = [
        KEY,
        TITLE,
        JOURNAL,
        PUBLICATION_YEAR,
        N_PARTICIPANTS,
        DESIGN,
        N_GROUPS_BETWEEN,
        USED_INFERENTIAL,
        SOCIAL_PS,
    ];
}

// ── Canonical study columns (after normalization) ───────────────────────────
pub mod study {
    pub const KEY: &str = "key";
    pub const TITLE: &str = "title";
    pub const JOURNAL: &str = "journal";
    pub const YEAR: &str = "publication_year";
    pub const N: &str = "n";
    pub const DESIGN: &str = "design";
    pub const N_GROUPS_BETWEEN: &str = "n_groups_between";
    pub const USED_INFERENTIAL: &str = "used_inferential_statistics";
    pub const SOCIAL_PS: &str = "social_ps";
    pub const FIELD: &str = "field";
    pub const REPORTED_N: &str = "reported_n";
    pub const N_PER_CELL: &str = "n_per_cell";
}

// ── Design categories ───────────────────────────────────────────────────────
pub mod design {
    pub const BETWEEN: &str = "between";
    pub const WITHIN: &str = "within";
    pub const MIXED: &str = "mixed";

    /// Short codes used by the source CSV.
    pub const CODE_BETWEEN: &str = "b";
    pub const CODE_WITHIN: &str = "w";
    pub const CODE_MIXED: &str = "m";
}

// ── Field labels ────────────────────────────────────────────────────────────
pub mod field {
    pub const IRAP: &str = "IRAP research";
    pub const SOCIAL_PSYCHOLOGY: &str = "Social Psychology";
}

// ── Journal values ──────────────────────────────────────────────────────────
pub mod journal {
    /// The journal whose records constitute the IRAP corpus.
    pub const IRAP: &str = "The Psychological Record";

    /// Multidisciplinary comparison journal whose records count only when
    /// flagged (or unflagged) as genuinely social-psychology content.
    pub const SOCIAL_PS_CONSTRAINED: &str = "Psychological Science";

    pub const RECOGNIZED: [&str; 5] = [
        IRAP,
        SOCIAL_PS_CONSTRAINED,
        "Journal of Personality and Social Psychology",
        "Personality and Social Psychology Bulletin",
        "Journal of Experimental Social Psychology",
    ];
}

// ── Aggregate output columns ────────────────────────────────────────────────
pub mod agg {
    pub const VALUE: &str = "value";
    pub const K_STUDIES: &str = "k_studies";
    pub const AGGREGATE: &str = "aggregate";
}

/// Two-digit display label for a publication year, e.g. 2011 → `'11`.
pub fn year_label(year: i32) -> String {
    format!("'{:02}", year.rem_euclid(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_label_keeps_last_two_digits() {
        assert_eq!(year_label(2011), "'11");
        assert_eq!(year_label(2006), "'06");
        assert_eq!(year_label(2100), "'00");
    }
}
