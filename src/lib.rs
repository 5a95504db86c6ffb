//! Reproducible analysis of published sample sizes ("N-pact factor") in
//! IRAP research versus social psychology: per-year medians, implied
//! statistical power under fixed effect-size conventions, estimated
//! false-discovery rates, and linear trend models over publication year.

pub mod aggregation;
pub mod config;
pub mod error;
pub mod model;
pub mod power;
pub mod report;
pub mod schema;
pub mod table;
pub mod trend;

pub use aggregation::{aggregate, field_ordering, round_half_up, FieldAggregate, Statistic};
pub use config::AnalysisConfig;
pub use error::{NpactError, Result};
pub use model::StudyData;
pub use report::{run_report, Report, ReportVariant, TableExport};
pub use table::WideTable;
pub use trend::{PowerProjection, TrendFit};
