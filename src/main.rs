use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use npact::{run_report, AnalysisConfig, ReportVariant, StudyData};

/// Sample-size and implied-power trend report for IRAP and
/// social-psychology publications.
#[derive(Parser, Debug)]
#[command(name = "npact", version, about)]
struct Args {
    /// Study records CSV.
    input: PathBuf,

    /// Which report to produce.
    #[arg(long, value_enum, default_value = "expanded")]
    variant: ReportVariant,

    /// Directory for the rendered report and trend summaries.
    #[arg(short, long, default_value = "report_out")]
    out_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let data = StudyData::from_csv(&args.input)
        .with_context(|| format!("loading {}", args.input.display()))?;

    let config = AnalysisConfig::default();
    let report = run_report(&data, args.variant, &config).context("report pipeline failed")?;

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    let report_path = args.out_dir.join("report.md");
    fs::write(&report_path, report.to_markdown())?;
    info!(path = %report_path.display(), "wrote report");

    let tables_path = args.out_dir.join("tables.json");
    fs::write(&tables_path, serde_json::to_string_pretty(&report.tables())?)?;
    info!(path = %tables_path.display(), "wrote table data");

    if let Some(trends) = &report.trends {
        let trends_path = args.out_dir.join("trends.json");
        fs::write(&trends_path, serde_json::to_string_pretty(trends)?)?;
        info!(path = %trends_path.display(), "wrote trend summaries");
    }

    Ok(())
}
