//! JSON report output.
//!
//! The report is written pretty-printed to
//! `{json_output_dir}/{date}/{stem}.json`, see [`report_stem`](super::report_stem).

use super::report_stem;
use crate::report::Report;
use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// Write `report` as JSON below `json_output_dir` and return the file path.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_report_json(report: &Report, json_output_dir: &str) -> Result<PathBuf, Box<dyn Error>> {
    let json = report.to_json()?;
    let (date, stem) = report_stem(report);

    let full_json_dir = PathBuf::from(json_output_dir).join(date);
    info!(full_json_dir = %full_json_dir.display(), "Ensuring JSON directory exists");
    if let Err(e) = fs::create_dir_all(&full_json_dir).await {
        error!(full_json_dir = %full_json_dir.display(), error = %e, "Failed to create JSON dir");
        return Err(e.into());
    }

    let path = full_json_dir.join(format!("{stem}.json"));
    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote JSON report");

    Ok(path)
}
