//! Report writers.
//!
//! # Output Structure
//!
//! ```text
//! json_output_dir/
//! └── 2025-05-06/
//!     └── rents-are-rising_3f2a9c1e.json
//!
//! markdown_output_dir/
//! └── 2025-05-06/
//!     └── rents-are-rising_3f2a9c1e.md
//! ```
//!
//! Both files of one report share a stem: the slugified article title (or
//! domain) followed by the first eight characters of the run id. The date
//! directory is the UTC date the run started.

use crate::report::Report;
use crate::utils::slugify_title;

pub mod json;
pub mod markdown;

const STEM_TITLE_MAX: usize = 50;

/// The date directory and file stem (no extension) for `report`.
pub fn report_stem(report: &Report) -> (String, String) {
    let date = report.started_at.format("%Y-%m-%d").to_string();
    let run_id = report.run_id.simple().to_string();
    let stem = format!("{}_{}", slugify_title(&report.title, STEM_TITLE_MAX), &run_id[..8]);
    (date, stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisRun, Document, StageId};
    use crate::report::ReportAssembler;

    #[test]
    fn test_stem_uses_title_then_domain() {
        let mut document = Document::new("https://news.example.com/a", "text");
        document.metadata.title = "Rents Are Rising!".into();
        let run = AnalysisRun::new(document, vec![StageId::Claims]);
        let report = ReportAssembler::assemble(&run);

        let (date, stem) = report_stem(&report);
        assert_eq!(date, run.started_at.format("%Y-%m-%d").to_string());
        assert!(stem.starts_with("rents-are-rising_"));
        assert_eq!(stem.len(), "rents-are-rising_".len() + 8);

        let mut document = Document::new("https://news.example.com/a", "text");
        document.metadata.domain = "news.example.com".into();
        let report = ReportAssembler::assemble(&AnalysisRun::new(document, vec![]));
        assert!(report_stem(&report).1.starts_with("newsexamplecom_"));
    }
}
