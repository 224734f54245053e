//! Markdown rendering of a [`Report`].
//!
//! One `##` section per stage in report order. Unavailable sections say so
//! and give the reason instead of being left out.

use super::report_stem;
use crate::payloads::{
    ClaimsAnalysis, CounterArguments, CredibilityAssessment, EntityReport, LanguageAnalysis, RedFlagReport,
    StagePayload, VerificationGuide,
};
use crate::report::{Report, Section};
use std::error::Error;
use std::fmt::Write as _;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, instrument};

pub fn render_markdown(report: &Report) -> String {
    let mut md = String::new();

    let _ = writeln!(md, "# Skepticism Report: {}\n", report.title);
    let _ = writeln!(md, "- **Source:** <{}>", report.source_url);
    if !report.author.is_empty() {
        let _ = writeln!(md, "- **Author:** {}", report.author);
    }
    if !report.publish_date.is_empty() {
        let _ = writeln!(md, "- **Published:** {}", report.publish_date);
    }
    let _ = writeln!(md, "- **Status:** {}", report.overall_status);
    let _ = writeln!(
        md,
        "- **Sections available:** {}/{}",
        report.available_count(),
        report.sections.len()
    );
    let _ = writeln!(md, "- **Run:** `{}`", report.run_id);
    let _ = writeln!(md, "- **Analyzed:** {}", report.started_at.to_rfc3339());
    if let Some(error) = &report.error {
        let _ = writeln!(md, "\n> **Run failed:** {error}");
    }

    for section in &report.sections {
        let _ = writeln!(md, "\n## {}\n", section.title());
        match section {
            Section::Available { payload, .. } => render_payload(&mut md, payload),
            Section::Unavailable { status, reason, detail, .. } => {
                match status {
                    Some(status) => {
                        let _ = writeln!(md, "_Unavailable: {reason} (stage {status})._");
                    }
                    None => {
                        let _ = writeln!(md, "_Unavailable: {reason}._");
                    }
                }
                if let Some(detail) = detail {
                    let _ = writeln!(md, "\n> {detail}");
                }
            }
        }
    }

    md
}

fn render_payload(md: &mut String, payload: &StagePayload) {
    match payload {
        StagePayload::Claims(p) => claims(md, p),
        StagePayload::Language(p) => language(md, p),
        StagePayload::RedFlags(p) => red_flags(md, p),
        StagePayload::Verification(p) => verification(md, p),
        StagePayload::Entities(p) => entities(md, p),
        StagePayload::CounterArgs(p) => counter_arguments(md, p),
        StagePayload::Assessment(p) => assessment(md, p),
    }
}

fn field(md: &mut String, label: &str, value: &str) {
    if !value.is_empty() {
        let _ = writeln!(md, "**{label}:** {value}\n");
    }
}

fn list(md: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(md, "**{heading}:**\n");
    for item in items {
        let _ = writeln!(md, "- {item}");
    }
    md.push('\n');
}

fn claims(md: &mut String, p: &ClaimsAnalysis) {
    field(md, "Summary", &p.claim_summary);
    if p.core_claims.is_empty() {
        md.push_str("No claims identified.\n");
    }
    for (i, c) in p.core_claims.iter().enumerate() {
        let _ = writeln!(md, "{}. **{}**", i + 1, c.claim);
        let _ = write!(md, "   - Confidence: {}", c.confidence_level);
        if !c.kind.is_empty() {
            let _ = write!(md, " | Type: {}", c.kind);
        }
        if !c.verifiability.is_empty() {
            let _ = write!(md, " | Verifiability: {}", c.verifiability);
        }
        md.push('\n');
        if !c.evidence_provided.is_empty() {
            let _ = writeln!(md, "   - Evidence: {}", c.evidence_provided);
        }
    }
}

fn language(md: &mut String, p: &LanguageAnalysis) {
    field(md, "Overall tone", &p.overall_tone);
    field(md, "Intensity", &p.language_intensity);
    field(md, "Certainty", &p.certainty_level);
    field(md, "Reasoning", &p.reasoning_type);
    if !p.loaded_language_examples.is_empty() {
        md.push_str("**Loaded language:**\n\n");
        for phrase in &p.loaded_language_examples {
            let _ = write!(md, "- \"{}\"", phrase.phrase);
            if !phrase.kind.is_empty() {
                let _ = write!(md, " ({})", phrase.kind);
            }
            if !phrase.impact.is_empty() {
                let _ = write!(md, ": {}", phrase.impact);
            }
            md.push('\n');
        }
        md.push('\n');
    }
    list(md, "Hedging", &p.hedging_language);
    list(md, "Absolute statements", &p.absolute_statements);
    list(md, "Emotional indicators", &p.emotional_indicators);
}

fn red_flags(md: &mut String, p: &RedFlagReport) {
    field(md, "Bias risk", &p.bias_risk_level);
    field(md, "Balance", &p.overall_balance);
    if p.red_flags.is_empty() {
        md.push_str("No red flags detected.\n\n");
    }
    for flag in &p.red_flags {
        let _ = write!(md, "- **{}**", flag.issue);
        if !flag.category.is_empty() || !flag.severity.is_empty() {
            let _ = write!(md, " [{} / {}]", flag.category, flag.severity);
        }
        md.push('\n');
        if !flag.example.is_empty() {
            let _ = writeln!(md, "  - Example: \"{}\"", flag.example);
        }
        if !flag.explanation.is_empty() {
            let _ = writeln!(md, "  - {}", flag.explanation);
        }
    }
    list(md, "Missing perspectives", &p.missing_perspectives);
    if let Some(sources) = &p.source_quality {
        let _ = writeln!(
            md,
            "**Sources:** {} expert, {} anonymous\n",
            sources.expert_sources, sources.anonymous_sources
        );
        list(md, "Potential conflicts", &sources.potential_conflicts);
    }
}

fn verification(md: &mut String, p: &VerificationGuide) {
    for (i, q) in p.verification_questions.iter().enumerate() {
        let _ = writeln!(md, "{}. {}", i + 1, q.question);
        if !q.verification_method.is_empty() {
            let _ = writeln!(md, "   - How: {}", q.verification_method);
        }
        if !q.difficulty.is_empty() {
            let _ = writeln!(md, "   - Difficulty: {}", q.difficulty);
        }
        if !q.suggested_sources.is_empty() {
            let _ = writeln!(md, "   - Sources: {}", q.suggested_sources.join(", "));
        }
    }
    md.push('\n');
    list(md, "Quick checks", &p.quick_checks);
    list(md, "Experts to consult", &p.expert_consultation_needed);
    list(md, "Data sources", &p.data_sources_to_check);
}

fn entities(md: &mut String, p: &EntityReport) {
    if !p.people.is_empty() {
        md.push_str("**People:**\n\n");
        for person in &p.people {
            let _ = write!(md, "- {}", person.name);
            if !person.role.is_empty() {
                let _ = write!(md, ", {}", person.role);
            }
            if !person.research_priority.is_empty() {
                let _ = write!(md, " (research priority: {})", person.research_priority);
            }
            md.push('\n');
        }
        md.push('\n');
    }
    if !p.organizations.is_empty() {
        md.push_str("**Organizations:**\n\n");
        for org in &p.organizations {
            let _ = write!(md, "- {}", org.name);
            if !org.kind.is_empty() {
                let _ = write!(md, " ({})", org.kind);
            }
            if !org.potential_bias.is_empty() {
                let _ = write!(md, ", possible bias: {}", org.potential_bias);
            }
            md.push('\n');
        }
        md.push('\n');
    }
    list(md, "Key terms", &p.key_terms);
    list(md, "Locations", &p.locations);
    list(md, "Dates and events", &p.dates_events);
}

fn counter_arguments(md: &mut String, p: &CounterArguments) {
    for arg in &p.counter_arguments {
        if !arg.original_claim.is_empty() {
            let _ = writeln!(md, "- **Claim:** {}", arg.original_claim);
            let _ = writeln!(md, "  - **Counter:** {}", arg.counter_perspective);
        } else {
            let _ = writeln!(md, "- **Counter:** {}", arg.counter_perspective);
        }
        if !arg.supporting_reasoning.is_empty() {
            let _ = writeln!(md, "  - Reasoning: {}", arg.supporting_reasoning);
        }
        if !arg.strength.is_empty() {
            let _ = writeln!(md, "  - Strength: {}", arg.strength);
        }
    }
    md.push('\n');
    list(md, "Alternative interpretations", &p.alternative_interpretations);
    list(md, "Questions to ask", &p.skeptical_questions);
    field(md, "Balance", &p.balance_assessment);
}

fn assessment(md: &mut String, p: &CredibilityAssessment) {
    let _ = writeln!(md, "**Credibility score:** {:.0}/100\n", p.credibility_score.value);
    field(md, "Level", &p.credibility_level);
    field(md, "Why", &p.credibility_score.reasoning);
    field(md, "Summary", &p.summary);
    list(md, "Strengths", &p.key_strengths);
    list(md, "Concerns", &p.key_concerns);
    field(md, "Recommendation", &p.recommendation);
    field(md, "Fact-check priority", &p.fact_check_priority);
    if let Some(guidance) = &p.reader_guidance {
        field(md, "Trust level", &guidance.trust_level);
        field(md, "Verify", &guidance.verification_needed);
        field(md, "Further reading", &guidance.additional_sources);
    }
}

/// Write the rendered report below `markdown_output_dir` and return the path.
#[instrument(level = "info", skip_all, fields(markdown_output_dir = %markdown_output_dir))]
pub async fn write_report_markdown(report: &Report, markdown_output_dir: &str) -> Result<PathBuf, Box<dyn Error>> {
    let (date, stem) = report_stem(report);
    let dir = PathBuf::from(markdown_output_dir).join(date);
    fs::create_dir_all(&dir).await?;

    let path = dir.join(format!("{stem}.md"));
    fs::write(&path, render_markdown(report)).await?;
    info!(path = %path.display(), "Wrote Markdown report");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisRun, Document, ErrorKind, StageId, StageResult};
    use crate::report::ReportAssembler;
    use crate::testing::valid_response;

    fn report() -> Report {
        let mut document = Document::new("https://news.example.com/rents", "Rents rose.");
        document.metadata.title = "Rents Are Rising".into();
        document.metadata.author = "Jane Reporter".into();
        let mut run = AnalysisRun::new(document, vec![StageId::Claims, StageId::Language, StageId::CounterArgs]);
        run.start();
        let claims = StagePayload::parse(StageId::Claims, &valid_response(StageId::Claims)).unwrap();
        run.record(StageResult::ok(StageId::Claims, claims, 1, 10));
        run.record(StageResult::failed(StageId::Language, ErrorKind::RateLimited, "429", 3, 4000));
        run.record(StageResult::skipped(
            StageId::CounterArgs,
            ErrorKind::DependencySkipped,
            "dependencies did not succeed: language",
        ));
        run.finish();
        ReportAssembler::assemble(&run)
    }

    #[test]
    fn test_sections_in_order_with_unavailable_markers() {
        let md = render_markdown(&report());

        assert!(md.starts_with("# Skepticism Report: Rents Are Rising\n"));
        assert!(md.contains("- **Author:** Jane Reporter"));
        assert!(md.contains("- **Status:** PARTIAL"));
        assert!(md.contains("- **Sections available:** 1/3"));

        let claims = md.find("## Core Claims").unwrap();
        let language = md.find("## Language & Tone").unwrap();
        let counter = md.find("## Counter-Arguments").unwrap();
        assert!(claims < language && language < counter);

        assert!(md.contains("1. **Rents rose 12% in 2024**"));
        assert!(md.contains("_Unavailable: RATE_LIMITED (stage FAILED)._"));
        assert!(md.contains("_Unavailable: DEPENDENCY_SKIPPED (stage SKIPPED)._"));
        assert!(md.contains("> dependencies did not succeed: language"));
    }

    #[test]
    fn test_failed_run_banner() {
        let mut run = AnalysisRun::new(Document::new("https://news.example.com/x", ""), vec![StageId::Claims]);
        run.start();
        run.abort("fetch failed: timed out");
        let md = render_markdown(&ReportAssembler::assemble(&run));

        assert!(md.contains("> **Run failed:** fetch failed: timed out"));
        assert!(md.contains("_Unavailable: DOCUMENT_UNAVAILABLE._"));
    }

    #[tokio::test]
    async fn test_write_report_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let report = report();
        let path = write_report_markdown(&report, dir.path().to_str().unwrap()).await.unwrap();

        assert_eq!(path.extension().unwrap(), "md");
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("rents-are-rising_"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), render_markdown(&report));
    }
}
