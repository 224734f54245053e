//! Typed payloads produced by each analysis stage.
//!
//! The reasoning backend answers with free text that is expected to contain a
//! JSON object. [`StagePayload::parse`] cuts the object out of the response,
//! deserializes it into the stage's schema and then runs the stage-specific
//! structural checks. A payload that fails any step is rejected whole; callers
//! never see a partially validated value.
//!
//! Field names are `snake_case` to match the JSON the stage templates ask for.

use crate::models::StageId;
use crate::utils::{extract_json_object, looks_truncated};
use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const CONFIDENCE_LEVELS: [&str; 3] = ["high", "medium", "low"];
const BIAS_RISK_LEVELS: [&str; 3] = ["low", "medium", "high"];

/// Output of the claims extraction stage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ClaimsAnalysis {
    #[serde(default)]
    pub analysis_certainty: Option<String>,
    pub core_claims: Vec<Claim>,
    #[serde(default)]
    pub claim_summary: String,
}

/// A single factual claim made by the article.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Claim {
    pub claim: String,
    /// Statistical, Causal, Predictive, Historical, ...
    #[serde(rename = "type", default)]
    pub kind: String,
    /// High, Medium or Low.
    pub confidence_level: String,
    #[serde(default)]
    pub evidence_provided: String,
    #[serde(default)]
    pub verifiability: String,
}

/// Output of the language and tone stage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LanguageAnalysis {
    #[serde(default)]
    pub analysis_certainty: Option<String>,
    pub overall_tone: String,
    #[serde(default)]
    pub language_intensity: String,
    #[serde(default)]
    pub certainty_level: String,
    #[serde(default)]
    pub reasoning_type: String,
    #[serde(default)]
    pub loaded_language_examples: Vec<LoadedPhrase>,
    #[serde(default)]
    pub hedging_language: Vec<String>,
    #[serde(default)]
    pub absolute_statements: Vec<String>,
    #[serde(default)]
    pub emotional_indicators: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LoadedPhrase {
    pub phrase: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub impact: String,
}

/// Output of the bias and red-flag stage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RedFlagReport {
    #[serde(default)]
    pub analysis_certainty: Option<String>,
    /// LOW, MEDIUM or HIGH.
    pub bias_risk_level: String,
    pub red_flags: Vec<RedFlag>,
    #[serde(default)]
    pub missing_perspectives: Vec<String>,
    #[serde(default)]
    pub source_quality: Option<SourceQuality>,
    #[serde(default)]
    pub overall_balance: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RedFlag {
    #[serde(default)]
    pub category: String,
    pub issue: String,
    #[serde(default)]
    pub example: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SourceQuality {
    #[serde(default)]
    pub expert_sources: u32,
    #[serde(default)]
    pub anonymous_sources: u32,
    #[serde(default)]
    pub potential_conflicts: Vec<String>,
}

/// Output of the verification question stage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VerificationGuide {
    pub verification_questions: Vec<VerificationQuestion>,
    #[serde(default)]
    pub quick_checks: Vec<String>,
    #[serde(default)]
    pub expert_consultation_needed: Vec<String>,
    #[serde(default)]
    pub data_sources_to_check: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VerificationQuestion {
    pub question: String,
    #[serde(default)]
    pub claim_related: String,
    #[serde(default)]
    pub verification_method: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub suggested_sources: Vec<String>,
}

/// Output of the entity recognition stage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EntityReport {
    #[serde(default)]
    pub people: Vec<Person>,
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub key_terms: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub dates_events: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Person {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub credibility_factors: Vec<String>,
    #[serde(default)]
    pub research_priority: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Organization {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub relevance: String,
    #[serde(default)]
    pub potential_bias: String,
}

/// Output of the counter-argument stage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CounterArguments {
    pub counter_arguments: Vec<CounterArgument>,
    #[serde(default)]
    pub alternative_interpretations: Vec<String>,
    #[serde(default)]
    pub skeptical_questions: Vec<String>,
    #[serde(default)]
    pub balance_assessment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CounterArgument {
    #[serde(default)]
    pub original_claim: String,
    pub counter_perspective: String,
    #[serde(default)]
    pub supporting_reasoning: String,
    #[serde(default)]
    pub evidence_type: String,
    #[serde(default)]
    pub strength: String,
}

/// Output of the overall credibility assessment stage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CredibilityAssessment {
    pub credibility_score: CredibilityScore,
    #[serde(default)]
    pub credibility_level: String,
    #[serde(default)]
    pub key_strengths: Vec<String>,
    #[serde(default)]
    pub key_concerns: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub fact_check_priority: String,
    #[serde(default)]
    pub reader_guidance: Option<ReaderGuidance>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CredibilityScore {
    /// 0 to 100.
    pub value: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ReaderGuidance {
    #[serde(default)]
    pub trust_level: String,
    #[serde(default)]
    pub verification_needed: String,
    #[serde(default)]
    pub additional_sources: String,
}

/// A validated stage payload.
///
/// Serialized without a tag: the owning report section already names the stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StagePayload {
    Claims(ClaimsAnalysis),
    Language(LanguageAnalysis),
    RedFlags(RedFlagReport),
    Verification(VerificationGuide),
    Entities(EntityReport),
    CounterArgs(CounterArguments),
    Assessment(CredibilityAssessment),
}

impl StagePayload {
    /// Parse and validate a raw backend response for `stage`.
    ///
    /// The error string describes the first structural problem found and is
    /// recorded as the stage's failure detail.
    pub fn parse(stage: StageId, raw: &str) -> Result<Self, String> {
        let json = extract_json_object(raw).ok_or_else(|| "no JSON object in response".to_string())?;
        let payload = match stage {
            StageId::Claims => StagePayload::Claims(decode(json)?),
            StageId::Language => StagePayload::Language(decode(json)?),
            StageId::RedFlags => StagePayload::RedFlags(decode(json)?),
            StageId::Verification => StagePayload::Verification(decode(json)?),
            StageId::Entities => StagePayload::Entities(decode(json)?),
            StageId::CounterArgs => StagePayload::CounterArgs(decode(json)?),
            StageId::Assessment => StagePayload::Assessment(decode(json)?),
        };
        payload.validate()?;
        Ok(payload.normalized())
    }

    #[cfg(test)]
    pub fn stage(&self) -> StageId {
        match self {
            StagePayload::Claims(_) => StageId::Claims,
            StagePayload::Language(_) => StageId::Language,
            StagePayload::RedFlags(_) => StageId::RedFlags,
            StagePayload::Verification(_) => StageId::Verification,
            StagePayload::Entities(_) => StageId::Entities,
            StagePayload::CounterArgs(_) => StageId::CounterArgs,
            StagePayload::Assessment(_) => StageId::Assessment,
        }
    }

    /// JSON form handed to dependent stages as context.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            StagePayload::Claims(c) => {
                for (i, claim) in c.core_claims.iter().enumerate() {
                    require_text(&claim.claim, &format!("core_claims[{i}].claim"))?;
                    require_one_of(
                        &claim.confidence_level,
                        &CONFIDENCE_LEVELS,
                        &format!("core_claims[{i}].confidence_level"),
                    )?;
                }
                Ok(())
            }
            StagePayload::Language(l) => require_text(&l.overall_tone, "overall_tone"),
            StagePayload::RedFlags(r) => {
                require_one_of(&r.bias_risk_level, &BIAS_RISK_LEVELS, "bias_risk_level")?;
                for (i, flag) in r.red_flags.iter().enumerate() {
                    require_text(&flag.issue, &format!("red_flags[{i}].issue"))?;
                }
                Ok(())
            }
            StagePayload::Verification(v) => {
                for (i, q) in v.verification_questions.iter().enumerate() {
                    require_text(&q.question, &format!("verification_questions[{i}].question"))?;
                }
                Ok(())
            }
            StagePayload::Entities(e) => {
                for (i, p) in e.people.iter().enumerate() {
                    require_text(&p.name, &format!("people[{i}].name"))?;
                }
                for (i, o) in e.organizations.iter().enumerate() {
                    require_text(&o.name, &format!("organizations[{i}].name"))?;
                }
                Ok(())
            }
            StagePayload::CounterArgs(c) => {
                for (i, arg) in c.counter_arguments.iter().enumerate() {
                    require_text(
                        &arg.counter_perspective,
                        &format!("counter_arguments[{i}].counter_perspective"),
                    )?;
                }
                Ok(())
            }
            StagePayload::Assessment(a) => {
                let value = a.credibility_score.value;
                if !(0.0..=100.0).contains(&value) {
                    return Err(format!("credibility_score.value {value} outside 0..=100"));
                }
                Ok(())
            }
        }
    }

    fn normalized(self) -> Self {
        match self {
            StagePayload::Entities(mut e) => {
                e.people = e.people.into_iter().unique_by(|p| p.name.clone()).collect();
                e.organizations = e
                    .organizations
                    .into_iter()
                    .unique_by(|o| o.name.clone())
                    .collect();
                e.key_terms = e.key_terms.into_iter().unique().collect();
                e.locations = e.locations.into_iter().unique().collect();
                StagePayload::Entities(e)
            }
            other => other,
        }
    }
}

fn decode<T: DeserializeOwned>(json: &str) -> Result<T, String> {
    serde_json::from_str::<T>(json).map_err(|e| {
        if looks_truncated(&e) {
            format!("truncated JSON: {e}")
        } else {
            format!("schema mismatch: {e}")
        }
    })
}

fn require_text(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}

fn require_one_of(value: &str, allowed: &[&str], field: &str) -> Result<(), String> {
    let lowered = value.trim().to_ascii_lowercase();
    if allowed.contains(&lowered.as_str()) {
        Ok(())
    } else {
        Err(format!("{field} `{value}` is not one of {}", allowed.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_claims_inside_code_fence() {
        let raw = r#"Here you go:
```json
{
    "analysis_certainty": "High",
    "core_claims": [
        {"claim": "Unemployment fell to 3.9%", "type": "Statistical", "confidence_level": "High"}
    ],
    "claim_summary": "One statistical claim"
}
```"#;
        let payload = StagePayload::parse(StageId::Claims, raw).unwrap();
        match payload {
            StagePayload::Claims(c) => {
                assert_eq!(c.core_claims.len(), 1);
                assert_eq!(c.core_claims[0].kind, "Statistical");
                assert_eq!(c.claim_summary, "One statistical claim");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_claim_without_confidence_is_rejected() {
        let raw = r#"{"core_claims": [{"claim": "Something happened"}]}"#;
        let err = StagePayload::parse(StageId::Claims, raw).unwrap_err();
        assert!(err.contains("confidence_level"), "{err}");
    }

    #[test]
    fn test_claim_with_unknown_confidence_is_rejected() {
        let raw = r#"{"core_claims": [{"claim": "X", "confidence_level": "certain"}]}"#;
        let err = StagePayload::parse(StageId::Claims, raw).unwrap_err();
        assert!(err.contains("not one of"), "{err}");
    }

    #[test]
    fn test_claims_must_be_a_sequence() {
        let raw = r#"{"core_claims": "none"}"#;
        assert!(StagePayload::parse(StageId::Claims, raw).is_err());
    }

    #[test]
    fn test_no_json_is_rejected() {
        let err = StagePayload::parse(StageId::Language, "I cannot help with that").unwrap_err();
        assert_eq!(err, "no JSON object in response");
    }

    #[test]
    fn test_truncated_json_is_reported() {
        let raw = r#"{"overall_tone": "neutral", "hedging_language": ["may"#;
        let err = StagePayload::parse(StageId::Language, raw).unwrap_err();
        assert!(err.starts_with("no JSON object") || err.starts_with("truncated"), "{err}");
    }

    #[test]
    fn test_bias_level_is_case_insensitive() {
        let raw = r#"{"bias_risk_level": "medium", "red_flags": [{"issue": "Anonymous sourcing"}]}"#;
        let payload = StagePayload::parse(StageId::RedFlags, raw).unwrap();
        assert_eq!(payload.stage(), StageId::RedFlags);
    }

    #[test]
    fn test_entities_are_deduplicated() {
        let raw = r#"{
            "people": [{"name": "Ada"}, {"name": "Ada", "role": "dup"}, {"name": "Grace"}],
            "organizations": [{"name": "NATO"}, {"name": "NATO"}],
            "locations": ["Kyiv", "Kyiv"]
        }"#;
        match StagePayload::parse(StageId::Entities, raw).unwrap() {
            StagePayload::Entities(e) => {
                assert_eq!(e.people.len(), 2);
                assert_eq!(e.organizations.len(), 1);
                assert_eq!(e.locations, vec!["Kyiv".to_string()]);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_assessment_score_range() {
        let raw = r#"{"credibility_score": {"value": 140, "reasoning": "?"}}"#;
        assert!(StagePayload::parse(StageId::Assessment, raw).is_err());

        let raw = r#"{"credibility_score": {"value": 72, "reasoning": "solid"}, "credibility_level": "High"}"#;
        assert!(StagePayload::parse(StageId::Assessment, raw).is_ok());
    }

    #[test]
    fn test_payload_value_is_untagged() {
        let payload = StagePayload::Language(LanguageAnalysis {
            overall_tone: "emotional".to_string(),
            ..Default::default()
        });
        let value = payload.to_value();
        assert_eq!(value["overall_tone"], "emotional");
    }
}
