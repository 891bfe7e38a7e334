//! Write stage: produce a raw markdown draft through the content cascade
//!
//! Providers are tried in priority order; a draft that comes back deficient
//! is either blended with a fully synthesized draft (severe shortfall) or
//! passed through for the quality gate to flag (mild shortfall). Blending is
//! deterministic given the same inputs.

use docmill_common::db::models::{ArtifactKind, Job, Language, Source};
use docmill_common::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::providers::{DraftProvider, DraftRequest, LocalSynthesizer, ProviderKind};

/// Outcome of the draft compliance check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftQuality {
    /// Meets every tier requirement
    Compliant,
    /// Missing only decoration (diagram/table); QA will flag it
    MildlyDeficient(Vec<String>),
    /// Structurally short; must be blended with a synthesized draft
    SeverelyDeficient(Vec<String>),
}

/// Write stage configuration and dependencies
pub struct WriteStage {
    /// LLM-backed providers in priority order (hosted first, then local
    /// model). The synthesizer is held separately as the guaranteed backstop.
    providers: Vec<Arc<dyn DraftProvider>>,
    synthesizer: LocalSynthesizer,
}

impl WriteStage {
    pub fn new(providers: Vec<Arc<dyn DraftProvider>>) -> Self {
        Self {
            providers,
            synthesizer: LocalSynthesizer::new(),
        }
    }

    /// Produce and persist the RAW_DRAFT artifact
    pub async fn run(&self, pool: &SqlitePool, job: &Job, sources: &[Source]) -> Result<String> {
        if sources.is_empty() {
            return Err(Error::NoSources(
                "cannot draft without grounding sources".to_string(),
            ));
        }

        let request = DraftRequest {
            topic: job.topic.clone(),
            language: job.language,
            tier: job.tier,
            sources: sources.to_vec(),
        };

        let draft = self.produce_draft(job, &request).await?;
        docmill_common::db::artifacts::insert_artifact(pool, job.id, ArtifactKind::RawDraft, &draft)
            .await?;
        Ok(draft)
    }

    async fn produce_draft(&self, job: &Job, request: &DraftRequest) -> Result<String> {
        let llm_backed: Vec<_> = self
            .providers
            .iter()
            .filter(|p| p.kind() != ProviderKind::Synthesizer)
            .collect();

        // Requesting a paid, grounded report with no generation capability is
        // a configuration error, not something to silently downgrade.
        if job.tier.is_paid() && llm_backed.is_empty() {
            return Err(Error::NoProvider(format!(
                "paid tier {} requires an LLM-backed provider",
                job.tier.as_str()
            )));
        }

        let mut last_error: Option<Error> = None;
        for provider in &llm_backed {
            match provider.generate(request).await {
                Ok(draft) => {
                    let quality = evaluate_draft(&draft, request);
                    tracing::info!(
                        job_id = %job.id,
                        provider = provider.name(),
                        chars = draft.chars().count(),
                        quality = ?quality,
                        "Provider produced draft"
                    );
                    return Ok(match quality {
                        DraftQuality::Compliant | DraftQuality::MildlyDeficient(_) => draft,
                        DraftQuality::SeverelyDeficient(problems) => {
                            tracing::warn!(
                                job_id = %job.id,
                                provider = provider.name(),
                                ?problems,
                                "Draft severely deficient, blending with synthesized draft"
                            );
                            self.blend(request, &draft)
                        }
                    });
                }
                Err(e) => {
                    if e.is_config_error() {
                        return Err(e);
                    }
                    tracing::warn!(
                        job_id = %job.id,
                        provider = provider.name(),
                        error = %e,
                        "Provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        if job.tier.is_paid() {
            // All available providers failed; paid jobs do not downgrade
            return Err(last_error.unwrap_or_else(|| {
                Error::Provider("all generation providers failed".to_string())
            }));
        }

        tracing::info!(job_id = %job.id, "Falling back to local synthesizer");
        Ok(self.synthesizer.synthesize(request))
    }

    /// Deterministic blend: a fully synthesized compliant draft, with the
    /// model's material appended as a supplementary section
    fn blend(&self, request: &DraftRequest, model_draft: &str) -> String {
        let base = self.synthesizer.synthesize(request);
        let heading = match request.language {
            Language::En => "Supplementary Model Draft",
            Language::Ko => "보충 모델 초안",
        };
        format!("{}\n## {}\n\n{}\n", base, heading, model_draft.trim())
    }
}

/// Check a draft against the tier's structural requirements.
///
/// Only missing decoration (diagram/table) passes through for QA to flag;
/// any shortfall in length, sections, citation coverage, or language purity
/// forces the blend, so the tier's structural minimums always hold.
pub fn evaluate_draft(draft: &str, request: &DraftRequest) -> DraftQuality {
    let tier = request.tier;
    let chars = draft.chars().count();
    // Line-anchored so subheadings and fence contents are not counted
    let sections = draft.lines().filter(|l| l.starts_with("## ")).count();
    let has_diagram = draft.contains("```mermaid");
    let has_table = draft.contains("| ---") || draft.contains("|---");
    let cited = request
        .sources
        .iter()
        .filter(|s| draft.contains(&format!("[{}]", s.position)))
        .count();

    let mut severe = Vec::new();
    if chars < tier.min_chars() {
        severe.push(format!("length {} below minimum {}", chars, tier.min_chars()));
    }
    if sections < tier.min_sections() {
        severe.push(format!("{} sections, need {}", sections, tier.min_sections()));
    }
    if cited < request.sources.len() {
        severe.push(format!("only {}/{} sources cited", cited, request.sources.len()));
    }
    if request.language == Language::Ko && hangul_ratio(draft) < 0.30 {
        severe.push("insufficient Korean character ratio".to_string());
    }
    if !severe.is_empty() {
        return DraftQuality::SeverelyDeficient(severe);
    }

    let mut mild = Vec::new();
    if !has_diagram {
        mild.push("missing mermaid diagram".to_string());
    }
    if !has_table {
        mild.push("missing table".to_string());
    }

    if mild.is_empty() {
        DraftQuality::Compliant
    } else {
        DraftQuality::MildlyDeficient(mild)
    }
}

/// Ratio of hangul characters among all letters in the text
fn hangul_ratio(text: &str) -> f64 {
    let mut letters = 0usize;
    let mut hangul = 0usize;
    for c in text.chars() {
        if c.is_alphabetic() {
            letters += 1;
            if ('\u{AC00}'..='\u{D7A3}').contains(&c) || ('\u{1100}'..='\u{11FF}').contains(&c) {
                hangul += 1;
            }
        }
    }
    if letters == 0 {
        0.0
    } else {
        hangul as f64 / letters as f64
    }
}
