//! Quality gate: redact sensitive data and score the draft
//!
//! The gate never fails a job. It always produces two artifacts: a QA_REPORT
//! (score, redaction count, warnings) for audit and a SAFE_DRAFT that feeds
//! rendering. A low score is advisory; surfacing it is a UI concern.

use docmill_common::db::models::{ArtifactKind, Job};
use docmill_common::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Marker generation providers leave on claims they could not ground
pub const UNVERIFIED_MARKER: &str = "[needs-verification]";

const UNVERIFIED_PENALTY: i64 = 10;
const MISSING_DIAGRAM_PENALTY: i64 = 20;

/// Audit record produced for every draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaReport {
    pub score: i64,
    pub redaction_count: usize,
    pub unverified_claims: usize,
    pub has_diagram: bool,
    pub warnings: Vec<String>,
}

/// Quality gate with compiled redaction patterns
pub struct QualityGate {
    email: Regex,
    national_id: Regex,
    phone: Regex,
}

impl QualityGate {
    pub fn new() -> Result<Self> {
        // Order matters at redaction time: national-ID-like sequences are
        // masked before the looser phone pattern can eat them.
        Ok(Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .map_err(|e| Error::Internal(format!("email pattern: {}", e)))?,
            national_id: Regex::new(r"\b\d{6}-\d{7}\b")
                .map_err(|e| Error::Internal(format!("national id pattern: {}", e)))?,
            phone: Regex::new(r"\+?\d{1,3}[-. ]\d{2,4}[-. ]\d{3,4}(?:[-. ]\d{4})?")
                .map_err(|e| Error::Internal(format!("phone pattern: {}", e)))?,
        })
    }

    /// Run the gate: writes QA_REPORT and SAFE_DRAFT artifacts, returns the
    /// safe draft text and the report
    pub async fn run(
        &self,
        pool: &SqlitePool,
        job: &Job,
        raw_draft: &str,
    ) -> Result<(String, QaReport)> {
        let (safe_draft, redaction_count) = self.redact(raw_draft);
        let report = self.score(&safe_draft, redaction_count);

        tracing::info!(
            job_id = %job.id,
            score = report.score,
            redactions = report.redaction_count,
            unverified = report.unverified_claims,
            "Quality gate evaluated draft"
        );

        let report_json = serde_json::to_string_pretty(&report)
            .map_err(|e| Error::Internal(format!("QA report serialize failed: {}", e)))?;
        docmill_common::db::artifacts::insert_artifact(
            pool,
            job.id,
            ArtifactKind::QaReport,
            &report_json,
        )
        .await?;
        docmill_common::db::artifacts::insert_artifact(
            pool,
            job.id,
            ArtifactKind::SafeDraft,
            &safe_draft,
        )
        .await?;

        Ok((safe_draft, report))
    }

    /// Mask PII with fixed placeholder tokens; returns the redaction count
    pub fn redact(&self, text: &str) -> (String, usize) {
        let mut count = 0;

        let text = self.email.replace_all(text, |_: &regex::Captures| {
            count += 1;
            "[email-redacted]"
        });
        let text = self.national_id.replace_all(&text, |_: &regex::Captures| {
            count += 1;
            "[id-redacted]"
        });
        let text = self.phone.replace_all(&text, |_: &regex::Captures| {
            count += 1;
            "[phone-redacted]"
        });

        (text.into_owned(), count)
    }

    /// Score formula: 100 − 10 per unverified claim − 20 when the diagram
    /// marker is absent, floored at 0
    pub fn score(&self, draft: &str, redaction_count: usize) -> QaReport {
        let unverified_claims = draft.matches(UNVERIFIED_MARKER).count();
        let has_diagram = draft.contains("```mermaid");

        let mut warnings = Vec::new();
        if unverified_claims > 0 {
            warnings.push(format!(
                "{} claim(s) marked {} (-{} each)",
                unverified_claims, UNVERIFIED_MARKER, UNVERIFIED_PENALTY
            ));
        }
        if !has_diagram {
            warnings.push(format!(
                "no mermaid diagram present (-{})",
                MISSING_DIAGRAM_PENALTY
            ));
        }
        if redaction_count > 0 {
            warnings.push(format!("{} PII value(s) redacted", redaction_count));
        }

        let mut score = 100 - (unverified_claims as i64 * UNVERIFIED_PENALTY);
        if !has_diagram {
            score -= MISSING_DIAGRAM_PENALTY;
        }

        QaReport {
            score: score.max(0),
            redaction_count,
            unverified_claims,
            has_diagram,
            warnings,
        }
    }
}
