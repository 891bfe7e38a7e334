//! Database models for DocMill
//!
//! Enums are stored as TEXT in sqlite; each carries `as_str`/`parse_str`
//! mappings so illegal values surface as errors at the read boundary instead
//! of propagating as free strings.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job lifecycle status
///
/// PENDING → PROCESSING → {COMPLETED, FAILED}. Transitions are monotonic:
/// a claimed job never returns to PENDING, and the terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(Error::Internal(format!("Unknown job status '{}'", other))),
        }
    }

    /// Whether a transition to `next` is legal
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Progress stage within one processing run
///
/// Only advances forward while a job is PROCESSING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStage {
    Idle,
    Research,
    Write,
    Qa,
    Render,
    Done,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Idle => "IDLE",
            JobStage::Research => "RESEARCH",
            JobStage::Write => "WRITE",
            JobStage::Qa => "QA",
            JobStage::Render => "RENDER",
            JobStage::Done => "DONE",
        }
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        match s {
            "IDLE" => Ok(JobStage::Idle),
            "RESEARCH" => Ok(JobStage::Research),
            "WRITE" => Ok(JobStage::Write),
            "QA" => Ok(JobStage::Qa),
            "RENDER" => Ok(JobStage::Render),
            "DONE" => Ok(JobStage::Done),
            other => Err(Error::Internal(format!("Unknown job stage '{}'", other))),
        }
    }

    /// Progress percentage persisted when this stage begins
    pub fn entry_progress_pct(&self) -> i64 {
        match self {
            JobStage::Idle => 0,
            JobStage::Research => 10,
            JobStage::Write => 40,
            JobStage::Qa => 70,
            JobStage::Render => 90,
            JobStage::Done => 100,
        }
    }
}

/// Request tier with its credit cost and output-length bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Free,
    Standard,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "FREE",
            Tier::Standard => "STANDARD",
            Tier::Premium => "PREMIUM",
        }
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        match s {
            "FREE" => Ok(Tier::Free),
            "STANDARD" => Ok(Tier::Standard),
            "PREMIUM" => Ok(Tier::Premium),
            other => Err(Error::Internal(format!("Unknown tier '{}'", other))),
        }
    }

    /// Credits debited at job creation
    pub fn cost_credits(&self) -> i64 {
        match self {
            Tier::Free => 0,
            Tier::Standard => 50,
            Tier::Premium => 150,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.cost_credits() > 0
    }

    /// Minimum acceptable draft length in characters
    pub fn min_chars(&self) -> usize {
        match self {
            Tier::Free => 3_000,
            Tier::Standard => 8_000,
            Tier::Premium => 15_000,
        }
    }

    /// Soft upper bound handed to generation providers
    pub fn max_chars(&self) -> usize {
        match self {
            Tier::Free => 8_000,
            Tier::Standard => 20_000,
            Tier::Premium => 40_000,
        }
    }

    /// Minimum `## ` section count in a compliant draft
    pub fn min_sections(&self) -> usize {
        match self {
            Tier::Free => 4,
            Tier::Standard => 6,
            Tier::Premium => 8,
        }
    }

    /// Default required evidence-source count (overridable by config)
    pub fn default_required_sources(&self) -> u32 {
        match self {
            Tier::Free => 3,
            Tier::Standard => 5,
            Tier::Premium => 8,
        }
    }
}

/// Output locale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ko,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ko => "ko",
        }
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        match s {
            "en" => Ok(Language::En),
            "ko" => Ok(Language::Ko),
            other => Err(Error::Internal(format!("Unknown language '{}'", other))),
        }
    }
}

/// Artifact type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    RawDraft,
    SafeDraft,
    QaReport,
    FinalDocument,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::RawDraft => "RAW_DRAFT",
            ArtifactKind::SafeDraft => "SAFE_DRAFT",
            ArtifactKind::QaReport => "QA_REPORT",
            ArtifactKind::FinalDocument => "FINAL_DOCUMENT",
        }
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        match s {
            "RAW_DRAFT" => Ok(ArtifactKind::RawDraft),
            "SAFE_DRAFT" => Ok(ArtifactKind::SafeDraft),
            "QA_REPORT" => Ok(ArtifactKind::QaReport),
            "FINAL_DOCUMENT" => Ok(ArtifactKind::FinalDocument),
            other => Err(Error::Internal(format!("Unknown artifact kind '{}'", other))),
        }
    }
}

/// Reason tag on a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerReason {
    JobCost,
    Refund,
    Purchase,
    Signup,
    Admin,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::JobCost => "JOB_COST",
            LedgerReason::Refund => "REFUND",
            LedgerReason::Purchase => "PURCHASE",
            LedgerReason::Signup => "SIGNUP",
            LedgerReason::Admin => "ADMIN",
        }
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        match s {
            "JOB_COST" => Ok(LedgerReason::JobCost),
            "REFUND" => Ok(LedgerReason::Refund),
            "PURCHASE" => Ok(LedgerReason::Purchase),
            "SIGNUP" => Ok(LedgerReason::Signup),
            "ADMIN" => Ok(LedgerReason::Admin),
            other => Err(Error::Internal(format!("Unknown ledger reason '{}'", other))),
        }
    }
}

/// One document-generation request and its lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub topic: String,
    pub language: Language,
    pub tier: Tier,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress_pct: i64,
    pub user_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub result_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One gathered evidence excerpt; `position` is the 1-based citation index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub job_id: Uuid,
    pub position: i64,
    pub title: String,
    pub url: String,
    pub excerpt: String,
}

/// Durable stage output (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub kind: ArtifactKind,
    pub storage_key: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only signed balance delta
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub delta: i64,
    pub reason: LedgerReason,
    pub job_id: Option<Uuid>,
    pub order_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse_str(s.as_str()).unwrap(), s);
        }
        assert!(JobStatus::parse_str("RUNNING").is_err());
    }

    #[test]
    fn status_transitions_are_monotonic() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        // No way back to PENDING once claimed
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn stage_progress_is_increasing() {
        let stages = [
            JobStage::Idle,
            JobStage::Research,
            JobStage::Write,
            JobStage::Qa,
            JobStage::Render,
            JobStage::Done,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].entry_progress_pct() < pair[1].entry_progress_pct());
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn tier_table_is_canonical() {
        assert_eq!(Tier::Free.cost_credits(), 0);
        assert_eq!(Tier::Standard.cost_credits(), 50);
        assert_eq!(Tier::Premium.cost_credits(), 150);
        assert!(!Tier::Free.is_paid());
        assert!(Tier::Standard.is_paid());
        assert_eq!(Tier::Premium.default_required_sources(), 8);
    }
}
