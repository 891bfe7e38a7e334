//! Job orchestrator
//!
//! Claims pending jobs exactly once and drives them through the four stages,
//! persisting progress before each stage and compensating on failure. The
//! claim is an atomic conditional update on the job's status; losing it means
//! another worker owns the job and this attempt aborts silently.

use chrono::Utc;
use docmill_common::config::Settings;
use docmill_common::db::models::{Job, JobStage, Tier};
use docmill_common::events::{DocmillEvent, EventBus};
use docmill_common::{db, ledger, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::pipeline::qa::QualityGate;
use crate::pipeline::render::RenderStage;
use crate::pipeline::research::ResearchStage;
use crate::pipeline::write::WriteStage;

/// Drives one job at a time through research → write → qa → render
pub struct JobOrchestrator {
    pool: SqlitePool,
    event_bus: EventBus,
    research: ResearchStage,
    write: WriteStage,
    qa: QualityGate,
    render: RenderStage,
    settings: Settings,
}

impl JobOrchestrator {
    pub fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        research: ResearchStage,
        write: WriteStage,
        qa: QualityGate,
        render: RenderStage,
        settings: Settings,
    ) -> Self {
        Self {
            pool,
            event_bus,
            research,
            write,
            qa,
            render,
            settings,
        }
    }

    /// Claim and process one job end to end.
    ///
    /// Returns `Ok(false)` when the claim was lost (already processed or in
    /// progress elsewhere); that path is silent by design.
    pub async fn process_job(&self, job_id: Uuid) -> Result<bool> {
        if !db::jobs::claim_job(&self.pool, job_id).await? {
            tracing::debug!(job_id = %job_id, "Claim lost, skipping");
            return Ok(false);
        }

        let job = db::jobs::get_job(&self.pool, job_id).await?;
        tracing::info!(
            job_id = %job_id,
            topic = %job.topic,
            tier = job.tier.as_str(),
            language = job.language.as_str(),
            "Claimed job, starting pipeline"
        );

        match self.run_stages(&job).await {
            Ok(result_key) => {
                db::jobs::mark_completed(&self.pool, job_id, &result_key).await?;
                self.event_bus.emit_lossy(DocmillEvent::JobCompleted {
                    job_id,
                    result_key,
                    timestamp: Utc::now(),
                });
                tracing::info!(job_id = %job_id, "Job completed");
            }
            Err(e) => {
                self.handle_failure(&job, &e).await;
            }
        }
        Ok(true)
    }

    /// Fixed stage sequence; the first error aborts the remainder
    async fn run_stages(&self, job: &Job) -> Result<String> {
        self.enter_stage(job, JobStage::Research).await;
        let required = self.required_sources(job.tier);
        let sources = self.research.run(&self.pool, job, required).await?;

        self.enter_stage(job, JobStage::Write).await;
        let raw_draft = self.write.run(&self.pool, job, &sources).await?;

        self.enter_stage(job, JobStage::Qa).await;
        let (safe_draft, _report) = self.qa.run(&self.pool, job, &raw_draft).await?;

        self.enter_stage(job, JobStage::Render).await;
        self.render.run(&self.pool, job, &safe_draft).await
    }

    /// Persist the stage/percentage and emit progress. These writes are
    /// observability, not correctness-bearing, so a failure here only logs.
    async fn enter_stage(&self, job: &Job, stage: JobStage) {
        if let Err(e) = db::jobs::set_stage(&self.pool, job.id, stage).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to persist stage progress");
        }
        self.event_bus.emit_lossy(DocmillEvent::JobProgress {
            job_id: job.id,
            stage,
            progress_pct: stage.entry_progress_pct(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            job_id = %job.id,
            stage = stage.as_str(),
            progress_pct = stage.entry_progress_pct(),
            "Entering stage"
        );
    }

    /// Mark the job failed and attempt compensation for paid jobs.
    ///
    /// A refund failure is logged, never re-thrown: it must not crash the
    /// worker or re-fail the job.
    async fn handle_failure(&self, job: &Job, error: &docmill_common::Error) {
        let message = error.to_string();
        tracing::error!(job_id = %job.id, error = %message, "Job failed");

        if let Err(e) = db::jobs::mark_failed(&self.pool, job.id, &message).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist FAILED state");
        }
        self.event_bus.emit_lossy(DocmillEvent::JobFailed {
            job_id: job.id,
            error: message,
            timestamp: Utc::now(),
        });

        if job.user_id.is_some() && job.tier.is_paid() {
            match ledger::refund(&self.pool, job.id).await {
                Ok(true) => {
                    tracing::info!(job_id = %job.id, "Refunded job cost after failure")
                }
                Ok(false) => {
                    tracing::debug!(job_id = %job.id, "No refund due (none deducted or already refunded)")
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Refund attempt failed")
                }
            }
        }
    }

    fn required_sources(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.settings.sources_free,
            Tier::Standard => self.settings.sources_standard,
            Tier::Premium => self.settings.sources_premium,
        }
    }
}
