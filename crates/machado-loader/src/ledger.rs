//! Job ledger
//!
//! Every job writes one `history` row before it touches its input file and
//! moves it to `success` or `failure` exactly once. [`JobHandle`] is consumed
//! by the terminal call, so finishing a job twice does not compile.
//!
//! A process killed mid-job leaves its row in `started`; spotting those is an
//! operational concern outside the loader.

use crate::error::Result;
use crate::models::{History, JobStatus, NewHistory};
use crate::store::Store;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Open ledger record of a running job
#[must_use = "a started job must be finished with JobLedger::success or JobLedger::failure"]
#[derive(Debug)]
pub struct JobHandle {
    history_id: i64,
    command: String,
    started: Instant,
}

impl JobHandle {
    pub fn id(&self) -> i64 {
        self.history_id
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[derive(Clone)]
pub struct JobLedger {
    store: Arc<dyn Store>,
    user: String,
}

impl JobLedger {
    pub fn new(store: Arc<dyn Store>, user: impl Into<String>) -> Self {
        Self {
            store,
            user: user.into(),
        }
    }

    /// Record a new job in `started` state
    pub async fn start(&self, command: &str, params: serde_json::Value) -> Result<JobHandle> {
        let row = self
            .store
            .insert_history(&NewHistory {
                username: self.user.clone(),
                command: command.to_string(),
                params,
            })
            .await?;

        info!(job_id = row.history_id, command, user = %self.user, "Job started");

        Ok(JobHandle {
            history_id: row.history_id,
            command: command.to_string(),
            started: Instant::now(),
        })
    }

    pub async fn success(&self, handle: JobHandle, description: &str) -> Result<History> {
        let row = self
            .store
            .finish_history(handle.history_id, JobStatus::Success, description)
            .await?;
        info!(
            job_id = handle.history_id,
            command = %handle.command,
            elapsed_ms = handle.started.elapsed().as_millis() as u64,
            "{}",
            description
        );
        Ok(row)
    }

    pub async fn failure(&self, handle: JobHandle, description: &str) -> Result<History> {
        let row = self
            .store
            .finish_history(handle.history_id, JobStatus::Failure, description)
            .await?;
        error!(
            job_id = handle.history_id,
            command = %handle.command,
            elapsed_ms = handle.started.elapsed().as_millis() as u64,
            "Job failed: {}",
            description
        );
        Ok(row)
    }
}

impl std::fmt::Debug for JobLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLedger").field("user", &self.user).finish()
    }
}
