//! Atomic scheduling primitive.
//!
//! The claim is one transaction containing a select and an update, so under
//! the single-writer connection no two workers can take the same row.

use chrono::Utc;
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use super::Store;
use super::jobs::{JOB_COLUMNS, format_ts, get_job_conn, job_from_row};
use crate::domain::Job;
use crate::error::{OrchestratorError, Result};

impl Store {
    /// Claim the oldest claimable pending job for `worker_type`, atomically
    /// moving it to `running`. Returns the post-update row.
    ///
    /// A job is claimable when:
    /// - no other job on the same `(repo_url, branch_name)` is running or
    ///   awaiting input, and
    /// - every dependency is `done`.
    pub fn claim_oldest(&self, worker_type: &str) -> Result<Option<Job>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sql = format!(
            "SELECT {} FROM jobs j \
             WHERE j.status = 'pending' AND j.worker_type = ?1 \
               AND NOT EXISTS ( \
                 SELECT 1 FROM jobs r \
                 WHERE r.repo_url = j.repo_url AND r.branch_name = j.branch_name \
                   AND r.id != j.id \
                   AND r.status IN ('running', 'awaiting_input')) \
               AND NOT EXISTS ( \
                 SELECT 1 FROM job_dependencies d \
                 JOIN jobs dep ON dep.id = d.depends_on_job_id \
                 WHERE d.job_id = j.id AND dep.status != 'done') \
             ORDER BY j.created_at ASC, j.id ASC \
             LIMIT 1",
            JOB_COLUMNS
        );

        let candidate = tx.query_row(&sql, [worker_type], job_from_row).optional()?;
        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE jobs SET status = 'running', updated_at = ?2 \
             WHERE id = ?1 AND status = 'pending'",
            params![candidate.id, format_ts(Utc::now())],
        )?;
        if changed != 1 {
            // Cannot happen under the write lock; bail rather than hand out
            // a row we did not transition.
            return Err(OrchestratorError::StaleState {
                id: candidate.id,
                expected: vec!["pending".to_string()],
            });
        }

        let job = get_job_conn(&tx, &candidate.id)?
            .ok_or_else(|| OrchestratorError::NotFound(candidate.id.clone()))?;
        tx.commit()?;
        Ok(Some(job))
    }
}
