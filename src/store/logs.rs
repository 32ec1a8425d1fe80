//! Append-only job log storage.

use chrono::{DateTime, Utc};
use rusqlite::{TransactionBehavior, params};

use super::Store;
use super::jobs::format_ts;
use crate::domain::{JobLogEntry, LogStream};
use crate::error::{OrchestratorError, Result};

fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64, String, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

impl Store {
    /// Append one log chunk. The store assigns the per-job sequence number.
    pub fn append_log(
        &self,
        job_id: &str,
        stream: LogStream,
        text: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<JobLogEntry> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM jobs WHERE id = ?1",
            [job_id],
            |r| r.get(0),
        )?;
        if exists == 0 {
            return Err(OrchestratorError::NotFound(job_id.to_string()));
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM job_logs WHERE job_id = ?1",
            [job_id],
            |r| r.get(0),
        )?;
        let created_at = timestamp.unwrap_or_else(Utc::now);
        tx.execute(
            "INSERT INTO job_logs (job_id, seq, stream, text, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job_id, seq, stream.as_str(), text, format_ts(created_at)],
        )?;
        tx.commit()?;

        Ok(JobLogEntry {
            job_id: job_id.to_string(),
            seq,
            stream,
            text: text.to_string(),
            created_at,
        })
    }

    /// All log entries of a job in insertion order.
    pub fn read_logs(&self, job_id: &str) -> Result<Vec<JobLogEntry>> {
        let conn = self.conn();

        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE id = ?1",
            [job_id],
            |r| r.get(0),
        )?;
        if exists == 0 {
            return Err(OrchestratorError::NotFound(job_id.to_string()));
        }

        let mut stmt = conn.prepare(
            "SELECT job_id, seq, stream, text, created_at FROM job_logs \
             WHERE job_id = ?1 ORDER BY seq ASC",
        )?;
        let raw: Vec<(String, i64, String, String, String)> = stmt
            .query_map([job_id], parse_entry)?
            .collect::<rusqlite::Result<_>>()?;

        raw.into_iter()
            .map(|(job_id, seq, stream, text, created_at)| {
                Ok(JobLogEntry {
                    job_id,
                    seq,
                    stream: LogStream::parse(&stream).ok_or_else(|| {
                        OrchestratorError::Validation(format!("bad log stream {:?}", stream))
                    })?,
                    text,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| {
                            OrchestratorError::Validation(format!("bad log timestamp: {}", e))
                        })?,
                })
            })
            .collect()
    }
}
