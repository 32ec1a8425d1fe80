//! Job CRUD, dependency validation and cascading cancellation.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use uuid::Uuid;

use super::Store;
use crate::domain::{CreateJobInput, Job, JobFilter, JobSpec, JobStatus, PushMode, ResultSummary};
use crate::error::{OrchestratorError, Result};

pub(super) const JOB_COLUMNS: &str = "id, repo_url, base_ref, branch_name, worktree_path, \
     worker_type, feature_id, feature_part, push_mode, use_worktree, status, spec, \
     result_summary, conversation_id, resume_requested, created_at, updated_at";

pub(super) fn format_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width UTC timestamps sort lexicographically in SQL.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(message),
    )
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, format!("bad timestamp {:?}: {}", raw, e)))
}

pub(super) fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let push_mode_raw: String = row.get(8)?;
    let status_raw: String = row.get(10)?;
    let spec_raw: String = row.get(11)?;
    let summary_raw: Option<String> = row.get(12)?;
    let created_raw: String = row.get(15)?;
    let updated_raw: String = row.get(16)?;

    let spec: JobSpec = serde_json::from_str(&spec_raw)
        .map_err(|e| conversion_err(11, format!("bad job spec: {}", e)))?;
    let result_summary: Option<ResultSummary> = match summary_raw {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|e| conversion_err(12, format!("bad result summary: {}", e)))?,
        ),
        None => None,
    };

    Ok(Job {
        id: row.get(0)?,
        repo_url: row.get(1)?,
        base_ref: row.get(2)?,
        branch_name: row.get(3)?,
        worktree_path: row.get(4)?,
        worker_type: row.get(5)?,
        feature_id: row.get(6)?,
        feature_part: row.get(7)?,
        push_mode: PushMode::parse(&push_mode_raw)
            .ok_or_else(|| conversion_err(8, format!("bad push_mode {:?}", push_mode_raw)))?,
        use_worktree: row.get::<_, i64>(9)? != 0,
        status: JobStatus::parse(&status_raw)
            .ok_or_else(|| conversion_err(10, format!("bad status {:?}", status_raw)))?,
        spec,
        result_summary,
        session_id: row.get(13)?,
        resume_requested: row.get::<_, i64>(14)? != 0,
        created_at: parse_ts(15, &created_raw)?,
        updated_at: parse_ts(16, &updated_raw)?,
    })
}

pub(super) fn get_job_conn(conn: &Connection, id: &str) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
    Ok(conn
        .query_row(&sql, [id], job_from_row)
        .optional()?)
}

/// Load the full dependency adjacency (job -> its dependencies).
fn load_edges(conn: &Connection) -> Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare("SELECT job_id, depends_on_job_id FROM job_dependencies")?;
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (from, to) = row?;
        edges.entry(from).or_default().push(to);
    }
    Ok(edges)
}

/// DFS over the adjacency augmented by `new_edges`; reports a cycle when a
/// node currently on the recursion stack is revisited.
fn has_cycle(start: &str, new_edges: &[String], edges: &HashMap<String, Vec<String>>) -> bool {
    fn visit(
        node: &str,
        start: &str,
        new_edges: &[String],
        edges: &HashMap<String, Vec<String>>,
        stack: &mut HashSet<String>,
        visited: &mut HashSet<String>,
    ) -> bool {
        if stack.contains(node) {
            return true;
        }
        if !visited.insert(node.to_string()) {
            return false;
        }
        stack.insert(node.to_string());
        let next: Vec<&String> = if node == start {
            new_edges.iter().collect()
        } else {
            edges.get(node).map(|v| v.iter().collect()).unwrap_or_default()
        };
        for dep in next {
            if visit(dep, start, new_edges, edges, stack, visited) {
                return true;
            }
        }
        stack.remove(node);
        false
    }

    let mut stack = HashSet::new();
    let mut visited = HashSet::new();
    visit(start, start, new_edges, edges, &mut stack, &mut visited)
}

/// Cancel every still-pending job that transitively depends on `origin`.
/// Runs inside the caller's transaction.
fn cascade_cancel(conn: &Connection, origin: &str, origin_status: JobStatus) -> Result<()> {
    let mut frontier = vec![(origin.to_string(), origin_status)];

    while let Some((upstream_id, upstream_status)) = frontier.pop() {
        let dependents: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT job_id FROM job_dependencies WHERE depends_on_job_id = ?1",
            )?;
            let rows = stmt.query_map([&upstream_id], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        for dependent in dependents {
            let summary =
                ResultSummary::cascade_from(&upstream_id, upstream_status.as_str());
            let changed = conn.execute(
                "UPDATE jobs SET status = 'cancelled', result_summary = ?2, updated_at = ?3 \
                 WHERE id = ?1 AND status = 'pending'",
                params![
                    dependent,
                    serde_json::to_string(&summary)?,
                    format_ts(Utc::now()),
                ],
            )?;
            if changed > 0 {
                frontier.push((dependent, JobStatus::Cancelled));
            }
        }
    }

    Ok(())
}

/// Select the bulk-delete candidate set: requested (non-protected) statuses,
/// optionally older than the cutoff, minus everything a surviving job still
/// depends on. Survivors can grow the excluded set, so iterate to a fixpoint.
fn removable_jobs(
    conn: &Connection,
    statuses: Option<&[JobStatus]>,
    max_age_days: Option<i64>,
) -> Result<Vec<Job>> {
    let default_statuses = [JobStatus::Done, JobStatus::Failed, JobStatus::Cancelled];
    let statuses: Vec<JobStatus> = statuses
        .unwrap_or(&default_statuses)
        .iter()
        .copied()
        .filter(|s| !s.is_protected())
        .collect();
    if statuses.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("?{}", i)).collect();
    let mut sql = format!(
        "SELECT {} FROM jobs WHERE status IN ({})",
        JOB_COLUMNS,
        placeholders.join(", ")
    );
    let mut args: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
    if let Some(days) = max_age_days {
        let cutoff = Utc::now() - chrono::Duration::days(days.max(0));
        args.push(format_ts(cutoff));
        sql.push_str(&format!(" AND created_at < ?{}", args.len()));
    }

    let mut candidates: HashMap<String, Job> = {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), job_from_row)?;
        rows.map(|r| r.map(|j| (j.id.clone(), j)))
            .collect::<rusqlite::Result<_>>()?
    };

    let edges: Vec<(String, String)> = {
        let mut stmt = conn.prepare("SELECT job_id, depends_on_job_id FROM job_dependencies")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    loop {
        let blocked: Vec<String> = edges
            .iter()
            .filter(|(dependent, dep)| {
                candidates.contains_key(dep) && !candidates.contains_key(dependent)
            })
            .map(|(_, dep)| dep.clone())
            .collect();
        if blocked.is_empty() {
            break;
        }
        for id in blocked {
            candidates.remove(&id);
        }
    }

    let mut removable: Vec<Job> = candidates.into_values().collect();
    removable.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(removable)
}

impl Store {
    /// Insert a new pending job, validating and recording its dependencies in
    /// the same transaction.
    pub fn create_job(&self, input: CreateJobInput) -> Result<Job> {
        if input.repo_url.trim().is_empty() {
            return Err(OrchestratorError::Validation("repo_url is required".into()));
        }
        if input.branch_name.trim().is_empty() && input.use_worktree {
            return Err(OrchestratorError::Validation(
                "branch_name is required".into(),
            ));
        }

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for dep in &input.depends_on {
            let status: Option<String> = tx
                .query_row("SELECT status FROM jobs WHERE id = ?1", [dep], |r| r.get(0))
                .optional()?;
            match status.as_deref() {
                None => {
                    return Err(OrchestratorError::Validation(format!(
                        "unknown dependency {}",
                        dep
                    )));
                }
                Some("failed") | Some("cancelled") => {
                    return Err(OrchestratorError::DependencyTerminated(dep.clone()));
                }
                Some(_) => {}
            }
        }

        let id = Uuid::new_v4().to_string();

        if !input.depends_on.is_empty() {
            let edges = load_edges(&tx)?;
            if has_cycle(&id, &input.depends_on, &edges) {
                return Err(OrchestratorError::CircularDependency(id));
            }
        }

        let now = format_ts(Utc::now());
        tx.execute(
            "INSERT INTO jobs (id, repo_url, base_ref, branch_name, worktree_path, worker_type, \
             feature_id, feature_part, push_mode, use_worktree, status, spec, result_summary, \
             conversation_id, resume_requested, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11, NULL, ?12, ?13, ?14, ?14)",
            params![
                id,
                input.repo_url,
                input.base_ref,
                input.branch_name,
                input.worktree_path,
                input.worker_type,
                input.feature_id,
                input.feature_part,
                input.push_mode.as_str(),
                input.use_worktree as i64,
                serde_json::to_string(&input.spec)?,
                input.session_id,
                input.resume_requested as i64,
                now,
            ],
        )?;

        for dep in &input.depends_on {
            tx.execute(
                "INSERT OR IGNORE INTO job_dependencies (job_id, depends_on_job_id) VALUES (?1, ?2)",
                params![id, dep],
            )?;
        }

        let job = get_job_conn(&tx, &id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))?;
        tx.commit()?;
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        get_job_conn(&self.conn(), id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// List jobs newest first, optionally filtered.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut sql = format!("SELECT {} FROM jobs WHERE 1=1", JOB_COLUMNS);
        let mut args: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(ref worker_type) = filter.worker_type {
            args.push(worker_type.clone());
            sql.push_str(&format!(" AND worker_type = ?{}", args.len()));
        }
        if let Some(ref feature_id) = filter.feature_id {
            args.push(feature_id.clone());
            sql.push_str(&format!(" AND feature_id = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// One-row status update with optional optimistic precondition; cascades
    /// cancellation to pending dependents when moving to failed/cancelled.
    pub fn update_status(
        &self,
        id: &str,
        new_status: JobStatus,
        result_summary: Option<&ResultSummary>,
        expected: Option<&[JobStatus]>,
        session_id: Option<&str>,
    ) -> Result<Job> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = get_job_conn(&tx, id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        if let Some(expected) = expected {
            if !expected.contains(&current.status) {
                return Err(OrchestratorError::StaleState {
                    id: id.to_string(),
                    expected: expected.iter().map(|s| s.as_str().to_string()).collect(),
                });
            }
        }

        let summary_json = match result_summary {
            Some(summary) => Some(serde_json::to_string(summary)?),
            None => None,
        };

        tx.execute(
            "UPDATE jobs SET status = ?2, updated_at = ?3, \
             result_summary = COALESCE(?4, result_summary), \
             conversation_id = COALESCE(?5, conversation_id) \
             WHERE id = ?1",
            params![
                id,
                new_status.as_str(),
                format_ts(Utc::now()),
                summary_json,
                session_id,
            ],
        )?;

        if matches!(new_status, JobStatus::Failed | JobStatus::Cancelled) {
            cascade_cancel(&tx, id, new_status)?;
        }

        let job = get_job_conn(&tx, id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        tx.commit()?;
        Ok(job)
    }

    /// Clear the consumed continuation hints after a worker claimed the job.
    pub fn clear_resume_hints(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET resume_requested = 0 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    /// Delete one job. Refused for protected statuses and when another job
    /// still depends on it; dependency and log rows cascade.
    pub fn delete_job(&self, id: &str) -> Result<Job> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let job = get_job_conn(&tx, id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        if job.status.is_protected() {
            return Err(OrchestratorError::ProtectedState(id.to_string()));
        }

        let dependents: i64 = tx.query_row(
            "SELECT COUNT(*) FROM job_dependencies WHERE depends_on_job_id = ?1",
            [id],
            |r| r.get(0),
        )?;
        if dependents > 0 {
            return Err(OrchestratorError::DependentExists(id.to_string()));
        }

        tx.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(job)
    }

    /// Bulk delete by status and age. Protected statuses are always excluded;
    /// jobs still depended on by a surviving job are silently skipped.
    /// Returns the removed rows.
    pub fn delete_jobs(
        &self,
        statuses: Option<&[JobStatus]>,
        max_age_days: Option<i64>,
    ) -> Result<Vec<Job>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let removed = removable_jobs(&tx, statuses, max_age_days)?;
        for job in &removed {
            tx.execute("DELETE FROM jobs WHERE id = ?1", [&job.id])?;
        }

        tx.commit()?;
        Ok(removed)
    }

    /// What `delete_jobs` would remove, without removing anything.
    pub fn deletable_jobs(
        &self,
        statuses: Option<&[JobStatus]>,
        max_age_days: Option<i64>,
    ) -> Result<Vec<Job>> {
        removable_jobs(&self.conn(), statuses, max_age_days)
    }

    /// Dependency edges of one job, both directions.
    pub fn job_dependencies(&self, id: &str) -> Result<(Vec<String>, Vec<String>)> {
        let conn = self.conn();
        if get_job_conn(&conn, id)?.is_none() {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }

        let mut stmt = conn.prepare(
            "SELECT depends_on_job_id FROM job_dependencies WHERE job_id = ?1 ORDER BY depends_on_job_id",
        )?;
        let depends_on: Vec<String> = stmt
            .query_map([id], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = conn.prepare(
            "SELECT job_id FROM job_dependencies WHERE depends_on_job_id = ?1 ORDER BY job_id",
        )?;
        let depended_by: Vec<String> = stmt
            .query_map([id], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        Ok((depends_on, depended_by))
    }

    /// Does any job other than `exclude_ids` still reference this worktree?
    pub fn worktree_in_use(&self, path: &str, exclude_ids: &[&str]) -> Result<bool> {
        let conn = self.conn();
        let mut sql = "SELECT COUNT(*) FROM jobs WHERE worktree_path = ?1".to_string();
        let mut args: Vec<String> = vec![path.to_string()];
        for id in exclude_ids {
            args.push((*id).to_string());
            sql.push_str(&format!(" AND id != ?{}", args.len()));
        }
        let count: i64 =
            conn.query_row(&sql, rusqlite::params_from_iter(args.iter()), |r| r.get(0))?;
        Ok(count > 0)
    }

    /// All jobs that reference some worktree path (for worktree state joins).
    pub fn jobs_with_worktrees(&self) -> Result<Vec<Job>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM jobs WHERE worktree_path IS NOT NULL AND worktree_path != ''",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Distinct repo URLs referenced by any job (for cache sweeps).
    pub fn distinct_repo_urls(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT repo_url FROM jobs")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn input(repo: &str, branch: &str) -> CreateJobInput {
        CreateJobInput {
            repo_url: repo.to_string(),
            base_ref: "origin/main".to_string(),
            branch_name: branch.to_string(),
            worktree_path: Some(format!("/tmp/wt/{}", branch.replace('/', "-"))),
            worker_type: "codex".to_string(),
            feature_id: None,
            feature_part: None,
            push_mode: PushMode::Always,
            use_worktree: true,
            spec: JobSpec {
                prompt: "do the thing".to_string(),
                context_files: Vec::new(),
                extra: Default::default(),
            },
            depends_on: Vec::new(),
            session_id: None,
            resume_requested: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::input;
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = store();
        let created = store.create_job(input("/tmp/repo", "feat/x")).unwrap();
        assert_eq!(created.status, JobStatus::Pending);

        let fetched = store.get_job(&created.id).unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.repo_url, "/tmp/repo");
        assert_eq!(fetched.branch_name, "feat/x");
        assert_eq!(fetched.spec.prompt, "do the thing");
        assert_eq!(fetched.created_at, created.created_at);
    }

    #[test]
    fn get_missing_is_not_found() {
        let err = store().get_job("nope").unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[test]
    fn create_rejects_unknown_dependency() {
        let store = store();
        let mut req = input("/tmp/repo", "feat/a");
        req.depends_on = vec!["ghost".to_string()];
        let err = store.create_job(req).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[test]
    fn create_rejects_terminated_dependency() {
        let store = store();
        let a = store.create_job(input("/tmp/repo", "feat/a")).unwrap();
        store
            .update_status(&a.id, JobStatus::Running, None, None, None)
            .unwrap();
        store
            .update_status(&a.id, JobStatus::Failed, None, None, None)
            .unwrap();

        let mut req = input("/tmp/repo", "feat/b");
        req.depends_on = vec![a.id.clone()];
        let err = store.create_job(req).unwrap_err();
        assert!(matches!(err, OrchestratorError::DependencyTerminated(_)));
    }

    #[test]
    fn dependencies_are_queryable_both_ways() {
        let store = store();
        let a = store.create_job(input("/tmp/repo", "feat/a")).unwrap();
        let mut req = input("/tmp/repo", "feat/b");
        req.depends_on = vec![a.id.clone()];
        let b = store.create_job(req).unwrap();

        let (depends_on, depended_by) = store.job_dependencies(&b.id).unwrap();
        assert_eq!(depends_on, vec![a.id.clone()]);
        assert!(depended_by.is_empty());

        let (_, depended_by_a) = store.job_dependencies(&a.id).unwrap();
        assert_eq!(depended_by_a, vec![b.id]);
    }

    #[test]
    fn cycle_detection_rejects_self_loop_via_dfs() {
        let edges: HashMap<String, Vec<String>> = [
            ("b".to_string(), vec!["a".to_string()]),
            ("c".to_string(), vec!["b".to_string()]),
        ]
        .into();
        // new job "a" depending on "c" closes a -> c -> b -> a
        assert!(has_cycle("a", &["c".to_string()], &edges));
        assert!(!has_cycle("d", &["c".to_string()], &edges));
    }

    #[test]
    fn stale_expected_status_is_rejected() {
        let store = store();
        let a = store.create_job(input("/tmp/repo", "feat/a")).unwrap();
        let err = store
            .update_status(
                &a.id,
                JobStatus::Done,
                None,
                Some(&[JobStatus::Running]),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::StaleState { .. }));
        // untouched
        assert_eq!(store.get_job(&a.id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn failure_cascades_to_transitive_pending_dependents() {
        let store = store();
        let a = store.create_job(input("/tmp/repo", "feat/a")).unwrap();
        let mut req_b = input("/tmp/repo", "feat/b");
        req_b.depends_on = vec![a.id.clone()];
        let b = store.create_job(req_b).unwrap();
        let mut req_c = input("/tmp/repo", "feat/c");
        req_c.depends_on = vec![b.id.clone()];
        let c = store.create_job(req_c).unwrap();

        store
            .update_status(&a.id, JobStatus::Running, None, None, None)
            .unwrap();
        store
            .update_status(&a.id, JobStatus::Failed, None, None, None)
            .unwrap();

        let b = store.get_job(&b.id).unwrap();
        let c = store.get_job(&c.id).unwrap();
        assert_eq!(b.status, JobStatus::Cancelled);
        assert_eq!(c.status, JobStatus::Cancelled);
        assert_eq!(
            b.result_summary.unwrap().cancelled_by.as_deref(),
            Some(a.id.as_str())
        );
        // C was cancelled because of its immediate upstream B
        assert_eq!(
            c.result_summary.unwrap().cancelled_by.as_deref(),
            Some(b.id.as_str())
        );
    }

    #[test]
    fn cascade_never_reopens_terminal_dependents() {
        let store = store();
        let a = store.create_job(input("/tmp/repo", "feat/a")).unwrap();
        let mut req_b = input("/tmp/repo", "feat/b");
        req_b.depends_on = vec![a.id.clone()];
        let b = store.create_job(req_b).unwrap();

        store
            .update_status(&b.id, JobStatus::Running, None, None, None)
            .unwrap();
        store
            .update_status(&b.id, JobStatus::Done, None, None, None)
            .unwrap();
        store
            .update_status(&a.id, JobStatus::Cancelled, None, None, None)
            .unwrap();

        assert_eq!(store.get_job(&b.id).unwrap().status, JobStatus::Done);
    }

    #[test]
    fn delete_refuses_protected_and_depended_on() {
        let store = store();
        let a = store.create_job(input("/tmp/repo", "feat/a")).unwrap();
        let mut req_b = input("/tmp/repo", "feat/b");
        req_b.depends_on = vec![a.id.clone()];
        let b = store.create_job(req_b).unwrap();

        let err = store.delete_job(&a.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::DependentExists(_)));

        store
            .update_status(&b.id, JobStatus::Running, None, None, None)
            .unwrap();
        let err = store.delete_job(&b.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::ProtectedState(_)));
    }

    #[test]
    fn delete_cascades_dependency_rows() {
        let store = store();
        let a = store.create_job(input("/tmp/repo", "feat/a")).unwrap();
        let mut req_b = input("/tmp/repo", "feat/b");
        req_b.depends_on = vec![a.id.clone()];
        let b = store.create_job(req_b).unwrap();

        store.delete_job(&b.id).unwrap();
        let (_, depended_by) = store.job_dependencies(&a.id).unwrap();
        assert!(depended_by.is_empty());
        store.delete_job(&a.id).unwrap();
    }

    #[test]
    fn bulk_delete_skips_depended_on_survivors() {
        let store = store();
        let a = store.create_job(input("/tmp/repo", "feat/a")).unwrap();
        let mut req_b = input("/tmp/repo", "feat/b");
        req_b.depends_on = vec![a.id.clone()];
        let b = store.create_job(req_b).unwrap();

        // A is done; B survives as pending and depends on A.
        store
            .update_status(&a.id, JobStatus::Running, None, None, None)
            .unwrap();
        store
            .update_status(&a.id, JobStatus::Done, None, None, None)
            .unwrap();

        let removed = store.delete_jobs(None, None).unwrap();
        assert!(removed.is_empty());

        // Once B is terminal too, both go in one sweep.
        store
            .update_status(&b.id, JobStatus::Cancelled, None, None, None)
            .unwrap();
        let removed = store.delete_jobs(None, None).unwrap();
        assert_eq!(removed.len(), 2);
    }

    #[test]
    fn bulk_delete_ignores_protected_status_filters() {
        let store = store();
        let a = store.create_job(input("/tmp/repo", "feat/a")).unwrap();
        store
            .update_status(&a.id, JobStatus::Running, None, None, None)
            .unwrap();

        let removed = store
            .delete_jobs(Some(&[JobStatus::Running]), None)
            .unwrap();
        assert!(removed.is_empty());
        assert_eq!(store.get_job(&a.id).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn list_filters_by_status_worker_type_and_feature() {
        let store = store();
        let mut req = input("/tmp/repo", "feat/a");
        req.feature_id = Some("auth".to_string());
        store.create_job(req).unwrap();
        let b = store.create_job(input("/tmp/repo", "feat/b")).unwrap();
        store
            .update_status(&b.id, JobStatus::Running, None, None, None)
            .unwrap();

        let pending = store
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Pending),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(pending.len(), 1);

        let by_feature = store
            .list_jobs(&JobFilter {
                feature_id: Some("auth".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_feature.len(), 1);

        let by_type = store
            .list_jobs(&JobFilter {
                worker_type: Some("none".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(by_type.is_empty());
    }

    #[test]
    fn worktree_in_use_respects_exclusions() {
        let store = store();
        let a = store.create_job(input("/tmp/repo", "feat/a")).unwrap();
        let path = a.worktree_path.clone().unwrap();

        assert!(store.worktree_in_use(&path, &[]).unwrap());
        assert!(!store.worktree_in_use(&path, &[a.id.as_str()]).unwrap());
        assert!(!store.worktree_in_use("/tmp/other", &[]).unwrap());
    }
}
