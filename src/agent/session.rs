//! Session-id recovery.
//!
//! The primary source is the agent's JSONL output: any line whose JSON
//! carries a `session_id` (or camel-cased `sessionId`) field. Some CLI
//! versions never print it, so the fallback inspects the agent's session
//! rollout files under `~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl`,
//! taking the newest file modified at or after the invocation start. Both
//! the start day and the current day are scanned so invocations crossing
//! midnight still resolve.

use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

/// Scan one output line for a session identifier.
pub fn extract_session_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    find_in_value(&value, 0)
}

fn find_in_value(value: &serde_json::Value, depth: usize) -> Option<String> {
    let obj = value.as_object()?;
    for key in ["session_id", "sessionId"] {
        if let Some(id) = obj.get(key).and_then(|v| v.as_str()) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    if depth < 2 {
        for nested in obj.values() {
            if nested.is_object() {
                if let Some(id) = find_in_value(nested, depth + 1) {
                    return Some(id);
                }
            }
        }
    }
    None
}

fn sessions_root() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(".codex").join("sessions"))
}

fn day_dir(root: &std::path::Path, day: DateTime<Utc>) -> PathBuf {
    root.join(format!("{:04}", day.year()))
        .join(format!("{:02}", day.month()))
        .join(format!("{:02}", day.day()))
}

/// Fallback: newest rollout file modified at or after `started_at`.
pub fn find_rollout_session(started_at: DateTime<Utc>) -> Option<String> {
    let root = sessions_root()?;
    find_rollout_session_in(&root, started_at, Utc::now())
}

fn find_rollout_session_in(
    root: &std::path::Path,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<String> {
    let cutoff: SystemTime = started_at.into();

    let mut days = vec![day_dir(root, started_at)];
    let today = day_dir(root, now);
    if !days.contains(&today) {
        days.push(today);
    }

    let mut best: Option<(SystemTime, String)> = None;
    for day in days {
        let Ok(entries) = std::fs::read_dir(&day) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("rollout-") || !name.ends_with(".jsonl") {
                continue;
            }
            let Some(session) = session_from_rollout_name(name) else {
                continue;
            };
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if modified < cutoff {
                continue;
            }
            if best.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                best = Some((modified, session));
            }
        }
    }
    best.map(|(_, session)| session)
}

/// `rollout-<timestamp>-<uuid>.jsonl` → the trailing uuid.
fn session_from_rollout_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(".jsonl")?;
    if stem.len() < 36 {
        return None;
    }
    let candidate = &stem[stem.len() - 36..];
    Uuid::parse_str(candidate).ok()?;
    Some(candidate.to_string())
}
