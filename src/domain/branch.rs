//! Branch-name and worktree-path derivation.
//!
//! Branch names auto-minted for a prompt look like
//! `codex/<slug>-<base36 timestamp>-<8 hex random>`; feature-tagged jobs get
//! `feature/<sanitised feature id>`. Worktree directory names fold the repo
//! hash, the sanitised branch and a branch hash into one path component so
//! that branches differing only in separators land in distinct directories.

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Fixed prefix for auto-generated branches.
pub const BRANCH_PREFIX: &str = "codex";

/// Maximum slug length taken from the prompt.
const SLUG_MAX: usize = 32;

/// Lowercase, map every non-alphanumeric run to a single `-`, trim dashes,
/// truncate. Empty input yields an empty slug.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len().min(SLUG_MAX));
    let mut last_dash = true;
    for ch in input.chars() {
        if slug.len() >= SLUG_MAX {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

/// Sanitise a user-supplied ref component: keep alphanumerics, `.`, `_`, `-`
/// and `/`; everything else becomes `-`. Collapses leading/trailing dashes.
pub fn sanitize_ref_component(input: &str) -> String {
    let mapped: String = input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | '/') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches(|c| c == '-' || c == '/').to_string()
}

/// Stable truncated hash of a repository URL, 12 hex chars.
pub fn repo_hash(repo_url: &str) -> String {
    hex_digest(repo_url, 12)
}

/// Stable truncated hash of a branch name, 8 hex chars.
pub fn branch_hash(branch: &str) -> String {
    hex_digest(branch, 8)
}

fn hex_digest(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(len);
    for byte in digest.iter() {
        out.push_str(&format!("{:02x}", byte));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

/// Derive a branch name when the submitter supplied neither a branch nor a
/// feature id. The random suffix keeps concurrent submissions of identical
/// prompts apart.
pub fn derive_branch_name(prompt: &str) -> String {
    let slug = {
        let s = slugify(prompt);
        if s.is_empty() { "job".to_string() } else { s }
    };
    let ts = to_base36(Utc::now().timestamp_millis().max(0) as u64);
    format!("{}/{}-{}-{}", BRANCH_PREFIX, slug, ts, random_hex(8))
}

/// `feature/<sanitised id>`, or None when sanitisation leaves nothing.
pub fn feature_branch_name(feature_id: &str) -> Option<String> {
    let sanitised = sanitize_ref_component(feature_id);
    if sanitised.is_empty() {
        None
    } else {
        Some(format!("feature/{}", sanitised))
    }
}

/// Single directory component for a job's worktree.
pub fn worktree_dir_name(repo_url: &str, branch: &str) -> String {
    let branch_part = {
        let flat = branch.replace('/', "-");
        let s = sanitize_ref_component(&flat);
        if s.is_empty() { "branch".to_string() } else { s }
    };
    format!(
        "{}-{}-{}",
        repo_hash(repo_url),
        branch_part,
        branch_hash(branch)
    )
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len.div_ceil(2)];
    // Zeroes are an acceptable fallback here: the timestamp already
    // disambiguates, the suffix only guards against same-millisecond races.
    let _ = getrandom::getrandom(&mut bytes);
    let mut out = String::with_capacity(len);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out.truncate(len);
    out
}
