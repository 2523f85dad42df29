//! Durable session state
//!
//! A session is the unit of resumable progress for one (target-list,
//! output-directory) pair. It is saved after every batch and reloaded on the
//! next invocation with the same inputs; the on-disk record is the single
//! source of truth for what has been attempted. Saving is best-effort by
//! contract: a failed write is reported, never allowed to abort the run.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{artifact_path, OutputFormat, RotatorError};

pub const SESSION_SCHEMA_VERSION: u32 = 1;

fn schema_version_default() -> u32 {
    SESSION_SCHEMA_VERSION
}

/// Per-target capture metadata kept for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetMetadata {
    /// The candidate URL that produced the artifact.
    pub working_url: String,
    pub title: Option<String>,
    pub status_code: Option<u16>,
    pub body_excerpt: Option<String>,
}

/// One versioned progress record.
///
/// Field names match the session file layout; optional maps default to
/// empty so records written before metadata collection existed still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "schema_version_default")]
    pub schema_version: u32,

    /// Targets that have been attempted, in completion order. Append-only.
    #[serde(default)]
    pub processed_domains: Vec<String>,

    /// Targets not yet attempted.
    #[serde(default)]
    pub remaining_domains: Vec<String>,

    /// Count of successful captures. Recomputed from on-disk artifacts on
    /// resume; the stored value is not trusted across restarts.
    #[serde(default)]
    pub screenshots_done: usize,

    /// Targets attempted without success.
    #[serde(default)]
    pub failed_domains: BTreeSet<String>,

    /// Successful targets in the order their captures completed.
    #[serde(default)]
    pub successful_domains_order: Vec<String>,

    #[serde(default)]
    pub domain_urls: BTreeMap<String, String>,

    #[serde(default)]
    pub domain_titles: BTreeMap<String, String>,

    #[serde(default)]
    pub domain_status_codes: BTreeMap<String, u16>,

    #[serde(default)]
    pub domain_body_excerpts: BTreeMap<String, String>,

    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Fresh session over an already-deduplicated target list.
    pub fn new(remaining: Vec<String>) -> Self {
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            remaining_domains: remaining,
            ..Default::default()
        }
    }

    pub fn total_targets(&self) -> usize {
        self.processed_domains.len() + self.remaining_domains.len()
    }

    pub fn has_succeeded(&self, target: &str) -> bool {
        self.domain_urls.contains_key(target)
            || self.successful_domains_order.iter().any(|t| t == target)
    }

    pub fn record_success(&mut self, target: &str, metadata: TargetMetadata) {
        self.processed_domains.push(target.to_string());
        self.failed_domains.remove(target);
        if !self.has_succeeded(target) {
            self.successful_domains_order.push(target.to_string());
            self.screenshots_done += 1;
        }
        self.domain_urls
            .insert(target.to_string(), metadata.working_url);
        if let Some(title) = metadata.title {
            self.domain_titles.insert(target.to_string(), title);
        }
        if let Some(status) = metadata.status_code {
            self.domain_status_codes.insert(target.to_string(), status);
        }
        if let Some(excerpt) = metadata.body_excerpt {
            self.domain_body_excerpts.insert(target.to_string(), excerpt);
        }
    }

    /// Record a failed attempt. A success recorded earlier in the run is
    /// sticky: the target is not moved back into the failed set.
    pub fn record_failure(&mut self, target: &str) {
        self.processed_domains.push(target.to_string());
        if !self.has_succeeded(target) {
            self.failed_domains.insert(target.to_string());
        }
    }

    /// Merge the outcome of a completed retry pass into this session.
    ///
    /// The retry pass's failed set replaces ours; its successes gain
    /// metadata entries and bump the success count.
    pub fn absorb_retry_results(&mut self, retry: &Session) {
        self.failed_domains = retry.failed_domains.clone();
        for target in &retry.successful_domains_order {
            if !self.has_succeeded(target) {
                self.successful_domains_order.push(target.clone());
                self.screenshots_done += 1;
            }
            if let Some(url) = retry.domain_urls.get(target) {
                self.domain_urls.insert(target.clone(), url.clone());
            }
            if let Some(title) = retry.domain_titles.get(target) {
                self.domain_titles.insert(target.clone(), title.clone());
            }
            if let Some(status) = retry.domain_status_codes.get(target) {
                self.domain_status_codes.insert(target.clone(), *status);
            }
            if let Some(excerpt) = retry.domain_body_excerpts.get(target) {
                self.domain_body_excerpts.insert(target.clone(), excerpt.clone());
            }
        }
    }
}

/// Deduplicate a target list, keeping first occurrences in order.
pub fn dedup_targets(targets: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Align a loaded session with the current target list and the artifacts
/// actually on disk.
///
/// Clips `processed`/`failed` to the intersection with the current target
/// set (a stale session loaded against a different list must not leak
/// foreign targets in), deduplicates both, and recounts `screenshots_done`
/// from the artifacts present in the output directory. The minimum-size
/// rule applies here too: an undersized file is not a capture.
pub fn reconcile(
    session: &mut Session,
    targets: &[String],
    output_dir: &Path,
    format: &OutputFormat,
    min_artifact_bytes: u64,
) {
    let current: HashSet<&str> = targets.iter().map(String::as_str).collect();

    let mut seen = HashSet::new();
    session
        .processed_domains
        .retain(|t| current.contains(t.as_str()) && seen.insert(t.clone()));
    session
        .failed_domains
        .retain(|t| current.contains(t.as_str()));

    let mut seen = HashSet::new();
    session
        .successful_domains_order
        .retain(|t| current.contains(t.as_str()) && seen.insert(t.clone()));

    session.screenshots_done = targets
        .iter()
        .filter(|t| {
            let path = artifact_path(output_dir, t, format);
            std::fs::metadata(path)
                .map(|m| m.len() >= min_artifact_bytes)
                .unwrap_or(false)
        })
        .count();
}

/// Loads and saves session records under a dedicated directory.
///
/// Saves go through a temp file and an atomic rename; a torn write can
/// never replace a previously good record. Unparseable records are treated
/// as absent, not as errors; the operator just starts fresh.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub const DEFAULT_DIR: &'static str = "session";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Deterministic key for one (target-source, output-directory) pair, so
    /// rerunning with the same inputs resumes the same session.
    pub fn session_key(targets_source: &Path, output_dir: &Path) -> String {
        let base = |p: &Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "stdin".to_string())
        };
        format!("{}_{}.session", base(targets_source), base(output_dir))
    }

    pub fn retry_key(parent_key: &str) -> String {
        format!("{parent_key}.retry")
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub fn save(&self, key: &str, session: &mut Session) -> Result<(), RotatorError> {
        session.saved_at = Some(Utc::now());
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path(key);
        let tmp = self
            .dir
            .join(format!("{key}.{}.tmp", uuid::Uuid::new_v4()));
        let data = serde_json::to_vec_pretty(session)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn load(&self, key: &str) -> Option<Session> {
        let path = self.path(key);
        let data = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&data) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Ignoring unreadable session file {}: {e}", path.display());
                None
            }
        }
    }

    pub fn delete(&self, key: &str) {
        let _ = std::fs::remove_file(self.path(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (SessionStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("rotator-session-{}", uuid::Uuid::new_v4()));
        (SessionStore::new(&dir), dir)
    }

    fn meta(url: &str) -> TargetMetadata {
        TargetMetadata {
            working_url: url.to_string(),
            title: Some("Example".to_string()),
            status_code: Some(200),
            body_excerpt: None,
        }
    }

    #[test]
    fn test_session_key_from_basenames() {
        let key = SessionStore::session_key(
            Path::new("/data/lists/domains.txt"),
            Path::new("/srv/shots/run1"),
        );
        assert_eq!(key, "domains.txt_run1.session");
        assert_eq!(SessionStore::retry_key(&key), "domains.txt_run1.session.retry");
    }

    #[test]
    fn test_dedup_targets_preserves_first_occurrence() {
        let deduped = dedup_targets(vec![
            "a.com".to_string(),
            "a.com".to_string(),
            "https://b.com".to_string(),
            "".to_string(),
        ]);
        assert_eq!(deduped, vec!["a.com", "https://b.com"]);
    }

    #[test]
    fn test_success_is_sticky() {
        let mut session = Session::new(vec![]);
        session.record_success("a.com", meta("https://a.com"));
        session.record_failure("a.com");

        assert!(session.failed_domains.is_empty());
        assert_eq!(session.screenshots_done, 1);
        assert_eq!(session.successful_domains_order, vec!["a.com"]);
    }

    #[test]
    fn test_failure_then_success_clears_failed() {
        let mut session = Session::new(vec![]);
        session.record_failure("a.com");
        assert!(session.failed_domains.contains("a.com"));

        session.record_success("a.com", meta("http://a.com"));
        assert!(session.failed_domains.is_empty());
        assert_eq!(session.screenshots_done, 1);
    }

    #[test]
    fn test_save_load_round_trip() {
        let (store, dir) = temp_store();
        let mut session = Session::new(vec!["c.com".to_string()]);
        session.record_success("a.com", meta("https://a.com"));
        session.record_failure("b.com");

        store.save("trip.session", &mut session).unwrap();
        let loaded = store.load("trip.session").unwrap();

        assert_eq!(loaded.schema_version, SESSION_SCHEMA_VERSION);
        assert_eq!(loaded.processed_domains, session.processed_domains);
        assert_eq!(loaded.remaining_domains, session.remaining_domains);
        assert_eq!(loaded.screenshots_done, session.screenshots_done);
        assert_eq!(loaded.failed_domains, session.failed_domains);
        assert_eq!(loaded.domain_urls, session.domain_urls);
        assert_eq!(loaded.domain_titles, session.domain_titles);
        assert_eq!(loaded.domain_status_codes, session.domain_status_codes);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_corrupt_session_loads_as_absent() {
        let (store, dir) = temp_store();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(store.path("bad.session"), "{not json").unwrap();

        assert!(store.load("bad.session").is_none());
        assert!(store.load("missing.session").is_none());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_reconcile_recounts_artifacts_and_clips() {
        let dir = std::env::temp_dir().join(format!("rotator-reconcile-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        // a.com has a real artifact, b.com only an undersized stub
        std::fs::write(dir.join("a.com.png"), vec![0u8; 4096]).unwrap();
        std::fs::write(dir.join("b.com.png"), vec![0u8; 16]).unwrap();

        let mut session = Session::new(vec![]);
        session.processed_domains = vec![
            "a.com".to_string(),
            "a.com".to_string(),
            "stale.com".to_string(),
            "b.com".to_string(),
        ];
        session.failed_domains.insert("b.com".to_string());
        session.failed_domains.insert("stale.com".to_string());
        session.screenshots_done = 99;

        let targets = vec!["a.com".to_string(), "b.com".to_string()];
        reconcile(&mut session, &targets, &dir, &OutputFormat::Png, 1024);

        assert_eq!(session.processed_domains, vec!["a.com", "b.com"]);
        assert_eq!(
            session.failed_domains,
            BTreeSet::from(["b.com".to_string()])
        );
        assert_eq!(session.screenshots_done, 1);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_absorb_retry_results() {
        let mut parent = Session::new(vec![]);
        parent.record_failure("x.com");
        parent.record_failure("y.com");

        let mut retry = Session::new(vec![]);
        retry.record_success("x.com", meta("https://x.com"));
        retry.record_failure("y.com");

        parent.absorb_retry_results(&retry);

        assert_eq!(parent.failed_domains, BTreeSet::from(["y.com".to_string()]));
        assert!(parent.domain_urls.contains_key("x.com"));
        assert_eq!(parent.screenshots_done, 1);
    }
}
