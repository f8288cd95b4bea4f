//! Deciding whether a tab's script should run.
//!
//! Page loads and tab activations can fire several times in quick succession
//! for the same page. [`ExecutionTracker`] remembers recent automatic runs by
//! fingerprint and suppresses repeats inside a short window. It is purely
//! in-memory and unrelated to persisted storage.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::ExecutionConfig;
use crate::hostname::extract_hostname;
use crate::manager::StorageManager;

/// What to inject into a tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub domain: String,
    /// Helper library to inject first; empty for none
    pub library: String,
    pub code: String,
}

/// Bounded, time-evicting record of recent automatic executions
pub struct ExecutionTracker {
    window: Duration,
    retention: Duration,
    capacity: usize,
    recent: Mutex<HashMap<String, Instant>>,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new(&ExecutionConfig::default())
    }
}

impl ExecutionTracker {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            window: config.window(),
            retention: config.retention(),
            capacity: config.capacity.max(1),
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// `"{tab}-{host}-{hash}"`, where `hash` is a short digest of the code
    pub fn execution_key(tab_id: u64, url: &str, code: &str) -> String {
        let host = extract_hostname(url).unwrap_or_default();
        let digest = STANDARD.encode(Sha256::digest(code.as_bytes()));
        format!("{}-{}-{}", tab_id, host, &digest[..10])
    }

    pub fn should_execute(&self, tab_id: u64, url: &str, code: &str) -> bool {
        self.should_execute_at(tab_id, url, code, Instant::now())
    }

    /// Record an automatic run at `now` unless the same run happened within the window
    pub fn should_execute_at(&self, tab_id: u64, url: &str, code: &str, now: Instant) -> bool {
        let key = Self::execution_key(tab_id, url, code);
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(last) = recent.get(&key) {
            if now.saturating_duration_since(*last) < self.window {
                debug!("Suppressing duplicate execution {}", key);
                return false;
            }
        }

        recent.insert(key, now);
        recent.retain(|_, at| now.saturating_duration_since(*at) <= self.retention);

        while recent.len() > self.capacity {
            let oldest = recent
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    recent.remove(&key);
                }
                None => break,
            }
        }

        true
    }

    pub fn len(&self) -> usize {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything, e.g. when the extension is re-activated
    pub fn clear(&self) {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Plan the automatic run for a tab that just loaded or became active.
///
/// Returns `None` when the URL has no host, the domain has no runnable
/// script, or the same script already ran in this tab moments ago.
pub async fn plan_execution(
    manager: &StorageManager,
    tracker: &ExecutionTracker,
    tab_id: u64,
    url: &str,
) -> Option<ExecutionPlan> {
    let plan = plan_manual_execution(manager, url).await?;
    if !tracker.should_execute(tab_id, url, &plan.code) {
        return None;
    }
    Some(plan)
}

/// Plan a user-initiated run; never de-duplicated
pub async fn plan_manual_execution(manager: &StorageManager, url: &str) -> Option<ExecutionPlan> {
    let domain = extract_hostname(url)?;
    let record = manager.get_script(&domain).await;
    if !record.is_runnable() {
        debug!("No runnable script for {}", domain);
        return None;
    }

    Some(ExecutionPlan {
        domain,
        library: record.library,
        code: record.code,
    })
}
