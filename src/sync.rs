//! Lock policy synchronization
//!
//! Keeps a last-known-good `LockPolicy` and refreshes it from the backend.
//! Remote documents are merged field by field: a field that is missing,
//! empty or malformed keeps its cached value, so a degraded response can
//! never zero out the deny list.

use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::context::{current_within, ContextProvider};
use crate::models::{LockMode, LockPolicy};
use crate::remote::PolicySource;

/// Partial lock policy parsed from a remote document.
/// `None` means "absent or unusable, keep the cached value".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub allowed_apps: Option<BTreeSet<String>>,
    pub forbidden_apps: Option<BTreeSet<String>>,
    pub auto_kill: Option<bool>,
    pub repeat_threshold: Option<u32>,
}

impl PolicyUpdate {
    /// Parse `{ allowed_apps, forbidden_apps, policy: { auto_kill, repeat_threshold } }`
    pub fn from_document(doc: &Value) -> Self {
        let policy = doc.get("policy");
        Self {
            allowed_apps: doc.get("allowed_apps").and_then(string_list),
            forbidden_apps: doc.get("forbidden_apps").and_then(string_list),
            auto_kill: policy.and_then(|p| p.get("auto_kill")).and_then(Value::as_bool),
            repeat_threshold: policy
                .and_then(|p| p.get("repeat_threshold"))
                .and_then(Value::as_u64)
                .filter(|n| *n >= 1)
                .and_then(|n| u32::try_from(n).ok()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Non-empty list of trimmed, non-empty strings from a JSON array
fn string_list(value: &Value) -> Option<BTreeSet<String>> {
    let items: BTreeSet<String> = value
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Merge a remote update into the cached policy
pub fn merge_policy(cached: &LockPolicy, update: &PolicyUpdate) -> LockPolicy {
    LockPolicy {
        mode: LockMode::Blacklist,
        allowed_apps: update
            .allowed_apps
            .clone()
            .unwrap_or_else(|| cached.allowed_apps.clone()),
        forbidden_apps: update
            .forbidden_apps
            .clone()
            .unwrap_or_else(|| cached.forbidden_apps.clone()),
        auto_kill: update.auto_kill.unwrap_or(cached.auto_kill),
        repeat_threshold: update
            .repeat_threshold
            .unwrap_or(cached.repeat_threshold)
            .max(1),
    }
}

/// Extract the per-exam allow list.
///
/// Accepts an exam document with an `allowed_apps` field, or the list value
/// itself. The list may be a JSON array, a string holding a JSON array, or a
/// comma-separated string. Returns `None` when no non-empty list is found.
pub fn parse_allowed_apps(value: &Value) -> Option<BTreeSet<String>> {
    let list = match value {
        Value::Object(map) => map.get("allowed_apps")?,
        other => other,
    };
    match list {
        Value::Array(_) => string_list(list),
        Value::String(raw) => {
            if let Ok(parsed @ Value::Array(_)) = serde_json::from_str::<Value>(raw) {
                return string_list(&parsed);
            }
            let items: BTreeSet<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            (!items.is_empty()).then_some(items)
        }
        _ => None,
    }
}

/// Maintains the effective lock policy
pub struct ConfigSync {
    source: Arc<dyn PolicySource>,
    context: Arc<dyn ContextProvider>,
    cached: Mutex<LockPolicy>,
    phase_timeout: Duration,
}

impl ConfigSync {
    pub fn new(
        source: Arc<dyn PolicySource>,
        context: Arc<dyn ContextProvider>,
        defaults: LockPolicy,
        phase_timeout: Duration,
    ) -> Self {
        Self {
            source,
            context,
            cached: Mutex::new(LockPolicy {
                mode: LockMode::Blacklist,
                ..defaults
            }),
            phase_timeout,
        }
    }

    /// Last-known-good policy (always blacklist mode)
    pub async fn cached(&self) -> LockPolicy {
        self.cached.lock().await.clone()
    }

    /// Refresh the cached policy and derive this tick's effective policy.
    ///
    /// Never fails: on fetch errors or timeouts the cached policy is used.
    /// If the context names an exam whose allow list resolves to a non-empty
    /// set, the result is in whitelist mode with that list as `allowed_apps`.
    pub async fn refresh(&self) -> LockPolicy {
        let context = current_within(self.context.as_ref(), self.phase_timeout).await;
        let token = context.auth_token.as_deref();

        let fetched = tokio::time::timeout(self.phase_timeout, self.source.fetch_lock_config(token)).await;
        let base = {
            let mut cached = self.cached.lock().await;
            match fetched {
                Ok(Ok(doc)) => {
                    let update = PolicyUpdate::from_document(&doc);
                    if update.is_empty() {
                        warn!("lock config response had no usable fields, keeping cached policy");
                    } else {
                        *cached = merge_policy(&cached, &update);
                        debug!(
                            "lock policy refreshed: {} allowed, {} forbidden, auto_kill={}",
                            cached.allowed_apps.len(),
                            cached.forbidden_apps.len(),
                            cached.auto_kill
                        );
                    }
                }
                Ok(Err(e)) => warn!("lock config fetch failed, keeping cached policy: {}", e),
                Err(_) => warn!(
                    "lock config fetch timed out after {:?}, keeping cached policy",
                    self.phase_timeout
                ),
            }
            cached.clone()
        };

        let Some(exam_id) = context.exam_id else {
            debug!("no active exam, using forbidden list");
            return base;
        };

        match tokio::time::timeout(self.phase_timeout, self.source.fetch_exam(exam_id, token)).await {
            Ok(Ok(doc)) => match parse_allowed_apps(&doc) {
                Some(allowed) => {
                    debug!("exam {} allows {} apps, using whitelist", exam_id, allowed.len());
                    LockPolicy {
                        mode: LockMode::Whitelist,
                        allowed_apps: allowed,
                        ..base
                    }
                }
                None => {
                    debug!("exam {} has no allow list, using forbidden list", exam_id);
                    base
                }
            },
            Ok(Err(e)) => {
                warn!("exam {} allow list fetch failed: {}", exam_id, e);
                base
            }
            Err(_) => {
                warn!("exam {} allow list fetch timed out after {:?}", exam_id, self.phase_timeout);
                base
            }
        }
    }
}
