//! Exam session context
//!
//! The engine does not own login or session state; it asks a
//! `ContextProvider` for the current identity whenever it needs one.

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::ExamContext;

/// Supplies the current session / exam / student identity and auth token
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn current(&self) -> ExamContext;
}

/// Ask the provider for the current context, giving up after `timeout`.
/// A provider that does not answer in time yields an empty context.
pub async fn current_within(provider: &dyn ContextProvider, timeout: Duration) -> ExamContext {
    match tokio::time::timeout(timeout, provider.current()).await {
        Ok(context) => context,
        Err(_) => {
            warn!("context provider timed out after {:?}, using empty context", timeout);
            ExamContext::default()
        }
    }
}

/// Fixed context, e.g. from command-line flags
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    context: ExamContext,
}

impl StaticContext {
    pub fn new(context: ExamContext) -> Self {
        Self { context }
    }

    /// No active exam and no credentials
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextProvider for StaticContext {
    async fn current(&self) -> ExamContext {
        self.context.clone()
    }
}

/// Context read from a JSON file maintained by the presentation layer.
///
/// The file is re-read on every call:
/// `{ "session_id": 12, "exam_id": "4", "student_id": 9, "auth_token": "..." }`.
/// Ids may be numbers or numeric strings. A missing or malformed file means
/// "no active session".
#[derive(Debug, Clone)]
pub struct SessionFileContext {
    path: PathBuf,
}

impl SessionFileContext {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl ContextProvider for SessionFileContext {
    async fn current(&self) -> ExamContext {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("session file {} unavailable: {}", self.path.display(), e);
                return ExamContext::default();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => parse_context(&value),
            Err(e) => {
                debug!("session file {} is not valid JSON: {}", self.path.display(), e);
                ExamContext::default()
            }
        }
    }
}

/// Read a numeric id that may be encoded as a number or a string
fn lenient_id(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extract an `ExamContext` from a session document
pub fn parse_context(value: &Value) -> ExamContext {
    ExamContext {
        session_id: lenient_id(value.get("session_id")),
        exam_id: lenient_id(value.get("exam_id")),
        student_id: lenient_id(value.get("student_id")),
        auth_token: value
            .get("auth_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
    }
}
