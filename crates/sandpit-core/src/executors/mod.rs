//! Execution of untrusted snippets with captured output.
//!
//! A `CodeExecutor` runs one snippet to completion and always hands back a
//! finished `ExecutionResult`. The coordinator implementation compiles the
//! source through a `ScriptEngine`, intercepts the host output channels for
//! the duration of the run, and keeps listening for a bounded flush window so
//! output from timers and promise continuations lands in the transcript too.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::{Fault, SandboxError};
use crate::transcript::Transcript;
use crate::value::ScriptValue;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub id: Uuid,
    pub source_text: String,
    pub transcript: Transcript,
    pub had_error: bool,
    pub returned_value: Option<ScriptValue>,
    pub faults: Vec<Fault>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, source: &str) -> Result<ExecutionResult, SandboxError> {
        self.execute_with_cancel(source, CancellationToken::new())
            .await
    }

    /// Like `execute`, but `cancel` cuts the flush window short. The output
    /// channels are restored before a cancelled result is returned.
    async fn execute_with_cancel(
        &self,
        source: &str,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, SandboxError>;
}

pub mod coordinator;
pub mod engine;
pub mod lifecycle;

pub use coordinator::{Coordinator, ExecutionSettings, FlushMode, FlushPolicy};
pub use engine::{BoaEngine, ScriptEngine, ScriptSession};
