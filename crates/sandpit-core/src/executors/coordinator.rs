//! Execution coordinator
//!
//! Drives one snippet from compile to restore. The run itself happens on a
//! tokio blocking thread because script sessions are single-threaded; the
//! async caller only waits for the finished result.
//!
//! Sequence per execution:
//!
//! 1. take the channel lease (executions over the same channels queue up)
//! 2. install the interceptor, appending every captured line to the transcript
//! 3. compile and invoke the snippet, fold the returned value into the transcript
//! 4. flush: keep firing pending timers that fall inside the flush window
//! 5. restore the channels, then hand back the result

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::engine::{BoaEngine, Compilation, Invocation, Origin, ScriptEngine, ScriptSession};
use super::lifecycle::{Lifecycle, Phase};
use super::{CodeExecutor, ExecutionResult};
use crate::channels::OutputChannels;
use crate::config::SandpitConfig;
use crate::errors::{Fault, FaultKind, SandboxError};
use crate::interceptor;
use crate::transcript::{Line, Transcript};
use crate::value::{render_args, ScriptValue};

pub const DEFAULT_FLUSH_WINDOW: Duration = Duration::from_millis(1500);

// Longest uninterrupted sleep while waiting for a timer or the window end.
const WAIT_SLICE: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Close the window as soon as no timer is pending inside it.
    #[default]
    Settle,
    /// Always wait for the whole window.
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub mode: FlushMode,
    pub window: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            mode: FlushMode::Settle,
            window: DEFAULT_FLUSH_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSettings {
    pub flush: FlushPolicy,
    pub implicit_return: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            flush: FlushPolicy::default(),
            implicit_return: true,
        }
    }
}

impl From<&SandpitConfig> for ExecutionSettings {
    fn from(config: &SandpitConfig) -> Self {
        Self {
            flush: FlushPolicy {
                mode: config.flush.mode,
                window: Duration::from_millis(config.flush.window_ms),
            },
            implicit_return: config.engine.implicit_return,
        }
    }
}

pub struct Coordinator {
    engine: Arc<dyn ScriptEngine>,
    channels: OutputChannels,
    settings: ExecutionSettings,
}

impl Coordinator {
    pub fn new(settings: ExecutionSettings) -> Self {
        Self {
            engine: Arc::new(BoaEngine),
            channels: OutputChannels::host(),
            settings,
        }
    }

    pub fn from_config(config: &SandpitConfig) -> Self {
        Self::new(ExecutionSettings::from(config))
    }

    pub fn with_engine(mut self, engine: Arc<dyn ScriptEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_channels(mut self, channels: OutputChannels) -> Self {
        self.channels = channels;
        self
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn channels(&self) -> &OutputChannels {
        &self.channels
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(ExecutionSettings::default())
    }
}

#[async_trait]
impl CodeExecutor for Coordinator {
    async fn execute_with_cancel(
        &self,
        source: &str,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let lease = self.channels.lease().await;

        let run = Run {
            id: Uuid::new_v4(),
            source: source.to_string(),
            engine: Arc::clone(&self.engine),
            channels: self.channels.clone(),
            settings: self.settings,
            cancel: cancel.child_token(),
        };
        log::info!(
            "[{}] Executing snippet ({} bytes) with {} engine",
            run.id,
            run.source.len(),
            self.engine.name()
        );

        // Dropping this future stops the worker's flush window early.
        let _stop_worker = run.cancel.clone().drop_guard();
        tokio::task::spawn_blocking(move || run.execute(lease)).await?
    }
}

/// Transcript shared between the coordinator and the capture writers.
#[derive(Default)]
struct Capture {
    transcript: Mutex<Transcript>,
    had_error: AtomicBool,
}

impl Capture {
    fn record(&self, line: Line) {
        if line.is_error() {
            self.had_error.store(true, Ordering::SeqCst);
        }
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    fn snapshot(&self) -> (Transcript, bool) {
        let transcript = self
            .transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        (transcript, self.had_error.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
struct SessionOutcome {
    returned_value: Option<ScriptValue>,
    faults: Vec<Fault>,
    cancelled: bool,
}

enum Wait {
    Elapsed,
    Cancelled,
}

fn wait_until(deadline: Instant, cancel: &CancellationToken) -> Wait {
    loop {
        if cancel.is_cancelled() {
            return Wait::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return Wait::Elapsed;
        }
        std::thread::sleep((deadline - now).min(WAIT_SLICE));
    }
}

/// One execution, owned by the blocking worker thread.
struct Run {
    id: Uuid,
    source: String,
    engine: Arc<dyn ScriptEngine>,
    channels: OutputChannels,
    settings: ExecutionSettings,
    cancel: CancellationToken,
}

impl Run {
    fn execute(self, _lease: OwnedMutexGuard<()>) -> Result<ExecutionResult, SandboxError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut lifecycle = Lifecycle::new(self.id);
        let capture = Arc::new(Capture::default());

        let handle = {
            let capture = Arc::clone(&capture);
            interceptor::install(&self.channels, move |line: Line| capture.record(line))
        };
        lifecycle.advance(Phase::Installed)?;

        let outcome = self.drive(&mut lifecycle, &capture);
        handle.restore();
        let outcome = outcome?;
        lifecycle.advance(Phase::Restored)?;

        let (transcript, had_error) = capture.snapshot();
        let had_error = had_error || !outcome.faults.is_empty();
        let elapsed_ms = clock.elapsed().as_millis() as u64;
        log::info!(
            "[{}] Execution finished in {} ms: {} lines, had_error={}, cancelled={}",
            self.id,
            elapsed_ms,
            transcript.len(),
            had_error,
            outcome.cancelled
        );

        Ok(ExecutionResult {
            id: self.id,
            source_text: self.source,
            transcript,
            had_error,
            returned_value: outcome.returned_value,
            faults: outcome.faults,
            cancelled: outcome.cancelled,
            started_at,
            elapsed_ms,
        })
    }

    fn drive(
        &self,
        lifecycle: &mut Lifecycle,
        capture: &Capture,
    ) -> Result<SessionOutcome, SandboxError> {
        let mut session = self.engine.open_session()?;
        let mut outcome = SessionOutcome::default();
        lifecycle.advance(Phase::Running)?;

        let mut origin = Instant::now();
        match session.compile(&self.source, self.settings.implicit_return)? {
            Compilation::Rejected(message) => {
                self.fail(capture, &mut outcome, FaultKind::Compile, message);
            }
            Compilation::Ready(form) => {
                log::debug!("[{}] Compiled as {:?}", self.id, form);
                // Timer due times count from the start of the invocation.
                origin = Instant::now();
                let invocation = match session.invoke() {
                    Err(SandboxError::Protocol(e)) => {
                        Invocation::Threw(format!("Snippet result could not be decoded: {}", e))
                    }
                    other => other?,
                };
                self.pump(&mut *session, capture, &mut outcome)?;
                match invocation {
                    Invocation::Returned(Some(value)) => {
                        capture.record(Line::normal(value.render()));
                        outcome.returned_value = Some(value);
                    }
                    Invocation::Returned(None) => {}
                    Invocation::Threw(message) => {
                        self.fail(capture, &mut outcome, FaultKind::Runtime, message);
                    }
                }
                session.run_microtasks()?;
                self.pump(&mut *session, capture, &mut outcome)?;
            }
        }

        lifecycle.advance(Phase::Flushing)?;
        outcome.cancelled = self.flush(&mut *session, origin, capture, &mut outcome)?;
        Ok(outcome)
    }

    /// Fire pending timers that fall inside the flush window.
    ///
    /// Returns whether the window was cut short by cancellation.
    fn flush(
        &self,
        session: &mut dyn ScriptSession,
        origin: Instant,
        capture: &Capture,
        outcome: &mut SessionOutcome,
    ) -> Result<bool, SandboxError> {
        let policy = self.settings.flush;
        let window_end = Instant::now() + policy.window;

        loop {
            let next = session
                .next_timer_due()?
                .map(|ms| origin + Duration::from_millis(ms));

            match next {
                Some(due) if due <= window_end => {
                    if let Wait::Cancelled = wait_until(due, &self.cancel) {
                        log::info!("[{}] Flush window cancelled", self.id);
                        return Ok(true);
                    }
                    session.fire_next_timer()?;
                    session.run_microtasks()?;
                    self.pump(session, capture, outcome)?;
                }
                _ => {
                    if next.is_some() {
                        log::debug!(
                            "[{}] Pending timers fall after the flush window and are dropped",
                            self.id
                        );
                    }
                    return Ok(match policy.mode {
                        FlushMode::Settle => false,
                        FlushMode::Fixed => {
                            matches!(wait_until(window_end, &self.cancel), Wait::Cancelled)
                        }
                    });
                }
            }
        }
    }

    /// Forward drained console writes to the (intercepted) channels.
    ///
    /// A batch that cannot be decoded is lost; it is reported as a runtime
    /// fault instead of failing the whole execution.
    fn pump(
        &self,
        session: &mut dyn ScriptSession,
        capture: &Capture,
        outcome: &mut SessionOutcome,
    ) -> Result<(), SandboxError> {
        let emissions = match session.drain() {
            Ok(emissions) => emissions,
            Err(SandboxError::Protocol(e)) => {
                let message = format!("Console output could not be decoded: {}", e);
                self.fail(capture, outcome, FaultKind::Runtime, message);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        for emission in emissions {
            if emission.origin == Origin::Late {
                let message = render_args(&emission.args);
                log::warn!("[{}] Callback failed after the run: {}", self.id, message);
                outcome.faults.push(Fault::new(FaultKind::Late, message));
            }
            self.channels.write(emission.channel, &emission.args);
        }
        Ok(())
    }

    fn fail(
        &self,
        capture: &Capture,
        outcome: &mut SessionOutcome,
        kind: FaultKind,
        message: String,
    ) {
        log::warn!("[{}] {:?} error: {}", self.id, kind, message);
        capture.record(Line::error(message.clone()));
        outcome.faults.push(Fault::new(kind, message));
    }
}
