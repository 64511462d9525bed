//! The host's two output channels.
//!
//! `OutputChannels` is the shared, mutable resource the sandbox redirects while
//! a snippet runs. Script-side `console` calls reach it through the coordinator,
//! and any Rust code holding a handle can write to it directly; whichever
//! writer pair is installed at that moment receives the write.

use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::transcript::Severity;
use crate::value::{render_args, ScriptValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Standard,
    Error,
}

impl Channel {
    pub fn severity(self) -> Severity {
        match self {
            Channel::Standard => Severity::Normal,
            Channel::Error => Severity::Error,
        }
    }
}

pub trait ChannelWriter: Send + Sync {
    fn write(&self, args: &[ScriptValue]);
}

/// Default writer of the standard channel.
pub struct HostStdout;

impl ChannelWriter for HostStdout {
    fn write(&self, args: &[ScriptValue]) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", render_args(args));
    }
}

/// Default writer of the error channel.
pub struct HostStderr;

impl ChannelWriter for HostStderr {
    fn write(&self, args: &[ScriptValue]) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", render_args(args));
    }
}

/// The writers currently bound to the two channels.
#[derive(Clone)]
pub struct ChannelPair {
    pub standard: Arc<dyn ChannelWriter>,
    pub error: Arc<dyn ChannelWriter>,
}

impl ChannelPair {
    pub fn host() -> Self {
        Self {
            standard: Arc::new(HostStdout),
            error: Arc::new(HostStderr),
        }
    }

    fn get(&self, channel: Channel) -> Arc<dyn ChannelWriter> {
        match channel {
            Channel::Standard => Arc::clone(&self.standard),
            Channel::Error => Arc::clone(&self.error),
        }
    }
}

struct ChannelsInner {
    writers: Mutex<ChannelPair>,
    lease: Arc<AsyncMutex<()>>,
}

/// Handle to a channel pair. Clones share the same pair.
#[derive(Clone)]
pub struct OutputChannels {
    inner: Arc<ChannelsInner>,
}

static HOST_CHANNELS: OnceLock<OutputChannels> = OnceLock::new();

impl OutputChannels {
    /// The process-wide channels, bound to stdout/stderr until intercepted.
    pub fn host() -> Self {
        HOST_CHANNELS
            .get_or_init(|| OutputChannels::from_pair(ChannelPair::host()))
            .clone()
    }

    pub fn new(standard: Arc<dyn ChannelWriter>, error: Arc<dyn ChannelWriter>) -> Self {
        Self::from_pair(ChannelPair { standard, error })
    }

    pub fn from_pair(pair: ChannelPair) -> Self {
        Self {
            inner: Arc::new(ChannelsInner {
                writers: Mutex::new(pair),
                lease: Arc::new(AsyncMutex::new(())),
            }),
        }
    }

    pub fn write(&self, channel: Channel, args: &[ScriptValue]) {
        // Clone the writer out so a writer that writes back into the channels
        // does not deadlock on the pair lock.
        let writer = self.lock_writers().get(channel);
        writer.write(args);
    }

    pub fn log(&self, args: &[ScriptValue]) {
        self.write(Channel::Standard, args);
    }

    pub fn error(&self, args: &[ScriptValue]) {
        self.write(Channel::Error, args);
    }

    /// Snapshot of the writers currently installed.
    pub fn writers(&self) -> ChannelPair {
        self.lock_writers().clone()
    }

    /// Whether both handles refer to the same channel pair.
    pub fn same_channels(&self, other: &OutputChannels) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Install `pair` and hand back the pair it replaced.
    pub(crate) fn replace(&self, pair: ChannelPair) -> ChannelPair {
        std::mem::replace(&mut *self.lock_writers(), pair)
    }

    /// Wait for exclusive use of these channels for one execution.
    ///
    /// Waiters are served in arrival order.
    pub(crate) async fn lease(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.inner.lease).lock_owned().await
    }

    fn lock_writers(&self) -> std::sync::MutexGuard<'_, ChannelPair> {
        self.inner
            .writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::recording_channels;
    use super::*;

    #[test]
    fn test_writes_route_to_their_channel() {
        let (channels, standard, error) = recording_channels();
        channels.log(&[ScriptValue::text("hello"), ScriptValue::text("world")]);
        channels.error(&[ScriptValue::text("bad")]);

        assert_eq!(standard.lines(), vec!["hello world"]);
        assert_eq!(error.lines(), vec!["bad"]);
    }

    #[test]
    fn test_clones_share_the_pair() {
        let (channels, standard, _) = recording_channels();
        let clone = channels.clone();
        clone.log(&[ScriptValue::text("via clone")]);

        assert!(channels.same_channels(&clone));
        assert_eq!(standard.lines(), vec!["via clone"]);
    }

    #[test]
    fn test_host_channels_are_a_singleton() {
        assert!(OutputChannels::host().same_channels(&OutputChannels::host()));
    }

    #[test]
    fn test_writer_may_write_back_into_channels() {
        struct Echo(OutputChannels);
        impl ChannelWriter for Echo {
            fn write(&self, args: &[ScriptValue]) {
                self.0.error(args);
            }
        }

        let (channels, _, error) = recording_channels();
        let previous = channels.replace(ChannelPair {
            standard: Arc::new(Echo(channels.clone())),
            error: channels.writers().error,
        });
        channels.log(&[ScriptValue::text("bounced")]);
        channels.replace(previous);

        assert_eq!(error.lines(), vec!["bounced"]);
    }
}
