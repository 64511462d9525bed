//! Output interception with a restoration guarantee.
//!
//! `install` swaps both channel writers for capture writers that render each
//! logging call into a `Line`. Everything written to the channels while the
//! capture is installed is observed, including writes from code the caller
//! never invoked directly (scheduled callbacks, other host threads).

use std::sync::{Arc, Mutex, PoisonError};

use crate::channels::{Channel, ChannelPair, ChannelWriter, OutputChannels};
use crate::transcript::Line;
use crate::value::{render_args, ScriptValue};

struct CaptureWriter<F> {
    channel: Channel,
    on_line: Arc<F>,
}

impl<F> ChannelWriter for CaptureWriter<F>
where
    F: Fn(Line) + Send + Sync + 'static,
{
    fn write(&self, args: &[ScriptValue]) {
        (self.on_line)(Line {
            text: render_args(args),
            severity: self.channel.severity(),
        });
    }
}

/// Redirect both channels of `channels` into `on_line` until the returned
/// handle is restored or dropped.
pub fn install<F>(channels: &OutputChannels, on_line: F) -> RestoreHandle
where
    F: Fn(Line) + Send + Sync + 'static,
{
    let on_line = Arc::new(on_line);
    let capture = ChannelPair {
        standard: Arc::new(CaptureWriter {
            channel: Channel::Standard,
            on_line: Arc::clone(&on_line),
        }),
        error: Arc::new(CaptureWriter {
            channel: Channel::Error,
            on_line,
        }),
    };
    let saved = channels.replace(capture);
    log::debug!("Output channels intercepted");

    RestoreHandle {
        channels: channels.clone(),
        saved: Mutex::new(Some(saved)),
    }
}

/// Puts the original writers back. Only the first restore has any effect.
pub struct RestoreHandle {
    channels: OutputChannels,
    saved: Mutex<Option<ChannelPair>>,
}

impl RestoreHandle {
    /// Returns `true` if this call performed the restore.
    pub fn restore(&self) -> bool {
        let saved = self
            .saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match saved {
            Some(pair) => {
                // The capture pair comes back out and is dropped here.
                let _capture = self.channels.replace(pair);
                log::debug!("Output channels restored");
                true
            }
            None => false,
        }
    }

    pub fn is_restored(&self) -> bool {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Drop for RestoreHandle {
    fn drop(&mut self) {
        if self.restore() {
            log::warn!("Output channels restored by drop; execution ended abnormally");
        }
    }
}
