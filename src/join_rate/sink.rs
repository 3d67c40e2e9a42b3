//! # Warning Output
//!
//! When a key runs out of budget the engine produces a [`Warning`] and hands
//! it to a [`WarningSink`] after releasing the bucket. Sinks must return
//! quickly: a slow sink would otherwise stall the caller's next arrival.

use std::fmt;
use std::sync::mpsc;
use tracing::warn;

/// An over-budget notice for a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Key as delivered by the host (not normalized).
    pub key: String,

    /// Rate of the policy that was exceeded.
    pub rate: i64,

    /// Window of the policy that was exceeded, in seconds.
    pub window: i64,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JOINRATE: {} exceeds warning threshold ({} joins in {}s)",
            self.key, self.rate, self.window
        )
    }
}

/// Receiver of over-budget warnings.
pub trait WarningSink: Send + Sync {
    /// Delivers a warning. Must not block.
    fn emit(&self, warning: Warning);
}

impl<F> WarningSink for F
where
    F: Fn(Warning) + Send + Sync,
{
    fn emit(&self, warning: Warning) {
        self(warning)
    }
}

/// Sink that logs warnings through `tracing` under the `joinrate::warn` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl WarningSink for TracingSink {
    fn emit(&self, warning: Warning) {
        warn!(
            target: "joinrate::warn",
            key = %warning.key,
            rate = warning.rate,
            window = warning.window,
            "{}",
            warning
        );
    }
}

/// Sink forwarding warnings over an unbounded channel.
///
/// Sending never blocks. If the receiver has been dropped the warning is
/// discarded.
///
/// ```rust
/// use joinrate::{ChannelSink, Warning, WarningSink};
///
/// let (sink, rx) = ChannelSink::new();
/// sink.emit(Warning { key: "#rust".into(), rate: 5, window: 5 });
/// assert_eq!(rx.recv().unwrap().key, "#rust");
/// ```
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Warning>,
}

impl ChannelSink {
    /// Creates a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::Receiver<Warning>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl WarningSink for ChannelSink {
    fn emit(&self, warning: Warning) {
        let _ = self.tx.send(warning);
    }
}
