use thiserror::Error;

use crate::types::SignalId;

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;
pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Recoverable by clamping the request to `[0, count]`.
    #[error("range {start}..{end} out of bounds (count {count})")]
    Range { start: u64, end: u64, count: u64 },
    #[error("timestamp {timestamp} precedes last sample at {last}")]
    OutOfOrder { timestamp: f64, last: f64 },
    #[error("timestamp must be finite, got {0}")]
    NonFiniteTimestamp(f64),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChannelError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Per-sample failure of an operator; handled by the domain-error policy.
    #[error("domain error at sample {index}: {reason}")]
    Domain { index: u64, reason: &'static str },
    /// An input shrank below the engine's cursor without a clear being observed.
    #[error("input {input} has {count} samples but cursor is at {cursor}")]
    Alignment {
        input: SignalId,
        count: u64,
        cursor: u64,
    },
    /// Notification delivered to a detached channel; never acted on.
    #[error("channel {0} is detached")]
    Lifecycle(SignalId),
    #[error("operator {operator} expects {expected} inputs, got {actual}")]
    Arity {
        operator: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown signal {0}")]
    UnknownSignal(SignalId),
    #[error("channel {channel} is read by derived channel {dependent}")]
    ChannelInUse {
        channel: SignalId,
        dependent: SignalId,
    },
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
