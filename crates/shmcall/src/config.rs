//! Channel and worker configuration.

use std::fmt;
use std::sync::Arc;

use shmcall_codec::Encoding;

use crate::error::{ConfigError, LayoutError, WorkerError};
use crate::layout::{DEFAULT_CHANNEL_SIZE, LOCK_WORD_SIZE, MIN_CHANNEL_SIZE};

/// Environment variable overriding [`ChannelConfig::size`].
pub const CHANNEL_SIZE_ENV: &str = "SHMCALL_CHANNEL_SIZE";

/// Environment variable overriding [`ChannelConfig::encoding`].
pub const ENCODING_ENV: &str = "SHMCALL_ENCODING";

/// Shape of the shared channel. Both sides must use the same values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Total channel size in bytes, lock word included.
    pub size: usize,
    /// Payload encoding.
    pub encoding: Encoding,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHANNEL_SIZE,
            encoding: Encoding::default(),
        }
    }
}

impl ChannelConfig {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Bytes left for the payload after the lock word.
    pub fn payload_capacity(&self) -> usize {
        self.size.saturating_sub(LOCK_WORD_SIZE)
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.size < MIN_CHANNEL_SIZE {
            return Err(LayoutError::TooSmall {
                size: self.size,
                min: MIN_CHANNEL_SIZE,
            });
        }
        if !self.size.is_multiple_of(LOCK_WORD_SIZE) {
            return Err(LayoutError::Unaligned { size: self.size });
        }
        Ok(())
    }

    /// Defaults overridden by `SHMCALL_CHANNEL_SIZE` and `SHMCALL_ENCODING`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(CHANNEL_SIZE_ENV) {
            config.size = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidSize {
                    var: CHANNEL_SIZE_ENV,
                    value,
                })?;
        }
        if let Some(value) = lookup(ENCODING_ENV) {
            config.encoding = value.parse().map_err(ConfigError::Encoding)?;
        }
        config.validate().map_err(ConfigError::Layout)?;
        Ok(config)
    }
}

/// What the worker does when a handler fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandlerFailurePolicy {
    /// Treat the failure as fatal: release the caller with a `WorkerFailed`
    /// notice and hand the error to the fatal reporter.
    #[default]
    Escalate,
    /// Answer the call with `Response::HandlerFailed` and keep serving.
    ReplyToCaller,
}

/// Receives the worker's unrecoverable error after the caller was released.
pub type FatalReporter = Arc<dyn Fn(&WorkerError) + Send + Sync>;

/// Logs the error and aborts the process.
pub fn abort_on_fatal(err: &WorkerError) {
    tracing::error!(class = err.class(), error = %err, "shmcall worker failed, aborting");
    std::process::abort();
}

/// Worker thread settings.
#[derive(Clone)]
pub struct WorkerConfig {
    pub thread_name: String,
    pub failure_policy: HandlerFailurePolicy,
    pub fatal_reporter: FatalReporter,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_name: "shmcall-worker".to_owned(),
            failure_policy: HandlerFailurePolicy::default(),
            fatal_reporter: Arc::new(abort_on_fatal),
        }
    }
}

impl WorkerConfig {
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_failure_policy(mut self, policy: HandlerFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Replace the default abort-on-fatal behavior.
    ///
    /// The reporter runs on the worker thread after the caller has already
    /// been released. Returning from it lets the worker thread finish with
    /// the error instead of taking the process down.
    pub fn with_fatal_reporter(
        mut self,
        reporter: impl Fn(&WorkerError) + Send + Sync + 'static,
    ) -> Self {
        self.fatal_reporter = Arc::new(reporter);
        self
    }

    pub(crate) fn report_fatal(&self, err: &WorkerError) {
        (self.fatal_reporter)(err);
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("thread_name", &self.thread_name)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn default_channel_matches_observed_layout() {
        let config = ChannelConfig::default();
        assert_eq!(config.size, 2048);
        assert_eq!(config.payload_capacity(), 2044);
        assert_eq!(config.encoding, Encoding::Postcard);
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_tiny_and_odd_sizes() {
        assert_eq!(
            ChannelConfig::default().with_size(16).validate(),
            Err(LayoutError::TooSmall { size: 16, min: MIN_CHANNEL_SIZE })
        );
        assert_eq!(
            ChannelConfig::default().with_size(4098).validate(),
            Err(LayoutError::Unaligned { size: 4098 })
        );
    }

    #[test]
    fn env_overrides_are_applied() {
        let vars = [(CHANNEL_SIZE_ENV, "4096"), (ENCODING_ENV, "json")];
        let config = ChannelConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.size, 4096);
        assert_eq!(config.encoding, Encoding::Json);

        let config = ChannelConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ChannelConfig::default());
    }

    #[test]
    fn env_errors_name_the_variable() {
        let err = ChannelConfig::from_lookup(lookup(&[(CHANNEL_SIZE_ENV, "big")])).unwrap_err();
        assert!(err.to_string().contains(CHANNEL_SIZE_ENV));

        let err = ChannelConfig::from_lookup(lookup(&[(ENCODING_ENV, "cbor")])).unwrap_err();
        assert!(matches!(err, ConfigError::Encoding(_)));

        let err = ChannelConfig::from_lookup(lookup(&[(CHANNEL_SIZE_ENV, "8")])).unwrap_err();
        assert!(matches!(err, ConfigError::Layout(LayoutError::TooSmall { .. })));
    }

    #[test]
    fn worker_config_builders() {
        let config = WorkerConfig::default()
            .with_thread_name("loader")
            .with_failure_policy(HandlerFailurePolicy::ReplyToCaller)
            .with_fatal_reporter(|_| {});
        assert_eq!(config.thread_name, "loader");
        assert_eq!(config.failure_policy, HandlerFailurePolicy::ReplyToCaller);
        assert!(format!("{config:?}").contains("loader"));
    }
}
