//! Process-wide engine state: configuration, admission, shutdown.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::codec::HeaderLimits;
use crate::connection::{Connection, TerminationReason};
use crate::handler::Handler;
use crate::send::DEFAULT_CORK_THRESHOLD;
use crate::transport::Transport;

/// Engine-wide tunables with deployment-safe defaults.
///
/// Built with chained setters:
///
/// ```
/// use std::time::Duration;
/// use h1_engine::EngineConfig;
///
/// let config = EngineConfig::default()
///     .idle_timeout(Duration::from_secs(30))
///     .connection_limit(1024);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) max_request_line_bytes: usize,
    pub(crate) max_header_bytes: usize,
    pub(crate) max_headers: usize,
    pub(crate) read_buffer_limit: usize,
    pub(crate) write_buffer_limit: usize,
    pub(crate) cork_threshold: usize,
    pub(crate) idle_timeout: Duration,
    pub(crate) lifetime_limit: Option<Duration>,
    pub(crate) connection_limit: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_request_line_bytes: 2 * 1024,
            max_header_bytes: 8 * 1024,
            max_headers: 64,
            read_buffer_limit: 16 * 1024,
            write_buffer_limit: 32 * 1024,
            cork_threshold: DEFAULT_CORK_THRESHOLD,
            idle_timeout: Duration::from_secs(120),
            lifetime_limit: None,
            connection_limit: None,
        }
    }
}

impl EngineConfig {
    pub fn max_request_line_bytes(mut self, limit: usize) -> Self {
        self.max_request_line_bytes = limit;
        self
    }

    pub fn max_header_bytes(mut self, limit: usize) -> Self {
        self.max_header_bytes = limit;
        self
    }

    /// Maximum header-field count; capped by the parser at 64.
    pub fn max_headers(mut self, limit: usize) -> Self {
        self.max_headers = limit.min(HeaderLimits::HARD_MAX_HEADERS);
        self
    }

    pub fn read_buffer_limit(mut self, limit: usize) -> Self {
        self.read_buffer_limit = limit;
        self
    }

    pub fn write_buffer_limit(mut self, limit: usize) -> Self {
        self.write_buffer_limit = limit;
        self
    }

    /// Header sizes below this (≈ one MSS) are corked to share a packet with
    /// the body.
    pub fn cork_threshold(mut self, threshold: usize) -> Self {
        self.cork_threshold = threshold;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Hard cap on a connection's total lifetime, regardless of activity.
    pub fn lifetime_limit(mut self, limit: Duration) -> Self {
        self.lifetime_limit = Some(limit);
        self
    }

    pub fn connection_limit(mut self, limit: usize) -> Self {
        self.connection_limit = Some(limit);
        self
    }

    pub(crate) fn header_limits(&self) -> HeaderLimits {
        HeaderLimits {
            max_request_line_bytes: self.max_request_line_bytes,
            max_header_bytes: self.max_header_bytes,
            max_headers: self.max_headers,
        }
    }
}

/// Why [`Engine::admit`] refused a connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmitError {
    #[error("connection limit reached ({limit})")]
    LimitReached { limit: usize },

    #[error("engine is shutting down")]
    ShuttingDown,
}

type CompletionHook = Box<dyn Fn(TerminationReason) + Send + Sync>;

/// Process-wide engine state shared by all connections.
///
/// Holds the configuration, the active-connection counter used for
/// admission, and the shutdown flag every connection observes on its next
/// step. Cheap to share: dispatchers clone the `Arc` per connection.
pub struct Engine {
    config: EngineConfig,
    active: AtomicUsize,
    shutting_down: AtomicBool,
    on_completion: Option<CompletionHook>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("active", &self.active)
            .field("shutting_down", &self.shutting_down)
            .field("on_completion", &self.on_completion.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            active: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            on_completion: None,
        })
    }

    /// Like [`new`](Self::new), with a hook invoked once per connection when
    /// it closes, carrying the termination reason.
    pub fn with_completion_hook(
        config: EngineConfig,
        hook: impl Fn(TerminationReason) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            active: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            on_completion: Some(Box::new(hook)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Connections currently admitted and not yet closed.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Admits one already-accepted transport, constructing its connection.
    ///
    /// Enforces the configured connection limit and refuses new work once
    /// shutdown has begun.
    pub fn admit<T, H>(self: &Arc<Self>, transport: T, handler: H) -> Result<Connection<T, H>, AdmitError>
    where
        T: Transport,
        H: Handler,
    {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(AdmitError::ShuttingDown);
        }

        let limit = self.config.connection_limit.unwrap_or(usize::MAX);
        let reserved = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| (active < limit).then_some(active + 1));
        if reserved.is_err() {
            debug!(limit, "connection refused: limit reached");
            return Err(AdmitError::LimitReached { limit });
        }

        Ok(Connection::new(Arc::clone(self), transport, handler))
    }

    /// Flags the engine as shutting down.
    ///
    /// Already-admitted connections close with reason `Shutdown` on their
    /// next step; new admissions are refused.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!(active = self.active_connections(), "engine shutdown initiated");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Called exactly once per connection, on close.
    pub(crate) fn connection_closed(&self, reason: TerminationReason) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        if let Some(hook) = &self.on_completion {
            hook(reason);
        }
    }
}
