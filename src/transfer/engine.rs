use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::progress::notifier::{CompletionNotifier, SessionEvent};
use crate::progress::observer::TransferObserver;
use crate::types::types::{AuthenticationInfo, FileDestination, ProxyInfo, TransferError};

use super::request;
use super::session::TransferSession;
use super::sink::{FileSink, MemorySink, Sink, TextSink};

/// User agent attached when neither the builder nor the header map set one.
pub const DEFAULT_USER_AGENT: &str = concat!("webload/", env!("CARGO_PKG_VERSION"));

/// Per-wait stall timeout applied unless reconfigured. -1 means no timeout.
pub const DEFAULT_TIMEOUT_SECS: i64 = 120;

/// Capacity of the internal session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine-level configuration, snapshotted when a transfer starts and only
/// read while the session is in flight. `resume_offset` and
/// `if_modified_since` are one-shot: cleared when the engine resets to idle.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub user_agent: String,
    pub headers: HashMap<String, Vec<String>>,
    pub cookies: Option<String>,
    pub authentication: Option<AuthenticationInfo>,
    pub proxy: Option<ProxyInfo>,
    pub timeout: Option<Duration>,
    pub resume_offset: u64,
    pub if_modified_since: Option<String>,
    pub encoding: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: HashMap::new(),
            cookies: None,
            authentication: None,
            proxy: None,
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64)),
            resume_offset: 0,
            if_modified_since: None,
            encoding: None,
        }
    }
}

/// The engine's single state enum. `Busy -> terminal` happens exactly once
/// per session, through `EngineCore::try_finish`; `terminal -> Idle` is the
/// reset performed after the terminal notification is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Busy,
    Completed,
    Cancelled,
    Faulted,
}

struct EngineState {
    phase: Phase,
    cancel: CancellationToken,
}

/// State shared between the engine handle, the running session, and the
/// notifier task.
pub(crate) struct EngineCore {
    config: Mutex<EngineConfig>,
    state: Mutex<EngineState>,
    observers: Mutex<Vec<Arc<dyn TransferObserver>>>,
}

impl EngineCore {
    fn new(config: EngineConfig) -> Self {
        Self {
            config: Mutex::new(config),
            state: Mutex::new(EngineState {
                phase: Phase::Idle,
                cancel: CancellationToken::new(),
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Claim the engine for a new session. Fails without side effects when
    /// a session is already in flight.
    fn try_begin(&self) -> Result<CancellationToken, TransferError> {
        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Idle {
            return Err(TransferError::EngineBusy);
        }
        state.phase = Phase::Busy;
        state.cancel = CancellationToken::new();
        Ok(state.cancel.clone())
    }

    /// The single `Busy -> terminal` transition. First caller wins; any
    /// later attempt is a no-op.
    pub(crate) fn try_finish(&self, terminal: Phase) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.phase == Phase::Busy {
            state.phase = terminal;
            true
        } else {
            false
        }
    }

    /// Back to idle after the terminal notification went out. One-shot
    /// configuration clears so the next call starts from defaults.
    fn reset(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.phase = Phase::Idle;
        }
        let mut config = self.config.lock().unwrap();
        config.resume_offset = 0;
        config.if_modified_since = None;
    }

    fn cancel(&self) {
        let state = self.state.lock().unwrap();
        if state.phase == Phase::Busy {
            state.cancel.cancel();
        }
    }

    fn is_busy(&self) -> bool {
        self.state.lock().unwrap().phase != Phase::Idle
    }
}

enum Mode {
    Buffer,
    File(FileDestination),
    Text,
}

/// Asynchronous HTTP transfer engine: at most one transfer in flight per
/// instance. Starting a transfer returns immediately; the session runs on
/// background tasks and reports through the registered observers.
///
/// Must be used from within a tokio runtime.
pub struct TransferEngine {
    core: Arc<EngineCore>,
}

impl TransferEngine {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TransferEngineBuilder {
        TransferEngineBuilder::new()
    }

    /// Register an observer. Observers registered while a transfer is in
    /// flight only see subsequent sessions.
    pub fn add_observer(&self, observer: Arc<dyn TransferObserver>) {
        self.core.observers.lock().unwrap().push(observer);
    }

    /// True from a successful start until the terminal notification has
    /// been dispatched and the engine has reset.
    pub fn is_busy(&self) -> bool {
        self.core.is_busy()
    }

    /// Request termination of the current session. Safe to call when idle
    /// or repeatedly; the session finalizes as `Cancelled` unless it had
    /// already reached a terminal state.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    /// Byte count already held locally; the next transfer requests the
    /// remainder and accounts totals on top of it. Cleared at reset.
    pub fn set_resume_offset(&self, offset: u64) {
        self.core.config.lock().unwrap().resume_offset = offset;
    }

    /// Conditional-fetch timestamp (HTTP-date) attached as
    /// `If-Modified-Since`. Cleared at reset.
    pub fn set_if_modified_since(&self, stamp: impl Into<String>) {
        self.core.config.lock().unwrap().if_modified_since = Some(stamp.into());
    }

    /// Per-wait stall timeout in seconds; -1 disables the watchdog.
    pub fn set_timeout_secs(&self, secs: i64) -> Result<(), TransferError> {
        if secs < -1 {
            return Err(TransferError::InvalidConfig(format!(
                "timeout must be >= -1, got {secs}"
            )));
        }
        self.core.config.lock().unwrap().timeout = if secs == -1 {
            None
        } else {
            Some(Duration::from_secs(secs as u64))
        };
        Ok(())
    }

    /// Fetch into an in-memory buffer.
    pub fn start_buffer_download(
        &self,
        address: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<(), TransferError> {
        self.start(address.into(), Mode::Buffer, token.into())
    }

    /// Stream to a file path (create-or-truncate) or a caller-supplied
    /// writer. Bytes already written stay in place if the transfer is
    /// cancelled or faults.
    pub fn start_file_download(
        &self,
        address: impl Into<String>,
        destination: impl Into<FileDestination>,
        token: impl Into<String>,
    ) -> Result<(), TransferError> {
        self.start(address.into(), Mode::File(destination.into()), token.into())
    }

    /// Fetch into a buffer, then decode it to text at completion.
    pub fn start_text_download(
        &self,
        address: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<(), TransferError> {
        self.start(address.into(), Mode::Text, token.into())
    }

    fn start(&self, address: String, mode: Mode, token: String) -> Result<(), TransferError> {
        let cancel = self.core.try_begin()?;
        let config = self.core.config.lock().unwrap().clone();
        let observers = self.core.observers.lock().unwrap().clone();

        let sink: Box<dyn Sink> = match mode {
            Mode::Buffer => Box::new(MemorySink::new()),
            Mode::File(destination) => Box::new(FileSink::new(destination)),
            Mode::Text => Box::new(TextSink::new(config.encoding.clone())),
        };
        let resume_offset = request::resolve_resume_offset(&config);

        let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
        let session = TransferSession::new(
            Arc::clone(&self.core),
            config,
            address,
            token,
            sink,
            resume_offset,
            cancel,
            events_tx,
        );

        // The notifier owns the reset: the engine stays busy until the
        // terminal notification has been dispatched.
        let notifier = CompletionNotifier::new(observers);
        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            notifier.run(events_rx).await;
            core.reset();
        });
        tokio::spawn(session.run());

        Ok(())
    }
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the engine's persistent configuration.
pub struct TransferEngineBuilder {
    config: EngineConfig,
}

impl TransferEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, Vec<String>>) -> Self {
        self.config.headers = headers;
        self
    }

    pub fn add_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .headers
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_cookies(mut self, cookies: impl Into<String>) -> Self {
        self.config.cookies = Some(cookies.into());
        self
    }

    pub fn with_authentication(mut self, auth: AuthenticationInfo) -> Self {
        self.config.authentication = Some(auth);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyInfo) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    /// `None` disables the per-wait watchdog entirely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Encoding label for text downloads; UTF-8 when unset.
    pub fn with_encoding(mut self, label: impl Into<String>) -> Self {
        self.config.encoding = Some(label.into());
        self
    }

    pub fn build(self) -> TransferEngine {
        TransferEngine {
            core: Arc::new(EngineCore::new(self.config)),
        }
    }
}

impl Default for TransferEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
