use std::fmt;
use std::time::Duration;

/// Interval at which an idle worker re-checks deferred work.
pub const DEFAULT_DEFERRAL_POLL: Duration = Duration::from_millis(500);

/// Millisecond clock used to time runs.
pub type ClockFn = fn() -> f64;

/// Environment features the host may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostCapabilities {
    /// Both contexts can see a common memory region.
    pub shared_memory: bool,
}

impl HostCapabilities {
    /// Capabilities of a native process, where threads share an address space.
    pub fn native() -> Self {
        Self {
            shared_memory: true,
        }
    }
}

/// Host configuration.
#[derive(Clone)]
pub struct HostConfig {
    pub capabilities: HostCapabilities,
    /// How long an idle worker waits for input before re-checking load deadlines.
    pub deferral_poll: Duration,
    /// Upper bound on a module load; `None` waits indefinitely.
    pub load_timeout: Option<Duration>,
    pub clock: ClockFn,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            capabilities: HostCapabilities::default(),
            deferral_poll: DEFAULT_DEFERRAL_POLL,
            load_timeout: None,
            clock: monotonic_ms,
        }
    }
}

impl HostConfig {
    pub fn with_capabilities(mut self, capabilities: HostCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_deferral_poll(mut self, poll: Duration) -> Self {
        self.deferral_poll = poll;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    pub fn with_clock(mut self, clock: ClockFn) -> Self {
        self.clock = clock;
        self
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("capabilities", &self.capabilities)
            .field("deferral_poll", &self.deferral_poll)
            .field("load_timeout", &self.load_timeout)
            .finish_non_exhaustive()
    }
}

/// Milliseconds since the first call in this process.
#[cfg(not(target_arch = "wasm32"))]
pub fn monotonic_ms() -> f64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs_f64() * 1000.0
}

/// `std::time::Instant` is unavailable on wasm32; runtimes install their own clock.
#[cfg(target_arch = "wasm32")]
pub fn monotonic_ms() -> f64 {
    0.0
}
