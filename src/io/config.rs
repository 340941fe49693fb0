//! Engine and target configuration

use std::time::Duration;

/// Default number of in-flight requests the harvest slots can hold
pub const DEFAULT_QUEUE_DEPTH: usize = 1;

/// Default bounded wait of the completion listener (ms)
pub const DEFAULT_LISTENER_POLL_MS: u64 = 250;

/// Default bounded wait slice of the harvest loop (ms)
pub const DEFAULT_HARVEST_SLICE_MS: u64 = 250;

/// Configuration for an [`Engine`](super::Engine)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the harvested-request slot array
    pub queue_depth: usize,

    /// How long a listener parks on the port before rechecking its stop flag
    pub listener_poll: Duration,

    /// Longest single wait on the completion event inside `harvest`
    pub harvest_slice: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            listener_poll: Duration::from_millis(DEFAULT_LISTENER_POLL_MS),
            harvest_slice: Duration::from_millis(DEFAULT_HARVEST_SLICE_MS),
        }
    }
}

impl EngineConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue depth
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the listener poll interval
    pub fn with_listener_poll(mut self, poll: Duration) -> Self {
        self.listener_poll = poll;
        self
    }

    /// Set the harvest wait slice
    pub fn with_harvest_slice(mut self, slice: Duration) -> Self {
        self.harvest_slice = slice;
        self
    }
}

/// Access requested on a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Access pattern hint passed to the OS cache manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPattern {
    Sequential,
    Random,
}

/// Options for opening a target
#[derive(Debug, Clone)]
pub struct TargetOptions {
    /// Read-only or read-write
    pub access: Access,

    /// Create the file if it does not exist (requires write access)
    pub create: bool,

    /// Bypass the OS page cache
    pub direct: bool,

    /// Write through to stable storage on every write
    pub sync_io: bool,

    /// Sequential or random access hint
    pub pattern: AccessPattern,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            access: Access::ReadWrite,
            create: true,
            direct: false,
            sync_io: false,
            pattern: AccessPattern::Random,
        }
    }
}

impl TargetOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only target that must already exist
    pub fn read_only() -> Self {
        Self {
            access: Access::ReadOnly,
            create: false,
            ..Self::default()
        }
    }

    /// Set create-on-open
    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Enable or disable direct (unbuffered) IO
    pub fn with_direct(mut self, direct: bool) -> Self {
        self.direct = direct;
        self
    }

    /// Enable or disable write-through
    pub fn with_sync_io(mut self, sync_io: bool) -> Self {
        self.sync_io = sync_io;
        self
    }

    /// Set the access pattern hint
    pub fn with_pattern(mut self, pattern: AccessPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub(crate) fn writable(&self) -> bool {
        self.access == Access::ReadWrite
    }
}
