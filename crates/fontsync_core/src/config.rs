//! Handler configuration.

/// Configuration for a [`crate::FontHandler`].
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Maximum number of cache entries (fields and glyphs combined).
    pub cache_capacity: usize,

    /// Skip persistence entirely, keeping only the in-process cache
    /// up to date ("dummy editor" mode). Also forced when the backend
    /// itself is read-only.
    pub read_only: bool,

    /// Do not start the background write task; the owner drains the
    /// queue with [`crate::FontHandler::flush_writes`]. Used by
    /// embedders that batch saves and by tests that need
    /// deterministic drain points.
    pub defer_writes: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            read_only: false,
            defer_writes: false,
        }
    }
}

impl HandlerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Disables persistence.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Disables the background write task.
    pub fn with_defer_writes(mut self, defer_writes: bool) -> Self {
        self.defer_writes = defer_writes;
        self
    }
}
