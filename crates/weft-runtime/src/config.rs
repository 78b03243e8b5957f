//! Fiber engine configuration

/// Configuration for a fiber context
///
/// Values are inputs supplied by the embedding application; the engine only
/// range-checks them against the platform stack limit when the context is
/// constructed.
#[derive(Debug, Clone)]
pub struct FiberConfig {
    /// Size of the context's shared physical stack, multiplexed by all
    /// shared-stack fibers
    pub shared_stack_size: usize,

    /// Stack size for fibers with individual stacks (also used by the
    /// switch trampoline); address space only, pages are mapped on demand
    pub individual_stack_size: usize,

    /// Minimum allocation for a shared-stack fiber's swap buffer
    pub shared_stack_swap_min: usize,

    /// Maximum number of idle fibers cached for reuse
    pub cache_max: usize,

    /// Stack headroom a running fiber must keep available; `check_stack`
    /// raises once the live remainder falls below this
    pub min_stack_headroom: usize,
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self {
            shared_stack_size: 1024 * 1024,
            individual_stack_size: 256 * 1024 * 1024,
            shared_stack_swap_min: 10 * 1024,
            cache_max: 200,
            min_stack_headroom: 20 * 1024,
        }
    }
}

impl FiberConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shared stack size
    pub fn shared_stack_size(mut self, n: usize) -> Self {
        self.shared_stack_size = n;
        self
    }

    /// Set the individual stack size
    pub fn individual_stack_size(mut self, n: usize) -> Self {
        self.individual_stack_size = n;
        self
    }

    /// Set the minimum swap buffer size
    pub fn shared_stack_swap_min(mut self, n: usize) -> Self {
        self.shared_stack_swap_min = n;
        self
    }

    /// Set the maximum number of cached fibers
    pub fn cache_max(mut self, n: usize) -> Self {
        self.cache_max = n;
        self
    }

    /// Set the minimum stack headroom
    pub fn min_stack_headroom(mut self, n: usize) -> Self {
        self.min_stack_headroom = n;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.shared_stack_size == 0 {
            return Err("shared_stack_size must be non-zero");
        }
        if self.individual_stack_size == 0 {
            return Err("individual_stack_size must be non-zero");
        }
        if self.shared_stack_swap_min > self.shared_stack_size {
            return Err("shared_stack_swap_min exceeds shared_stack_size");
        }
        if self.min_stack_headroom >= self.shared_stack_size {
            return Err("min_stack_headroom leaves no usable shared stack");
        }
        Ok(())
    }
}
