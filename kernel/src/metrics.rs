/// Kernel metrics collection module
/// Tracks buffer cache and scheduler statistics using atomic counters

use core::sync::atomic::{AtomicU64, Ordering};

/// Global system metrics
pub struct SystemMetrics {
    /// Buffer cache lookups satisfied from the pool
    pub cache_hits: AtomicU64,

    /// Buffer cache lookups that had to claim a free buffer
    pub cache_misses: AtomicU64,

    /// Buffers whose identity was reassigned on a miss
    pub evictions: AtomicU64,

    /// Dirty victims written back before reuse
    pub victim_writebacks: AtomicU64,

    /// Synchronous block reads issued to the device driver
    pub dev_reads: AtomicU64,

    /// Synchronous block writes issued to the device driver
    pub dev_writes: AtomicU64,

    /// Times a process slept on a buffer wait queue
    pub buffer_sleeps: AtomicU64,

    /// Times a process slept waiting for any free buffer
    pub free_list_sleeps: AtomicU64,

    /// Scheduler selections performed
    pub context_switches: AtomicU64,

    /// Lottery draws performed
    pub lottery_draws: AtomicU64,

    /// Signals posted to processes
    pub signals_delivered: AtomicU64,

    /// Alarms that expired and delivered SIGALRM
    pub alarms_fired: AtomicU64,
}

impl SystemMetrics {
    /// Create a new SystemMetrics instance with all counters at zero
    pub const fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            victim_writebacks: AtomicU64::new(0),
            dev_reads: AtomicU64::new(0),
            dev_writes: AtomicU64::new(0),
            buffer_sleeps: AtomicU64::new(0),
            free_list_sleeps: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            lottery_draws: AtomicU64::new(0),
            signals_delivered: AtomicU64::new(0),
            alarms_fired: AtomicU64::new(0),
        }
    }

    /// Increment cache hit counter
    #[inline]
    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment cache miss counter
    #[inline]
    pub fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment eviction counter
    #[inline]
    pub fn inc_evictions(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment dirty victim write-back counter
    #[inline]
    pub fn inc_victim_writebacks(&self) {
        self.victim_writebacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment device read counter
    #[inline]
    pub fn inc_dev_reads(&self) {
        self.dev_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment device write counter
    #[inline]
    pub fn inc_dev_writes(&self) {
        self.dev_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment buffer wait queue sleep counter
    #[inline]
    pub fn inc_buffer_sleeps(&self) {
        self.buffer_sleeps.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment free list sleep counter
    #[inline]
    pub fn inc_free_list_sleeps(&self) {
        self.free_list_sleeps.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment context switch counter
    #[inline]
    pub fn inc_context_switches(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment lottery draw counter
    #[inline]
    pub fn inc_lottery_draws(&self) {
        self.lottery_draws.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment signals delivered counter
    #[inline]
    pub fn inc_signals_delivered(&self) {
        self.signals_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment alarms fired counter
    #[inline]
    pub fn inc_alarms_fired(&self) {
        self.alarms_fired.fetch_add(1, Ordering::Relaxed);
    }

    /// Get cache hit count
    pub fn get_cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Get cache miss count
    pub fn get_cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Get device read count
    pub fn get_dev_reads(&self) -> u64 {
        self.dev_reads.load(Ordering::Relaxed)
    }

    /// Get device write count
    pub fn get_dev_writes(&self) -> u64 {
        self.dev_writes.load(Ordering::Relaxed)
    }

    /// Get context switch count
    pub fn get_context_switches(&self) -> u64 {
        self.context_switches.load(Ordering::Relaxed)
    }

    /// Get signals delivered count
    pub fn get_signals_delivered(&self) -> u64 {
        self.signals_delivered.load(Ordering::Relaxed)
    }
}

/// Global system metrics instance
pub static METRICS: SystemMetrics = SystemMetrics::new();

/// Get a reference to the global metrics
#[inline]
pub fn metrics() -> &'static SystemMetrics {
    &METRICS
}
