//! Engine configuration.
//!
//! All knobs the compiler, optimizer and evaluators consult live here so an
//! embedding program configures the engine in one place.

use std::time::Duration;

/// Parallel evaluation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelConfig {
    /// Worker thread count; `0` resolves to the number of logical CPUs.
    pub num_threads: usize,
    /// Below this many rules per thread, parallel rule evaluation is skipped.
    pub min_rules_per_thread: usize,
    /// Below this batch size, batches are processed on the calling thread.
    pub min_batch_size_for_parallelism: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            min_rules_per_thread: 10,
            min_batch_size_for_parallelism: 100,
        }
    }
}

impl ParallelConfig {
    /// Resolve `num_threads`, mapping `0` to the detected CPU count.
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            num_cpus::get()
        } else {
            self.num_threads
        }
    }
}

/// Global regex cache tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexCacheConfig {
    /// Maximum number of compiled patterns kept in the cache.
    pub max_size: usize,
    /// Entries unused for longer than this are eligible for eviction.
    pub ttl: Duration,
    /// Access count after which an entry is promoted to "hot" and survives
    /// eviction waves.
    pub hot_threshold: usize,
    /// Minimum interval between eviction passes.
    pub cleanup_interval: Duration,
}

impl Default for RegexCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(300),
            hot_threshold: 10,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Top-level engine configuration.
///
/// # Example
/// ```
/// use sigma_dag::EngineConfig;
///
/// let config = EngineConfig::new()
///     .with_optimization_level(3)
///     .with_parallel_processing(true)
///     .with_prefilter(false);
/// assert_eq!(config.optimization_level, 3);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Master switch for the optimizer. When `false` the DAG is used as
    /// code-generated, with a plain topological execution order.
    pub enable_optimization: bool,

    /// Optimization aggressiveness:
    /// - `0` - none
    /// - `1` - constant folding + dead code elimination
    /// - `2` - level 1 plus CSE and selectivity-aware reordering (default)
    /// - `3` - level 2 iterated to a fixed point with higher round limits
    pub optimization_level: u8,

    /// Evaluate disjoint rule partitions on worker threads.
    pub enable_parallel_processing: bool,

    /// Parallel evaluation tuning; consulted only when parallel processing
    /// is enabled.
    pub parallel: ParallelConfig,

    /// Gate full evaluation behind a literal multi-pattern prefilter.
    pub enable_prefilter: bool,

    /// Share one primitive (and one DAG node) between identical predicates
    /// across rules. Disabling this is only useful for debugging.
    pub enable_primitive_deduplication: bool,

    /// Normalize field names through the configured taxonomy.
    pub enable_field_mapping: bool,

    /// Match taxonomy source fields case-sensitively.
    pub case_sensitive_fields: bool,

    /// Rules producing more primitives than this get a compilation warning.
    pub max_rule_complexity: usize,

    /// Regex cache tuning.
    pub regex_cache: RegexCacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_optimization: true,
            optimization_level: 2,
            enable_parallel_processing: false,
            parallel: ParallelConfig::default(),
            enable_prefilter: true,
            enable_primitive_deduplication: true,
            enable_field_mapping: true,
            case_sensitive_fields: false,
            max_rule_complexity: 100,
            regex_cache: RegexCacheConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggressive settings for high-throughput deployments.
    pub fn production() -> Self {
        Self {
            optimization_level: 3,
            enable_parallel_processing: true,
            ..Self::default()
        }
    }

    /// Conservative settings that keep the DAG close to what the rules say,
    /// for debugging rule behavior.
    pub fn development() -> Self {
        Self {
            enable_optimization: false,
            optimization_level: 0,
            enable_prefilter: false,
            ..Self::default()
        }
    }

    pub fn with_optimization(mut self, enable: bool) -> Self {
        self.enable_optimization = enable;
        self
    }

    /// Set the optimization level (clamped to `0..=3`).
    pub fn with_optimization_level(mut self, level: u8) -> Self {
        self.optimization_level = level.min(3);
        self.enable_optimization = self.optimization_level > 0;
        self
    }

    pub fn with_parallel_processing(mut self, enable: bool) -> Self {
        self.enable_parallel_processing = enable;
        self
    }

    pub fn with_parallel_config(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_prefilter(mut self, enable: bool) -> Self {
        self.enable_prefilter = enable;
        self
    }

    pub fn with_primitive_deduplication(mut self, enable: bool) -> Self {
        self.enable_primitive_deduplication = enable;
        self
    }

    pub fn with_field_mapping(mut self, enable: bool) -> Self {
        self.enable_field_mapping = enable;
        self
    }

    pub fn with_case_sensitive_fields(mut self, enable: bool) -> Self {
        self.case_sensitive_fields = enable;
        self
    }

    pub fn with_max_rule_complexity(mut self, max: usize) -> Self {
        self.max_rule_complexity = max;
        self
    }

    pub fn with_regex_cache(mut self, regex_cache: RegexCacheConfig) -> Self {
        self.regex_cache = regex_cache;
        self
    }
}
