//! Process-wide regex compilation cache.
//!
//! Regex primitives resolve their patterns through this cache so a pattern
//! shared by many rules compiles once. Functionally the cache is invisible:
//! behavior is identical to compiling on every call, only amortized.
//!
//! Eviction keeps the cache bounded: entries idle past the TTL go first,
//! then the least recently used, and entries promoted to "hot" by access
//! count survive eviction waves entirely.

use crate::config::RegexCacheConfig;
use crate::error::{Result, SigmaError};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Instant;

/// Cache counters, readable at any time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegexCacheStats {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub compilations: u64,
    pub evictions: u64,
    pub rejected_patterns: u64,
}

#[derive(Debug)]
struct CachedRegex {
    regex: Arc<Regex>,
    access_count: usize,
    last_access: Instant,
    hot: bool,
}

#[derive(Debug)]
struct CacheState {
    patterns: HashMap<String, CachedRegex>,
    last_cleanup: Instant,
    stats: RegexCacheStats,
}

/// Thread-safe regex cache; see the module docs for the eviction policy.
#[derive(Debug)]
pub struct GlobalRegexCache {
    state: RwLock<CacheState>,
    config: RegexCacheConfig,
}

impl GlobalRegexCache {
    pub fn new() -> Self {
        Self::with_config(RegexCacheConfig::default())
    }

    pub fn with_config(config: RegexCacheConfig) -> Self {
        Self {
            state: RwLock::new(CacheState {
                patterns: HashMap::new(),
                last_cleanup: Instant::now(),
                stats: RegexCacheStats::default(),
            }),
            config,
        }
    }

    /// Fetch a compiled regex, compiling and inserting on miss.
    ///
    /// Rejects syntactically invalid patterns with `InvalidRegex` and
    /// patterns with catastrophic backtracking shapes with
    /// `DangerousRegexPattern`.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>> {
        {
            let mut state = self.state.write().unwrap();
            state.stats.lookups += 1;
            let hot_threshold = self.config.hot_threshold;
            if let Some(entry) = state.patterns.get_mut(pattern) {
                entry.access_count += 1;
                entry.last_access = Instant::now();
                if entry.access_count >= hot_threshold {
                    entry.hot = true;
                }
                let regex = entry.regex.clone();
                state.stats.hits += 1;
                return Ok(regex);
            }
            state.stats.misses += 1;
        }

        if is_dangerous_pattern(pattern) {
            let mut state = self.state.write().unwrap();
            state.stats.rejected_patterns += 1;
            return Err(SigmaError::DangerousRegexPattern(pattern.to_string()));
        }

        let compiled = Regex::new(pattern)
            .map(Arc::new)
            .map_err(|e| SigmaError::InvalidRegex(format!("{pattern}: {e}")))?;

        let mut state = self.state.write().unwrap();
        state.stats.compilations += 1;
        if state.patterns.len() >= self.config.max_size {
            self.evict(&mut state);
        }
        state.patterns.insert(
            pattern.to_string(),
            CachedRegex {
                regex: compiled.clone(),
                access_count: 1,
                last_access: Instant::now(),
                hot: false,
            },
        );
        Ok(compiled)
    }

    /// Drop expired cold entries; if the cache is still full, drop the least
    /// recently used cold entry. Hot entries are never evicted.
    fn evict(&self, state: &mut CacheState) {
        let now = Instant::now();
        if now.duration_since(state.last_cleanup) >= self.config.cleanup_interval {
            state.last_cleanup = now;
            let ttl = self.config.ttl;
            let before = state.patterns.len();
            state
                .patterns
                .retain(|_, entry| entry.hot || now.duration_since(entry.last_access) < ttl);
            state.stats.evictions += (before - state.patterns.len()) as u64;
        }

        while state.patterns.len() >= self.config.max_size {
            let victim = state
                .patterns
                .iter()
                .filter(|(_, entry)| !entry.hot)
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(pattern, _)| pattern.clone());
            match victim {
                Some(pattern) => {
                    state.patterns.remove(&pattern);
                    state.stats.evictions += 1;
                }
                // Everything is hot; let the cache run over its bound.
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegexCacheStats {
        self.state.read().unwrap().stats.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        state.patterns.clear();
        state.stats = RegexCacheStats::default();
    }
}

impl Default for GlobalRegexCache {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_CACHE: OnceLock<GlobalRegexCache> = OnceLock::new();

/// Install the process-wide cache with custom tuning. Returns `false` when a
/// cache was already installed (first configuration wins).
pub fn init_global_regex_cache(config: RegexCacheConfig) -> bool {
    GLOBAL_CACHE.set(GlobalRegexCache::with_config(config)).is_ok()
}

/// The process-wide cache, created with defaults on first use.
pub fn global_regex_cache() -> &'static GlobalRegexCache {
    GLOBAL_CACHE.get_or_init(GlobalRegexCache::new)
}

/// Heuristic for catastrophic backtracking: an unbounded quantifier applied
/// to a group that itself contains an unbounded quantifier, e.g. `(a+)+` or
/// `(a*|b)*`. Escaped characters and character classes are skipped.
fn is_dangerous_pattern(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    // For each open group, whether an unbounded quantifier occurred inside.
    let mut group_stack: Vec<bool> = Vec::new();
    let mut in_class = false;
    let mut last_closed_group_had_quantifier = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '\\' => {
                i += 1;
                last_closed_group_had_quantifier = false;
            }
            '[' if !in_class => {
                in_class = true;
                last_closed_group_had_quantifier = false;
            }
            ']' if in_class => in_class = false,
            '(' if !in_class => {
                group_stack.push(false);
                last_closed_group_had_quantifier = false;
            }
            ')' if !in_class => {
                let inner = group_stack.pop().unwrap_or(false);
                if inner {
                    if let Some(parent) = group_stack.last_mut() {
                        *parent = true;
                    }
                }
                last_closed_group_had_quantifier = inner;
            }
            '*' | '+' if !in_class => {
                if last_closed_group_had_quantifier {
                    return true;
                }
                if let Some(top) = group_stack.last_mut() {
                    *top = true;
                }
                last_closed_group_had_quantifier = false;
            }
            '{' if !in_class => {
                // Counted repetition with an open upper bound counts as
                // unbounded, e.g. `{2,}`.
                let unbounded = chars[i..]
                    .iter()
                    .take_while(|&&c| c != '}')
                    .any(|&c| c == ',')
                    && chars[i..]
                        .iter()
                        .take_while(|&&c| c != '}')
                        .last()
                        .is_some_and(|&c| c == ',');
                if unbounded {
                    if last_closed_group_had_quantifier {
                        return true;
                    }
                    if let Some(top) = group_stack.last_mut() {
                        *top = true;
                    }
                }
                while i < chars.len() && chars[i] != '}' {
                    i += 1;
                }
                last_closed_group_had_quantifier = false;
            }
            _ => last_closed_group_had_quantifier = false,
        }
        i += 1;
    }

    false
}
