//! Single read point for environment-derived configuration.
//!
//! Nothing else in the engine inspects environment variables directly —
//! kernels, the scheduler and the capability probe all take an
//! `EngineConfig` (or the derived `CapabilitySnapshot`) as input instead,
//! which is what keeps kernel dispatch a pure function of its arguments.

use std::env;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `VECTORIA_DISABLE_SIMD=1` forces reference-kernel dispatch for
    /// every op, regardless of what the host CPU actually supports.
    pub disable_simd: bool,
    /// Optional override of the trace recorder's `constant + 3*|schedule|`
    /// capacity pre-sizing formula, mainly so tests can assert zero
    /// reallocation with a known schedule length.
    pub trace_capacity_hint: Option<usize>,
    /// `tracing_subscriber::EnvFilter` directive string, read from
    /// `VECTORIA_LOG` and falling back to `RUST_LOG`.
    pub log_filter: String,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let disable_simd = env::var("VECTORIA_DISABLE_SIMD")
            .map(|v| v == "1")
            .unwrap_or(false);

        let trace_capacity_hint = env::var("VECTORIA_TRACE_CAPACITY_HINT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        let log_filter = env::var("VECTORIA_LOG")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| "warn".to_string());

        EngineConfig {
            disable_simd,
            trace_capacity_hint,
            log_filter,
        }
    }
}

/// Installs a `tracing_subscriber` formatting layer filtered by
/// `EngineConfig::log_filter`. Intended for host binaries that embed
/// VECTORIA directly; library code only ever emits spans/events and never
/// installs a subscriber itself.
pub fn init_tracing() {
    let config = EngineConfig::from_env();
    let filter = tracing_subscriber::EnvFilter::new(config.log_filter);
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
