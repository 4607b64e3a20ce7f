//! Host capability probe (spec §4.5).
//!
//! The result is immutable process-wide state, computed once behind a
//! `OnceLock`. It is the only piece of global state in the engine — the
//! dispatcher, scheduler and arena never read from anything but the
//! snapshot handed to them, so the dispatch rule stays a pure function of
//! `(op_kind, dtype, shape, capabilities)`.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    Unknown,
    X86_64,
    Arm64,
}

impl Architecture {
    pub fn name(self) -> &'static str {
        match self {
            Architecture::Unknown => "Unknown",
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }

    pub fn wire_value(self) -> i32 {
        match self {
            Architecture::Unknown => 0,
            Architecture::X86_64 => 1,
            Architecture::Arm64 => 2,
        }
    }
}

/// Immutable description of the host architecture and its SIMD support,
/// taken once at process start (or first use) and read thereafter as an
/// atomic snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub arch: Architecture,
    /// Whether this binary was compiled with SIMD kernel variants available.
    pub simd_compiled: bool,
    /// Whether the runtime CPU advertises the feature set a compiled SIMD
    /// kernel requires (AVX2 on x86-64, Neon on ARM64). Forced to `false`
    /// when `VECTORIA_DISABLE_SIMD` is set, regardless of the true CPU
    /// capability, so determinism tests can force reference mode on any
    /// machine.
    pub simd_supported: bool,
}

impl CapabilitySnapshot {
    pub fn simd_enabled(self) -> bool {
        self.simd_compiled && self.simd_supported
    }
}

static CAPABILITIES: OnceLock<CapabilitySnapshot> = OnceLock::new();

/// Returns the process-wide capability snapshot, probing the host on first
/// call. Subsequent calls are a cheap atomic read of the cached value.
pub fn capabilities() -> CapabilitySnapshot {
    *CAPABILITIES.get_or_init(probe)
}

fn probe() -> CapabilitySnapshot {
    let arch = detect_arch();
    let simd_compiled = cfg!(any(target_arch = "x86_64", target_arch = "aarch64"));
    let disable_simd = EngineConfig::from_env().disable_simd;

    let simd_supported = if disable_simd {
        false
    } else {
        detect_runtime_simd()
    };

    CapabilitySnapshot {
        arch,
        simd_compiled,
        simd_supported,
    }
}

fn detect_arch() -> Architecture {
    if cfg!(target_arch = "x86_64") {
        Architecture::X86_64
    } else if cfg!(target_arch = "aarch64") {
        Architecture::Arm64
    } else {
        Architecture::Unknown
    }
}

#[cfg(target_arch = "x86_64")]
fn detect_runtime_simd() -> bool {
    is_x86_feature_detected!("avx2")
}

#[cfg(target_arch = "aarch64")]
fn detect_runtime_simd() -> bool {
    std::arch::is_aarch64_feature_detected!("neon")
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_runtime_simd() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_stable_across_calls() {
        let a = capabilities();
        let b = capabilities();
        assert_eq!(a, b);
    }

    #[test]
    fn disable_simd_env_forces_reference() {
        std::env::set_var("VECTORIA_DISABLE_SIMD", "1");
        let snap = probe();
        assert!(!snap.simd_supported);
        std::env::remove_var("VECTORIA_DISABLE_SIMD");
    }
}
