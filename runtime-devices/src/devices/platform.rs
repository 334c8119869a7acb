//! Component A — Platform Probe.
//!
//! Detects OS, CPU architecture and process bitness once per process and
//! memoises the result, the same `OnceLock`-backed-singleton idiom used
//! throughout this crate (see [`crate::native_loader`]).

use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Os {
    Windows,
    Linux,
    Macos,
}

impl Os {
    fn detect() -> Self {
        match std::env::consts::OS {
            "windows" => Os::Windows,
            "macos" => Os::Macos,
            _ => Os::Linux,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Os::Windows => "win",
            Os::Linux => "linux",
            Os::Macos => "osx",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    X64,
    Arm64,
}

impl Arch {
    fn detect() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Arch::X64),
            "aarch64" => Some(Arch::Arm64),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
        }
    }
}

/// `{os, arch, runtime_identifier}` — immutable once detected.
///
/// `arch` is `None` on hosts this crate doesn't recognise (e.g. 32-bit or
/// exotic targets); those hosts are still permitted to run `cpu`-only, per
/// spec, they just never get a `runtime_identifier` for fetching prebuilt
/// accelerated binaries.
#[derive(Clone, Copy, Debug)]
pub struct Platform {
    pub os: Os,
    pub arch: Option<Arch>,
}

impl Platform {
    /// `"<os>-<arch>"`, e.g. `"win-x64"`, `"linux-arm64"`. `None` when the
    /// architecture wasn't recognised.
    pub fn runtime_identifier(&self) -> Option<String> {
        self.arch.map(|a| format!("{}-{}", self.os.as_str(), a.as_str()))
    }

    /// 32-bit and otherwise-unrecognised architectures are rejected for every
    /// GPU backend; `cpu` always remains permitted.
    pub fn supports_accelerated_backends(&self) -> bool {
        self.arch.is_some()
    }
}

static PLATFORM: OnceLock<Platform> = OnceLock::new();

/// Memoised platform facts for the current process.
pub fn platform() -> Platform {
    *PLATFORM.get_or_init(|| Platform {
        os: Os::detect(),
        arch: Arch::detect(),
    })
}
