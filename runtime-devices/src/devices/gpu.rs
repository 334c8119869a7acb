//! Component B — GPU Probe.
//!
//! Produces the vendor-neutral [`GpuDescriptor`] described by the data model:
//! dispatches to whichever vendor-specific probe is compiled for the host OS
//! (NVML on Linux/Windows, DXGI on Windows, Apple system info on macOS), in
//! that fixed order, with `directml`/`coreml` support flags OR-ed on top of
//! whatever the vendor probe produced. Every probe swallows its own errors —
//! detection degrades toward `vendor: Unknown` rather than aborting.

use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Qualcomm,
    Unknown,
}

impl std::fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GpuVendor::Nvidia => "nvidia",
            GpuVendor::Amd => "amd",
            GpuVendor::Intel => "intel",
            GpuVendor::Apple => "apple",
            GpuVendor::Qualcomm => "qualcomm",
            GpuVendor::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Default)]
pub struct GpuDescriptor {
    pub vendor: Option<GpuVendor>,
    pub device_name: Option<String>,
    pub total_memory_bytes: Option<u64>,
    /// `(major, minor)`.
    pub cuda_compute_capability: Option<(u32, u32)>,
    /// `(major, minor)`.
    pub cuda_driver_version: Option<(u32, u32)>,
    pub directml_supported: bool,
    pub coreml_supported: bool,
}

static GPUS: OnceLock<Vec<GpuDescriptor>> = OnceLock::new();

/// Every GPU this host's probes could identify, memoised for the process.
pub fn detect_gpus() -> &'static [GpuDescriptor] {
    GPUS.get_or_init(probe_all)
}

/// The single GPU most likely to matter for backend selection: the first
/// vendor-identified device, or a `vendor: None` stub carrying only the
/// DirectML/CoreML flags if nothing was identified.
pub fn detect_primary() -> GpuDescriptor {
    detect_gpus()
        .iter()
        .find(|g| g.vendor.is_some())
        .cloned()
        .unwrap_or_else(|| GpuDescriptor {
            directml_supported: directml_supported(),
            coreml_supported: coreml_supported(),
            ..Default::default()
        })
}

fn probe_all() -> Vec<GpuDescriptor> {
    let mut found = Vec::new();

    #[cfg(any(target_os = "linux", target_os = "windows"))]
    {
        found.extend(super::cuda::probe_nvml());
    }

    #[cfg(target_os = "windows")]
    {
        if found.is_empty() {
            found.extend(super::dxgi::probe_dxgi());
        }
    }

    #[cfg(target_os = "macos")]
    {
        found.push(super::metal::probe_apple());
    }

    let directml = directml_supported();
    let coreml = coreml_supported();
    for gpu in &mut found {
        gpu.directml_supported |= directml;
        gpu.coreml_supported |= coreml;
    }

    if found.is_empty() {
        crate::trace!("No GPU identified by any vendor probe; degrading to CPU-only");
    }

    found
}

/// DirectML is available iff Windows, build >= 18362, and `d3d12.dll` exists
/// in the system directory.
#[cfg(target_os = "windows")]
pub fn directml_supported() -> bool {
    windows_build_number() >= 18362 && system_dll_exists("d3d12.dll")
}
#[cfg(not(target_os = "windows"))]
pub fn directml_supported() -> bool {
    false
}

#[cfg(target_os = "windows")]
fn windows_build_number() -> u32 {
    // `sysinfo` exposes the kernel version string (e.g. "10.0.22631"); the
    // third component is the build number DirectML's floor is expressed in.
    sysinfo::System::kernel_version()
        .and_then(|v| v.rsplit('.').next().map(str::to_owned))
        .and_then(|b| b.parse().ok())
        .unwrap_or(0)
}

#[cfg(target_os = "windows")]
fn system_dll_exists(name: &str) -> bool {
    std::env::var_os("SystemRoot")
        .map(std::path::PathBuf::from)
        .map(|root| root.join("System32").join(name).is_file())
        .unwrap_or(false)
}

/// CoreML is available iff macOS; arm64 (Apple Silicon) always qualifies, x64
/// requires macOS >= 10.13.
#[cfg(target_os = "macos")]
pub fn coreml_supported() -> bool {
    if cfg!(target_arch = "aarch64") {
        return true;
    }
    macos_version_at_least(10, 13)
}
#[cfg(not(target_os = "macos"))]
pub fn coreml_supported() -> bool {
    false
}

#[cfg(target_os = "macos")]
fn macos_version_at_least(major: u32, minor: u32) -> bool {
    sysinfo::System::os_version()
        .and_then(|v| {
            let mut parts = v.split('.');
            let maj: u32 = parts.next()?.parse().ok()?;
            let min: u32 = parts.next()?.parse().ok()?;
            Some((maj, min) >= (major, minor))
        })
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_primary_never_panics() {
        let _ = detect_primary();
    }

    #[test]
    fn detect_gpus_is_memoised() {
        let a = detect_gpus().len();
        let b = detect_gpus().len();
        assert_eq!(a, b);
    }
}
