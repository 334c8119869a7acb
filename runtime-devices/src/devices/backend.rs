//! Compute-backend tags shared between hardware probing and the toolchain
//! that builds/installs a matching server binary.
//!
//! [`BackendTag`] is deliberately broader than what any single platform can
//! ever report all at once — it is the full set of backends a caller might
//! *request*; [`BackendTag::detect_available`] narrows that down to what this
//! host can actually run.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendTag {
    Cpu,
    Cuda12,
    Cuda13,
    Vulkan,
    Hip,
    Sycl,
    Metal,
    DirectMl,
    CoreMl,
}

impl BackendTag {
    /// All backends that could conceivably exist on *some* platform.
    pub const ALL: &'static [BackendTag] = &[
        BackendTag::Cpu,
        BackendTag::Cuda12,
        BackendTag::Cuda13,
        BackendTag::Vulkan,
        BackendTag::Hip,
        BackendTag::Sycl,
        BackendTag::Metal,
        BackendTag::DirectMl,
        BackendTag::CoreMl,
    ];

    /// Well-known dynamic-library names `native_loader` probes for, in the
    /// order they're tried. `None` means the backend isn't discoverable this
    /// way (e.g. `Cpu` always present, `Metal`/`CoreMl` detected via `objc2`).
    fn probe_candidates(self) -> Option<&'static [&'static str]> {
        match self {
            BackendTag::Cpu => None,
            BackendTag::Metal | BackendTag::CoreMl => None,
            #[cfg(target_os = "windows")]
            BackendTag::Cuda12 | BackendTag::Cuda13 => Some(&["nvcuda.dll"]),
            #[cfg(not(target_os = "windows"))]
            BackendTag::Cuda12 | BackendTag::Cuda13 => {
                Some(&["libcuda.so.1", "libcuda.so"])
            }
            #[cfg(target_os = "windows")]
            BackendTag::Vulkan => Some(&["vulkan-1.dll"]),
            #[cfg(not(target_os = "windows"))]
            BackendTag::Vulkan => Some(&["libvulkan.so.1", "libvulkan.so"]),
            #[cfg(target_os = "windows")]
            BackendTag::Hip => Some(&["amdhip64.dll"]),
            #[cfg(not(target_os = "windows"))]
            BackendTag::Hip => Some(&["libamdhip64.so"]),
            #[cfg(target_os = "windows")]
            BackendTag::Sycl => Some(&["sycl7.dll", "sycl6.dll"]),
            #[cfg(not(target_os = "windows"))]
            BackendTag::Sycl => Some(&["libsycl.so.7", "libsycl.so"]),
            #[cfg(target_os = "windows")]
            BackendTag::DirectMl => Some(&["DirectML.dll"]),
            #[cfg(not(target_os = "windows"))]
            BackendTag::DirectMl => None,
        }
    }

    /// Best-effort test for whether the runtime library for this backend can
    /// be loaded on the current host. Never builds or runs a kernel — this is
    /// pure presence detection, same spirit as [`crate::devices::init_nvml_wrapper`]'s
    /// multi-path retry loop.
    pub fn is_available(self) -> bool {
        match self {
            BackendTag::Cpu => true,
            #[cfg(target_os = "macos")]
            BackendTag::Metal | BackendTag::CoreMl => crate::devices::metal::has_metal_device(),
            #[cfg(not(target_os = "macos"))]
            BackendTag::Metal | BackendTag::CoreMl => false,
            other => other
                .probe_candidates()
                .is_some_and(|names| crate::native_loader::probe_any(names)),
        }
    }

    /// Backends this host can plausibly run right now, `Cpu` always last as
    /// the universal fallback.
    pub fn detect_available() -> Vec<BackendTag> {
        let mut found: Vec<BackendTag> = Self::ALL
            .iter()
            .copied()
            .filter(|b| !matches!(b, BackendTag::Cpu) && b.is_available())
            .collect();
        found.push(BackendTag::Cpu);
        found
    }
}

impl std::fmt::Display for BackendTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendTag::Cpu => "cpu",
            BackendTag::Cuda12 => "cuda12",
            BackendTag::Cuda13 => "cuda13",
            BackendTag::Vulkan => "vulkan",
            BackendTag::Hip => "hip",
            BackendTag::Sycl => "sycl",
            BackendTag::Metal => "metal",
            BackendTag::DirectMl => "directml",
            BackendTag::CoreMl => "coreml",
        };
        write!(f, "{s}")
    }
}

/// Picks a single "best" backend for `gpu`: nvidia maps to the matching CUDA
/// generation, amd prefers ROCm/HIP on Linux and Vulkan elsewhere, intel only
/// gets accelerated for a recognisable discrete/integrated GPU name, apple
/// maps to Metal, and anything else falls back to Vulkan if DirectML-class
/// compute is present, CPU otherwise.
pub fn recommended_backend(gpu: &super::gpu::GpuDescriptor) -> BackendTag {
    use super::gpu::GpuVendor;

    match gpu.vendor {
        Some(GpuVendor::Nvidia) => {
            let driver_major = gpu.cuda_driver_version.map(|(major, _)| major).unwrap_or(12);
            if driver_major >= 13 {
                BackendTag::Cuda13
            } else {
                BackendTag::Cuda12
            }
        }
        Some(GpuVendor::Amd) => {
            if cfg!(target_os = "linux") {
                BackendTag::Hip
            } else {
                BackendTag::Vulkan
            }
        }
        Some(GpuVendor::Intel) => {
            let name = gpu.device_name.as_deref().unwrap_or("").to_uppercase();
            if ["IRIS", "ARC", "UHD", "XE"].iter().any(|kw| name.contains(kw)) {
                BackendTag::Vulkan
            } else {
                BackendTag::Cpu
            }
        }
        Some(GpuVendor::Apple) => BackendTag::Metal,
        Some(GpuVendor::Qualcomm) | Some(GpuVendor::Unknown) | None => {
            if gpu.directml_supported {
                BackendTag::Vulkan
            } else {
                BackendTag::Cpu
            }
        }
    }
}

/// Builds the ordered list of backends worth trying for `gpu`, narrowed to
/// `supported` (the product's declared backend set) and always terminated by
/// `cpu` — the one entry that may never be absent. The vendor-recommended
/// backend goes first; `directml_supported` contributes `vulkan` as a
/// second-tier fallback, and `coreml_supported` contributes `metal`.
pub fn fallback_chain(gpu: &super::gpu::GpuDescriptor, supported: &[BackendTag]) -> Vec<BackendTag> {
    let mut chain = Vec::new();

    let preferred = recommended_backend(gpu);
    if preferred != BackendTag::Cpu && supported.contains(&preferred) {
        chain.push(preferred);
    }
    if gpu.directml_supported && supported.contains(&BackendTag::Vulkan) && !chain.contains(&BackendTag::Vulkan) {
        chain.push(BackendTag::Vulkan);
    }
    if gpu.coreml_supported && supported.contains(&BackendTag::Metal) && !chain.contains(&BackendTag::Metal) {
        chain.push(BackendTag::Metal);
    }
    if !chain.contains(&BackendTag::Cpu) {
        chain.push(BackendTag::Cpu);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_always_available() {
        assert!(BackendTag::Cpu.is_available());
    }

    #[test]
    fn detect_available_always_includes_cpu_last() {
        let found = BackendTag::detect_available();
        assert_eq!(found.last().copied(), Some(BackendTag::Cpu));
    }

    #[test]
    fn display_strings_are_lowercase() {
        for tag in BackendTag::ALL {
            assert_eq!(tag.to_string(), tag.to_string().to_lowercase());
        }
    }

    fn nvidia_gpu(driver_major: u32, directml: bool) -> super::super::gpu::GpuDescriptor {
        super::super::gpu::GpuDescriptor {
            vendor: Some(super::super::gpu::GpuVendor::Nvidia),
            cuda_driver_version: Some((driver_major, 0)),
            directml_supported: directml,
            ..Default::default()
        }
    }

    /// Property 5: the chain returned for `Auto` always ends in `cpu`.
    #[test]
    fn fallback_chain_always_ends_in_cpu() {
        let gpu = nvidia_gpu(12, true);
        let chain = fallback_chain(&gpu, BackendTag::ALL);
        assert_eq!(chain.last().copied(), Some(BackendTag::Cpu));
    }

    /// Property 5: for an nvidia GPU with driver major >= 12 and cuda12 in
    /// the supported set, cuda12 appears strictly before directml-mapped
    /// entries (here: vulkan).
    #[test]
    fn cuda12_precedes_directml_mapped_entry() {
        let gpu = nvidia_gpu(12, true);
        let chain = fallback_chain(&gpu, BackendTag::ALL);
        let cuda_pos = chain.iter().position(|b| *b == BackendTag::Cuda12).unwrap();
        let vulkan_pos = chain.iter().position(|b| *b == BackendTag::Vulkan).unwrap();
        assert!(cuda_pos < vulkan_pos);
    }

    /// E5: nvidia + driver major 12 + directml-class support yields
    /// `[cuda12, vulkan, cpu]` when the product supports exactly those three.
    #[test]
    fn e5_provider_fallback_scenario() {
        let gpu = nvidia_gpu(12, true);
        let supported = [BackendTag::Cuda12, BackendTag::Vulkan, BackendTag::Cpu];
        let chain = fallback_chain(&gpu, &supported);
        assert_eq!(chain, vec![BackendTag::Cuda12, BackendTag::Vulkan, BackendTag::Cpu]);
    }

    #[test]
    fn driver_13_prefers_cuda13() {
        let gpu = nvidia_gpu(13, false);
        assert_eq!(recommended_backend(&gpu), BackendTag::Cuda13);
    }

    #[test]
    fn no_gpu_recommends_cpu() {
        let gpu = super::super::gpu::GpuDescriptor::default();
        assert_eq!(recommended_backend(&gpu), BackendTag::Cpu);
        assert_eq!(fallback_chain(&gpu, BackendTag::ALL), vec![BackendTag::Cpu]);
    }
}
