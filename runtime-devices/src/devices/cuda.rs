//! NVML-backed half of Component B's GPU probe, for Linux and Windows hosts
//! with an NVIDIA driver installed.

use super::gpu::{GpuDescriptor, GpuVendor};
use nvml_wrapper::Nvml;

/// Every NVIDIA device NVML can see, translated to [`GpuDescriptor`]s.
/// Returns an empty vec (never an error) if NVML can't be loaded or reports
/// no devices — absence of an NVIDIA GPU is not a probe failure.
pub fn probe_nvml() -> Vec<GpuDescriptor> {
    let nvml = match init_nvml_wrapper() {
        Ok(nvml) => nvml,
        Err(_) => return Vec::new(),
    };

    let device_count = match nvml.device_count() {
        Ok(count) => count,
        Err(_) => return Vec::new(),
    };

    let mut found = Vec::new();
    for ordinal in 0..device_count {
        let Ok(device) = nvml.device_by_index(ordinal) else {
            continue;
        };
        let Ok(memory_info) = device.memory_info() else {
            continue;
        };
        if memory_info.total == 0 {
            continue;
        }

        let device_name = device.name().ok();
        let cuda_compute_capability = device
            .cuda_compute_capability()
            .ok()
            .map(|cc| (cc.major as u32, cc.minor as u32));
        let cuda_driver_version = nvml
            .sys_cuda_driver_version()
            .ok()
            .map(|v| ((v / 1000) as u32, ((v % 1000) / 10) as u32));

        found.push(GpuDescriptor {
            vendor: Some(GpuVendor::Nvidia),
            device_name,
            total_memory_bytes: Some(memory_info.total),
            cuda_compute_capability,
            cuda_driver_version,
            directml_supported: false,
            coreml_supported: false,
        });
    }

    found
}

/// Loads NVML from whichever of its well-known library names is present:
/// native Linux, WSL2 (which ships only the versioned `.so.1`), or Windows.
///
/// # Errors
///
/// Returns an error if NVML couldn't be initialized from any candidate path.
pub fn init_nvml_wrapper() -> crate::Result<Nvml> {
    let library_names = ["libnvidia-ml.so", "libnvidia-ml.so.1", "nvml.dll"];
    for library_name in library_names {
        if let Ok(nvml) = Nvml::builder().lib_path(library_name.as_ref()).init() {
            return Ok(nvml);
        }
    }
    crate::bail!("Failed to initialize nvml_wrapper::Nvml")
}
