//! Hardware and platform probes (Components A–D): platform identity, GPU
//! inventory, backend availability, and CUDA/cuDNN toolkit discovery.

pub mod backend;
pub mod cuda_locator;
pub mod gpu;
pub mod platform;

// Platform-specific modules
#[cfg(any(target_os = "linux", target_os = "windows"))]
mod cuda;
#[cfg(target_os = "windows")]
pub mod dxgi;
#[cfg(target_os = "macos")]
pub mod metal;

pub use backend::BackendTag;
pub use gpu::{detect_gpus, detect_primary, GpuDescriptor, GpuVendor};
pub use platform::{platform, Arch, Os, Platform};

#[cfg(any(target_os = "linux", target_os = "windows"))]
pub use cuda::init_nvml_wrapper;
#[cfg(target_os = "macos")]
pub use metal::{has_metal_device, AppleGpuKind};
