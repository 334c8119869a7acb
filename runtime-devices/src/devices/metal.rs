use objc2::rc::Retained;
use objc2_metal::{MTLCopyAllDevices, MTLDevice};

use super::gpu::{GpuDescriptor, GpuVendor};

/// Coarse classification of the Apple GPU, derived from the host
/// architecture rather than a Metal query — Apple doesn't expose an "is this
/// Apple Silicon" bit, but `aarch64` macOS hosts are Apple Silicon
/// unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppleGpuKind {
    AppleSilicon,
    Generic,
}

impl AppleGpuKind {
    pub fn detect() -> Self {
        match std::env::consts::ARCH {
            "aarch64" => AppleGpuKind::AppleSilicon,
            _ => AppleGpuKind::Generic,
        }
    }
}

impl std::fmt::Display for AppleGpuKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppleGpuKind::AppleSilicon => write!(f, "Apple Silicon"),
            AppleGpuKind::Generic => write!(f, "Apple GPU"),
        }
    }
}

/// Whether *any* Metal device is visible on this host. Used by
/// [`crate::devices::backend::BackendTag::is_available`] for presence-only
/// checks that don't need a full probe.
pub fn has_metal_device() -> bool {
    unsafe { Retained::from_raw(MTLCopyAllDevices().as_ptr()) }
        .is_some_and(|devices| !devices.is_empty())
}

/// The host's first Metal device, translated to a [`GpuDescriptor`]. Always
/// returns a descriptor — `vendor` is `None` if no Metal device is present,
/// matching the "degrade rather than abort" rule every vendor probe follows.
pub fn probe_apple() -> GpuDescriptor {
    let devices = unsafe { Retained::from_raw(MTLCopyAllDevices().as_ptr()) };
    let Some(device) = devices.as_ref().and_then(|d| d.first()) else {
        return GpuDescriptor::default();
    };

    GpuDescriptor {
        vendor: Some(GpuVendor::Apple),
        device_name: Some(device.name().to_string()),
        total_memory_bytes: Some(device.recommendedMaxWorkingSetSize()),
        cuda_compute_capability: None,
        cuda_driver_version: None,
        directml_supported: false,
        coreml_supported: false,
    }
}
