//! Windows GPU enumeration via DXGI, for hosts where `nvml-wrapper` can't
//! speak to the device (no NVIDIA driver) but we still want to report *some*
//! adapter (integrated Intel/AMD, or an NVIDIA card without NVML installed).
//!
//! This mirrors the Job-Object pattern already used for process containment
//! on Windows (see `runtime-core`'s `server::process::guard`): a thin, fully
//! `unsafe`-contained wrapper around a `windows`-crate COM factory, used only
//! for presence/identity, never for rendering.

use windows::Win32::Graphics::Dxgi::{CreateDXGIFactory1, IDXGIFactory1};

use super::gpu::{GpuDescriptor, GpuVendor};

#[derive(Debug, Clone)]
pub struct DxgiAdapter {
    pub description: String,
    pub dedicated_vram_bytes: u64,
    pub vendor_id: u32,
}

/// Enumerates adapters DXGI knows about, in enumeration order (index 0 is
/// typically the adapter attached to the primary display).
pub fn enumerate_adapters() -> crate::Result<Vec<DxgiAdapter>> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .map_err(|e| anyhow::anyhow!("CreateDXGIFactory1 failed: {e}"))?;

    let mut adapters = Vec::new();
    let mut index = 0u32;
    loop {
        let adapter = match unsafe { factory.EnumAdapters1(index) } {
            Ok(adapter) => adapter,
            Err(_) => break,
        };
        let desc = unsafe { adapter.GetDesc1() }
            .map_err(|e| anyhow::anyhow!("IDXGIAdapter1::GetDesc1 failed: {e}"))?;

        let description = String::from_utf16_lossy(
            &desc.Description[..desc
                .Description
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(desc.Description.len())],
        );

        adapters.push(DxgiAdapter {
            description,
            dedicated_vram_bytes: desc.DedicatedVideoMemory as u64,
            vendor_id: desc.VendorId,
        });
        index += 1;
    }
    Ok(adapters)
}

/// PCI vendor ID `0x10DE` is NVIDIA's registered vendor ID.
pub const VENDOR_ID_NVIDIA: u32 = 0x10DE;
/// PCI vendor ID `0x1002` is AMD's registered vendor ID.
pub const VENDOR_ID_AMD: u32 = 0x1002;
/// PCI vendor ID `0x8086` is Intel's registered vendor ID.
pub const VENDOR_ID_INTEL: u32 = 0x8086;
/// PCI vendor ID `0x17CB` is Qualcomm's registered vendor ID.
pub const VENDOR_ID_QUALCOMM: u32 = 0x17CB;
/// Microsoft's own vendor ID — only ever seen on the software-rasterizer
/// "Microsoft Basic Render Driver" adapter DXGI always lists last.
const VENDOR_ID_MICROSOFT: u32 = 0x1414;

fn vendor_from_id(vendor_id: u32) -> GpuVendor {
    match vendor_id {
        VENDOR_ID_NVIDIA => GpuVendor::Nvidia,
        VENDOR_ID_AMD => GpuVendor::Amd,
        VENDOR_ID_INTEL => GpuVendor::Intel,
        VENDOR_ID_QUALCOMM => GpuVendor::Qualcomm,
        _ => GpuVendor::Unknown,
    }
}

/// Every physical DXGI adapter, translated to [`GpuDescriptor`]s. The
/// software-only "Microsoft Basic Render Driver" is skipped — it never backs
/// real acceleration. Returns an empty vec (never an error) if DXGI can't be
/// reached at all.
pub fn probe_dxgi() -> Vec<GpuDescriptor> {
    let adapters = match enumerate_adapters() {
        Ok(adapters) => adapters,
        Err(_) => return Vec::new(),
    };

    adapters
        .into_iter()
        .filter(|a| {
            a.vendor_id != VENDOR_ID_MICROSOFT && !a.description.contains("Basic Render")
        })
        .map(|a| GpuDescriptor {
            vendor: Some(vendor_from_id(a.vendor_id)),
            device_name: Some(a.description),
            total_memory_bytes: Some(a.dedicated_vram_bytes),
            cuda_compute_capability: None,
            cuda_driver_version: None,
            directml_supported: false,
            coreml_supported: false,
        })
        .collect()
}
