//! Component E — Asset Resolver.
//!
//! Maps `(product, backend, os, arch, version)` to the matching release
//! archive URL, generalising the hardcoded per-OS `format!` strings
//! [`super::recipe::LmcppRecipe::install_prebuilt`] already uses for the
//! llama.cpp binary into a reusable naming scheme that the Update Service can
//! query for arbitrary backends, not just whatever `ComputeBackendConfig` the
//! caller happened to build with.

use runtime_devices::devices::backend::BackendTag;

use crate::error::{LmcppError, LmcppResult};

/// A single resolved remote file: what version it is, and where to get it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub url: String,
    pub version: String,
    pub os: &'static str,
    pub arch: &'static str,
    pub backend: BackendTag,
}

/// Parameterises [`AssetResolver`] with the bits that differ per product:
/// which GitHub `owner/repo` its releases live under, and which backends it
/// even declares support for (an unsupported `(product, backend)` pair is
/// rejected before a network call is ever made).
#[derive(Debug, Clone)]
pub struct AssetResolver {
    pub product: String,
    pub github_repo: String,
    pub supported_backends: Vec<BackendTag>,
}

impl AssetResolver {
    pub fn new(product: impl Into<String>, github_repo: impl Into<String>, supported_backends: Vec<BackendTag>) -> Self {
        Self {
            product: product.into(),
            github_repo: github_repo.into(),
            supported_backends,
        }
    }

    /// Default resolver for the inference-server product, mirroring the
    /// backend set `LmcppToolChain::ComputeBackendConfig` exposes today plus
    /// the broader set the runtime-devices fallback chain can recommend.
    pub fn llama_cpp() -> Self {
        Self::new(
            "llama_cpp",
            "ggml-org/llama.cpp",
            vec![BackendTag::Cpu, BackendTag::Cuda12, BackendTag::Cuda13, BackendTag::Metal, BackendTag::Vulkan],
        )
    }

    /// Resolves `(backend, version)` on the current host's OS/arch to a
    /// downloadable [`Artifact`], or `AssetNotAvailable` if this product
    /// never ships that backend, or doesn't ship it for this OS/arch
    /// combination.
    pub fn resolve(&self, backend: BackendTag, version: &str) -> LmcppResult<Artifact> {
        if !self.supported_backends.contains(&backend) {
            return Err(LmcppError::AssetNotAvailable {
                product: self.product.clone(),
                rid: format!("{backend}-{}", runtime_identifier()),
            });
        }

        let (os_tag, arch_tag) = os_arch_tags(backend)?;
        let name = archive_name(version, os_tag, backend, arch_tag);
        let url = format!("https://github.com/{}/releases/download/{}/{}", self.github_repo, version, name);

        Ok(Artifact {
            name,
            url,
            version: version.to_string(),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            backend,
        })
    }
}

fn runtime_identifier() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Archive-name-facing OS/arch tags and the arm64-only rule for Apple
/// Silicon: Metal only ships an `arm64` artifact, never an `x64` one.
fn os_arch_tags(backend: BackendTag) -> LmcppResult<(&'static str, &'static str)> {
    let os = if cfg!(target_os = "linux") {
        "ubuntu"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "win"
    } else {
        return Err(LmcppError::BackendUnavailable {
            what: "asset resolver",
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            reason: "unsupported operating system".into(),
        });
    };

    let arch = std::env::consts::ARCH;
    let arch_tag = match arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => {
            return Err(LmcppError::BackendUnavailable {
                what: "asset resolver",
                os: std::env::consts::OS,
                arch: std::env::consts::ARCH,
                reason: format!("unsupported architecture: {other}"),
            });
        }
    };

    if backend == BackendTag::Metal && arch_tag != "arm64" {
        return Err(LmcppError::AssetNotAvailable {
            product: "llama_cpp".into(),
            rid: format!("metal-{os}-{arch_tag}"),
        });
    }

    Ok((os, arch_tag))
}

/// `llama-<version>-bin-<os>[-<backend>]-<arch>.(zip|tar.gz)`, with the two
/// documented special cases: CPU on Linux omits the backend tag entirely
/// (the plain `ubuntu-x64` archive is CPU-only), and Metal on macOS omits the
/// backend tag too (Metal is baked into every macOS build).
fn archive_name(version: &str, os: &'static str, backend: BackendTag, arch: &'static str) -> String {
    // Every OS/backend combination this product ships is packaged as a zip;
    // there is no tar.gz variant to pick between.
    let ext = "zip";
    let omit_backend_tag = (backend == BackendTag::Cpu && os == "ubuntu") || (backend == BackendTag::Metal && os == "macos");

    if omit_backend_tag {
        format!("llama-{version}-bin-{os}-{arch}.{ext}")
    } else {
        format!("llama-{version}-bin-{os}-{backend}-{arch}.{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_backend_is_rejected_before_any_network_call() {
        let resolver = AssetResolver::new("llama_cpp", "ggml-org/llama.cpp", vec![BackendTag::Cpu]);
        let err = resolver.resolve(BackendTag::Cuda12, "b6097").unwrap_err();
        assert!(matches!(err, LmcppError::AssetNotAvailable { .. }));
    }

    #[test]
    fn linux_cpu_archive_name_omits_backend_tag() {
        let name = archive_name("b6097", "ubuntu", BackendTag::Cpu, "x64");
        assert_eq!(name, "llama-b6097-bin-ubuntu-x64.zip");
    }

    #[test]
    fn macos_metal_archive_name_omits_backend_tag() {
        let name = archive_name("b6097", "macos", BackendTag::Metal, "arm64");
        assert_eq!(name, "llama-b6097-bin-macos-arm64.zip");
    }

    #[test]
    fn other_backends_include_the_backend_tag() {
        let name = archive_name("b6097", "win", BackendTag::Cuda12, "x64");
        assert_eq!(name, "llama-b6097-bin-win-cuda12-x64.zip");
    }

    #[test]
    fn resolve_builds_a_well_formed_github_release_url() {
        let resolver = AssetResolver::llama_cpp();
        let artifact = resolver.resolve(BackendTag::Cpu, "b6097");
        if cfg!(target_os = "linux") && std::env::consts::ARCH == "x86_64" {
            let artifact = artifact.unwrap();
            assert_eq!(
                artifact.url,
                "https://github.com/ggml-org/llama.cpp/releases/download/b6097/llama-b6097-bin-ubuntu-x64.zip"
            );
        }
    }
}
