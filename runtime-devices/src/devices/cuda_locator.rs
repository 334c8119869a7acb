//! Component C — CUDA/cuDNN Locator.
//!
//! Locates usable CUDA toolkit (and, if present, cuDNN) installations.
//!
//! Grounded in two idioms already present in this workspace: the
//! env-var-then-well-known-path precedence `runtime-core`'s toolchain uses to
//! resolve its cache root (`LmcppRecipe::resolve_root`), and the
//! subprocess-with-captured-output pattern `cmake.rs` uses to probe `cmake
//! --version` / `nvcc --version`.
//!
//! This is detection only — it never installs or configures anything.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

/// Bound on how long `nvcc --version` is allowed to run before we give up on
/// it and fall back to `version.txt`. Mirrors the polite-wait idiom in
/// `server::process::guard`, which bounds subprocess waits the same way.
const NVCC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CudaInstall {
    pub root: PathBuf,
    pub nvcc_path: PathBuf,
    pub version: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct CuDnnInstall {
    pub root: PathBuf,
    /// `None` when the install only ships the older header-only `cudnn.h`
    /// with no `CUDNN_MAJOR`/`CUDNN_MINOR` macros to parse.
    pub version: Option<(u32, u32)>,
}

/// Kept for source compatibility with the single-install callers that only
/// need the newest toolkit and don't care about cuDNN's own version.
#[derive(Debug, Clone)]
pub struct CudaToolkit {
    pub root: PathBuf,
    pub nvcc_path: PathBuf,
    pub version: (u32, u32),
    pub cudnn_available: bool,
}

const ENV_CUDA_PATH: &[&str] = &["CUDA_PATH", "CUDAToolkit_ROOT", "CUDA_HOME", "CUDA_ROOT"];

#[cfg(target_os = "windows")]
const WELL_KNOWN_ROOTS: &[&str] = &["C:\\Program Files\\NVIDIA GPU Computing Toolkit\\CUDA"];
#[cfg(target_os = "macos")]
const WELL_KNOWN_ROOTS: &[&str] = &["/usr/local/cuda", "/opt/cuda", "/Developer/NVIDIA/CUDA-Toolkit"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const WELL_KNOWN_ROOTS: &[&str] = &["/usr/local/cuda", "/opt/cuda"];

/// Additional library-path environment variables consulted, over and above
/// `dll_search_paths`'s own well-known-root scan — a toolkit installed to a
/// nonstandard prefix is often still discoverable this way.
#[cfg(target_os = "windows")]
const ENV_LIB_PATH: &[&str] = &["PATH"];
#[cfg(target_os = "macos")]
const ENV_LIB_PATH: &[&str] = &["DYLD_LIBRARY_PATH", "DYLD_FALLBACK_LIBRARY_PATH"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const ENV_LIB_PATH: &[&str] = &["LD_LIBRARY_PATH"];

/// Finds the newest CUDA toolkit installation by checking, in order:
/// explicit env-var overrides, versioned `CUDA_PATH_V{M}_{N}` variables, then
/// well-known install roots (which, on Windows, are themselves a directory
/// of versioned subdirectories — every `vNN.N` child is a candidate).
pub fn locate() -> crate::Result<CudaToolkit> {
    let installs = discover_cuda_installs();
    let newest = installs
        .into_iter()
        .max_by_key(|i| i.version)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No CUDA toolkit found. Set CUDA_PATH/CUDAToolkit_ROOT or install to one of {:?}",
                WELL_KNOWN_ROOTS
            )
        })?;

    let cudnn_available = cudnn_header_present(&newest.root);
    Ok(CudaToolkit {
        root: newest.root,
        nvcc_path: newest.nvcc_path,
        version: newest.version,
        cudnn_available,
    })
}

/// Every CUDA toolkit install this host's environment and well-known paths
/// can account for, newest first.
pub fn discover_cuda_installs() -> Vec<CudaInstall> {
    let mut candidates: Vec<PathBuf> = ENV_CUDA_PATH
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .map(PathBuf::from)
        .collect();
    candidates.extend(versioned_env_roots());
    candidates.extend(well_known_subdirs());
    candidates.extend(WELL_KNOWN_ROOTS.iter().map(PathBuf::from));

    let mut installs: Vec<CudaInstall> = candidates
        .iter()
        .filter_map(|root| probe_cuda_root(root).ok())
        .collect();
    installs.sort_by(|a, b| b.version.cmp(&a.version));
    installs.dedup_by(|a, b| a.root == b.root);
    installs
}

/// Every cuDNN install discoverable alongside a CUDA toolkit, or via its own
/// well-known paths on Linux.
pub fn discover_cudnn_installs() -> Vec<CuDnnInstall> {
    let mut roots: Vec<PathBuf> = discover_cuda_installs().into_iter().map(|i| i.root).collect();
    #[cfg(not(target_os = "windows"))]
    {
        roots.push(PathBuf::from("/usr"));
    }
    roots
        .into_iter()
        .filter(|root| cudnn_header_present(root))
        .map(|root| {
            let version = cudnn_version(&root);
            CuDnnInstall { root, version }
        })
        .collect()
}

/// `true` if a CUDA toolkit whose major version matches `major` is present.
pub fn check_cuda(major: u32) -> bool {
    discover_cuda_installs().iter().any(|i| i.version.0 == major)
}

/// `true` if cuDNN is discoverable anywhere this host would look.
pub fn check_cudnn(major: u32) -> bool {
    let _ = major; // cuDNN presence is version-agnostic; see `CuDnnInstall::version`.
    !discover_cudnn_installs().is_empty()
}

/// Directories a native-library loader should search (in addition to the
/// system default) to resolve CUDA's runtime DLLs/shared objects for the
/// toolkit matching `major`, deduplicated.
pub fn dll_search_paths(major: u32) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for install in discover_cuda_installs() {
        if install.version.0 != major {
            continue;
        }
        #[cfg(target_os = "windows")]
        paths.push(install.root.join("bin"));
        #[cfg(not(target_os = "windows"))]
        {
            paths.push(install.root.join("lib64"));
            paths.push(install.root.join("lib"));
        }
    }
    for var in ENV_LIB_PATH {
        if let Some(value) = std::env::var_os(var) {
            paths.extend(std::env::split_paths(&value));
        }
    }
    paths.sort();
    paths.dedup();
    paths
}

/// `true` if a zlib side-car (`zlibwapi.dll` on Windows, or the shared
/// object on other platforms) is discoverable alongside a CUDA install or the
/// system's own library search path. Some llama.cpp CUDA builds dynamically
/// link zlib and fail to start without it, and it is not always bundled with
/// the toolkit itself.
pub fn check_zlib_sidecar() -> bool {
    let name = if cfg!(target_os = "windows") {
        "zlibwapi.dll"
    } else if cfg!(target_os = "macos") {
        "libz.dylib"
    } else {
        "libz.so"
    };
    discover_cuda_installs().iter().any(|i| {
        let bin = if cfg!(target_os = "windows") { "bin" } else { "lib64" };
        i.root.join(bin).join(name).is_file()
    }) || ENV_LIB_PATH
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .flat_map(|v| std::env::split_paths(&v).collect::<Vec<_>>())
        .any(|p| p.join(name).is_file())
}

/// Windows installers also set `CUDA_PATH_V{major}_{minor}` per toolkit
/// version (e.g. `CUDA_PATH_V12_4`); on other platforms this is a no-op.
fn versioned_env_roots() -> Vec<PathBuf> {
    std::env::vars_os()
        .filter_map(|(k, v)| {
            let k = k.to_str()?;
            k.strip_prefix("CUDA_PATH_V").map(|_| PathBuf::from(v))
        })
        .collect()
}

/// On platforms where the well-known root is a parent directory of
/// version-named children (`CUDA/v12.4`), expand it one level.
fn well_known_subdirs() -> Vec<PathBuf> {
    WELL_KNOWN_ROOTS
        .iter()
        .filter_map(|root| std::fs::read_dir(root).ok())
        .flatten()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect()
}

fn probe_cuda_root(root: &Path) -> crate::Result<CudaInstall> {
    let nvcc_name = if cfg!(target_os = "windows") {
        "nvcc.exe"
    } else {
        "nvcc"
    };
    let nvcc_path = root.join("bin").join(nvcc_name);
    if !nvcc_path.is_file() {
        crate::bail!("{} not found", nvcc_path.display());
    }

    let version = nvcc_version(&nvcc_path).or_else(|e| {
        version_txt_fallback(root).ok_or(e)
    })?;
    Ok(CudaInstall {
        root: root.to_path_buf(),
        nvcc_path,
        version,
    })
}

/// Runs `nvcc --version`, bounded to [`NVCC_TIMEOUT`] — a toolkit whose nvcc
/// binary hangs (seen behind some corporate antivirus shims) must not wedge
/// detection — and parses the `release X.Y` token from its output.
fn nvcc_version(nvcc_path: &Path) -> crate::Result<(u32, u32)> {
    let mut child = Command::new(nvcc_path)
        .arg("--version")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn {}: {e}", nvcc_path.display()))?;

    let status = child
        .wait_timeout(NVCC_TIMEOUT)
        .map_err(|e| anyhow::anyhow!("failed to wait on {}: {e}", nvcc_path.display()))?;
    let Some(status) = status else {
        let _ = child.kill();
        let _ = child.wait();
        crate::bail!("`{} --version` timed out after {:?}", nvcc_path.display(), NVCC_TIMEOUT);
    };
    if !status.success() {
        crate::bail!("`{} --version` exited non-zero", nvcc_path.display());
    }

    let mut stdout = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        use std::io::Read;
        let _ = out.read_to_end(&mut stdout);
    }
    let stdout = String::from_utf8_lossy(&stdout);
    parse_release(&stdout)
        .ok_or_else(|| anyhow::anyhow!("could not parse CUDA release from nvcc output"))
}

/// Falls back to the toolkit's own `version.txt` (older toolkits) or
/// `version.json` (CUDA 11.something onward) when `nvcc` can't be run at all
/// — e.g. a headless install missing the compiler driver but still usable
/// for linking against the runtime libraries.
fn version_txt_fallback(root: &Path) -> Option<(u32, u32)> {
    if let Ok(text) = std::fs::read_to_string(root.join("version.txt")) {
        // "CUDA Version 12.4.1"
        if let Some(idx) = text.find("Version ") {
            let rest = &text[idx + "Version ".len()..];
            let token = rest.split(|c: char| c.is_whitespace()).next()?;
            let mut parts = token.split('.');
            let major = parts.next()?.parse().ok()?;
            let minor = parts.next()?.parse().ok()?;
            return Some((major, minor));
        }
    }
    if let Ok(text) = std::fs::read_to_string(root.join("version.json")) {
        // {"cuda": {"version": "12.4.1"}, ...}
        let idx = text.find("\"cuda\"")?;
        let rest = &text[idx..];
        let idx = rest.find("\"version\"")?;
        let rest = &rest[idx + "\"version\"".len()..];
        let idx = rest.find('"')?;
        let rest = &rest[idx + 1..];
        let end = rest.find('"')?;
        let token = &rest[..end];
        let mut parts = token.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        return Some((major, minor));
    }
    None
}

fn parse_release(nvcc_output: &str) -> Option<(u32, u32)> {
    let idx = nvcc_output.find("release ")?;
    let rest = &nvcc_output[idx + "release ".len()..];
    let token = rest.split(|c: char| c == ',' || c.is_whitespace()).next()?;
    let mut parts = token.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// cuDNN ships as a header (`cudnn.h`) alongside the toolkit, or in a
/// platform-conventional include directory.
fn cudnn_header_present(root: &Path) -> bool {
    cudnn_header_path(root).is_some()
}

fn cudnn_header_path(root: &Path) -> Option<PathBuf> {
    for candidate in [
        root.join("include").join("cudnn_version.h"),
        root.join("include").join("cudnn.h"),
        PathBuf::from("/usr/include/cudnn_version.h"),
        PathBuf::from("/usr/include/cudnn.h"),
        PathBuf::from("/usr/include/x86_64-linux-gnu/cudnn.h"),
    ] {
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Parses `#define CUDNN_MAJOR`/`CUDNN_MINOR` out of `cudnn_version.h` when
/// present; older cuDNN releases only ship `cudnn.h` with no version macros,
/// in which case this returns `None` and presence alone stands in for it.
fn cudnn_version(root: &Path) -> Option<(u32, u32)> {
    let path = cudnn_header_path(root)?;
    let text = std::fs::read_to_string(path).ok()?;
    let major = find_define(&text, "CUDNN_MAJOR")?;
    let minor = find_define(&text, "CUDNN_MINOR")?;
    Some((major, minor))
}

fn find_define(text: &str, name: &str) -> Option<u32> {
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("#define") {
            let rest = rest.trim();
            if let Some(rest) = rest.strip_prefix(name) {
                return rest.trim().parse().ok();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_nvcc_release_line() {
        let sample = "Cuda compilation tools, release 12.4, V12.4.131";
        assert_eq!(parse_release(sample), Some((12, 4)));
    }

    #[test]
    fn parse_release_rejects_garbage() {
        assert_eq!(parse_release("no release token here"), None);
    }

    #[test]
    fn probe_root_fails_when_nvcc_missing() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(probe_cuda_root(tmp.path()).is_err());
    }

    #[test]
    fn check_cuda_false_without_install() {
        // No assertion on the result's truth value (host-dependent), only
        // that discovery never panics.
        let _ = check_cuda(12);
    }

    #[test]
    fn version_txt_fallback_parses_cuda_version_line() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("version.txt"), "CUDA Version 12.4.1\n").unwrap();
        assert_eq!(version_txt_fallback(tmp.path()), Some((12, 4)));
    }

    #[test]
    fn version_json_fallback_parses_nested_version() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("version.json"), r#"{"cuda": {"name": "CUDA SDK", "version": "12.4.1"}}"#).unwrap();
        assert_eq!(version_txt_fallback(tmp.path()), Some((12, 4)));
    }

    #[test]
    fn version_fallback_none_when_neither_file_present() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(version_txt_fallback(tmp.path()), None);
    }

    #[test]
    fn cudnn_version_parses_major_minor_defines() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("include")).unwrap();
        std::fs::write(
            tmp.path().join("include").join("cudnn_version.h"),
            "#define CUDNN_MAJOR 9\n#define CUDNN_MINOR 1\n#define CUDNN_PATCHLEVEL 0\n",
        )
        .unwrap();
        assert_eq!(cudnn_version(tmp.path()), Some((9, 1)));
    }

    #[test]
    fn cudnn_version_none_without_header() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(cudnn_version(tmp.path()), None);
    }
}
