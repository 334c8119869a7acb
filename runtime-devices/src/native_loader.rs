//! Component D — Native Library Loader.
//!
//! Generic dynamic-library presence probing, shared by every backend in
//! [`crate::devices::backend::BackendTag`] that doesn't have a vendor SDK
//! (`nvml-wrapper`, `objc2-metal`) doing the detection already, plus the
//! process-wide search-path bookkeeping a caller needs once it has actually
//! extracted a runtime archive (`runtime-core::server::toolchain`) and wants
//! dependent shared libraries (cuBLAS next to cuDNN, etc.) to resolve.
//!
//! Generalizes the retry-several-candidate-paths idiom from
//! [`crate::devices::init_nvml_wrapper`] to arbitrary shared libraries: try
//! each candidate name in order, in-process, and report the first one that
//! loads.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use libloading::Library;

/// Libraries we've already resolved by bare name, so repeated `is_available()`
/// checks (e.g. once per request in
/// [`crate::devices::backend::BackendTag::detect_available`]) don't keep
/// re-opening the same `.so`/`.dll`.
fn probe_cache() -> &'static Mutex<std::collections::HashMap<&'static str, bool>> {
    static CACHE: OnceLock<Mutex<std::collections::HashMap<&'static str, bool>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(std::collections::HashMap::new()))
}

/// Process-wide loader state: every registered directory's files indexed by
/// normalized name, and the handles opened through [`try_load`]. A single
/// lock around all three maps mirrors the toolchain-directory lock idiom
/// used elsewhere in this codebase (`server::toolchain::recipe`'s leaked
/// `'static Mutex`).
struct LoaderState {
    /// normalized name -> absolute path, in registration order (first
    /// registrant wins a name collision, matching `register_directory`'s
    /// primary-first convention).
    registered: std::collections::HashMap<String, PathBuf>,
    /// bare name (as passed to `try_load`) -> loaded handle.
    loaded: std::collections::HashMap<String, &'static Library>,
    #[cfg(target_os = "windows")]
    dll_cookies: Vec<windows::Win32::System::LibraryLoader::DLL_DIRECTORY_COOKIE>,
}

impl LoaderState {
    fn new() -> Self {
        Self {
            registered: std::collections::HashMap::new(),
            loaded: std::collections::HashMap::new(),
            #[cfg(target_os = "windows")]
            dll_cookies: Vec::new(),
        }
    }
}

fn state() -> &'static Mutex<LoaderState> {
    static STATE: OnceLock<Mutex<LoaderState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(LoaderState::new()))
}

/// Attempts to `dlopen`/`LoadLibrary` each candidate in turn, returning `true`
/// on the first success. The loaded handle is dropped immediately; we only
/// probe for presence. Used for vendor-neutral backend detection
/// ([`crate::devices::backend::BackendTag::is_available`]), not for the
/// registered-directory lookups [`try_load`] performs.
pub fn probe_any(candidates: &'static [&'static str]) -> bool {
    for name in candidates {
        if let Some(hit) = probe_cache().lock().unwrap().get(name) {
            if *hit {
                return true;
            }
            continue;
        }
        let loaded = unsafe { Library::new(name) }.is_ok();
        probe_cache().lock().unwrap().insert(name, loaded);
        if loaded {
            return true;
        }
    }
    false
}

/// Records every native file in `dir` under its normalized name so later
/// [`try_load`] calls can resolve `name` regardless of platform suffix
/// (`libfoo.so.1.23`, `foo64_9.dll`, `libfoo.1.23.dylib` all index to
/// `"foo"`/`"foo64_9"`). On Windows, also extends the process DLL search
/// path via [`add_to_windows_dll_search_path`] so transitive dependencies
/// resolve too. If `preload`, every file is opened immediately, `primary`
/// (matched by normalized name) first.
pub fn register_directory(dir: impl AsRef<Path>, preload: bool, primary: Option<&str>) {
    let dir = dir.as_ref();
    #[cfg(target_os = "windows")]
    add_to_windows_dll_search_path(dir);

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut files: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_file()).collect();
    files.sort();

    {
        let mut st = state().lock().unwrap();
        for path in &files {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if !is_native_library_filename(filename) {
                continue;
            }
            let norm = normalize_library_name(filename);
            st.registered.entry(norm).or_insert_with(|| path.clone());
        }
    }

    if preload {
        if let Some(primary) = primary {
            let _ = try_load(primary);
        }
        for path in &files {
            if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
                if is_native_library_filename(filename) {
                    let _ = try_load(&normalize_library_name(filename));
                }
            }
        }
    }
}

fn is_native_library_filename(name: &str) -> bool {
    name.ends_with(".dll") || name.contains(".so") || name.contains(".dylib")
}

/// Extends the process-wide DLL search path with `dir`, using
/// `AddDllDirectory` so libraries the target depends on (e.g. cuBLAS next to
/// cuDNN) resolve without callers setting `PATH` themselves.
///
/// `SetDefaultDllDirectories` is intentionally **not** used here — it evicts
/// `PATH` from the search order entirely, which breaks cuDNN side-car
/// discovery when the side-car lives somewhere only `PATH` knows about.
/// Callers should also prepend `dir` to the process `PATH` themselves for
/// broad compatibility. No-op, and always succeeds, on non-Windows targets.
#[cfg(target_os = "windows")]
pub fn add_to_windows_dll_search_path(dir: impl AsRef<Path>) {
    use std::os::windows::ffi::OsStrExt;
    use windows::core::PCWSTR;
    use windows::Win32::System::LibraryLoader::AddDllDirectory;

    let wide: Vec<u16> = dir.as_ref().as_os_str().encode_wide().chain(std::iter::once(0)).collect();
    unsafe {
        if let Ok(cookie) = AddDllDirectory(PCWSTR(wide.as_ptr())) {
            state().lock().unwrap().dll_cookies.push(cookie);
        }
    }
}
#[cfg(not(target_os = "windows"))]
pub fn add_to_windows_dll_search_path(_dir: impl AsRef<Path>) {}

/// Removes every DLL-directory cookie registered so far and forgets all
/// registered directories and loaded handles. A no-op on non-Windows targets
/// beyond clearing the in-memory bookkeeping. Intended for test teardown and
/// process-shutdown cleanup — there is no refcounting, so calling this while
/// another component still expects a registered path to resolve is a caller
/// bug.
pub fn dispose() {
    #[cfg(target_os = "windows")]
    {
        use windows::Win32::System::LibraryLoader::RemoveDllDirectory;
        let mut st = state().lock().unwrap();
        for cookie in st.dll_cookies.drain(..) {
            unsafe {
                let _ = RemoveDllDirectory(cookie);
            }
        }
        st.registered.clear();
        st.loaded.clear();
        return;
    }
    #[cfg(not(target_os = "windows"))]
    {
        let mut st = state().lock().unwrap();
        st.registered.clear();
        st.loaded.clear();
    }
}

/// Normalizes a shared-library filename to its bare, platform-independent
/// name: `libfoo.so` / `libfoo.so.1.23` -> `foo`, `libfoo.1.23.dylib` ->
/// `foo`, `foo64_9.dll` -> `foo64_9`.
pub fn normalize_library_name(filename: &str) -> String {
    let mut name = filename;
    if let Some(stripped) = name.strip_prefix("lib") {
        name = stripped;
    }
    for ext in [".dll", ".dylib", ".so"] {
        if let Some(idx) = name.find(ext) {
            return name[..idx].to_string();
        }
    }
    name.to_string()
}

/// Platform-variant spellings tried against both the registered-directory
/// index and the system loader, in order, for a bare normalized `name`.
fn platform_variants(name: &str) -> Vec<String> {
    vec![
        name.to_string(),
        format!("lib{name}"),
        format!("{name}.dll"),
        format!("lib{name}.so"),
        format!("lib{name}.so.1"),
        format!("lib{name}.dylib"),
    ]
}

/// Loads `name` (normalized, e.g. `"cudnn"` rather than `"libcudnn.so.9"`),
/// preferring a path registered via [`register_directory`] over the system
/// default search order, and keeping the handle alive for the remainder of
/// the process so callers can dereference symbols out of it. Returns `true`
/// once a handle is resolved and cached; repeated calls with the same name
/// are idempotent.
pub fn try_load(name: &str) -> bool {
    let norm = normalize_library_name(name);
    {
        let st = state().lock().unwrap();
        if st.loaded.contains_key(&norm) {
            return true;
        }
    }

    if let Some(path) = state().lock().unwrap().registered.get(&norm).cloned() {
        if let Ok(lib) = unsafe { Library::new(&path) } {
            let leaked: &'static Library = Box::leak(Box::new(lib));
            state().lock().unwrap().loaded.insert(norm, leaked);
            return true;
        }
    }

    for variant in platform_variants(&norm) {
        if let Ok(lib) = unsafe { Library::new(&variant) } {
            let leaked: &'static Library = Box::leak(Box::new(lib));
            state().lock().unwrap().loaded.insert(norm, leaked);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_library_is_not_available() {
        assert!(!probe_any(&["definitely_not_a_real_library.so.999"]));
    }

    #[test]
    fn normalize_strips_posix_lib_prefix_and_versioned_suffix() {
        assert_eq!(normalize_library_name("libfoo.so.1.23"), "foo");
        assert_eq!(normalize_library_name("libfoo.so"), "foo");
    }

    #[test]
    fn normalize_strips_macos_dylib_and_version_infix() {
        assert_eq!(normalize_library_name("libfoo.1.23.dylib"), "foo");
    }

    #[test]
    fn normalize_strips_windows_suffix() {
        assert_eq!(normalize_library_name("foo64_9.dll"), "foo64_9");
    }

    #[test]
    fn try_load_unknown_library_fails_without_panicking() {
        assert!(!try_load("definitely_not_a_real_library_xyz"));
    }

    #[test]
    fn register_directory_indexes_files_by_normalized_name() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("libfoo.so.1.2.3"), b"not a real library").unwrap();
        register_directory(tmp.path(), false, None);
        let st = state().lock().unwrap();
        assert!(st.registered.contains_key("foo"));
    }

    #[test]
    fn register_directory_on_missing_path_does_not_panic() {
        register_directory("/path/does/not/exist/at/all", false, None);
    }
}
