//! Hand-rolled replacement for the `confy`-based persistence the toolchain
//! used to rely on: a single `serde_json` file per `repo_tag × backend ×
//! mode` combination, written with the same atomic `tmp → rename` idiom
//! `recipe.rs::finalise` uses to publish `bin/`.
//!
//! `confy` derives its own path from `(project, version)` and hides the
//! serialization format behind a trait; here the caller owns the path
//! outright, which keeps this module a plain function pair instead of a
//! second abstraction layer.

use std::io::ErrorKind;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{LmcppError, LmcppResult};

/// Reads `path` and deserializes it as `T`; returns `T::default()` when the
/// file does not exist yet (first run for this recipe version).
pub fn load<T>(path: &Path) -> LmcppResult<T>
where
    T: DeserializeOwned + Default,
{
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(LmcppError::file_system("read toolchain state file", path, e)),
    };

    serde_json::from_slice(&bytes).map_err(|e| {
        LmcppError::file_system(
            "parse toolchain state file",
            path,
            std::io::Error::new(ErrorKind::InvalidData, e),
        )
    })
}

/// Serializes `value` and publishes it atomically: write to a sibling
/// `.tmp` file, then `rename` over the destination so a reader never
/// observes a partially-written state file.
pub fn store<T: Serialize>(path: &Path, value: &T) -> LmcppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| LmcppError::file_system("create toolchain state directory", parent, e))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| {
        LmcppError::file_system(
            "serialize toolchain state",
            path,
            std::io::Error::new(ErrorKind::InvalidData, e),
        )
    })?;

    std::fs::write(&tmp_path, &bytes)
        .map_err(|e| LmcppError::file_system("write toolchain state tmp file", &tmp_path, e))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| LmcppError::file_system("publish toolchain state file", path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
    struct Dummy {
        count: u8,
    }

    #[test]
    fn missing_file_yields_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        let loaded: Dummy = load(&path).unwrap();
        assert_eq!(loaded, Dummy::default());
    }

    #[test]
    fn round_trips_through_store_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("state.json");
        let value = Dummy { count: 7 };
        store(&path, &value).unwrap();
        let loaded: Dummy = load(&path).unwrap();
        assert_eq!(loaded, value);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
