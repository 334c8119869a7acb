use std::{
    path::Path,
    process::{Command, Stdio},
};

use crate::error::{LmcppError, LmcppResult};

pub fn cmake_is_available() -> LmcppResult<()> {
    //   Locate the executable
    let out = std::process::Command::new("cmake")
        .arg("--version")
        .output()
        .map_err(|e| LmcppError::FileSystem {
            operation: "`cmake --version`",
            path: std::path::PathBuf::from("cmake"),
            source: e,
        })?;

    if !out.status.success() {
        return Err(LmcppError::BuildFailed(
            "`cmake --version` returned non-zero status".into(),
        ));
    }
    // Parse the version string (first line looks like `cmake version 3.25.4`)
    let stdout_content = String::from_utf8_lossy(&out.stdout);
    let version_line = stdout_content.lines().next().unwrap_or_default();
    let ver = version_line.split_whitespace().nth(2).unwrap_or("0.0.0");
    let mut parts = ver.split('.');
    let major = parts.next().unwrap_or("0").parse::<u32>().unwrap_or(0);
    let minor = parts.next().unwrap_or("0").parse::<u32>().unwrap_or(0);

    crate::trace!("CMake detected: {}", version_line);

    // Enforce the minimum required feature level (≥ 3.15)
    const MIN_MAJOR: u32 = 3;
    const MIN_MINOR: u32 = 15;
    if (major, minor) < (MIN_MAJOR, MIN_MINOR) {
        Err(LmcppError::InvalidConfig {
            field: "CMake",
            reason: "requires ≥ 3.15".into(),
        })
    } else {
        Ok(())
    }
}

/// Verifies that a usable `curl` binary is on the `PATH`.
/// Returns `Ok(())` on success or a descriptive error otherwise.
pub fn curl_is_available() -> LmcppResult<()> {
    let out = std::process::Command::new("curl")
        .arg("--version")
        .output()
        .map_err(|e| LmcppError::FileSystem {
            operation: "spawn curl --version",
            path: std::path::PathBuf::from("curl"),
            source: e,
        })?;

    if out.status.success() {
        Ok(())
    } else {
        Err(LmcppError::BuildFailed("`curl --version` returned non-zero status".into()).into())
    }
}

pub fn cmake_project_buildsystem(working_dir: &Path, build_args: &[&str]) -> LmcppResult<()> {
    assert!(
        working_dir.is_dir(),
        "cmake_project_buildsystem: {} is not a directory",
        working_dir.display()
    );
    let mut unique_build_args: Vec<&str> = build_args.to_vec();
    unique_build_args.sort();
    unique_build_args.dedup();
    assert_eq!(
        unique_build_args.len(),
        build_args.len(),
        "build_args contains duplicate entries"
    );

    let mut cmd = Command::new("cmake");
    cmd.arg("-B").arg("build");
    if !build_args.is_empty() {
        cmd.args(build_args);
    }

    cmd.current_dir(working_dir);
    crate::trace!("Running cmake command: {:?}", cmd);
    let out = cmd.output().map_err(|e| LmcppError::FileSystem {
        operation: "spawn cmake -B build",
        path: working_dir.to_path_buf(),
        source: e,
    })?;
    if out.status.success() {
        Ok(())
    } else {
        Err(LmcppError::BuildFailed(format!(
            "CMake failed:\nCommand: {:?}\nExit code {:?}\nstderr: {}",
            cmd,
            out.status.code(),
            String::from_utf8_lossy(&out.stderr),
        )))
    }
}

pub fn cmake_build_project(working_dir: &Path) -> LmcppResult<()> {
    assert!(
        working_dir.is_dir(),
        "cmake_build_project: {} is not a directory",
        working_dir.display()
    );

    let num_jobs = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let mut cmd = Command::new("cmake");
    cmd.arg("--build")
        .arg("build")
        .arg("--config")
        .arg("Release")
        .arg("-j")
        .arg(num_jobs.to_string())
        .arg("-t")
        .arg("llama-server")
        .current_dir(working_dir)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    crate::trace!("Running cmake command: {:?}", cmd);

    // 3. Run it once and stream output live
    let status = cmd.status().map_err(|e| LmcppError::FileSystem {
        operation: "spawn cmake --build",
        path: working_dir.to_path_buf(),
        source: e,
    })?;

    if !status.success() {
        if let Some(code) = status.code() {
            return Err(LmcppError::BuildFailed(format!(
                "cmake --build failed (exit code {code}). \
                   Scroll up for the first compiler/linker error."
            )));
        } else {
            return Err(LmcppError::BuildFailed(format!(
                "cmake --build was terminated by a signal"
            )));
        }
    }

    crate::trace!("cmake completed successfully");
    Ok(())
}
