//! Server Process - Kill
//! =====================
//!
//! Cross-platform helpers for terminating *server instances* started by this
//! crate.  The public surface consists of two primary entry points:
//!
//! * [`kill_by_hostname`] – shut down **exactly one** instance that was launched
//!   with `--host <hostname>` (or `-h <hostname>`).
//! * [`kill_all_servers`] – blanket kill for **all** running copies of the same
//!   executable.
//!
//! Internally the module follows a three-step escalation ladder:
//!
//! 1. **PID-file fast path** – If the server created a PID-file we trust it and
//!    attempt a *polite* signal (`SIGTERM`, `CTRL_BREAK`, or the platform
//!    equivalent) against the recorded PID.  
//! 2. **Command-line scan fallback** – When the PID-file is missing or stale we
//!    search the process list for an argument pair matching `--host <hostname>`
//!    or `-h <hostname>` (same logic used by the launcher).  
//! 3. **Force-kill escalation** – If the target is still alive after the
//!    configurable *grace period* (`POLITE_WAIT`) we deliver an unconditional
//!    kill (`SIGKILL` / `TerminateProcess`).  
//!
//! The helper returns **as soon as every targeted PID is gone** or the
//! force-kill timeout elapses, whichever happens first.  Any stubborn PIDs are
//! propagated back in a [`ProcessError::TerminationTimeout`] so that higher
//! layers can decide whether to retry, log, or treat it as fatal.
//!
//! ## Error semantics
//!
//! *All* public functions return [`crate::server::process::error::Result`].  The
//! errors are designed to be actionable; for instance, [`ProcessError::PermissionDenied`]
//! will not be silently swallowed.
//!
//! ## Constants
//!
//! Timing knobs such as `POLITE_WAIT`, `POLL_INTERVAL_MS`, and
//! `FORCE_KILL_TIMEOUT_SECS` live in the *parent* module so that they are shared
//! across all process-control utilities.  They are referenced here but not
//! re-exported.
//!
//! ## Thread safety
//!
//! The functions perform blocking I/O (`std::fs`, `nix`, Win32 API) and sleep
//! loops.  They are therefore *synchronous* and expected to run on a dedicated
//! management thread or as part of a CLI command—not in an async runtime.

use core::str;
use std::{
    path::Path,
    time::{Duration, Instant},
};

use super::{error::*, pid::*, *};

pub fn kill_by_client(pidfile_path: &Path, host: &str) -> Result<()> {
    // ── 1 ▪ PID-file fast path ────────────────────────────────────────────
    let pid: Option<u32> = std::fs::read_to_string(pidfile_path)
        .ok()
        .and_then(|s| s.trim().parse().ok());
    if let Some(pid) = pid {
        match pid_alive(pid) {
            // a) recognised & alive ⇒ killfs
            Ok(true) => {
                crate::info!("Killing server at {host} (PID {pid}) via pid-file");
                let res = kill_pids(&[pid], POLITE_WAIT);

                if res.is_ok() {
                    if let Err(e) = std::fs::remove_file(pidfile_path) {
                        crate::warn!("Failed to remove pid-file for host {host}: {e}");
                    }
                }
                return res;
            }
            // b) recognised & dead ⇒ stale file → delete & fall through
            Ok(false) => match std::fs::remove_file(pidfile_path) {
                Ok(_) => (),
                Err(e) => crate::warn!("Failed to remove stale pid-file for host {host}: {e}"),
            },
            // c) could not check (permissions, EACCES, etc.) ⇒ warn & fall back
            Err(e) => {
                crate::warn!("pid_alive({pid}) failed: {e}. Falling back to argv scan…");
            }
        }
    } else {
        if let Err(e) = std::fs::remove_file(pidfile_path) {
            crate::warn!("Failed to remove malformed pid-file for host {host}: {e}");
        }
    };

    // ── 2 ▪ Fallback: argv scan for --host / -h ───────────────────────────
    let patterns: &[&[&str]] = &[&["--host", host], &["-h", host]];
    if let Some(pid) = get_server_pid_by_cmd_args(patterns) {
        crate::info!("Killing server at {host} (PID {pid}) via argv scan");
        match kill_pids(&[pid], POLITE_WAIT) {
            Ok(()) => {
                match std::fs::remove_file(pidfile_path) {
                    Ok(_) => (),
                    Err(e) => {
                        crate::warn!("Failed to remove stale pid-file for host {host}: {e}")
                    }
                }
                return Ok(());
            }
            Err(e) => {
                crate::warn!("Failed to kill server at {host} (PID {pid}): {e}");
            }
        }
    }

    // ── 3 ▪ Nothing matched ───────────────────────────────────────────────
    Err(ProcessError::NoSuchProcess {
        query: format!("host={host}"),
    })
}

pub fn kill_all_servers(executable_name: &str) -> Result<()> {
    crate::info!("Killing all {executable_name} processes");

    // ── 1 ▪ kill-by-path / name (old behaviour) ────────────────
    let pids = get_all_server_pids(executable_name);
    let mut errors = Vec::new();

    if !pids.is_empty() {
        if let Err(e) = kill_pids(&pids, POLITE_WAIT) {
            errors.push(e);
        }
    }

    // ── 2 ▪ sweep pid-files we just invalidated ────────────────
    for pid in pids {
        // If the process is gone (or we just killed it), delete the file.
        match pid_alive(pid) {
            Ok(false) => crate::info!("PID {pid} shut down"),
            Ok(true) => crate::warn!("PID {pid} still alive, but we tried to kill it"),
            Err(e) => crate::warn!("Could not probe PID {pid}: {e}"),
        }
    }

    // ── 3 ▪ summarise result ───────────────────────────────────
    if errors.is_empty() {
        Ok(())
    } else {
        // bubble up the first error but log the rest
        for e in &errors[1..] {
            crate::warn!("Additional error while killing servers: {e}");
        }
        Err(errors.remove(0))
    }
}

fn kill_pids(pids: &[u32], polite_wait: Duration) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(pids.len());
    let uniq: Vec<u32> = pids.iter().copied().filter(|p| seen.insert(*p)).collect();
    if uniq.is_empty() {
        return Ok(());
    }
    let start = Instant::now();
    // phase 1 ▪ TERM / taskkill /T
    for pid in &uniq {
        match pid_alive(*pid) {
            Ok(true) => match kill_pid(*pid) {
                Ok(()) => crate::info!("Sent TERM to PID {}", pid),
                Err(e) => crate::error!("Failed to send TERM to PID {}: {}", pid, e),
            },
            Ok(false) => (),
            Err(e) => crate::error!("Failed to check PID {}: {}", pid, e),
        }
    }

    // phase 2 ▪ wait a little, bailing early if all gone
    let polite_deadline = Instant::now() + polite_wait;
    let mut probe_failures: Vec<(u32, ProcessError)> = Vec::new();

    while Instant::now() < polite_deadline {
        let all_dead = pids.iter().all(|&pid| match pid_alive(pid) {
            Ok(alive) => !alive,
            Err(e) => {
                // record only once; keep treating PID as "alive"
                if !probe_failures.iter().any(|(p, _)| *p == pid) {
                    probe_failures.push((pid, e));
                }
                false
            }
        });

        if all_dead {
            break;
        }
        std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }

    // phase 3 ▪ KILL / taskkill /F
    for &pid in pids {
        if let Err(e) = force_kill_pid(pid) {
            crate::error!("Failed to force-kill PID {pid}: {e}");
        }
    }

    if !probe_failures.is_empty() {
        for (pid, err) in &probe_failures {
            crate::warn!("Never obtained status for PID {pid}: {err}");
        }
    }
    let force_kill_deadline = Instant::now() + Duration::from_secs(FORCE_KILL_TIMEOUT_SECS);
    while Instant::now() < force_kill_deadline {
        if pids
            .iter()
            .all(|&pid| matches!(pid_alive(pid), Ok(false) | Err(_)))
        {
            break;
        }
        std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }

    #[cfg(target_os = "macos")]
    for &pid in &uniq {
        use nix::sys::wait::{waitpid, WaitPidFlag};
        let _ = nix::unistd::Pid::from_raw(pid as i32);
        // Try to reap our own children; ignore errors & non‑children.
        let _ = waitpid(
            nix::unistd::Pid::from_raw(pid as i32),
            Some(WaitPidFlag::WNOHANG),
        );
    }

    // return any stubborn PIDs so callers can escalate or log
    let leftovers: Vec<u32> = pids
        .iter()
        .copied()
        .filter(|&pid| match pid_alive(pid) {
            Ok(alive) => alive,
            Err(_) => true, // treat unknowns as alive
        })
        .collect();

    let elapsed = start.elapsed();
    if leftovers.is_empty() {
        Ok(())
    } else {
        Err(ProcessError::TerminationTimeout {
            operation: "kill_pids",
            elapsed,
            leftovers,
        })
    }
}

#[cfg(unix)]
pub fn kill_pid(pid: u32) -> Result<()> {
    use nix::{
        errno::Errno,
        sys::signal::{kill, Signal},
        unistd::Pid,
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(_) | Err(Errno::ESRCH) => Ok(()), // gone already → success

        Err(Errno::EPERM) => Err(ProcessError::PermissionDenied {
            action: "send SIGTERM",
            source: "operation not permitted".into(),
        }),

        Err(e) => Err(ProcessError::CommandFailed {
            action: "send SIGTERM",
            source: e.into(),
        }),
    }
}

#[cfg(unix)]
fn force_kill_pid(pid: u32) -> Result<()> {
    use nix::{
        errno::Errno,
        sys::signal::{kill, Signal},
        unistd::Pid,
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(_) | Err(Errno::ESRCH) => Ok(()),

        Err(Errno::EPERM) => Err(ProcessError::PermissionDenied {
            action: "send SIGKILL",
            source: "operation not permitted".into(),
        }),

        Err(e) => Err(ProcessError::CommandFailed {
            action: "send SIGKILL",
            source: e.into(),
        }),
    }
}

#[cfg(windows)]
pub fn kill_pid(pid: u32) -> Result<()> {
    use windows::Win32::{
        Foundation::CloseHandle,
        System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE},
    };

    unsafe {
        // Open the process with termination rights
        let handle = OpenProcess(PROCESS_TERMINATE, false, pid).map_err(|e| {
            ProcessError::CommandFailed {
                action: "OpenProcess",
                source: Box::new(e),
            }
        })?;

        if handle.is_invalid() {
            // Process already gone
            return Ok(());
        }

        // Terminate the process (this is already "forceful" on Windows)
        let result = TerminateProcess(handle, 1);
        let _ = CloseHandle(handle);

        result.map_err(|e| ProcessError::CommandFailed {
            action: "TerminateProcess",
            source: Box::new(e),
        })
    }
}

#[cfg(windows)]
pub fn force_kill_pid(pid: u32) -> Result<()> {
    use windows::Win32::{
        Foundation::CloseHandle,
        System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE},
    };
    fn win32_error(action: &'static str) -> ProcessError {
        // windows::core::Error already wraps GetLastError + FormatMessageW.
        let err = windows::core::Error::from_win32();
        match err.code().0 {
            5 => ProcessError::PermissionDenied {
                /* ERROR_ACCESS_DENIED */
                action,
                source: Box::new(err),
            },
            _ => ProcessError::CommandFailed {
                action,
                source: Box::new(err),
            },
        }
    }

    unsafe {
        let h = OpenProcess(PROCESS_TERMINATE, false, pid).map_err(|e| {
            ProcessError::CommandFailed {
                action: "force-kill (OpenProcess)",
                source: e.into(),
            }
        })?;
        if h.is_invalid() {
            let err = windows::core::Error::from_win32();
            return match err.code().0 {
                87 => Ok(()), // already gone
                _ => Err(win32_error("force-kill (OpenProcess)")),
            };
        }
        match TerminateProcess(h, 1) {
            Ok(_) => CloseHandle(h).map_err(|e| ProcessError::CommandFailed {
                action: "force-kill (CloseHandle)",
                source: e.into(),
            }),
            Err(_) => {
                let _ = CloseHandle(h);
                Err(win32_error("force-kill (TerminateProcess)"))
            }
        }
    }
}
