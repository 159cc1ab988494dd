// OS process helpers: liveness probes, signals and detached spawning
// Unix only; the non-unix fallbacks report every process as dead.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Check whether a process exists (signal 0 probe)
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    // pid 0 would probe our own process group
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    unsafe { libc::kill(pid as i32, signal) == 0 }
}

/// Ask a worker to drain its queue now
#[cfg(unix)]
pub fn wake(pid: u32) -> bool {
    send_signal(pid, libc::SIGUSR1)
}

#[cfg(not(unix))]
pub fn wake(_pid: u32) -> bool {
    false
}

/// Send SIGTERM; returns whether the signal was delivered
#[cfg(unix)]
pub fn terminate(pid: u32) -> bool {
    send_signal(pid, libc::SIGTERM)
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> bool {
    false
}

/// Launch a process fully detached from the caller
///
/// stdio is discarded and the child gets its own session so it survives the
/// caller's terminal closing. A background thread reaps it so long-lived
/// callers never accumulate zombies.
pub fn spawn_detached(program: &Path, args: &[String], cwd: &Path) -> Result<u32> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program.display()))?;
    let pid = child.id();

    std::thread::spawn(move || {
        let _ = child.wait();
    });

    Ok(pid)
}
