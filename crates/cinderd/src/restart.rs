//! Graceful restart: listener handoff between parent and child
//!
//! On SIGHUP the running process re-execs itself and passes the already
//! bound listening socket through an environment variable, so no inbound
//! connection is lost across the swap:
//!
//! 1. parent spawns the child with `CINDERD_LISTEN_FD` pointing at a
//!    dup of the listener (CLOEXEC cleared) and `CINDERD_PARENT_PID` set;
//! 2. the child sees the variables, adopts the descriptor instead of
//!    binding, and sends the parent SIGTERM;
//! 3. the parent drains and exits through the normal shutdown path.
//!
//! On platforms without descriptor inheritance this module degrades to
//! "no handoff": the child binds fresh after the parent releases the port.

use std::io;

/// Environment variable carrying the inherited listener fd.
pub const LISTEN_FD_ENV: &str = "CINDERD_LISTEN_FD";

/// Environment variable carrying the parent pid awaiting our readiness.
pub const PARENT_PID_ENV: &str = "CINDERD_PARENT_PID";

/// Adopt a listener inherited from a restarting parent, if any.
#[cfg(unix)]
pub fn inherited_listener() -> io::Result<Option<std::net::TcpListener>> {
    use std::os::fd::FromRawFd;

    let Ok(fd) = std::env::var(LISTEN_FD_ENV) else {
        return Ok(None);
    };
    let fd: i32 = fd
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad inherited fd"))?;

    // The variable must not leak into our own future children; it is set
    // afresh on the next restart.
    // SAFETY: startup only; no other code in this process touches the
    // environment concurrently.
    unsafe {
        std::env::remove_var(LISTEN_FD_ENV);
    }

    // SAFETY: the fd was created as a listening socket by the parent and
    // is owned by nobody else in this process.
    let listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    listener.set_nonblocking(true)?;
    Ok(Some(listener))
}

#[cfg(not(unix))]
pub fn inherited_listener() -> io::Result<Option<std::net::TcpListener>> {
    Ok(None)
}

/// Tell the restarting parent we own the listener now.
#[cfg(unix)]
pub fn signal_parent_ready() {
    let Ok(ppid) = std::env::var(PARENT_PID_ENV) else {
        return;
    };
    // SAFETY: startup only, no concurrent environment access.
    unsafe {
        std::env::remove_var(PARENT_PID_ENV);
    }
    let Ok(ppid) = ppid.parse::<i32>() else {
        tracing::warn!(ppid = %ppid, "unparseable parent pid, cannot signal");
        return;
    };

    tracing::info!(parent = ppid, "signalling parent to drain and exit");
    // SAFETY: plain kill(2); the worst outcome is ESRCH for a gone parent.
    let rc = unsafe { libc::kill(ppid, libc::SIGTERM) };
    if rc != 0 {
        tracing::warn!(
            parent = ppid,
            error = %io::Error::last_os_error(),
            "failed to signal parent"
        );
    }
}

#[cfg(not(unix))]
pub fn signal_parent_ready() {}

/// Re-exec ourselves, handing over the listener. Returns the child pid.
#[cfg(unix)]
pub fn spawn_child(listener: &std::net::TcpListener) -> io::Result<u32> {
    use std::os::fd::AsRawFd;
    use std::process::Command;

    let fd = listener.as_raw_fd();

    // Clear CLOEXEC so the descriptor survives exec.
    // SAFETY: fcntl on a descriptor we own.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, 0) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let exe = std::env::current_exe()?;
    let child = Command::new(exe)
        .args(std::env::args_os().skip(1))
        .env(LISTEN_FD_ENV, fd.to_string())
        .env(PARENT_PID_ENV, std::process::id().to_string())
        .spawn()?;

    Ok(child.id())
}

#[cfg(not(unix))]
pub fn spawn_child(_listener: &std::net::TcpListener) -> io::Result<u32> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "listener handoff requires unix; restart by re-running the service",
    ))
}
