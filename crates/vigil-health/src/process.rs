//! OS process liveness.

/// Answers whether a PID refers to a live process.
pub trait ProcessInspector: Send + Sync {
    fn is_running(&self, pid: u32) -> bool;
}

/// Liveness via `kill(pid, 0)`.
///
/// A permission error still proves the process exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

#[cfg(unix)]
impl ProcessInspector for SystemProcesses {
    fn is_running(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs only the existence and permission check.
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(not(unix))]
impl ProcessInspector for SystemProcesses {
    fn is_running(&self, _pid: u32) -> bool {
        false
    }
}
