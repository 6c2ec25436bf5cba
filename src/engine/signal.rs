//! Delivery of the configured kill signal to a running child.

use crate::model::KillSignal;
use tokio::process::Child;

impl KillSignal {
    /// Platform signal number.
    pub fn number(self) -> i32 {
        #[cfg(unix)]
        {
            to_nix(self) as i32
        }
        #[cfg(not(unix))]
        {
            match self {
                KillSignal::Hup => 1,
                KillSignal::Int => 2,
                KillSignal::Quit => 3,
                KillSignal::Kill => 9,
                KillSignal::Usr1 => 10,
                KillSignal::Usr2 => 12,
                KillSignal::Term => 15,
            }
        }
    }

    /// Exit code reported for a process terminated by this signal.
    pub fn exit_code(self) -> i32 {
        128 + self.number()
    }
}

#[cfg(unix)]
fn to_nix(signal: KillSignal) -> nix::sys::signal::Signal {
    use nix::sys::signal::Signal;

    match signal {
        KillSignal::Term => Signal::SIGTERM,
        KillSignal::Kill => Signal::SIGKILL,
        KillSignal::Int => Signal::SIGINT,
        KillSignal::Hup => Signal::SIGHUP,
        KillSignal::Quit => Signal::SIGQUIT,
        KillSignal::Usr1 => Signal::SIGUSR1,
        KillSignal::Usr2 => Signal::SIGUSR2,
    }
}

/// Send `signal` to `child` once. A child that has already been reaped is left alone.
#[cfg(unix)]
pub(crate) fn deliver(child: &mut Child, signal: KillSignal) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    nix::sys::signal::kill(pid, to_nix(signal)).map_err(std::io::Error::from)
}

/// Without POSIX signals the only option is a hard kill.
#[cfg(not(unix))]
pub(crate) fn deliver(child: &mut Child, _signal: KillSignal) -> std::io::Result<()> {
    child.start_kill()
}
