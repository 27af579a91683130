//! Child process supervision
//!
//! While kiln waits on a child (a build step or the artifact), SIGINT,
//! SIGTERM and SIGHUP are relayed to it instead of killing kiln, and kiln
//! only returns once the child has exited.

use crate::error::{KilnError, KilnResult};
use rustix::process::{kill_process, Pid, Signal as Signo};
use std::process::ExitStatus;
use tokio::process::Child;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// How a supervised child ended
#[derive(Debug, Clone, Copy)]
pub struct ChildExit {
    pub status: ExitStatus,
    /// Last signal relayed to the child, if any
    pub forwarded: Option<i32>,
}

/// Relays termination signals to a child process
pub struct SignalForwarder {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl SignalForwarder {
    /// Register signal handlers; call before spawning the child
    pub fn install() -> KilnResult<Self> {
        let listen = |kind: SignalKind| {
            signal(kind).map_err(|e| KilnError::io("installing signal handler", e))
        };
        Ok(Self {
            interrupt: listen(SignalKind::interrupt())?,
            terminate: listen(SignalKind::terminate())?,
            hangup: listen(SignalKind::hangup())?,
        })
    }

    /// Wait for `child` to exit, forwarding signals as they arrive
    pub async fn wait(&mut self, child: &mut Child) -> KilnResult<ChildExit> {
        let pid = child.id();
        let mut forwarded = None;

        loop {
            let signo = tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| KilnError::io("waiting for child process", e))?;
                    return Ok(ChildExit { status, forwarded });
                }
                Some(()) = self.interrupt.recv() => Signo::INT,
                Some(()) = self.terminate.recv() => Signo::TERM,
                Some(()) = self.hangup.recv() => Signo::HUP,
            };

            debug!("Forwarding signal {} to child {:?}", signo.as_raw(), pid);
            forward(pid, signo);
            forwarded = Some(signo.as_raw());
        }
    }
}

fn forward(pid: Option<u32>, signo: Signo) {
    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    let Some(pid) = Pid::from_raw(raw) else {
        return;
    };
    // the child may already have exited
    if let Err(e) = kill_process(pid, signo) {
        debug!("Could not signal child {}: {}", raw, e);
    }
}

/// Terminating signal of an exit status, if it was killed by one
pub fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}
