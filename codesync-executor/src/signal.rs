use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

/// Sends `SIGKILL` to every process in the group led by `pgid`.
pub fn kill_process_group(pgid: u32) -> nix::Result<()> {
    let pgid = Pid::from_raw(pgid as i32);
    let result = signal::killpg(pgid, Signal::SIGKILL);
    debug!("killpg pgid = {}, result = {:?}", pgid, result);
    result
}
