use codesync_protocol::common::ExecutionResult;

use std::io;
use std::mem::MaybeUninit;
use std::time::Instant;

/// Wall clock and child peak memory around one execution.
///
/// Memory is the growth of the process-wide `RUSAGE_CHILDREN` peak. That peak covers every
/// child ever waited for, so the reported value is 0 once an earlier child peaked higher,
/// and concurrent executions may observe each other's children.
pub struct Probe {
    t0: Instant,
    rss0: Option<u64>,
}

impl Probe {
    pub fn start() -> Self {
        Self {
            t0: Instant::now(),
            rss0: children_max_rss().ok(),
        }
    }

    /// Fills `time` (seconds, millisecond precision) and `memory` (KiB).
    pub fn finish(self, result: &mut ExecutionResult) {
        let millis = self.t0.elapsed().as_millis() as u64;
        result.time = millis as f64 / 1000.0;
        result.memory = match (self.rss0, children_max_rss()) {
            (Some(before), Ok(after)) => after.saturating_sub(before),
            _ => 0,
        };
    }
}

/// Peak resident set size of all waited-for children, in KiB.
fn children_max_rss() -> io::Result<u64> {
    let mut ru = MaybeUninit::<libc::rusage>::zeroed();
    let ret = unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, ru.as_mut_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    let ru = unsafe { ru.assume_init() };
    Ok(ru.ru_maxrss.max(0) as u64)
}
