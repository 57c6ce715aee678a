use crate::signal::kill_process_group;

use codesync_utils::os_cmd::OsCmd;

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::{self, JoinHandle};
use tokio::time;
use tracing::{debug, warn};

/// How long to wait for the output pipes to close after the process group is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub real_time: u64, // milliseconds
    pub output: u64,    // bytes
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,

    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,

    pub real_time: u64, // milliseconds
}

impl ProcessOutput {
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

/// Spawns one bounded process. An `Err` means the process could not be started or awaited.
pub trait ProcessRunner: Send + Sync + 'static {
    fn run<'a>(
        &'a self,
        cmd: &'a OsCmd,
        stdin: &'a [u8],
        limit: &'a Limit,
    ) -> BoxFuture<'a, Result<ProcessOutput>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

impl ProcessRunner for HostRunner {
    fn run<'a>(
        &'a self,
        cmd: &'a OsCmd,
        stdin: &'a [u8],
        limit: &'a Limit,
    ) -> BoxFuture<'a, Result<ProcessOutput>> {
        Box::pin(run_bounded(cmd, stdin, limit))
    }
}

pub async fn run_bounded(cmd: &OsCmd, stdin: &[u8], limit: &Limit) -> Result<ProcessOutput> {
    let mut command = Command::new(&cmd.bin);
    command.args(&cmd.args);
    if let Some(ref dir) = cmd.current_dir {
        command.current_dir(dir);
    }
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);

    debug!("executing command: {}", cmd);

    let t0 = Instant::now();
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {}", cmd.bin.display()))?;
    let pgid = child.id();

    let writer = {
        let input = stdin.to_owned();
        let pipe = child.stdin.take();
        task::spawn(async move {
            if let Some(mut pipe) = pipe {
                // the child may exit without consuming its input
                let _ = pipe.write_all(&input).await;
            }
        })
    };
    let stdout_reader = task::spawn(read_capped(child.stdout.take(), limit.output));
    let stderr_reader = task::spawn(read_capped(child.stderr.take(), limit.output));

    let waited = time::timeout(Duration::from_millis(limit.real_time), child.wait()).await;

    let timed_out = waited.is_err();
    if timed_out {
        debug!(pgid = ?pgid, limit = limit.real_time, "real time limit exceeded");
    }

    // reaps orphans still holding the output pipes
    if let Some(pgid) = pgid {
        let _ = kill_process_group(pgid);
    }

    let status = match waited {
        Ok(status) => status.context("failed to wait child process")?,
        Err(_) => {
            let _ = child.start_kill();
            child.wait().await.context("failed to wait killed process")?
        }
    };
    let real_time = t0.elapsed().as_millis() as u64;
    writer.abort();

    let (stdout, stdout_truncated) = collect(stdout_reader).await;
    let (stderr, stderr_truncated) = collect(stderr_reader).await;

    debug!(?status, real_time, timed_out, "process finished");

    Ok(ProcessOutput {
        code: status.code(),
        signal: status.signal(),
        timed_out,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        real_time,
    })
}

/// Keeps the first `cap` bytes and drains the rest so the writer never blocks.
async fn read_capped<R>(reader: Option<R>, cap: u64) -> io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut reader = match reader {
        Some(r) => r,
        None => return Ok((Vec::new(), false)),
    };
    let mut buf = Vec::new();
    (&mut reader).take(cap).read_to_end(&mut buf).await?;
    let rest = io::copy(&mut reader, &mut io::sink()).await?;
    Ok((buf, rest > 0))
}

async fn collect(mut handle: JoinHandle<io::Result<(Vec<u8>, bool)>>) -> (Vec<u8>, bool) {
    match time::timeout(PIPE_DRAIN_GRACE, &mut handle).await {
        Ok(Ok(Ok(output))) => output,
        Ok(Ok(Err(err))) => {
            warn!(%err, "failed to read child output");
            (Vec::new(), false)
        }
        Ok(Err(err)) => {
            warn!(%err, "output reader failed");
            (Vec::new(), false)
        }
        Err(_) => {
            warn!("output pipe is still open after the process group was killed");
            handle.abort();
            (Vec::new(), false)
        }
    }
}
