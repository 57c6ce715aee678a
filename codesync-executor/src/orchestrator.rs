use crate::config::Config;
use crate::lang::{self, LanguageDescriptor};
use crate::local::LocalExecutor;
use crate::measure::Probe;
use crate::process::{HostRunner, ProcessRunner};
use crate::queue::AdmissionQueue;
use crate::sandbox::ContainerSandbox;

use codesync_protocol::common::{ExecutionRequest, ExecutionResult};
use codesync_protocol::error::ExecError;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Availability {
    /// `None` until the startup probe has run.
    available: Option<bool>,
    checked_at: Instant,
}

/// Picks a backend for each request and always produces a result.
pub struct Orchestrator<R = HostRunner> {
    sandbox: Option<ContainerSandbox<R>>,
    local: Arc<LocalExecutor<R>>,
    queue: Option<Arc<AdmissionQueue>>,
    availability: Mutex<Availability>,
    revalidate_interval: Duration,
}

impl<R: ProcessRunner> Orchestrator<R> {
    pub fn new(config: &Config, runner: Arc<R>) -> Result<Self> {
        let local = Arc::new(LocalExecutor::new(config, Arc::clone(&runner))?);
        let sandbox = if config.sandbox.enabled {
            Some(ContainerSandbox::new(config, runner)?)
        } else {
            info!("container sandbox is disabled");
            None
        };
        Ok(Self {
            sandbox,
            local,
            queue: None,
            availability: Mutex::new(Availability {
                available: None,
                checked_at: Instant::now(),
            }),
            revalidate_interval: Duration::from_millis(config.sandbox.revalidate_interval),
        })
    }

    /// Gates local executions behind `queue`.
    pub fn with_queue(mut self, queue: Arc<AdmissionQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn queue(&self) -> Option<&Arc<AdmissionQueue>> {
        self.queue.as_ref()
    }

    /// Probes the container runtime and prepares the execution image.
    pub async fn init(&self) {
        let sandbox = match self.sandbox {
            Some(ref s) => s,
            None => return,
        };
        let available = if sandbox.is_runtime_available().await {
            match sandbox.ensure_image().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(err = %format!("{:#}", err), "execution image is not usable");
                    false
                }
            }
        } else {
            false
        };
        if available {
            info!("container sandbox is available");
        } else {
            warn!("container sandbox is unavailable, falling back to local execution");
        }
        self.set_available(available).await;
    }

    async fn set_available(&self, available: bool) {
        let mut availability = self.availability.lock().await;
        availability.available = Some(available);
        availability.checked_at = Instant::now();
    }

    pub async fn sandbox_available(&self) -> bool {
        let sandbox = match self.sandbox {
            Some(ref s) => s,
            None => return false,
        };
        {
            let mut availability = self.availability.lock().await;
            match availability.available {
                None => return false,
                Some(true) => return true,
                Some(false) => {
                    if availability.checked_at.elapsed() < self.revalidate_interval {
                        return false;
                    }
                    // one caller revalidates, the rest keep using the fallback
                    availability.checked_at = Instant::now();
                }
            }
        }
        let available = sandbox.is_runtime_available().await;
        debug!(available, "container sandbox revalidated");
        self.set_available(available).await;
        available
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.execute_code(&request.language, &request.source_code, &request.stdin)
            .await
    }

    pub async fn execute_code(&self, language: &str, code: &str, stdin: &str) -> ExecutionResult {
        if code.trim().is_empty() {
            return ExecutionResult::runtime_error(language, ExecError::EmptySource.to_string());
        }
        let lang = match lang::lookup(language) {
            Ok(lang) => lang,
            Err(err) => {
                debug!(%language, %err, "rejected request");
                return ExecutionResult::runtime_error(language, err.to_string());
            }
        };

        if self.sandbox_available().await {
            if let Some(ref sandbox) = self.sandbox {
                let probe = Probe::start();
                match sandbox.run_in_sandbox(lang, code, stdin).await {
                    Ok(mut result) => {
                        probe.finish(&mut result);
                        return result;
                    }
                    Err(err) => {
                        warn!(%language, err = %format!("{:#}", err), "sandbox execution failed, falling back");
                        if let Some(ExecError::SandboxUnavailable(_)) = err.downcast_ref::<ExecError>() {
                            self.set_available(false).await;
                        }
                    }
                }
            }
        }

        self.run_fallback(lang, code, stdin).await
    }

    async fn run_fallback(
        &self,
        lang: &'static LanguageDescriptor,
        code: &str,
        stdin: &str,
    ) -> ExecutionResult {
        let queue = match self.queue {
            Some(ref queue) => queue,
            None => return self.local.run_locally(lang, code, stdin).await,
        };

        let request = ExecutionRequest {
            language: lang.id.as_str().to_owned(),
            source_code: code.to_owned(),
            stdin: stdin.to_owned(),
        };
        let local = Arc::clone(&self.local);
        let (code, stdin) = (request.source_code.clone(), request.stdin.clone());
        let outcome = queue
            .submit(request, move || async move {
                Ok(local.run_locally(lang, &code, &stdin).await)
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(language = %lang.id, err = %format!("{:#}", err), "queued execution failed");
                ExecutionResult::runtime_error(lang.id.as_str(), format!("{:#}", err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::{exited, FakeRunner};

    use codesync_protocol::common::Verdict;
    use codesync_utils::os_cmd::OsCmd;

    use std::path::Path;

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.executor.persistence_dir = dir.join("db");
        config.sandbox.scratch_root = dir.join("scratch");
        config
    }

    fn is_docker(cmd: &OsCmd) -> bool {
        cmd.bin_name() == "docker"
    }

    fn is_docker_sub(cmd: &OsCmd, subcommand: &str) -> bool {
        is_docker(cmd) && cmd.args.first().map_or(false, |a| a == subcommand)
    }

    #[tokio::test]
    async fn rejects_without_spawning() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| Ok(exited(0, "", "")));
        let orchestrator = Orchestrator::new(&config(tmp.path()), runner.clone()).unwrap();

        let result = orchestrator.execute_code("python", "  \n\t", "").await;
        assert_eq!(result.status, Verdict::RuntimeError);
        assert_eq!(result.stderr, "Program exited because the solution was empty.");
        assert_eq!(result.language, "python");

        let result = orchestrator.execute_code("ruby", "puts 1", "").await;
        assert_eq!(result.status, Verdict::RuntimeError);
        assert_eq!(result.stderr, "Unsupported language: ruby");
        assert_eq!(result.stdout, "");

        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn uninitialized_sandbox_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| Ok(exited(0, "1\n", "")));
        let orchestrator = Orchestrator::new(&config(tmp.path()), runner.clone()).unwrap();

        let result = orchestrator.execute_code("python", "print(1)", "").await;
        assert_eq!(result.status, Verdict::Accepted);
        assert!(!runner.calls().iter().any(is_docker));
    }

    #[tokio::test]
    async fn prefers_sandbox_when_available() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            if is_docker_sub(cmd, "start") {
                Ok(exited(0, "from container\n", ""))
            } else {
                Ok(exited(0, "", ""))
            }
        });
        let orchestrator = Orchestrator::new(&config(tmp.path()), runner.clone()).unwrap();
        orchestrator.init().await;
        assert!(orchestrator.sandbox_available().await);

        let result = orchestrator.execute_code("python", "print(1)", "").await;
        assert_eq!(result.status, Verdict::Accepted);
        assert_eq!(result.stdout, "from container\n");
        assert!(!runner.calls().iter().any(|c| c.bin_name() == "python3"));
    }

    #[tokio::test]
    async fn sandbox_fault_falls_back_and_flips_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            if is_docker_sub(cmd, "create") {
                Ok(exited(125, "", "Error response from daemon: no space left on device"))
            } else if is_docker(cmd) {
                Ok(exited(0, "", ""))
            } else {
                Ok(exited(0, "local\n", ""))
            }
        });
        let orchestrator = Orchestrator::new(&config(tmp.path()), runner.clone()).unwrap();
        orchestrator.init().await;

        let result = orchestrator.execute_code("python", "print(1)", "").await;
        assert_eq!(result.status, Verdict::Accepted);
        assert_eq!(result.stdout, "local\n");
        assert!(!orchestrator.sandbox_available().await);

        let creates = runner.calls().iter().filter(|c| is_docker_sub(c, "create")).count();
        orchestrator.execute_code("python", "print(1)", "").await;
        let after = runner.calls().iter().filter(|c| is_docker_sub(c, "create")).count();
        assert_eq!(creates, after);
    }

    #[tokio::test]
    async fn program_exit_status_never_leaves_the_sandbox() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            if is_docker_sub(cmd, "start") {
                Ok(exited(125, "", ""))
            } else if is_docker(cmd) {
                Ok(exited(0, "", ""))
            } else {
                Ok(exited(0, "RAN ON HOST\n", ""))
            }
        });
        let orchestrator = Orchestrator::new(&config(tmp.path()), runner.clone()).unwrap();
        orchestrator.init().await;

        let code = "import os\nprint('RAN ON HOST')\nos._exit(125)\n";
        let result = orchestrator.execute_code("python", code, "").await;
        assert_eq!(result.status, Verdict::RuntimeError);
        assert!(result.stdout.is_empty());
        assert!(!runner.calls().iter().any(|c| !is_docker(c)));
        assert!(orchestrator.sandbox_available().await);
    }

    #[tokio::test]
    async fn unreachable_runtime_uses_queue() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            if is_docker(cmd) {
                Err(anyhow::format_err!("No such file or directory"))
            } else {
                Ok(exited(0, "ok\n", ""))
            }
        });
        let queue = AdmissionQueue::new(2);
        let orchestrator = Orchestrator::new(&config(tmp.path()), runner.clone())
            .unwrap()
            .with_queue(queue.clone());
        orchestrator.init().await;

        for &id in &lang::LanguageId::ALL {
            let result = orchestrator.execute_code(id.as_str(), "main", "").await;
            assert_eq!(result.status, Verdict::Accepted, "{}", id);
            assert_eq!(result.language, id.as_str());
        }

        let stats = queue.stats().await;
        assert_eq!((stats.queued, stats.active), (0, 0));
    }

    #[tokio::test]
    async fn disabled_sandbox_never_calls_docker() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        config.sandbox.enabled = false;
        let runner = FakeRunner::new(|_| Ok(exited(0, "", "")));
        let orchestrator = Orchestrator::new(&config, runner.clone()).unwrap();
        orchestrator.init().await;

        orchestrator.execute_code("javascript", "1", "").await;
        assert!(!runner.calls().iter().any(is_docker));
    }
}
