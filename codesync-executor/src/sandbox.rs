use crate::config::Config;
use crate::lang::{LanguageDescriptor, TemplateVars};
use crate::process::{HostRunner, Limit, ProcessOutput, ProcessRunner};
use crate::verdict;
use crate::workspace::{generate_name, prepare_root, Workspace};

use codesync_protocol::common::ExecutionResult;
use codesync_protocol::error::ExecError;
use codesync_utils::os_cmd::OsCmd;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DOCKERFILE: &str = include_str!("../docker/executor.Dockerfile");

const SRC_MOUNT: &str = "/sandbox/src";
const BUILD_MOUNT: &str = "/sandbox/build";
const SCRATCH: &str = "/tmp";

const PROBE_OUTPUT_LIMIT: u64 = 64 * 1024;

/// Runs code in a throwaway container.
pub struct ContainerSandbox<R = HostRunner> {
    runner: Arc<R>,
    docker: PathBuf,
    image: String,
    scratch_root: PathBuf,

    memory: u64,
    cpus: f64,
    pids: u64,
    tmpfs_size: u64,

    compile_timeout: u64,
    run_timeout: u64,
    output_limit: u64,
    probe_timeout: u64,
    build_timeout: u64,
    startup_grace: u64,

    build_lock: Mutex<()>,
}

#[derive(Clone, Copy)]
enum Phase {
    Compile,
    Run,
}

impl<R: ProcessRunner> ContainerSandbox<R> {
    /// Fails if the scratch root cannot be created.
    pub fn new(config: &Config, runner: Arc<R>) -> Result<Self> {
        let sandbox = &config.sandbox;
        // docker treats a relative `--volume` source as a named volume
        let scratch_root =
            prepare_root(&sandbox.scratch_root).context("scratch root is unusable")?;
        Ok(Self {
            runner,
            docker: PathBuf::from(&sandbox.docker),
            image: sandbox.image.clone(),
            scratch_root,
            memory: sandbox.memory.as_u64(),
            cpus: sandbox.cpus,
            pids: sandbox.pids,
            tmpfs_size: sandbox.tmpfs_size.as_u64(),
            compile_timeout: config.executor.compile_timeout,
            run_timeout: config.executor.run_timeout,
            output_limit: config.executor.output_limit.as_u64(),
            probe_timeout: sandbox.probe_timeout,
            build_timeout: sandbox.build_timeout,
            startup_grace: sandbox.startup_grace,
            build_lock: Mutex::new(()),
        })
    }

    fn docker_cmd(&self) -> OsCmd {
        OsCmd::new(&self.docker)
    }

    fn probe_limit(&self) -> Limit {
        Limit {
            real_time: self.probe_timeout,
            output: PROBE_OUTPUT_LIMIT,
        }
    }

    /// `docker --version` answers within the probe timeout.
    pub async fn is_runtime_available(&self) -> bool {
        let mut cmd = self.docker_cmd();
        cmd.arg("--version");
        match self.runner.run(&cmd, b"", &self.probe_limit()).await {
            Ok(output) if output.is_success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                debug!(version = %version.trim(), "container runtime found");
                true
            }
            Ok(output) => {
                debug!(code = ?output.code, timed_out = output.timed_out, "container runtime probe failed");
                false
            }
            Err(err) => {
                debug!(err = %format!("{:#}", err), "container runtime not found");
                false
            }
        }
    }

    pub async fn is_image_present(&self) -> bool {
        let mut cmd = self.docker_cmd();
        cmd.args(&["image", "inspect", "--format", "{{.Id}}"])
            .arg(&self.image);
        match self.runner.run(&cmd, b"", &self.probe_limit()).await {
            Ok(output) => output.is_success(),
            Err(_) => false,
        }
    }

    pub async fn build_image(&self) -> Result<()> {
        info!(image = %self.image, "building execution image");
        let mut cmd = self.docker_cmd();
        cmd.args(&["build", "--tag"]).arg(&self.image).arg("-");
        let limit = Limit {
            real_time: self.build_timeout,
            output: self.output_limit,
        };
        let output = self
            .runner
            .run(&cmd, DOCKERFILE.as_bytes(), &limit)
            .await
            .context("failed to run docker build")?;
        if output.is_success() {
            info!(image = %self.image, "execution image is ready");
            return Ok(());
        }
        let reason = if output.timed_out {
            format!("image build exceeded {} ms", self.build_timeout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            format!("image build failed: {}", stderr.trim())
        };
        Err(ExecError::sandbox_unavailable(reason).into())
    }

    /// Builds the image unless it is present. Concurrent callers share one build.
    pub async fn ensure_image(&self) -> Result<()> {
        if self.is_image_present().await {
            return Ok(());
        }
        let _guard = self.build_lock.lock().await;
        if self.is_image_present().await {
            return Ok(());
        }
        self.build_image().await
    }

    /// Fails with [`ExecError::SandboxUnavailable`] when the runtime or image cannot be used.
    pub async fn run_in_sandbox(
        &self,
        lang: &LanguageDescriptor,
        code: &str,
        stdin: &str,
    ) -> Result<ExecutionResult> {
        if !self.is_runtime_available().await {
            return Err(ExecError::sandbox_unavailable("container runtime is not reachable").into());
        }
        self.ensure_image().await?;

        let exec_id = generate_name("codesync");
        let language = lang.id.as_str();
        debug!(%exec_id, %language, "sandbox execution");

        let workspace = Workspace::create(&self.scratch_root, &exec_id)?;
        let src_dir = workspace.join("src");
        let build_dir = workspace.join("build");
        fs::create_dir(&src_dir).context("failed to create source directory")?;
        fs::create_dir(&build_dir).context("failed to create build directory")?;
        // the container user is not the host user
        fs::set_permissions(&build_dir, fs::Permissions::from_mode(0o777))
            .context("failed to open build directory permissions")?;

        let source_name = lang.source_name(code);
        fs::write(src_dir.join(&*source_name), code).context("failed to write source file")?;

        let src = Path::new(SRC_MOUNT).join(&*source_name);
        let exe = Path::new(BUILD_MOUNT).join("solution");
        let out = Path::new(BUILD_MOUNT);
        let vars = TemplateVars {
            src: &src,
            exe: &exe,
            out,
            main: lang.main_class(code),
        };
        let mounts = Mounts {
            src: &src_dir,
            build: &build_dir,
        };

        if let Some(ref compile) = lang.compile {
            let argv = compile.expand(&vars, |p| PathBuf::from(p));
            let name = format!("{}-build", exec_id);
            let output = self
                .run_container(&name, Phase::Compile, &mounts, &argv, b"")
                .await?;
            if !output.is_success() {
                return Ok(verdict::compile_failure(
                    language,
                    &output,
                    self.compile_timeout,
                ));
            }
        }

        let argv = lang.run.expand(&vars, |p| PathBuf::from(p));
        let output = self
            .run_container(&exec_id, Phase::Run, &mounts, &argv, stdin.as_bytes())
            .await?;
        Ok(verdict::run_outcome(language, &output, self.run_timeout))
    }

    fn create_cmd(&self, name: &str, phase: Phase, mounts: &Mounts<'_>, argv: &OsCmd) -> OsCmd {
        let mut cmd = self.docker_cmd();
        cmd.args(&["create", "--interactive"])
            .arg("--name")
            .arg(name)
            .args(&["--network", "none", "--read-only"])
            .arg("--tmpfs")
            .arg(format!("{}:rw,exec,size={}", SCRATCH, self.tmpfs_size))
            .arg("--memory")
            .arg(self.memory.to_string())
            .arg("--memory-swap")
            .arg(self.memory.to_string())
            .arg("--cpus")
            .arg(self.cpus.to_string())
            .arg("--pids-limit")
            .arg(self.pids.to_string())
            .args(&["--cap-drop", "ALL"])
            .args(&["--security-opt", "no-new-privileges"]);

        let build_ro = matches!(phase, Phase::Run);
        cmd.arg("--volume").arg(bind(mounts.src, SRC_MOUNT, true));
        cmd.arg("--volume").arg(bind(mounts.build, BUILD_MOUNT, build_ro));

        cmd.arg("--workdir").arg(SCRATCH).arg(&self.image);
        cmd.arg(&argv.bin).args(argv.args.iter().cloned());
        cmd
    }

    /// Creates the container, then attaches to it.
    ///
    /// Only the creation step and the runtime's own state speak for the sandbox.
    /// The exit status of `docker start --attach` is the program's.
    async fn run_container(
        &self,
        name: &str,
        phase: Phase,
        mounts: &Mounts<'_>,
        argv: &OsCmd,
        stdin: &[u8],
    ) -> Result<ProcessOutput> {
        // removes the container if this future is dropped mid-flight
        let leftover = scopeguard::guard(name.to_owned(), |name| {
            let runner = Arc::clone(&self.runner);
            let mut cmd = self.docker_cmd();
            cmd.args(&["rm", "--force"]).arg(&name);
            let limit = self.probe_limit();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = runner.run(&cmd, b"", &limit).await;
                });
            }
        });

        let outcome = self.create_and_start(name, phase, mounts, argv, stdin).await;
        let name = scopeguard::ScopeGuard::into_inner(leftover);
        self.remove_container(&name).await;
        outcome
    }

    async fn create_and_start(
        &self,
        name: &str,
        phase: Phase,
        mounts: &Mounts<'_>,
        argv: &OsCmd,
        stdin: &[u8],
    ) -> Result<ProcessOutput> {
        let cmd = self.create_cmd(name, phase, mounts, argv);
        let created = self
            .runner
            .run(&cmd, b"", &self.probe_limit())
            .await
            .map_err(|err| ExecError::sandbox_unavailable(format!("{:#}", err)))?;
        if !created.is_success() {
            let reason = if created.timed_out {
                format!("container creation exceeded {} ms", self.probe_timeout)
            } else {
                let stderr = String::from_utf8_lossy(&created.stderr);
                format!("container could not be created: {}", stderr.trim())
            };
            return Err(ExecError::sandbox_unavailable(reason).into());
        }

        let timeout = match phase {
            Phase::Compile => self.compile_timeout,
            Phase::Run => self.run_timeout,
        };
        let limit = Limit {
            real_time: timeout + self.startup_grace,
            output: self.output_limit,
        };
        let mut cmd = self.docker_cmd();
        cmd.args(&["start", "--attach", "--interactive"]).arg(name);
        let output = self
            .runner
            .run(&cmd, stdin, &limit)
            .await
            .map_err(|err| ExecError::sandbox_unavailable(format!("{:#}", err)))?;

        if output.timed_out {
            debug!(container = %name, "container exceeded its time limit");
        } else if !output.is_success() {
            if let Some(reason) = self.start_error(name).await {
                return Err(ExecError::sandbox_unavailable(format!(
                    "container could not be started: {}",
                    reason
                ))
                .into());
            }
        }
        Ok(output)
    }

    /// The runtime's own error for a container that never started, if any.
    async fn start_error(&self, name: &str) -> Option<String> {
        let mut cmd = self.docker_cmd();
        cmd.args(&["inspect", "--format", "{{.State.Error}}"]).arg(name);
        match self.runner.run(&cmd, b"", &self.probe_limit()).await {
            Ok(output) if output.is_success() => {
                let error = String::from_utf8_lossy(&output.stdout).trim().to_owned();
                if error.is_empty() {
                    None
                } else {
                    Some(error)
                }
            }
            Ok(output) => {
                warn!(container = %name, code = ?output.code, "failed to inspect container");
                None
            }
            Err(err) => {
                warn!(container = %name, err = %format!("{:#}", err), "failed to inspect container");
                None
            }
        }
    }

    async fn remove_container(&self, name: &str) {
        let mut cmd = self.docker_cmd();
        cmd.args(&["rm", "--force"]).arg(name);
        match self.runner.run(&cmd, b"", &self.probe_limit()).await {
            Ok(output) if output.is_success() => debug!(container = %name, "container removed"),
            Ok(output) => warn!(container = %name, code = ?output.code, "failed to remove container"),
            Err(err) => warn!(container = %name, err = %format!("{:#}", err), "failed to remove container"),
        }
    }
}

struct Mounts<'a> {
    src: &'a Path,
    build: &'a Path,
}

fn bind(host: &Path, target: &str, read_only: bool) -> String {
    let mut spec = format!("{}:{}", host.display(), target);
    if read_only {
        spec.push_str(":ro");
    }
    spec
}
