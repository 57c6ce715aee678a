use crate::config::{Config, Toolchain};
use crate::lang::{LanguageDescriptor, TemplateVars};
use crate::measure::Probe;
use crate::process::{HostRunner, Limit, ProcessRunner};
use crate::verdict;
use crate::workspace::{generate_name, prepare_root, Workspace};

use codesync_protocol::common::{ExecutionResult, Verdict};

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Runs code directly on the host with the configured toolchain.
pub struct LocalExecutor<R = HostRunner> {
    runner: Arc<R>,
    persistence_dir: PathBuf,
    toolchain: Toolchain,
    compile_limit: Limit,
    run_limit: Limit,
}

impl<R: ProcessRunner> LocalExecutor<R> {
    /// Fails if the persistence directory cannot be created or written.
    pub fn new(config: &Config, runner: Arc<R>) -> Result<Self> {
        // commands run inside the workspace, so every path handed to them is absolute
        let persistence_dir = prepare_root(&config.executor.persistence_dir)
            .context("persistence directory is unusable")?;
        probe_writable(&persistence_dir)?;

        let output = config.executor.output_limit.as_u64();
        Ok(Self {
            runner,
            persistence_dir,
            toolchain: config.toolchain.clone(),
            compile_limit: Limit {
                real_time: config.executor.compile_timeout,
                output,
            },
            run_limit: Limit {
                real_time: config.executor.run_timeout,
                output,
            },
        })
    }

    pub async fn run_locally(
        &self,
        lang: &LanguageDescriptor,
        code: &str,
        stdin: &str,
    ) -> ExecutionResult {
        let probe = Probe::start();
        let mut result = self.run_in_workspace(lang, code, stdin).await;
        probe.finish(&mut result);
        result
    }

    async fn run_in_workspace(
        &self,
        lang: &LanguageDescriptor,
        code: &str,
        stdin: &str,
    ) -> ExecutionResult {
        let language = lang.id.as_str();

        let mut workspace = match Workspace::create(&self.persistence_dir, &generate_name("local")) {
            Ok(ws) => ws,
            Err(err) => {
                warn!(%language, err = %format!("{:#}", err), "failed to prepare workspace");
                return verdict::spawn_failure(Verdict::RuntimeError, language, &err);
            }
        };

        let src = workspace.join(&*lang.source_name(code));
        if let Err(err) = fs::write(&src, code) {
            let err = anyhow::Error::new(err).context("failed to write source file");
            return verdict::spawn_failure(Verdict::RuntimeError, language, &err);
        }

        let exe = workspace.join("solution");
        let out = workspace.path().to_owned();
        let vars = TemplateVars {
            src: &src,
            exe: &exe,
            out: &out,
            main: lang.main_class(code),
        };
        let resolve = |program: &str| self.toolchain.resolve(program);

        if let Some(ref compile) = lang.compile {
            let mut cmd = compile.expand(&vars, resolve);
            cmd.current_dir(workspace.path());
            debug!(%language, "compiling");
            match self.runner.run(&cmd, b"", &self.compile_limit).await {
                Ok(output) if output.is_success() => {}
                Ok(output) => {
                    return verdict::compile_failure(
                        language,
                        &output,
                        self.compile_limit.real_time,
                    )
                }
                Err(err) => {
                    return verdict::spawn_failure(Verdict::CompilationError, language, &err)
                }
            }
        }

        let mut cmd = lang.run.expand(&vars, resolve);
        cmd.current_dir(workspace.path());
        debug!(%language, "running");
        let result = match self.runner.run(&cmd, stdin.as_bytes(), &self.run_limit).await {
            Ok(output) => verdict::run_outcome(language, &output, self.run_limit.real_time),
            Err(err) => verdict::spawn_failure(Verdict::RuntimeError, language, &err),
        };

        workspace.cleanup();
        result
    }
}

fn probe_writable(dir: &std::path::Path) -> Result<()> {
    let probe = dir.join(format!(".{}", generate_name("probe")));
    fs::write(&probe, b"")
        .with_context(|| format!("persistence directory is not writable: {}", dir.display()))?;
    if let Err(err) = fs::remove_file(&probe) {
        warn!(path = %probe.display(), %err, "failed to remove probe file");
    }
    Ok(())
}
