use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{format_err, Context, Result};
use serde::{Deserialize, Serialize};
use ubyte::{ByteUnit, ToByteUnit};
use validator::{Validate, ValidationError};

const ENV_PREFIX: &str = "CODESYNC_";

#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[validate]
    pub executor: Executor,

    #[validate]
    pub sandbox: Sandbox,

    #[validate]
    pub toolchain: Toolchain,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Executor {
    pub persistence_dir: PathBuf,

    #[validate(range(min = 1, max = 256))]
    pub max_concurrent: u64,

    /// Gate local executions behind the admission queue.
    pub queue_fallback: bool,

    #[validate(range(min = 100, max = 600000))]
    pub run_timeout: u64, // milliseconds

    #[validate(range(min = 100, max = 600000))]
    pub compile_timeout: u64, // milliseconds

    #[validate(custom = "nonzero_size")]
    pub output_limit: ByteUnit,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Sandbox {
    pub enabled: bool,

    #[validate(length(min = 1))]
    pub docker: String,

    #[validate(length(min = 1))]
    pub image: String,

    pub scratch_root: PathBuf,

    #[validate(custom = "nonzero_size")]
    pub memory: ByteUnit,

    #[validate(range(min = 0.01, max = 64.0))]
    pub cpus: f64,

    #[validate(range(min = 1, max = 4096))]
    pub pids: u64,

    #[validate(custom = "nonzero_size")]
    pub tmpfs_size: ByteUnit,

    #[validate(range(min = 100, max = 60000))]
    pub probe_timeout: u64, // milliseconds

    #[validate(range(min = 1000, max = 3600000))]
    pub build_timeout: u64, // milliseconds

    #[validate(range(max = 60000))]
    pub startup_grace: u64, // milliseconds

    #[validate(range(min = 1000, max = 86400000))]
    pub revalidate_interval: u64, // milliseconds
}

/// Host programs used by the local executor.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    pub gxx: PathBuf,
    pub python: PathBuf,
    pub node: PathBuf,
    pub javac: PathBuf,
    pub java: PathBuf,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            persistence_dir: PathBuf::from("db"),
            max_concurrent: 3,
            queue_fallback: true,
            run_timeout: 5000,
            compile_timeout: 10000,
            output_limit: 10u64.mebibytes(),
        }
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self {
            enabled: true,
            docker: "docker".to_owned(),
            image: "codesync-executor:latest".to_owned(),
            scratch_root: env::temp_dir().join("codesync-exec"),
            memory: 256u64.mebibytes(),
            cpus: 0.5,
            pids: 64,
            tmpfs_size: 64u64.mebibytes(),
            probe_timeout: 5000,
            build_timeout: 600000,
            startup_grace: 1000,
            revalidate_interval: 60000,
        }
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            gxx: "g++".into(),
            python: "python3".into(),
            node: "node".into(),
            javac: "javac".into(),
            java: "java".into(),
        }
    }
}

impl Toolchain {
    /// Maps the program name of a command template to the configured host binary.
    pub fn resolve(&self, program: &str) -> PathBuf {
        match program {
            "g++" => self.gxx.clone(),
            "python3" => self.python.clone(),
            "node" => self.node.clone(),
            "javac" => self.javac.clone(),
            "java" => self.java.clone(),
            _ => PathBuf::from(program),
        }
    }
}

fn nonzero_size(size: &ByteUnit) -> Result<(), ValidationError> {
    if size.as_u64() == 0 {
        return Err(ValidationError::new("zero_size"));
    }
    Ok(())
}

impl Config {
    /// Loads the file if it exists, applies `CODESYNC_*` overrides and validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read config: path = {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config: path = {}", path.display()))?
        } else {
            Config::default()
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(image) = env_var::<String>("IMAGE")? {
            self.sandbox.image = image;
        }
        if let Some(enabled) = env_var::<bool>("SANDBOX_ENABLED")? {
            self.sandbox.enabled = enabled;
        }
        if let Some(memory) = env_var::<ByteUnit>("MEMORY_LIMIT")? {
            self.sandbox.memory = memory;
        }
        if let Some(cpus) = env_var::<f64>("CPU_LIMIT")? {
            self.sandbox.cpus = cpus;
        }
        if let Some(timeout) = env_var::<u64>("RUN_TIMEOUT_MS")? {
            self.executor.run_timeout = timeout;
        }
        if let Some(timeout) = env_var::<u64>("COMPILE_TIMEOUT_MS")? {
            self.executor.compile_timeout = timeout;
        }
        if let Some(output) = env_var::<ByteUnit>("OUTPUT_LIMIT")? {
            self.executor.output_limit = output;
        }
        if let Some(dir) = env_var::<PathBuf>("PERSISTENCE_DIR")? {
            self.executor.persistence_dir = dir;
        }
        if let Some(n) = env_var::<u64>("MAX_CONCURRENT")? {
            self.executor.max_concurrent = n;
        }
        Ok(())
    }
}

fn env_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let name = format!("{}{}", ENV_PREFIX, key);
    match env::var(&name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| format_err!("invalid value for {}: {}", name, err)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(format_err!("invalid value for {}: {}", name, err)),
    }
}
