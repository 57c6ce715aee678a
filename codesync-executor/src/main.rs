use codesync_executor::config::Config;
use codesync_executor::ExecutionResult;
use codesync_utils::tracing::setup_tracing;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dotenv::dotenv;
use serde::Serialize;
use structopt::StructOpt;
use tracing::info;

#[derive(Debug, StructOpt)]
#[structopt(name = "codesync-executor", about = "Run a source file in the code sandbox")]
struct Args {
    /// Config file, defaults are used when it does not exist
    #[structopt(long, parse(from_os_str), default_value = "codesync-executor.toml")]
    config: PathBuf,

    /// One of cpp, python, javascript, java
    #[structopt(short, long)]
    language: String,

    /// File fed to the program's standard input
    #[structopt(long, parse(from_os_str))]
    stdin: Option<PathBuf>,

    #[structopt(parse(from_os_str))]
    source: PathBuf,
}

#[derive(Serialize)]
struct Report<'a> {
    #[serde(flatten)]
    result: &'a ExecutionResult,
    message: &'static str,
}

#[tracing::instrument(err)]
fn load_config(path: &Path) -> Result<Config> {
    info!("loading config from {}", path.display());
    let config = Config::load(path)?;
    info!("config is loaded:\n{:#?}", config);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    setup_tracing();

    let args = Args::from_args();
    let config = load_config(&args.config)?;

    let code = fs::read_to_string(&args.source)
        .with_context(|| format!("failed to read source: path = {}", args.source.display()))?;
    let stdin = match args.stdin {
        Some(ref path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read stdin: path = {}", path.display()))?,
        None => String::new(),
    };

    let orchestrator = codesync_executor::init(&config).await?;
    let result = orchestrator.execute_code(&args.language, &code, &stdin).await;

    let report = Report {
        result: &result,
        message: result.status.message(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
