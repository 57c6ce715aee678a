use codesync_executor::lang::LanguageId;
use codesync_executor::local::LocalExecutor;
use codesync_executor::process::HostRunner;
use codesync_executor::{Config, Orchestrator, Verdict};

use codesync_utils::tracing::setup_tracing;

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        dotenv::dotenv().ok();
        setup_tracing();
    });
}

fn config(root: &Path) -> Config {
    let mut config = Config::default();
    config.executor.persistence_dir = root.join("db");
    config.sandbox.scratch_root = root.join("scratch");
    config
}

fn has_toolchain(lang: LanguageId) -> bool {
    let probes: &[(&str, &str)] = match lang {
        LanguageId::Cpp => &[("g++", "--version")],
        LanguageId::Python => &[("python3", "--version")],
        LanguageId::JavaScript => &[("node", "--version")],
        LanguageId::Java => &[("javac", "-version"), ("java", "-version")],
    };
    let found = probes.iter().all(|&(bin, arg)| {
        Command::new(bin)
            .arg(arg)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    });
    if !found {
        warn!(%lang, "toolchain not found, skipping");
    }
    found
}

fn hello_world(lang: LanguageId) -> &'static str {
    match lang {
        LanguageId::Cpp => {
            "#include <iostream>\nint main() { std::cout << \"Hello World!\" << std::endl; return 0; }\n"
        }
        LanguageId::Python => "print(\"Hello World!\")\n",
        LanguageId::JavaScript => "console.log(\"Hello World!\");\n",
        LanguageId::Java => {
            "public class Main {\n    public static void main(String[] args) {\n        System.out.println(\"Hello World!\");\n    }\n}\n"
        }
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn hello_world_is_accepted() {
    init();
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let local = LocalExecutor::new(&config, Arc::new(HostRunner)).unwrap();

    for &lang in &LanguageId::ALL {
        if !has_toolchain(lang) {
            continue;
        }
        let result = local
            .run_locally(lang.descriptor(), hello_world(lang), "")
            .await;
        debug!(?result);
        assert_eq!(result.status, Verdict::Accepted, "{}: {}", lang, result.stderr);
        assert_eq!(result.stdout.trim_end(), "Hello World!");
        assert_eq!(result.language, lang.as_str());
        assert!(result.time > 0.0);
    }
    assert!(is_empty_dir(&config.executor.persistence_dir));
}

#[tokio::test]
async fn java_without_public_class_runs() {
    init();
    if !has_toolchain(LanguageId::Java) {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let local = LocalExecutor::new(&config(tmp.path()), Arc::new(HostRunner)).unwrap();

    let code = "class Main {\n    public static void main(String[] args) {\n        System.out.println(\"Hello World!\");\n    }\n}\n";
    let result = local
        .run_locally(LanguageId::Java.descriptor(), code, "")
        .await;
    assert_eq!(result.status, Verdict::Accepted, "{}", result.stderr);
    assert_eq!(result.stdout.trim_end(), "Hello World!");
}

#[tokio::test]
async fn relative_persistence_dir_runs() {
    init();
    if !has_toolchain(LanguageId::Python) {
        return;
    }
    let relative = std::path::PathBuf::from(format!("relative-db-{}", std::process::id()));
    let mut config = Config::default();
    config.executor.persistence_dir = relative.clone();
    let local = LocalExecutor::new(&config, Arc::new(HostRunner)).unwrap();

    let result = local
        .run_locally(LanguageId::Python.descriptor(), hello_world(LanguageId::Python), "")
        .await;
    fs::remove_dir_all(&relative).unwrap();
    assert_eq!(result.status, Verdict::Accepted, "{}", result.stderr);
    assert_eq!(result.stdout, "Hello World!\n");
}

#[tokio::test]
async fn stdin_is_piped() {
    init();
    if !has_toolchain(LanguageId::Python) {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let local = LocalExecutor::new(&config(tmp.path()), Arc::new(HostRunner)).unwrap();

    let code = "import sys\nprint(sum(int(x) for x in sys.stdin.read().split()))\n";
    let result = local
        .run_locally(LanguageId::Python.descriptor(), code, "1 2 3\n; rm -rf /")
        .await;
    assert_eq!(result.status, Verdict::RuntimeError);

    let result = local
        .run_locally(LanguageId::Python.descriptor(), code, "1 2 3\n4")
        .await;
    assert_eq!(result.status, Verdict::Accepted);
    assert_eq!(result.stdout, "10\n");
}

#[tokio::test]
async fn syntax_error_is_compilation_error() {
    init();
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let local = LocalExecutor::new(&config, Arc::new(HostRunner)).unwrap();

    let cases = [
        (LanguageId::Cpp, "int main() { return 0 }\n"),
        (LanguageId::Java, "public class Main { void f() { int x = } }\n"),
    ];
    for &(lang, code) in &cases {
        if !has_toolchain(lang) {
            continue;
        }
        let result = local.run_locally(lang.descriptor(), code, "").await;
        assert_eq!(result.status, Verdict::CompilationError, "{}", lang);
        assert!(!result.stderr.is_empty());
        assert!(result.stdout.is_empty());
    }
    assert!(is_empty_dir(&config.executor.persistence_dir));
}

#[tokio::test]
async fn infinite_loop_times_out() {
    init();
    if !has_toolchain(LanguageId::Python) {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.executor.run_timeout = 1000;
    let local = LocalExecutor::new(&config, Arc::new(HostRunner)).unwrap();

    let code = "print('started', flush=True)\nwhile True:\n    pass\n";
    let t0 = Instant::now();
    let result = local
        .run_locally(LanguageId::Python.descriptor(), code, "")
        .await;

    assert_eq!(result.status, Verdict::Timeout);
    assert_eq!(result.stdout, "started\n");
    assert!(t0.elapsed() < Duration::from_millis(1000 + 3000));
    assert!(is_empty_dir(&config.executor.persistence_dir));
}

#[tokio::test]
async fn unavailable_runtime_still_classifies() {
    init();
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.sandbox.docker = "/nonexistent/docker".to_owned();

    let orchestrator = codesync_executor::init(&config).await.unwrap();
    assert!(!orchestrator.sandbox_available().await);

    for &lang in &LanguageId::ALL {
        let result = orchestrator
            .execute_code(lang.as_str(), hello_world(lang), "")
            .await;
        assert_eq!(result.language, lang.as_str());
        if has_toolchain(lang) {
            assert_eq!(result.status, Verdict::Accepted, "{}: {}", lang, result.stderr);
        } else {
            assert_ne!(result.status, Verdict::Accepted);
        }
    }

    let stats = orchestrator.queue().unwrap().stats().await;
    assert_eq!(stats.active, 0);
    assert!(is_empty_dir(&config.executor.persistence_dir));
}

#[tokio::test]
async fn empty_source_never_spawns() {
    init();
    let tmp = tempfile::tempdir().unwrap();
    let orchestrator: Orchestrator =
        Orchestrator::new(&config(tmp.path()), Arc::new(HostRunner)).unwrap();

    let result = orchestrator.execute_code("cpp", "   \n", "").await;
    assert_eq!(result.status, Verdict::RuntimeError);
    assert_eq!(
        result.stderr,
        "Program exited because the solution was empty."
    );
}
