use crate::process::ProcessOutput;

use codesync_protocol::common::{ExecutionResult, Verdict};

fn lossy(bytes: &[u8], truncated: bool) -> String {
    let mut s = String::from_utf8_lossy(bytes).into_owned();
    if truncated {
        s.push_str("\n[output truncated]");
    }
    s
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
}

fn exit_description(output: &ProcessOutput) -> String {
    match (output.code, output.signal) {
        (Some(code), _) => format!("Process exited with code {}", code),
        (None, Some(sig)) => format!("Process terminated by signal {}", sig),
        (None, None) => "Process terminated abnormally".to_owned(),
    }
}

/// Compiler diagnostics go to stderr, with stdout as a fallback for compilers that print there.
pub fn compile_failure(language: &str, output: &ProcessOutput, timeout: u64) -> ExecutionResult {
    let mut stderr = if output.stderr.is_empty() {
        lossy(&output.stdout, output.stdout_truncated)
    } else {
        lossy(&output.stderr, output.stderr_truncated)
    };
    if output.timed_out {
        append_line(
            &mut stderr,
            &format!("Compilation exceeded {} ms time limit", timeout),
        );
    } else if stderr.trim().is_empty() {
        stderr = exit_description(output);
    }
    ExecutionResult {
        stderr,
        ..ExecutionResult::new(Verdict::CompilationError, language)
    }
}

pub fn spawn_failure(verdict: Verdict, language: &str, err: &anyhow::Error) -> ExecutionResult {
    ExecutionResult {
        stderr: format!("{:#}", err),
        ..ExecutionResult::new(verdict, language)
    }
}

pub fn run_outcome(language: &str, output: &ProcessOutput, timeout: u64) -> ExecutionResult {
    let stdout = lossy(&output.stdout, output.stdout_truncated);
    let mut stderr = lossy(&output.stderr, output.stderr_truncated);

    let status = if output.timed_out {
        append_line(
            &mut stderr,
            &format!("Execution exceeded {} ms time limit", timeout),
        );
        Verdict::Timeout
    } else if output.is_success() {
        Verdict::Accepted
    } else {
        if stderr.trim().is_empty() {
            stderr = exit_description(output);
        }
        Verdict::RuntimeError
    };

    ExecutionResult {
        status,
        stdout,
        stderr,
        ..ExecutionResult::new(status, language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::{exited, timed_out};

    #[test]
    fn accepted() {
        let result = run_outcome("python", &exited(0, "Hello World!\n", ""), 5000);
        assert_eq!(result.status, Verdict::Accepted);
        assert_eq!(result.stdout, "Hello World!\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.language, "python");
    }

    #[test]
    fn timeout_keeps_partial_stdout() {
        let result = run_outcome("cpp", &timed_out("1\n2\n"), 5000);
        assert_eq!(result.status, Verdict::Timeout);
        assert_eq!(result.stdout, "1\n2\n");
        assert_eq!(result.stderr, "Execution exceeded 5000 ms time limit");
    }

    #[test]
    fn runtime_error_describes_exit() {
        let result = run_outcome("javascript", &exited(1, "", "boom"), 5000);
        assert_eq!(result.status, Verdict::RuntimeError);
        assert_eq!(result.stderr, "boom");

        let result = run_outcome("cpp", &exited(139, "", ""), 5000);
        assert_eq!(result.stderr, "Process exited with code 139");

        let killed = ProcessOutput {
            signal: Some(11),
            ..ProcessOutput::default()
        };
        let result = run_outcome("cpp", &killed, 5000);
        assert_eq!(result.status, Verdict::RuntimeError);
        assert_eq!(result.stderr, "Process terminated by signal 11");
    }

    #[test]
    fn compile_diagnostics() {
        let result = compile_failure("cpp", &exited(1, "", "error: expected ';'"), 10000);
        assert_eq!(result.status, Verdict::CompilationError);
        assert_eq!(result.stderr, "error: expected ';'");
        assert_eq!(result.stdout, "");

        let result = compile_failure("java", &exited(1, "Main.java:1: error", ""), 10000);
        assert_eq!(result.stderr, "Main.java:1: error");

        let result = compile_failure("cpp", &timed_out(""), 10000);
        assert_eq!(result.status, Verdict::CompilationError);
        assert_eq!(result.stderr, "Compilation exceeded 10000 ms time limit");
    }

    #[test]
    fn truncation_is_marked() {
        let output = ProcessOutput {
            code: Some(0),
            stdout: b"aaaa".to_vec(),
            stdout_truncated: true,
            ..ProcessOutput::default()
        };
        let result = run_outcome("python", &output, 5000);
        assert_eq!(result.status, Verdict::Accepted);
        assert_eq!(result.stdout, "aaaa\n[output truncated]");
    }
}
