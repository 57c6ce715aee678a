use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub stdin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "Accepted")]
    Accepted,
    #[serde(rename = "Compilation Error")]
    CompilationError,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Timeout")]
    Timeout,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accepted => "Accepted",
            Verdict::CompilationError => "Compilation Error",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::Timeout => "Timeout",
        }
    }

    /// Human readable summary shown next to the verdict.
    pub fn message(self) -> &'static str {
        match self {
            Verdict::Accepted => "Code executed successfully.",
            Verdict::CompilationError => "Code has compilation errors.",
            Verdict::RuntimeError => "Runtime error occurred.",
            Verdict::Timeout => "Code execution timed out.",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: Verdict,
    pub stdout: String,
    pub stderr: String,
    pub time: f64,   // seconds
    pub memory: u64, // KiB
    pub language: String,
}

impl ExecutionResult {
    pub fn new(status: Verdict, language: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: String::new(),
            time: 0.0,
            memory: 0,
            language: language.into(),
        }
    }

    pub fn runtime_error(language: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            ..Self::new(Verdict::RuntimeError, language)
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == Verdict::Accepted
    }
}

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub status: JobState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued: usize,
    pub active: usize,
    pub max_concurrent: usize,
}
