#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("Program exited because the solution was empty.")]
    EmptySource,
}

impl ExecError {
    pub fn sandbox_unavailable(reason: impl Into<String>) -> Self {
        ExecError::SandboxUnavailable(reason.into())
    }
}
