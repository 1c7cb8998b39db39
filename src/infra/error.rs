use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("failed to start engine `{command}`: {reason}")]
    Spawn { command: String, reason: String },
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn spawn(command: impl Into<String>, reason: impl ToString) -> Self {
        Self::Spawn {
            command: command.into(),
            reason: reason.to_string(),
        }
    }
}
