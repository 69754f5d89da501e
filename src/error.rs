//! Error types for kutti-vbox.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using kutti-vbox's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in driver operations.
#[derive(Error, Debug)]
pub enum Error {
    // Driver errors
    /// The driver could not be initialised (VBoxManage missing or too old).
    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    // Machine errors
    /// Machine not found.
    #[error("machine not found: {0}")]
    MachineNotFound(String),

    /// A machine operation failed.
    #[error("machine {name}: {message}")]
    Machine {
        /// Machine name (unqualified).
        name: String,
        /// Error message.
        message: String,
    },

    /// A bounded retry loop ran out of attempts.
    #[error("{operation} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// The operation that was retried.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Message from the last attempt.
        message: String,
    },

    /// A predefined command is not implemented by this driver.
    #[error("command '{0}' not implemented")]
    CommandNotImplemented(String),

    // Network errors
    /// Network not found.
    #[error("network not found: {0}")]
    NetworkNotFound(String),

    // Image errors
    /// No image is known for a Kubernetes version.
    #[error("no image present for K8s version {0}")]
    ImageNotFound(String),

    /// The image is known but not present in the local cache.
    #[error("could not retrieve image {}: {reason}", path.display())]
    ImageUnavailable {
        /// Expected local path of the image.
        path: PathBuf,
        /// Why it could not be used.
        reason: String,
    },

    // Protocol errors
    /// VBoxManage output did not have the expected shape.
    #[error("could not recognise VBoxManage output for {what}: {reason}")]
    Parse {
        /// Which command's output was being parsed.
        what: String,
        /// What was wrong with it.
        reason: String,
    },

    // Configuration errors
    /// Failed to load configuration.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Failed to save configuration.
    #[error("failed to save config: {0}")]
    ConfigSave(String),

    /// Configuration values that cannot work together.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    // Command execution errors
    /// External command failed.
    #[error("command failed: {command}: {message}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Error message.
        message: String,
        /// Captured output of the command.
        output: String,
    },

    /// Output could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    // IO errors
    /// IO error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a machine error with a message.
    pub fn machine(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Machine {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a command failed error.
    pub fn command_failed(
        command: impl Into<String>,
        message: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
            output: output.into(),
        }
    }

    /// Create a parse error for the output of `what`.
    pub fn parse(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Prefix the message of a command failure with `context`.
    ///
    /// The captured output is kept. Other errors pass through unchanged.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Self::CommandFailed {
                command,
                message,
                output,
            } => Self::CommandFailed {
                command,
                message: format!("{}: {}", context, message),
                output,
            },
            other => other,
        }
    }

    /// Captured output of a failed external command, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}
