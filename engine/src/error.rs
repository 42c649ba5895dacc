use std::io;

use rundown::LoadError;
use thiserror::Error;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    /// A script failed.
    ScriptFailed = 1,
    /// A `stop-fail` annotation stopped the run.
    StopFail = 2,
    /// Unknown section, unknown or invalid option, or an invalid annotation.
    Invocation = 127,
    /// Arguments that could not be parsed.
    Argument = 128,
    Internal = 129,
    /// Interrupted with Ctrl-C.
    Cancelled = 130,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid annotation: {0}")]
    Annotation(String),

    #[error("unknown section '{0}'")]
    UnknownSection(String),

    #[error("unknown option --{option}{}", section_suffix(section))]
    UnknownOption {
        option: String,
        section: Option<String>,
    },

    #[error("missing required option --{option}{}", section_suffix(section))]
    MissingOption {
        option: String,
        section: Option<String>,
    },

    #[error("invalid value for option --{option}: {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("unexpected argument '{0}'")]
    Argument(String),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Internal(String),
}

fn section_suffix(section: &Option<String>) -> String {
    match section {
        Some(name) => format!(" for section '{name}'"),
        None => String::new(),
    }
}

impl EngineError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            EngineError::Annotation(_)
            | EngineError::UnknownSection(_)
            | EngineError::UnknownOption { .. }
            | EngineError::MissingOption { .. }
            | EngineError::InvalidOption { .. }
            | EngineError::Load(_) => ExitCode::Invocation,
            EngineError::Argument(_) => ExitCode::Argument,
            EngineError::Io(_) | EngineError::Internal(_) => ExitCode::Internal,
        }
    }
}

impl From<nix::Error> for EngineError {
    fn from(e: nix::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_option_message_names_option() {
        let err = EngineError::InvalidOption {
            option: "env".into(),
            reason: "must be one of dev, prod, got `staging`".into(),
        };
        let message = err.to_string();
        assert!(message.contains("--env"));
        assert!(message.contains("dev, prod"));
        assert_eq!(err.exit_code().code(), 127);
    }

    #[test]
    fn unknown_option_mentions_section() {
        let err = EngineError::UnknownOption {
            option: "nope".into(),
            section: Some("deploy".into()),
        };
        assert_eq!(err.to_string(), "unknown option --nope for section 'deploy'");
        assert_eq!(err.exit_code(), ExitCode::Invocation);
    }

    #[test]
    fn infrastructure_failures_are_internal() {
        let err = EngineError::from(nix::Error::ENOENT);
        assert_eq!(err.exit_code().code(), 129);
        let err = EngineError::Argument("x".into());
        assert_eq!(err.exit_code().code(), 128);
    }
}
