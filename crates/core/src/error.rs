use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Transport,
    InvalidHandle,
    NotFound,
    ClassificationMiss,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Transport => "transport",
            Self::InvalidHandle => "invalid_handle",
            Self::NotFound => "not_found",
            Self::ClassificationMiss => "classification_miss",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::Config)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed reading dialogue script {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dialogue script is not valid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("dialogue script is invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("unknown dialogue topic: {0}")]
    UnknownTopic(String),
}

impl DialogueError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_name_the_variable() {
        let err = ConfigError::Missing("RELAY_LINE_ACCESS_TOKEN");
        assert_eq!(
            err.to_string(),
            "required environment variable RELAY_LINE_ACCESS_TOKEN is not set"
        );
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!err.kind().is_recoverable());
    }

    #[test]
    fn only_config_is_fatal() {
        for kind in [
            ErrorKind::Transport,
            ErrorKind::InvalidHandle,
            ErrorKind::NotFound,
            ErrorKind::ClassificationMiss,
            ErrorKind::Timeout,
        ] {
            assert!(kind.is_recoverable(), "{}", kind.as_str());
        }
    }
}
