use thiserror::Error;

/// Error type for the permgate root binary, aggregating the library
/// crates' errors with configuration and I/O failures.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("permission error: {0}")]
    Permission(#[from] permgate_policy::PermissionError),

    #[error("collaborator error: {0}")]
    Core(#[from] permgate_core::CoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RootError {
    fn from(e: serde_json::Error) -> Self {
        RootError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RootError {
    fn from(e: toml::de::Error) -> Self {
        RootError::Config(format!("TOML parse error: {}", e))
    }
}

pub type RootResult<T> = Result<T, RootError>;

#[cfg(test)]
mod tests {
    use super::*;
    use permgate_core::PermissionId;
    use permgate_policy::PermissionError;

    #[test]
    fn test_root_error_config() {
        let err = RootError::Config("evaluation_timeout_ms must be > 0".into());
        assert_eq!(
            err.to_string(),
            "configuration error: evaluation_timeout_ms must be > 0"
        );
    }

    #[test]
    fn test_root_error_from_permission_error() {
        let err: RootError = PermissionError::NotFound(PermissionId::new("p9")).into();
        assert_eq!(err.to_string(), "permission error: permission not found: p9");
    }

    #[test]
    fn test_root_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: RootError = json_err.into();
        assert!(matches!(err, RootError::Serialization(_)));
    }

    #[test]
    fn test_root_error_from_toml() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: RootError = toml_err.into();
        assert!(err.to_string().starts_with("configuration error: TOML parse error"));
    }

    #[test]
    fn test_root_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "seed missing");
        let err: RootError = io_err.into();
        assert_eq!(err.to_string(), "io error: seed missing");
    }
}
