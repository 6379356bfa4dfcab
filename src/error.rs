//! Settings error types.

/// Result type alias for resolution operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors raised while registering sources or resolving settings values.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Invalid source or schema configuration, detected at registration time.
    #[error("invalid settings configuration: {0}")]
    Configuration(String),

    /// A field's value could not be prepared from a source.
    ///
    /// `origin` is context, not a cause; thiserror would treat a field
    /// named `source` as the `Error::source()` chain.
    #[error("error parsing value for field '{field}' from source {origin}: {reason}")]
    Resolution {
        origin: &'static str,
        field: String,
        reason: String,
    },

    /// Failed to read a file a source pointed at.
    #[error("failed to read '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse a structured config file.
    #[error("failed to parse config file '{path}': {reason}")]
    ParseFile { path: String, reason: String },

    /// A dotted config section was requested but absent from the file.
    #[error("cannot find section '{section}' in '{path}'")]
    SectionNotFound { section: String, path: String },

    /// Secrets directory does not exist and the policy demands it.
    #[error("secrets directory '{path}' does not exist")]
    SecretsDirMissing { path: String },

    /// Secrets path exists but is not a directory.
    #[error("secrets path '{path}' is not a directory")]
    SecretsNotADirectory { path: String },

    /// Combined size of all secrets files exceeds the configured ceiling.
    #[error("secrets directory size {actual} bytes exceeds limit of {limit} bytes")]
    SecretsSizeExceeded { limit: u64, actual: u64 },

    /// CLI arguments failed to parse and the source is in raise mode.
    #[error("error parsing CLI: {0}")]
    CliParse(String),

    /// Per-source failures collected when error aggregation is enabled.
    #[error("{} source(s) failed: {}", .0.len(), format_source_errors(.0))]
    Aggregate(Vec<SourceError>),

    /// The merged mapping was rejected by deserialization.
    #[error("settings validation failed: {0}")]
    Validation(#[from] serde_json::Error),
}

/// One source's failure, captured in aggregation mode.
#[derive(Debug)]
pub struct SourceError {
    pub source: String,
    pub error: Box<SettingsError>,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.source, self.error)
    }
}

fn format_source_errors(errors: &[SourceError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_error_names_field_and_source() {
        let err = SettingsError::Resolution {
            origin: "EnvSource",
            field: "timeout".to_string(),
            reason: "expected JSON".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("timeout"));
        assert!(msg.contains("EnvSource"));
    }

    #[test]
    fn only_wrapped_errors_expose_a_cause_chain() {
        let read = SettingsError::ReadFile {
            path: "/etc/app/settings.toml".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(std::error::Error::source(&read).is_some());

        let flat = SettingsError::Resolution {
            origin: "EnvSource",
            field: "timeout".to_string(),
            reason: "expected JSON".to_string(),
        };
        assert!(std::error::Error::source(&flat).is_none());
    }

    #[test]
    fn aggregate_error_lists_every_source() {
        let err = SettingsError::Aggregate(vec![
            SourceError {
                source: "DotenvSource".to_string(),
                error: Box::new(SettingsError::Configuration("bad prefix".to_string())),
            },
            SourceError {
                source: "SecretsDirSource".to_string(),
                error: Box::new(SettingsError::SecretsDirMissing {
                    path: "/run/secrets".to_string(),
                }),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 source(s) failed"));
        assert!(msg.contains("[DotenvSource]"));
        assert!(msg.contains("[SecretsDirSource]"));
    }
}
