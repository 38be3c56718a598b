//! Typed error handling for trimtrace.
//!
//! Invariant violations (a one-time graph mutation applied twice, a
//! classifier handing out two reasons for one method, a broken BFS parent
//! chain) are never recovered from: they bubble up with `?` and end the run.
//! Everything else carries enough context to report and move on.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for trimtrace operations.
#[derive(Error, Debug)]
pub enum TrimtraceError {
    /// I/O error when reading/writing files
    #[error("I/O error at {path}: {message}")]
    Io {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Malformed fact file
    #[error("Fact file error at {path}: {message}")]
    Facts { path: PathBuf, message: String },

    /// Configuration or rule table errors
    #[error("Config error at {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// A rule in the rule table could not be compiled
    #[error("Rule error: {message}")]
    Rule { message: String },

    /// Two independent rules gave one method different reasons
    #[error("Conflicting reasons for {method}: '{first}' and '{second}'")]
    ConflictingReasons {
        method: String,
        first: String,
        second: String,
    },

    /// A structural invariant of the engine was violated
    #[error("Invariant violated: {message}")]
    Invariant { message: String },

    /// Failure while producing the report
    #[error("Report error: {message}")]
    Report { message: String },

    /// The report sink rejected a write
    #[error("Write to report sink failed: {source}")]
    Sink {
        #[from]
        source: std::io::Error,
    },
}

impl TrimtraceError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create a fact file error.
    pub fn facts(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Facts {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a rule compilation error.
    pub fn rule(message: impl Into<String>) -> Self {
        Self::Rule {
            message: message.into(),
        }
    }

    /// Create an invariant violation.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Create a report error.
    pub fn report(message: impl Into<String>) -> Self {
        Self::Report {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error (the run may continue).
    ///
    /// Invariant violations and reason conflicts are programming errors
    /// and always abort. So do report and sink failures.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Get the path associated with this error, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            Self::Facts { path, .. } => Some(path),
            Self::Config { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Convenience type alias for trimtrace results.
pub type TrimtraceResult<T> = Result<T, TrimtraceError>;

/// Extension trait for converting std::io::Error with path context.
pub trait IoResultExt<T> {
    /// Add path context to an I/O error.
    fn with_path(self, path: impl Into<PathBuf>) -> TrimtraceResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> TrimtraceResult<T> {
        self.map_err(|e| TrimtraceError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error() {
        let err = TrimtraceError::io(
            PathBuf::from("/facts/app.json"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        );
        assert!(matches!(err, TrimtraceError::Io { .. }));
        assert_eq!(err.path(), Some(&PathBuf::from("/facts/app.json")));
        assert!(err.to_string().contains("/facts/app.json"));
    }

    #[test]
    fn test_conflicting_reasons_message() {
        let err = TrimtraceError::ConflictingReasons {
            method: "Foo::Bar()".into(),
            first: "DispatchProxy".into(),
            second: "GetMethod".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Foo::Bar()"));
        assert!(msg.contains("DispatchProxy"));
        assert!(msg.contains("GetMethod"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(TrimtraceError::config("/trimtrace.toml", "bad").is_recoverable());
        assert!(!TrimtraceError::invariant("constructor edges added twice").is_recoverable());
        assert!(!TrimtraceError::ConflictingReasons {
            method: "m".into(),
            first: "a".into(),
            second: "b".into(),
        }
        .is_recoverable());
    }

    #[test]
    fn test_sink_write_failure_is_fatal() {
        let err: TrimtraceError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert!(matches!(err, TrimtraceError::Sink { .. }));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("pipe closed"));
        assert!(!TrimtraceError::report("consumer panicked").is_recoverable());
    }

    #[test]
    fn test_io_result_ext() {
        let result: std::io::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        let mapped = result.with_path("/missing/facts.json");
        assert!(matches!(mapped, Err(TrimtraceError::Io { .. })));
    }
}
