/*!
 * Error handling for BPA export operations
 *
 * Row-level problems never surface here: malformed cells degrade to
 * best-effort values inside the pipeline. These errors cover the edges,
 * meaning files, configuration, header validation and output.
 */

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// BPA library result type
pub type Result<T> = std::result::Result<T, BpaError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum BpaError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// Header (record 01) values that would produce a rejected file
    #[error("Invalid header: {}", problems.join("; "))]
    InvalidHeader {
        problems: Vec<String>,
    },

    /// Column mapping that cannot be applied to the input
    #[error("Invalid column mapping for '{field}': {message}")]
    InvalidMapping {
        field: String,
        message: String,
    },

    /// Unknown format selector
    #[error("Invalid mode '{value}'")]
    InvalidMode {
        value: String,
        valid_options: Vec<String>,
    },

    /// No raw input was supplied to a batch
    #[error("No input data: {message}")]
    MissingInput {
        message: String,
        suggestion: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// Export errors
    #[error("Export error: {message}")]
    Export {
        message: String,
        path: Option<PathBuf>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file_path {
            Some(path) => write!(f, "file {}", path.display()),
            None => Ok(()),
        }
    }
}

impl BpaError {
    /// Create an I/O error that remembers which file was involved
    pub fn io_at(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::Io {
            message: format!("{} ({})", source, path.display()),
            source,
            context: ErrorContext {
                file_path: Some(path),
            },
        }
    }

    /// Create an invalid mode error listing the accepted selectors
    pub fn invalid_mode(value: &str) -> Self {
        Self::InvalidMode {
            value: value.to_string(),
            valid_options: vec![
                "BPA-C (consolidated)".to_string(),
                "BPA-I (individualized)".to_string(),
            ],
        }
    }

    /// Create a missing input error
    pub fn missing_input() -> Self {
        Self::MissingInput {
            message: "no delimited text was provided".to_string(),
            suggestion: "Use .input_text() or .input_file() before calling .build()".to_string(),
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidHeader { problems } => {
                let bullets: Vec<String> = problems.iter().map(|p| format!("  - {}", p)).collect();
                format!("Invalid header:\n{}", bullets.join("\n"))
            }
            Self::InvalidMode { valid_options, .. } => {
                format!("{}\n\nValid options: {}", self, valid_options.join(", "))
            }
            Self::MissingInput { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::Configuration { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for BpaError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<serde_json::Error> for BpaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Export {
            message: format!("JSON serialization failed: {}", err),
            path: None,
        }
    }
}

impl From<config::ConfigError> for BpaError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration {
            message: err.to_string(),
            suggestion: Some("Check the TOML file and BPA_* environment variables".to_string()),
        }
    }
}
