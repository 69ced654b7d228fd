/*!
 * Error handling for dental-desert data operations
 *
 * Only the edges of the pipeline (reading inputs, writing outputs, talking to
 * the live lookup service) produce errors. The fusion stages themselves never
 * fail; they degrade to warnings and sentinel values instead.
 */

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Library result type
pub type Result<T> = std::result::Result<T, DesertError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum DesertError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// CSV parsing errors with location information
    #[error("CSV parsing error at line {line:?}: {message}")]
    CsvParse {
        message: String,
        line: Option<usize>,
        context: ErrorContext,
    },

    /// Data validation errors with detailed information
    #[error("Data validation error: {message}")]
    DataValidation {
        message: String,
        field: Option<String>,
        value: Option<String>,
        context: ErrorContext,
    },

    /// File not found with suggestions
    #[error("File not found: {path}")]
    FileNotFound {
        path: PathBuf,
        suggestion: String,
    },

    /// Required columns missing from an input table
    #[error("Schema mismatch in {table}: missing columns {missing:?}")]
    SchemaMismatch {
        table: String,
        missing: Vec<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// JSON / GeoJSON (de)serialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        context: ErrorContext,
    },

    /// Live postcode lookup failures
    #[error("Live lookup failed for '{postcode}': {message}")]
    LiveLookup {
        postcode: String,
        message: String,
    },

    /// Generic errors with custom message
    #[error("{message}")]
    Custom {
        message: String,
        suggestion: Option<String>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line_number: Option<usize>,
    pub column_name: Option<String>,
}

impl ErrorContext {
    /// Context pointing at a file
    pub fn for_file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Attach a line number
    pub fn at_line(mut self, line: usize) -> Self {
        self.line_number = Some(line);
        self
    }

    /// Attach the offending column
    pub fn in_column<S: Into<String>>(mut self, column: Option<S>) -> Self {
        self.column_name = column.map(Into::into);
        self
    }
}

impl DesertError {
    /// Create a file not found error with helpful suggestion
    pub fn file_not_found_with_suggestion(path: PathBuf) -> Self {
        let name = path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let suggestion = match name.as_str() {
            "practices.csv" => format!(
                "Check that '{}' exists. It is produced by the practice directory fetch step \
                and needs the columns practice_id, practice_name, address, postcode.",
                path.display()
            ),
            "population.csv" | "imd.csv" => format!(
                "Check that '{}' exists. Population and deprivation tables are keyed by \
                namespaced fine-area codes such as 'LSOA::E01000001'.",
                path.display()
            ),
            _ => format!(
                "Check if the file exists at '{}'. Make sure the path is correct and you have read permissions.",
                path.display()
            ),
        };

        Self::FileNotFound { path, suggestion }
    }

    /// Create a schema mismatch error for a table
    pub fn missing_columns(table: &str, missing: Vec<String>) -> Self {
        Self::SchemaMismatch {
            table: table.to_string(),
            missing,
        }
    }

    /// Point the error's context at `path`, for variants that carry one
    pub fn in_file(mut self, path: &Path) -> Self {
        match &mut self {
            Self::Io { context, .. }
            | Self::CsvParse { context, .. }
            | Self::DataValidation { context, .. }
            | Self::Serialization { context, .. } => {
                context.file_path = Some(path.to_path_buf());
            }
            _ => {}
        }
        self
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::FileNotFound { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::SchemaMismatch { .. } => {
                format!("{}\n\nSuggestion: column names are matched case-sensitively; check the header row", self)
            }
            Self::Configuration { suggestion: Some(sug), .. }
            | Self::Custom { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for DesertError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<csv::Error> for DesertError {
    fn from(err: csv::Error) -> Self {
        let (line, message) = match err.position() {
            Some(pos) => (Some(pos.line() as usize), err.to_string()),
            None => (None, err.to_string()),
        };

        Self::CsvParse {
            message,
            line,
            context: ErrorContext::default(),
        }
    }
}

impl From<serde_json::Error> for DesertError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
            context: ErrorContext {
                line_number: Some(err.line()),
                ..Default::default()
            },
        }
    }
}
