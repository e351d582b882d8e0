use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Course export is unusable: {message}")]
    CourseDataError { message: String },

    #[error("Dose grid mismatch in {context}: expected {expected} voxels, found {found}")]
    DoseGridMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Course source returned HTTP {status} for {location}")]
    SourceStatusError { location: String, status: u16 },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Network,
    Io,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CheckError {
    pub fn course(message: impl Into<String>) -> Self {
        CheckError::CourseDataError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CheckError::ConfigValidationError { .. }
            | CheckError::InvalidConfigValueError { .. }
            | CheckError::MissingConfigError { .. } => ErrorCategory::Configuration,
            CheckError::CourseDataError { .. }
            | CheckError::DoseGridMismatch { .. }
            | CheckError::SerializationError(_) => ErrorCategory::Input,
            CheckError::HttpError(_) | CheckError::SourceStatusError { .. } => {
                ErrorCategory::Network
            }
            CheckError::IoError(_) | CheckError::ZipError(_) => ErrorCategory::Io,
            CheckError::CsvError(_) | CheckError::ProcessingError { .. } => {
                ErrorCategory::Processing
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            // 網路錯誤通常重試即可
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Configuration | ErrorCategory::Input => ErrorSeverity::High,
            ErrorCategory::Processing => ErrorSeverity::High,
            ErrorCategory::Io => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            CheckError::ConfigValidationError { .. }
            | CheckError::InvalidConfigValueError { .. }
            | CheckError::MissingConfigError { .. } => {
                "Check the protocol TOML file and command line flags"
            }
            CheckError::CourseDataError { .. } | CheckError::SerializationError(_) => {
                "Re-export the treatment course and make sure all fraction doses are computed"
            }
            CheckError::DoseGridMismatch { .. } => {
                "Recompute the deformed fraction doses on the planning examination grid"
            }
            CheckError::HttpError(_) | CheckError::SourceStatusError { .. } => {
                "Check that the export endpoint is reachable and retry"
            }
            CheckError::IoError(_) | CheckError::ZipError(_) => {
                "Check file permissions and available disk space"
            }
            CheckError::CsvError(_) | CheckError::ProcessingError { .. } => {
                "Run again with --verbose and report the log to the physics team"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Input => format!("The treatment course could not be evaluated: {}", self),
            ErrorCategory::Network => format!("Could not fetch the course export: {}", self),
            ErrorCategory::Io => format!("File system error: {}", self),
            ErrorCategory::Processing => format!("Processing failed: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, CheckError>;
