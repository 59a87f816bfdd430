//! Error types for the dialogue composition engine.

/// Result type alias for dialogue operations
pub type DialogueResult<T> = Result<T, DialogueError>;

/// Main error type for dialogue composition
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DialogueError {
    /// A script line could not be parsed
    #[error("Parse error at line {line}: {reason} (`{content}`)")]
    Parse {
        /// 1-based line number in the script
        line: usize,
        /// Raw line content
        content: String,
        /// What was wrong with the line
        reason: String,
    },

    /// A speech line names a speaker with no resolvable voice
    #[error("Unknown speaker '{label}' at line {line}")]
    UnknownSpeaker {
        /// The speaker label as written in the script
        label: String,
        /// 1-based line number of the first occurrence
        line: usize,
    },

    /// A synthesis backend failed
    #[error("TTS synthesis failed: {message}")]
    Synthesis {
        /// Error message describing the failure
        message: String,
    },

    /// Network error talking to a remote backend
    #[error("Network error: {message}")]
    Network {
        /// Error message describing the network issue
        message: String,
    },

    /// Timeout error
    #[error("Operation timed out: {message}")]
    Timeout {
        /// Error message describing the timeout
        message: String,
    },

    /// Malformed audio reached the assembler
    #[error("Assembly error: {message}")]
    Assembly {
        /// Error message describing the contract violation
        message: String,
    },

    /// Synthesis cache failure
    #[error("Cache error: {message}")]
    Cache {
        /// Error message describing the cache failure
        message: String,
    },

    /// File I/O error
    #[error("File I/O error: {message}")]
    File {
        /// Error message describing the file operation failure
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Invalid input error
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Error message describing the invalid input
        message: String,
    },

    /// The run was cancelled before it completed
    #[error("Composition cancelled")]
    Cancelled,

    /// Thread or concurrency error
    #[error("Concurrency error: {message}")]
    Concurrency {
        /// Error message describing the concurrency issue
        message: String,
    },
}

impl DialogueError {
    /// Create a new parse error
    #[must_use]
    pub fn parse<C: Into<String>, R: Into<String>>(line: usize, content: C, reason: R) -> Self {
        Self::Parse {
            line,
            content: content.into(),
            reason: reason.into(),
        }
    }

    /// Create a new unknown speaker error
    #[must_use]
    pub fn unknown_speaker<S: Into<String>>(label: S, line: usize) -> Self {
        Self::UnknownSpeaker {
            label: label.into(),
            line,
        }
    }

    /// Create a new synthesis error
    #[must_use]
    pub fn synthesis<S: Into<String>>(message: S) -> Self {
        Self::Synthesis {
            message: message.into(),
        }
    }

    /// Create a new network error
    #[must_use]
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    #[must_use]
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a new assembly error
    #[must_use]
    pub fn assembly<S: Into<String>>(message: S) -> Self {
        Self::Assembly {
            message: message.into(),
        }
    }

    /// Create a new cache error
    #[must_use]
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a new file error
    #[must_use]
    pub fn file<S: Into<String>>(message: S) -> Self {
        Self::File {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    #[must_use]
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new invalid input error
    #[must_use]
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a new concurrency error
    #[must_use]
    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        Self::Concurrency {
            message: message.into(),
        }
    }

    /// Check if a failed backend call with this error should be retried
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Synthesis { .. } | Self::Network { .. } | Self::Timeout { .. }
        )
    }

    /// Check if this error aborts a whole composition rather than one line
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. }
                | Self::UnknownSpeaker { .. }
                | Self::Assembly { .. }
                | Self::Configuration { .. }
                | Self::Cancelled
                | Self::Concurrency { .. }
        )
    }

    /// Get the error category for logging
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::UnknownSpeaker { .. } => "speaker",
            Self::Synthesis { .. } => "synthesis",
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::Assembly { .. } => "assembly",
            Self::Cache { .. } => "cache",
            Self::File { .. } => "file",
            Self::Configuration { .. } => "configuration",
            Self::InvalidInput { .. } => "input",
            Self::Cancelled => "cancelled",
            Self::Concurrency { .. } => "concurrency",
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for DialogueError {
    fn from(err: std::io::Error) -> Self {
        Self::file(err.to_string())
    }
}

impl From<hound::Error> for DialogueError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(io) => Self::file(io.to_string()),
            other => Self::invalid_input(format!("WAV data error: {other}")),
        }
    }
}

impl From<tokio::time::error::Elapsed> for DialogueError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::timeout(format!("Operation timed out: {err}"))
    }
}

impl From<serde_json::Error> for DialogueError {
    fn from(err: serde_json::Error) -> Self {
        Self::file(format!("JSON serialization error: {err}"))
    }
}

impl From<toml::de::Error> for DialogueError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(format!("Invalid TOML: {err}"))
    }
}

impl From<reqwest::Error> for DialogueError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}
