//! Domain-specific error types for sandbox manager operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

/// Result alias used across the crate.
pub type Result<T, E = ManagerError> = std::result::Result<T, E>;

/// Errors that can occur while managing sandboxes.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Configuration is missing or malformed.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// A sandbox type tag was registered twice.
    #[error("Sandbox type already registered: {sandbox_type}")]
    DuplicateSandboxType { sandbox_type: String },

    /// No sandbox is registered under the requested type tag.
    #[error("Unknown sandbox type: {sandbox_type}")]
    UnknownSandboxType { sandbox_type: String },

    /// A container with the generated name already exists on the backend.
    #[error("Container name already in use: {name}")]
    NameCollision { name: String },

    /// Container backend operation failed (create, start, inspect, etc.).
    #[error("Container backend error: {message}")]
    Backend { message: String },

    /// Mapping or pool store operation failed.
    #[error("Mapping store error: {message}")]
    Store { message: String },

    /// Session storage transfer failed.
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Tool server request failed.
    #[error("Tool client error: {message}")]
    ToolClient { message: String },

    /// Neither the pool nor a fresh create produced a sandbox.
    #[error("No sandbox available: {message}")]
    NoSandboxAvailable { message: String },

    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl ManagerError {
    /// Creates a `Config` error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a `DuplicateSandboxType` error.
    pub fn duplicate_sandbox_type(sandbox_type: impl Into<String>) -> Self {
        Self::DuplicateSandboxType {
            sandbox_type: sandbox_type.into(),
        }
    }

    /// Creates an `UnknownSandboxType` error.
    pub fn unknown_sandbox_type(sandbox_type: impl Into<String>) -> Self {
        Self::UnknownSandboxType {
            sandbox_type: sandbox_type.into(),
        }
    }

    /// Creates a `NameCollision` error.
    pub fn name_collision(name: impl Into<String>) -> Self {
        Self::NameCollision { name: name.into() }
    }

    /// Creates a `Backend` error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a `Store` error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a `Storage` error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a `ToolClient` error.
    pub fn tool_client(message: impl Into<String>) -> Self {
        Self::ToolClient {
            message: message.into(),
        }
    }

    /// Creates a `NoSandboxAvailable` error.
    pub fn no_sandbox_available(message: impl Into<String>) -> Self {
        Self::NoSandboxAvailable {
            message: message.into(),
        }
    }

    /// Returns true if this is a container name collision.
    pub fn is_name_collision(&self) -> bool {
        matches!(self, Self::NameCollision { .. })
    }

    /// Returns true if this is a duplicate registration error.
    pub fn is_duplicate_sandbox_type(&self) -> bool {
        matches!(self, Self::DuplicateSandboxType { .. })
    }

    /// Returns true if the pool and the fallback create both came up empty.
    pub fn is_no_sandbox_available(&self) -> bool {
        matches!(self, Self::NoSandboxAvailable { .. })
    }
}

impl From<bollard::errors::Error> for ManagerError {
    fn from(err: bollard::errors::Error) -> Self {
        Self::backend(err.to_string())
    }
}

impl From<redis::RedisError> for ManagerError {
    fn from(err: redis::RedisError) -> Self {
        Self::store(err.to_string())
    }
}

impl From<reqwest::Error> for ManagerError {
    fn from(err: reqwest::Error) -> Self {
        Self::tool_client(err.to_string())
    }
}
