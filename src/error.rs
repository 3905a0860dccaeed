//! Error handling for the meshlet pipeline
//!
//! A single error type for everything that can surface to a caller. Capacity
//! limits, degenerate triangles and non-manifold edges never show up here;
//! the clustering code recovers from those locally.

use std::error::Error as StdError;
use std::fmt;

/// Main error type for Hearth Meshlet
#[derive(Debug)]
pub enum EngineError {
    // Geometry Errors
    InvalidMesh(String),
    VertexOutOfRange {
        index: u32,
        vertex_count: usize,
    },

    // Resource Errors
    BufferAccess {
        index: usize,
        size: usize,
    },
    ShaderCompilation {
        source: String,
        error: String,
    },
    ResourceNotFound {
        resource_type: String,
        id: String,
    },
    ResourceExhausted(String),

    // GPU Errors
    DeviceNotFound,
    BufferCreationFailed {
        size: u64,
        usage: String,
    },
    TextureCreationFailed {
        width: u32,
        height: u32,
        reason: String,
    },
    GpuOperationFailed {
        operation: String,
        error: String,
    },
    BufferMapping {
        operation: String,
    },

    // Frame protocol
    StateError {
        expected: String,
        actual: String,
    },

    // Configuration Errors
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    // System Errors
    IoError {
        path: String,
        error: String,
    },
    ParseError {
        value: String,
        expected_type: String,
    },

    Internal {
        message: String,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidMesh(msg) => write!(f, "Invalid mesh: {}", msg),
            EngineError::VertexOutOfRange {
                index,
                vertex_count,
            } => write!(
                f,
                "Vertex index {} out of range for {} vertices",
                index, vertex_count
            ),

            EngineError::BufferAccess { index, size } => write!(
                f,
                "Buffer access out of bounds: index {} >= size {}",
                index, size
            ),
            EngineError::ShaderCompilation { source, error } => {
                write!(f, "Shader compilation failed for {}: {}", source, error)
            }
            EngineError::ResourceNotFound { resource_type, id } => {
                write!(f, "Resource not found: {} '{}'", resource_type, id)
            }
            EngineError::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),

            EngineError::DeviceNotFound => write!(f, "GPU device not found"),
            EngineError::BufferCreationFailed { size, usage } => {
                write!(f, "Buffer creation failed: size={}, usage={}", size, usage)
            }
            EngineError::TextureCreationFailed {
                width,
                height,
                reason,
            } => write!(
                f,
                "Texture creation failed for {}x{}: {}",
                width, height, reason
            ),
            EngineError::GpuOperationFailed { operation, error } => {
                write!(f, "GPU operation '{}' failed: {}", operation, error)
            }
            EngineError::BufferMapping { operation } => {
                write!(f, "Buffer mapping failed during {}", operation)
            }

            EngineError::StateError { expected, actual } => {
                write!(f, "State error: expected {}, actual {}", expected, actual)
            }

            EngineError::InvalidConfig {
                field,
                value,
                reason,
            } => write!(f, "Invalid config: {} = {} ({})", field, value, reason),

            EngineError::IoError { path, error } => write!(f, "IO error for {}: {}", path, error),
            EngineError::ParseError {
                value,
                expected_type,
            } => write!(
                f,
                "Parse error: '{}' is not a valid {}",
                value, expected_type
            ),

            EngineError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl StdError for EngineError {}

/// Type alias for Results in Hearth Meshlet
pub type EngineResult<T> = Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::IoError {
            path: String::new(),
            error: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(error: toml::de::Error) -> Self {
        EngineError::ParseError {
            value: error.message().to_string(),
            expected_type: "meshlet config".to_string(),
        }
    }
}

/// Convert Option to Result with context
pub trait OptionExt<T> {
    fn ok_or_engine<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_engine<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineError,
    {
        self.ok_or_else(f)
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> EngineResult<T>;
    fn with_context<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: fmt::Display,
{
    fn context(self, msg: &str) -> EngineResult<T> {
        self.map_err(|e| EngineError::Internal {
            message: format!("{}: {}", msg, e),
        })
    }

    fn with_context<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| EngineError::Internal {
            message: format!("{}: {}", f(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::BufferAccess { index: 10, size: 5 };
        assert_eq!(
            err.to_string(),
            "Buffer access out of bounds: index 10 >= size 5"
        );

        let err = EngineError::VertexOutOfRange {
            index: 7,
            vertex_count: 3,
        };
        assert_eq!(err.to_string(), "Vertex index 7 out of range for 3 vertices");
    }

    #[test]
    fn test_option_ext() {
        let opt: Option<i32> = None;
        let result = opt.ok_or_engine(|| EngineError::Internal {
            message: "test".to_string(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_error_context() {
        let result: Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        let err = result.context("loading config").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Internal error: loading config: file not found"
        );
    }

    #[test]
    fn test_toml_error_converts_to_parse_error() {
        let parsed: Result<toml::Value, toml::de::Error> = toml::from_str("a = ");
        let err: EngineError = parsed.unwrap_err().into();
        assert!(matches!(err, EngineError::ParseError { .. }));
    }
}
