use thiserror::Error;

/// A refusal from the underlying device, carried to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (status {code:#010x})")]
pub struct PlatformError {
    /// Status code as the platform reported it.
    pub code: i32,
    pub message: String,
}

impl PlatformError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors surfaced by [`crate::ShaderSession`].
///
/// Missing or broken fix files never show up here. They are logged and the original shader is
/// used instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShaderFixError {
    #[error("underlying device failed to create object: {0}")]
    Platform(#[from] PlatformError),
}

impl ShaderFixError {
    /// The platform status code, for callers that must hand it back verbatim.
    pub fn platform_code(&self) -> i32 {
        match self {
            ShaderFixError::Platform(err) => err.code,
        }
    }
}
