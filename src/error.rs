//! Error types shared across the crate.

use thiserror::Error;

/// Errors produced by the GPU layer.
///
/// Recoverable conditions (swapchain going out of date) never surface here;
/// they are absorbed by the frame pipeline. Everything below either aborts
/// initialization, rejects a bad call, or signals a fatal device condition.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to initialize: {0}")]
    InitializationFailed(String),
    #[error("Failed to create resource: {0}")]
    ResourceCreationFailed(String),
    #[error("Failed to allocate GPU memory: {0}")]
    AllocationFailed(String),
    #[error("Resource pool exhausted: {0}")]
    PoolExhausted(&'static str),
    #[error("Binding table capacity exceeded: {0}")]
    BindingCapacityExceeded(&'static str),
    #[error("Timed out waiting for frame fence")]
    FenceTimeout,
    #[error("Device lost")]
    DeviceLost,
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Vulkan error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = Error::ResourceCreationFailed("Failed to create image: ERROR_UNKNOWN".into());
        assert!(err.to_string().contains("Failed to create image"));

        let err = Error::PoolExhausted("texture pool");
        assert!(err.to_string().contains("texture pool"));
    }
}
