//! GPU error types.

use std::fmt;
use std::time::Duration;

use ash::vk;
use thiserror::Error;

use crate::format::ResourceFormat;

/// Stage of device initialization, reported when bring-up fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InitStage {
    Instance,
    PhysicalDevice,
    QueueFamilies,
    LogicalDevice,
    Allocator,
    Pools,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Instance => "creating the instance",
            Self::PhysicalDevice => "selecting a physical device",
            Self::QueueFamilies => "selecting queue families",
            Self::LogicalDevice => "creating the logical device",
            Self::Allocator => "initializing the memory allocator",
            Self::Pools => "creating resource pools",
        };
        f.write_str(text)
    }
}

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be loaded.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// The instance reported no physical devices.
    #[error("No physical device found")]
    NoPhysicalDevice,

    /// No queue family supports graphics and compute.
    #[error("No graphics queue found")]
    NoGraphicsQueue,

    /// No queue family supports transfer.
    #[error("No transfer queue found")]
    NoTransferQueue,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader code was rejected.
    #[error("Invalid shader: {0}")]
    InvalidShader(String),

    /// A resource description was rejected before any native call.
    #[error("Invalid description: {0}")]
    InvalidDescription(String),

    /// The abstract format has no native counterpart on this device.
    #[error("Format {0:?} is not supported by this device")]
    UnsupportedFormat(ResourceFormat),

    /// Handle refers to an object that no longer exists.
    #[error("Stale {0} handle")]
    StaleHandle(&'static str),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A fence did not signal within the configured timeout.
    #[error("Fence not signaled after {waited:?}")]
    FenceTimeout { waited: Duration },

    /// The device was lost and must be recreated.
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// Device bring-up failed; nothing created by the attempt is retained.
    #[error("Device initialization failed while {stage}: {source}")]
    Initialization {
        stage: InitStage,
        #[source]
        source: Box<GpuError>,
    },
}

impl GpuError {
    /// Whether this error means the device can no longer execute work.
    pub fn is_device_lost(&self) -> bool {
        match self {
            Self::Vulkan(vk::Result::ERROR_DEVICE_LOST)
            | Self::DeviceLost(_)
            | Self::FenceTimeout { .. } => true,
            Self::Initialization { source, .. } => source.is_device_lost(),
            _ => false,
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialization_error_names_stage_and_cause() {
        let err = GpuError::Initialization {
            stage: InitStage::QueueFamilies,
            source: Box::new(GpuError::NoGraphicsQueue),
        };
        assert_eq!(
            err.to_string(),
            "Device initialization failed while selecting queue families: No graphics queue found"
        );
    }

    #[test]
    fn device_lost_classification() {
        assert!(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_device_lost());
        assert!(GpuError::FenceTimeout {
            waited: Duration::from_secs(10)
        }
        .is_device_lost());
        assert!(!GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).is_device_lost());
    }
}
