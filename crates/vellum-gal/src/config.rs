//! Device configuration.

use std::time::Duration;

/// Upper bound on the per-frame ring size.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Options for bringing up a [`Device`](crate::Device).
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Enable the validation layer and debug-utils messenger when available
    /// (default: debug builds only).
    pub debug_device: bool,
    /// Number of per-frame slots in the ring.
    pub frames_in_flight: usize,
    /// Length of one blocking fence wait before a stall is logged.
    pub fence_wait_slice: Duration,
    /// Total time a fence may stay unsignaled before the device is declared lost.
    pub fence_timeout: Duration,
    /// Smallest staging buffer the staging pool creates.
    pub staging_buffer_min_size: u64,
    /// Descriptor sets per native descriptor pool.
    pub descriptor_sets_per_pool: u32,
    /// Timestamp queries per native query pool.
    pub timestamps_per_pool: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Vellum".to_string(),
            debug_device: cfg!(debug_assertions),
            frames_in_flight: 2,
            fence_wait_slice: Duration::from_secs(1),
            fence_timeout: Duration::from_secs(10),
            staging_buffer_min_size: 64 * 1024,
            descriptor_sets_per_pool: 1024,
            timestamps_per_pool: 64,
        }
    }
}

impl DeviceConfig {
    /// Create a config with the given application name.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable or disable validation and debug labels.
    pub fn with_debug_device(mut self, debug: bool) -> Self {
        self.debug_device = debug;
        self
    }

    /// Set the ring size; clamped to `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.clamp(1, MAX_FRAMES_IN_FLIGHT);
        self
    }

    /// Set the fence stall policy.
    pub fn with_fence_timeout(mut self, slice: Duration, timeout: Duration) -> Self {
        self.fence_wait_slice = slice;
        self.fence_timeout = timeout.max(slice);
        self
    }

    pub fn with_staging_buffer_min_size(mut self, size: u64) -> Self {
        self.staging_buffer_min_size = size.max(1);
        self
    }

    pub fn with_descriptor_sets_per_pool(mut self, sets: u32) -> Self {
        self.descriptor_sets_per_pool = sets.max(1);
        self
    }

    pub fn with_timestamps_per_pool(mut self, queries: u32) -> Self {
        self.timestamps_per_pool = queries.max(1);
        self
    }

    pub(crate) fn ring_size(&self) -> usize {
        self.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }
}
