//! Windowing abstraction consumed by swap chains.

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::Result;

/// A window the device can present into.
///
/// Shared as `Arc<dyn SurfaceProvider>`. A surface waiting for deferred
/// destruction holds one reference, so the window outlives its native surface.
pub trait SurfaceProvider: Send + Sync {
    fn raw_display_handle(&self) -> Result<RawDisplayHandle>;

    fn raw_window_handle(&self) -> Result<RawWindowHandle>;

    /// Current drawable size in pixels.
    fn inner_size(&self) -> (u32, u32);
}
