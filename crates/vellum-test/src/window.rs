//! A window without a display server behind it.

use std::ffi::c_ulong;
use std::sync::Arc;

use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle, XlibDisplayHandle, XlibWindowHandle};
use vellum_gal::{Result, SurfaceProvider};

/// Reports Xlib handles and a size tests can change.
#[derive(Debug)]
pub struct FakeWindow {
    id: c_ulong,
    size: Mutex<(u32, u32)>,
}

impl FakeWindow {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            id: 0x5000,
            size: Mutex::new((width, height)),
        })
    }

    pub fn resize(&self, width: u32, height: u32) {
        *self.size.lock() = (width, height);
    }
}

impl SurfaceProvider for FakeWindow {
    fn raw_display_handle(&self) -> Result<RawDisplayHandle> {
        Ok(RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0)))
    }

    fn raw_window_handle(&self) -> Result<RawWindowHandle> {
        Ok(RawWindowHandle::Xlib(XlibWindowHandle::new(self.id)))
    }

    fn inner_size(&self) -> (u32, u32) {
        *self.size.lock()
    }
}
