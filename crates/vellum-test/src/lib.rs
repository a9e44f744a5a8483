//! Test harness for the Vellum device.
//!
//! Provides a recording fake backend and a fake window, so device behavior
//! can be checked on machines without a GPU.

pub mod fake;
pub mod window;

use std::time::Duration;

pub use fake::{
    fake_adapter, universal_queue_family, Event, FailPoint, FakeBackend, FakeConfig, GpuTiming,
    ImageRecord, ObjectKind, Submission, FAKE_TIMESTAMP_STEP,
};
pub use window::FakeWindow;

use thiserror::Error;
use vellum_gal::resources::SPIRV_MAGIC;
use vellum_gal::{Device, DeviceConfig, GpuError};

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Backend misuse: {0:?}")]
    Violations(Vec<String>),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Route `tracing` output to the test writer. Filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Device settings for tests: validation on, two frames in flight and
/// fence waits that give up quickly.
pub fn test_config() -> DeviceConfig {
    DeviceConfig::new("vellum-test")
        .with_debug_device(true)
        .with_frames_in_flight(2)
        .with_fence_timeout(Duration::from_millis(1), Duration::from_millis(3))
}

/// A ready device driving a clone of `backend`.
pub fn ready_device(backend: &FakeBackend) -> Result<Device<FakeBackend>> {
    ready_device_with(backend, test_config())
}

pub fn ready_device_with(
    backend: &FakeBackend,
    config: DeviceConfig,
) -> Result<Device<FakeBackend>> {
    init_tracing();
    Ok(Device::create(backend.clone(), config)?)
}

/// A minimal module that passes SPIR-V validation on the device side.
pub fn spirv(words: usize) -> Vec<u32> {
    let mut code = vec![0; words.max(1)];
    code[0] = SPIRV_MAGIC;
    code
}

/// Small deterministic generator for randomized sequences.
#[derive(Debug, Clone)]
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform in `0..bound`; `bound` must be non-zero.
    pub fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xorshift_is_deterministic() {
        let mut a = XorShift::new(7);
        let mut b = XorShift::new(7);
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        assert!(XorShift::new(0).below(10) < 10);
    }

    #[test]
    fn spirv_starts_with_magic() {
        assert_eq!(spirv(0), vec![SPIRV_MAGIC]);
        assert_eq!(spirv(4).len(), 4);
    }
}
