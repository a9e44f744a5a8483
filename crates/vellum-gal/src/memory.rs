//! GPU memory management.

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::error::{GpuError, Result};

/// Sub-allocator shared by every buffer and image of one device.
///
/// Empty until [`init`](Self::init) and again after [`shutdown`](Self::shutdown).
#[derive(Default)]
pub struct GpuAllocator {
    allocator: Mutex<Option<Allocator>>,
}

impl GpuAllocator {
    /// Create the allocator for a freshly created device.
    pub fn init(
        &self,
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<()> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        *self.allocator.lock() = Some(allocator);
        Ok(())
    }

    /// Allocate memory for `requirements`.
    pub fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .lock()
            .as_mut()
            .ok_or_else(|| GpuError::invalid_state("allocator not initialized"))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    pub fn free(&self, allocation: Allocation) {
        let mut allocator = self.allocator.lock();
        let Some(allocator) = allocator.as_mut() else {
            tracing::warn!("Allocation freed after allocator shutdown");
            return;
        };
        if let Err(err) = allocator.free(allocation) {
            tracing::error!("Failed to free allocation: {err}");
        }
    }

    /// Drop the allocator, releasing all device memory.
    ///
    /// Must run before the device is destroyed. Leftover allocations are logged.
    pub fn shutdown(&self) {
        if let Some(allocator) = self.allocator.lock().take() {
            drop(allocator);
        }
    }
}

/// Copy `data` into a host-visible allocation at `offset`.
pub fn write_mapped(allocation: &mut Allocation, offset: u64, data: &[u8]) -> Result<()> {
    let size = allocation.size();
    let slice = allocation
        .mapped_slice_mut()
        .ok_or_else(|| GpuError::invalid_state("allocation is not host visible"))?;

    let end = offset
        .checked_add(data.len() as u64)
        .filter(|&end| end <= size)
        .ok_or_else(|| GpuError::invalid_state("write range exceeds allocation"))?;

    #[allow(clippy::cast_possible_truncation)]
    let (start, end) = (offset as usize, end as usize);
    let dst = slice
        .get_mut(start..end)
        .ok_or_else(|| GpuError::invalid_state("write range exceeds mapping"))?;
    dst.copy_from_slice(data);
    Ok(())
}
