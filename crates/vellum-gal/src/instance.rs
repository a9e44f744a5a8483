//! Vulkan instance helpers: name conversion, validation output, adapter queries.

use std::borrow::Cow;
use std::ffi::{c_void, CStr, CString};

use ash::vk;

use crate::backend::{AdapterInfo, MemoryHeap};
use crate::error::{GpuError, Result};

pub(crate) fn c_strings(names: &[String]) -> Result<Vec<CString>> {
    names
        .iter()
        .map(|name| {
            CString::new(name.as_str())
                .map_err(|_| GpuError::InvalidDescription(format!("name contains NUL: {name}")))
        })
        .collect()
}

pub(crate) fn extension_names(properties: &[vk::ExtensionProperties]) -> Vec<String> {
    properties
        .iter()
        .filter_map(|props| props.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

pub(crate) fn layer_names(properties: &[vk::LayerProperties]) -> Vec<String> {
    properties
        .iter()
        .filter_map(|props| props.layer_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Messenger settings routing validation output into `tracing`.
pub(crate) fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || unsafe { (*data).p_message.is_null() } {
        Cow::Borrowed("<no message>")
    } else {
        unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "[{kind:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "[{kind:?}] {message}");
    } else {
        tracing::debug!(target: "vulkan", "[{kind:?}] {message}");
    }
    vk::FALSE
}

/// Gather everything the device needs about one physical device.
///
/// # Safety
/// The instance and physical device must be valid.
pub(crate) unsafe fn query_adapter(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> AdapterInfo {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let features = unsafe { instance.get_physical_device_features(physical_device) };
    let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "Unknown GPU".to_string());
    let memory_heaps = memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .map(|heap| MemoryHeap {
            size: heap.size,
            device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
        })
        .collect();

    AdapterInfo {
        name,
        vendor_id: properties.vendor_id,
        device_type: properties.device_type,
        api_version: properties.api_version,
        driver_version: properties.driver_version,
        limits: properties.limits,
        features,
        memory_heaps,
        queue_families,
    }
}

/// Rank adapters; higher is better.
pub(crate) fn score_adapter(adapter: &AdapterInfo) -> u64 {
    let mut score = match adapter.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };

    // +1 per GB of VRAM
    let vram: u64 = adapter
        .memory_heaps
        .iter()
        .filter(|heap| heap.device_local)
        .map(|heap| heap.size)
        .sum();
    score += vram / (1024 * 1024 * 1024);
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(device_type: vk::PhysicalDeviceType, vram_gb: u64) -> AdapterInfo {
        AdapterInfo {
            name: "test".to_string(),
            vendor_id: 0,
            device_type,
            api_version: vk::API_VERSION_1_1,
            driver_version: 0,
            limits: vk::PhysicalDeviceLimits::default(),
            features: vk::PhysicalDeviceFeatures::default(),
            memory_heaps: vec![
                MemoryHeap {
                    size: vram_gb * 1024 * 1024 * 1024,
                    device_local: true,
                },
                MemoryHeap {
                    size: 64 * 1024 * 1024 * 1024,
                    device_local: false,
                },
            ],
            queue_families: Vec::new(),
        }
    }

    #[test]
    fn discrete_outranks_integrated() {
        let discrete = adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 2);
        let integrated = adapter(vk::PhysicalDeviceType::INTEGRATED_GPU, 16);
        assert!(score_adapter(&discrete) > score_adapter(&integrated));
        assert_eq!(score_adapter(&discrete), 1002);
    }

    #[test]
    fn c_strings_reject_interior_nul() {
        assert!(c_strings(&["VK_KHR_surface".to_string()]).is_ok());
        assert!(matches!(
            c_strings(&["bad\0name".to_string()]),
            Err(GpuError::InvalidDescription(_))
        ));
    }
}
