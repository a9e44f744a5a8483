//! Device bring-up and teardown.

use ash::vk;

use super::{Device, DeviceState, Pools, QueueInfo};
use crate::backend::{
    Backend, InstanceDesc, LogicalDeviceDesc, DEBUG_UTILS_EXTENSION, IMAGE_FORMAT_LIST_EXTENSION,
    SURFACE_EXTENSION, SWAPCHAIN_EXTENSION, VALIDATION_LAYER, VIEWPORT_INDEX_LAYER_EXTENSION,
};
use crate::barrier::PipelineBarrier;
use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, InitStage, Result};
use crate::format::{FormatLookupTable, ResourceFormat};
use crate::frame::FrameRing;
use crate::pass::Pass;
use crate::query::QueryPool;

const OPTIONAL_DEVICE_EXTENSIONS: [&str; 2] =
    [VIEWPORT_INDEX_LAYER_EXTENSION, IMAGE_FORMAT_LIST_EXTENSION];

fn at(stage: InitStage) -> impl FnOnce(GpuError) -> (InitStage, GpuError) {
    move |err| (stage, err)
}

impl<B: Backend> Device<B> {
    /// Bring the device from `Uninitialized` to `Ready`.
    ///
    /// On failure everything created by the attempt is destroyed again and
    /// the device stays `Uninitialized`.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != DeviceState::Uninitialized {
            return Err(GpuError::invalid_state("device is already initialized"));
        }

        match self.bring_up() {
            Ok(()) => {
                tracing::info!("Device ready: {}", self.capabilities.summary());
                Ok(())
            }
            Err((stage, source)) => {
                tracing::error!("Device initialization failed while {stage}: {source}");
                self.teardown();
                Err(GpuError::Initialization {
                    stage,
                    source: Box::new(source),
                })
            }
        }
    }

    fn bring_up(&mut self) -> std::result::Result<(), (InitStage, GpuError)> {
        self.create_instance().map_err(at(InitStage::Instance))?;
        self.select_adapter().map_err(at(InitStage::PhysicalDevice))?;

        let families = self
            .adapter
            .as_ref()
            .map(|adapter| adapter.queue_families.as_slice())
            .unwrap_or_default();
        let (graphics, transfer) =
            select_queue_families(families).map_err(at(InitStage::QueueFamilies))?;
        tracing::info!("Queue families: graphics {graphics}, transfer {transfer}");

        self.create_logical_device(graphics, transfer)
            .map_err(at(InitStage::LogicalDevice))?;
        self.create_allocator().map_err(at(InitStage::Allocator))?;
        self.create_pools().map_err(at(InitStage::Pools))?;
        Ok(())
    }

    fn create_instance(&mut self) -> Result<()> {
        let available = self.backend.instance_extensions()?;

        let mut extensions = vec![SURFACE_EXTENSION.to_string()];
        for extension in self.backend.surface_extensions()? {
            if !extensions.contains(&extension) {
                extensions.push(extension);
            }
        }
        if let Some(missing) = extensions.iter().find(|ext| !available.contains(ext)) {
            return Err(GpuError::ExtensionNotSupported(missing.clone()));
        }

        let mut layers = Vec::new();
        if self.config.debug_device {
            let available_layers = self.backend.instance_layers()?;
            if available_layers.iter().any(|layer| layer == VALIDATION_LAYER) {
                layers.push(VALIDATION_LAYER.to_string());
                if available.iter().any(|ext| ext == DEBUG_UTILS_EXTENSION) {
                    extensions.push(DEBUG_UTILS_EXTENSION.to_string());
                } else {
                    tracing::warn!("{DEBUG_UTILS_EXTENSION} not available, debug labels disabled");
                }
            } else {
                tracing::warn!("Validation requested but {VALIDATION_LAYER} is not installed");
            }
        }

        self.backend.create_instance(&InstanceDesc {
            app_name: &self.config.app_name,
            api_version: vk::API_VERSION_1_1,
            extensions: &extensions,
            layers: &layers,
        })?;
        self.state = DeviceState::InstanceCreated;
        tracing::debug!("Instance extensions: {extensions:?}, layers: {layers:?}");

        if extensions.iter().any(|ext| ext == DEBUG_UTILS_EXTENSION) {
            match self.backend.create_debug_messenger() {
                Ok(()) => self.debug_messenger = true,
                Err(err) => tracing::warn!("Failed to create debug messenger: {err}"),
            }
        }
        self.instance_extensions = extensions;
        Ok(())
    }

    fn select_adapter(&mut self) -> Result<()> {
        let adapters = self.backend.enumerate_adapters()?;
        for (index, adapter) in adapters.iter().enumerate() {
            tracing::debug!("Adapter {index}: {} ({:?})", adapter.name, adapter.device_type);
        }

        let Some(adapter) = adapters.into_iter().next() else {
            return Err(GpuError::NoPhysicalDevice);
        };
        self.backend.select_adapter(0)?;
        tracing::info!("Selected GPU: {}", adapter.name);

        self.adapter = Some(adapter);
        self.state = DeviceState::PhysicalDeviceSelected;
        Ok(())
    }

    fn create_logical_device(&mut self, graphics: u32, transfer: u32) -> Result<()> {
        let available = self.backend.device_extensions()?;
        if !available.iter().any(|ext| ext == SWAPCHAIN_EXTENSION) {
            return Err(GpuError::ExtensionNotSupported(SWAPCHAIN_EXTENSION.to_string()));
        }

        let mut extensions = vec![SWAPCHAIN_EXTENSION.to_string()];
        for optional in OPTIONAL_DEVICE_EXTENSIONS {
            if available.iter().any(|ext| ext == optional) {
                extensions.push(optional.to_string());
            } else {
                tracing::debug!("Optional device extension {optional} not available");
            }
        }

        let mut queue_families = vec![graphics];
        if transfer != graphics {
            queue_families.push(transfer);
        }
        let features = self
            .adapter
            .as_ref()
            .map(|adapter| adapter.features)
            .unwrap_or_default();

        self.backend.create_device(&LogicalDeviceDesc {
            queue_families: &queue_families,
            extensions: &extensions,
            features,
        })?;
        self.state = DeviceState::LogicalDeviceCreated;
        tracing::info!("Device extensions: {extensions:?}");

        self.graphics_queue = QueueInfo {
            family: graphics,
            queue: self.backend.queue(graphics, 0),
        };
        self.transfer_queue = QueueInfo {
            family: transfer,
            queue: self.backend.queue(transfer, 0),
        };
        self.device_extensions = extensions;
        Ok(())
    }

    fn create_allocator(&mut self) -> Result<()> {
        self.backend.create_allocator()?;
        self.allocator_created = true;

        let backend = &self.backend;
        self.formats = FormatLookupTable::fill(|format| backend.format_properties(format));
        for depth in [ResourceFormat::D16, ResourceFormat::D24S8, ResourceFormat::DFloat] {
            tracing::info!("{depth:?} maps to {:?}", self.formats.native(depth));
        }

        let viewport_index_layer = self
            .device_extensions
            .iter()
            .any(|ext| ext == VIEWPORT_INDEX_LAYER_EXTENSION);
        if let Some(adapter) = &self.adapter {
            self.capabilities =
                GpuCapabilities::from_adapter(adapter, viewport_index_layer, &self.formats);
        }
        Ok(())
    }

    fn create_pools(&mut self) -> Result<()> {
        let family = self.graphics_queue.family;
        let (valid_bits, period) = self
            .adapter
            .as_ref()
            .map(|adapter| {
                let valid_bits = adapter
                    .queue_families
                    .get(family as usize)
                    .map_or(0, |properties| properties.timestamp_valid_bits);
                (valid_bits, adapter.limits.timestamp_period)
            })
            .unwrap_or_default();
        if valid_bits == 0 {
            tracing::info!("Queue family {family} cannot write timestamps");
        }
        let queries = QueryPool::new(self.config.timestamps_per_pool, valid_bits, period);
        let pools = Pools::new(&self.backend, &self.config, family, queries)?;
        self.pools = Some(pools);
        self.state = DeviceState::PoolsInitialized;

        self.barrier = PipelineBarrier::new();
        self.pass = Pass::new();
        self.ring = FrameRing::new(self.config.ring_size());
        self.frame_counter = 0;
        self.safe_frame = None;
        self.in_frame = false;
        self.lost = None;
        self.state = DeviceState::Ready;
        Ok(())
    }

    /// Destroy whatever the current state says exists, newest first.
    pub(super) fn teardown(&mut self) {
        if self.state >= DeviceState::PoolsInitialized {
            self.pass.reset();
            self.barrier = PipelineBarrier::new();
            self.last_submission = None;
            if let Some(mut pools) = self.pools.take() {
                pools.destroy(&self.backend);
            }
        }
        if self.allocator_created {
            self.backend.destroy_allocator();
            self.allocator_created = false;
        }
        if self.state >= DeviceState::LogicalDeviceCreated {
            self.backend.destroy_device();
        }
        if self.debug_messenger {
            self.backend.destroy_debug_messenger();
            self.debug_messenger = false;
        }
        if self.state >= DeviceState::InstanceCreated {
            self.backend.destroy_instance();
        }

        self.adapter = None;
        self.graphics_queue = QueueInfo::default();
        self.transfer_queue = QueueInfo::default();
        self.instance_extensions.clear();
        self.device_extensions.clear();
        self.formats = FormatLookupTable::default();
        self.capabilities = GpuCapabilities::default();
        self.state = DeviceState::Uninitialized;
        tracing::debug!("Device torn down");
    }
}

/// Pick the graphics and transfer queue families.
///
/// Graphics is the last family with graphics and compute. Transfer prefers
/// the last dedicated transfer-only family and otherwise takes the first
/// family with transfer support.
pub fn select_queue_families(families: &[vk::QueueFamilyProperties]) -> Result<(u32, u32)> {
    let graphics_flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
    let has_queues = |family: &vk::QueueFamilyProperties| family.queue_count > 0;

    let graphics = families
        .iter()
        .rposition(|family| has_queues(family) && family.queue_flags.contains(graphics_flags))
        .ok_or(GpuError::NoGraphicsQueue)?;

    let dedicated_transfer = families.iter().rposition(|family| {
        has_queues(family)
            && family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && !family.queue_flags.intersects(graphics_flags)
    });
    let transfer = dedicated_transfer
        .or_else(|| {
            families.iter().position(|family| {
                has_queues(family) && family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            })
        })
        .ok_or(GpuError::NoTransferQueue)?;

    #[allow(clippy::cast_possible_truncation)]
    Ok((graphics as u32, transfer as u32))
}
