//! [`Backend`] implementation on top of `ash`.

use std::ffi::{CStr, CString};
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use raw_window_handle::RawDisplayHandle;

use crate::backend::{
    AdapterInfo, Backend, BufferCreate, FenceWait, ImageCreate, ImageViewCreate, InstanceDesc,
    LogicalDeviceDesc, SubmitBatch, SwapchainCreate, SwapchainImages, DEBUG_UTILS_EXTENSION,
    IMAGE_FORMAT_LIST_EXTENSION,
};
use crate::barrier::BarrierBatch;
use crate::error::{GpuError, Result};
use crate::instance::{
    c_strings, debug_messenger_info, extension_names, layer_names, query_adapter, score_adapter,
};
use crate::memory::{write_mapped, GpuAllocator};
use crate::surface::SurfaceProvider;
use crate::swapchain::{calculate_extent, image_count, select_present_mode, select_surface_format};

struct InstanceFns {
    instance: ash::Instance,
    surface: ash::khr::surface::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    messenger: vk::DebugUtilsMessengerEXT,
}

struct DeviceFns {
    device: ash::Device,
    swapchain: ash::khr::swapchain::Device,
    labels: Option<ash::ext::debug_utils::Device>,
    image_format_list: bool,
}

/// Drives a real Vulkan driver.
pub struct VulkanBackend {
    entry: ash::Entry,
    display: Option<RawDisplayHandle>,
    instance: Option<InstanceFns>,
    adapters: Vec<vk::PhysicalDevice>,
    physical_device: vk::PhysicalDevice,
    device: Option<DeviceFns>,
    allocator: GpuAllocator,
}

impl VulkanBackend {
    /// Load the Vulkan loader.
    ///
    /// `display` decides which platform surface extensions are required;
    /// without one only `VK_KHR_surface` is.
    pub fn new(display: Option<RawDisplayHandle>) -> Result<Self> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;
        Ok(Self {
            entry,
            display,
            instance: None,
            adapters: Vec::new(),
            physical_device: vk::PhysicalDevice::null(),
            device: None,
            allocator: GpuAllocator::default(),
        })
    }

    fn instance(&self) -> Result<&InstanceFns> {
        self.instance
            .as_ref()
            .ok_or_else(|| GpuError::invalid_state("instance not created"))
    }

    fn device(&self) -> Result<&DeviceFns> {
        self.device
            .as_ref()
            .ok_or_else(|| GpuError::invalid_state("logical device not created"))
    }

    fn raw_device(&self) -> Result<&ash::Device> {
        self.device().map(|fns| &fns.device)
    }
}

impl Backend for VulkanBackend {
    type Allocation = Allocation;

    fn instance_extensions(&self) -> Result<Vec<String>> {
        let properties = unsafe { self.entry.enumerate_instance_extension_properties(None)? };
        Ok(extension_names(&properties))
    }

    fn instance_layers(&self) -> Result<Vec<String>> {
        let properties = unsafe { self.entry.enumerate_instance_layer_properties()? };
        Ok(layer_names(&properties))
    }

    fn surface_extensions(&self) -> Result<Vec<String>> {
        let Some(display) = self.display else {
            return Ok(Vec::new());
        };
        let names = ash_window::enumerate_required_extensions(display)?;
        Ok(names
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
            .collect())
    }

    fn create_instance(&mut self, desc: &InstanceDesc<'_>) -> Result<()> {
        let app_name = CString::new(desc.app_name)
            .map_err(|_| GpuError::InvalidDescription("application name contains NUL".into()))?;
        let engine_name = c"Vellum";
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(desc.api_version);

        let extensions = c_strings(desc.extensions)?;
        let layers = c_strings(desc.layers)?;
        let extension_ptrs: Vec<_> = extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_ptrs: Vec<_> = layers.iter().map(|layer| layer.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        let instance = unsafe { self.entry.create_instance(&create_info, None)? };

        let debug_utils = desc
            .extensions
            .iter()
            .any(|ext| ext == DEBUG_UTILS_EXTENSION)
            .then(|| ash::ext::debug_utils::Instance::new(&self.entry, &instance));
        self.instance = Some(InstanceFns {
            surface: ash::khr::surface::Instance::new(&self.entry, &instance),
            instance,
            debug_utils,
            messenger: vk::DebugUtilsMessengerEXT::null(),
        });
        Ok(())
    }

    fn create_debug_messenger(&mut self) -> Result<()> {
        let fns = self
            .instance
            .as_mut()
            .ok_or_else(|| GpuError::invalid_state("instance not created"))?;
        let debug_utils = fns
            .debug_utils
            .as_ref()
            .ok_or_else(|| GpuError::ExtensionNotSupported(DEBUG_UTILS_EXTENSION.into()))?;
        fns.messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&debug_messenger_info(), None)? };
        Ok(())
    }

    fn destroy_debug_messenger(&mut self) {
        if let Some(fns) = self.instance.as_mut() {
            if let Some(debug_utils) = &fns.debug_utils {
                unsafe { debug_utils.destroy_debug_utils_messenger(fns.messenger, None) };
            }
            fns.messenger = vk::DebugUtilsMessengerEXT::null();
        }
    }

    fn destroy_instance(&mut self) {
        if let Some(fns) = self.instance.take() {
            unsafe { fns.instance.destroy_instance(None) };
        }
        self.adapters.clear();
        self.physical_device = vk::PhysicalDevice::null();
    }

    fn enumerate_adapters(&mut self) -> Result<Vec<AdapterInfo>> {
        let instance = &self.instance()?.instance;
        let devices = unsafe { instance.enumerate_physical_devices()? };

        let mut adapters: Vec<_> = devices
            .into_iter()
            .map(|device| (device, unsafe { query_adapter(instance, device) }))
            .collect();
        adapters.sort_by_key(|(_, info)| std::cmp::Reverse(score_adapter(info)));

        self.adapters = adapters.iter().map(|(device, _)| *device).collect();
        Ok(adapters.into_iter().map(|(_, info)| info).collect())
    }

    fn select_adapter(&mut self, index: usize) -> Result<()> {
        self.physical_device = *self
            .adapters
            .get(index)
            .ok_or(GpuError::NoPhysicalDevice)?;
        Ok(())
    }

    fn device_extensions(&self) -> Result<Vec<String>> {
        let instance = &self.instance()?.instance;
        let properties =
            unsafe { instance.enumerate_device_extension_properties(self.physical_device)? };
        Ok(extension_names(&properties))
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        self.instance.as_ref().map_or_else(Default::default, |fns| unsafe {
            fns.instance
                .get_physical_device_format_properties(self.physical_device, format)
        })
    }

    fn create_device(&mut self, desc: &LogicalDeviceDesc<'_>) -> Result<()> {
        let fns = self.instance()?;

        let priority = [1.0_f32];
        let queue_infos: Vec<_> = desc
            .queue_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priority)
            })
            .collect();
        let extensions = c_strings(desc.extensions)?;
        let extension_ptrs: Vec<_> = extensions.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&desc.features);
        let device = unsafe {
            fns.instance
                .create_device(self.physical_device, &create_info, None)?
        };

        let labels = fns
            .debug_utils
            .is_some()
            .then(|| ash::ext::debug_utils::Device::new(&fns.instance, &device));
        let device_fns = DeviceFns {
            swapchain: ash::khr::swapchain::Device::new(&fns.instance, &device),
            labels,
            image_format_list: desc
                .extensions
                .iter()
                .any(|ext| ext == IMAGE_FORMAT_LIST_EXTENSION),
            device,
        };
        self.device = Some(device_fns);
        Ok(())
    }

    fn queue(&self, family: u32, index: u32) -> vk::Queue {
        self.device.as_ref().map_or_else(vk::Queue::null, |fns| unsafe {
            fns.device.get_device_queue(family, index)
        })
    }

    fn create_allocator(&mut self) -> Result<()> {
        let instance = &self.instance()?.instance;
        let device = self.raw_device()?;
        self.allocator.init(instance, device, self.physical_device)
    }

    fn destroy_allocator(&mut self) {
        self.allocator.shutdown();
    }

    fn destroy_device(&mut self) {
        if let Some(fns) = self.device.take() {
            unsafe { fns.device.destroy_device(None) };
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn device_wait_idle(&self) -> Result<()> {
        unsafe { self.raw_device()?.device_wait_idle()? };
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferCreate<'_>) -> Result<(vk::Buffer, Allocation)> {
        let device = self.raw_device()?;
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = match self
            .allocator
            .allocate(desc.name, requirements, desc.location, true)
        {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };
        let bound =
            unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) };
        if let Err(err) = bound {
            self.allocator.free(allocation);
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(err.into());
        }
        Ok((buffer, allocation))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: Allocation) {
        self.allocator.free(allocation);
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_buffer(buffer, None) };
        }
    }

    fn write_allocation(&self, allocation: &mut Allocation, offset: u64, data: &[u8]) -> Result<()> {
        write_mapped(allocation, offset, data)
    }

    fn create_image(&self, desc: &ImageCreate<'_>) -> Result<(vk::Image, Allocation)> {
        let fns = self.device()?;
        let device = &fns.device;

        let mut formats = vec![desc.format];
        formats.extend_from_slice(desc.view_formats);
        let mut format_list = vk::ImageFormatListCreateInfo::default().view_formats(&formats);

        let mut image_info = vk::ImageCreateInfo::default()
            .flags(desc.flags)
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        if fns.image_format_list && !desc.view_formats.is_empty() {
            image_info = image_info.push_next(&mut format_list);
        }

        let image = unsafe { device.create_image(&image_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = match self.allocator.allocate(
            desc.name,
            requirements,
            gpu_allocator::MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err);
            }
        };
        let bound =
            unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) };
        if let Err(err) = bound {
            self.allocator.free(allocation);
            unsafe { device.destroy_image(image, None) };
            return Err(err.into());
        }
        Ok((image, allocation))
    }

    fn destroy_image(&self, image: vk::Image, allocation: Allocation) {
        self.allocator.free(allocation);
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_image(image, None) };
        }
    }

    fn create_image_view(&self, desc: &ImageViewCreate) -> Result<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(desc.image)
            .view_type(desc.view_type)
            .format(desc.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(desc.range);
        Ok(unsafe { self.raw_device()?.create_image_view(&view_info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_image_view(view, None) };
        }
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_buffer_view(view, None) };
        }
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> Result<vk::Sampler> {
        Ok(unsafe { self.raw_device()?.create_sampler(info, None)? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        Ok(unsafe { self.raw_device()?.create_shader_module(&info, None)? })
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_shader_module(module, None) };
        }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_pipeline(pipeline, None) };
        }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_render_pass(render_pass, None) };
        }
    }

    fn create_fence(&self) -> Result<vk::Fence> {
        let info = vk::FenceCreateInfo::default();
        Ok(unsafe { self.raw_device()?.create_fence(&info, None)? })
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.raw_device()?.reset_fences(&[fence])? };
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        Ok(unsafe { self.raw_device()?.get_fence_status(fence)? })
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<FenceWait> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.raw_device()?.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(FenceWait::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceWait::TimedOut),
            Err(err) => Err(err.into()),
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_fence(fence, None) };
        }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.raw_device()?.create_semaphore(&info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn create_command_pool(&self, queue_family: u32) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        Ok(unsafe { self.raw_device()?.create_command_pool(&info, None)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_command_pool(pool, None) };
        }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.raw_device()?.allocate_command_buffers(&info)? };
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::invalid_state("driver returned no command buffer"))
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.free_command_buffers(pool, buffers) };
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        unsafe {
            self.raw_device()?
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.raw_device()?.begin_command_buffer(command_buffer, &info)? };
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        unsafe { self.raw_device()?.end_command_buffer(command_buffer)? };
        Ok(())
    }

    fn cmd_pipeline_barrier(&self, command_buffer: vk::CommandBuffer, batch: &BarrierBatch) {
        let Some(fns) = &self.device else {
            return;
        };
        let images: Vec<_> = batch
            .images
            .iter()
            .map(|barrier| {
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(barrier.src_access)
                    .dst_access_mask(barrier.dst_access)
                    .old_layout(barrier.old_layout)
                    .new_layout(barrier.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(barrier.image)
                    .subresource_range(barrier.range)
            })
            .collect();
        let buffers: Vec<_> = batch
            .buffers
            .iter()
            .map(|barrier| {
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(barrier.src_access)
                    .dst_access_mask(barrier.dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(barrier.buffer)
                    .offset(barrier.offset)
                    .size(barrier.size)
            })
            .collect();

        let or_default = |stages: vk::PipelineStageFlags, fallback| {
            if stages.is_empty() {
                fallback
            } else {
                stages
            }
        };
        unsafe {
            fns.device.cmd_pipeline_barrier(
                command_buffer,
                or_default(batch.src_stages, vk::PipelineStageFlags::TOP_OF_PIPE),
                or_default(batch.dst_stages, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
                vk::DependencyFlags::empty(),
                &[],
                &buffers,
                &images,
            );
        }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.cmd_copy_buffer(command_buffer, src, dst, regions) };
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        if let Some(fns) = &self.device {
            unsafe {
                fns.device
                    .cmd_copy_buffer_to_image(command_buffer, src, dst, layout, regions);
            }
        }
    }

    fn cmd_begin_label(&self, command_buffer: vk::CommandBuffer, name: &str) {
        let Some(labels) = self.device.as_ref().and_then(|fns| fns.labels.as_ref()) else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            tracing::warn!("Debug label {name:?} contains NUL, skipped");
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe { labels.cmd_begin_debug_utils_label(command_buffer, &label) };
    }

    fn cmd_end_label(&self, command_buffer: vk::CommandBuffer) {
        if let Some(labels) = self.device.as_ref().and_then(|fns| fns.labels.as_ref()) {
            unsafe { labels.cmd_end_debug_utils_label(command_buffer) };
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn queue_submit(
        &self,
        queue: vk::Queue,
        batch: &SubmitBatch<'_>,
        fence: vk::Fence,
    ) -> Result<()> {
        let submit = vk::SubmitInfo::default()
            .command_buffers(batch.command_buffers)
            .wait_semaphores(batch.wait_semaphores)
            .wait_dst_stage_mask(batch.wait_stages)
            .signal_semaphores(batch.signal_semaphores);
        unsafe { self.raw_device()?.queue_submit(queue, &[submit], fence)? };
        Ok(())
    }

    fn create_query_pool(&self, query_count: u32) -> Result<vk::QueryPool> {
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(query_count);
        Ok(unsafe { self.raw_device()?.create_query_pool(&info, None)? })
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_query_pool(pool, None) };
        }
    }

    fn cmd_reset_query_pool(
        &self,
        command_buffer: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) {
        if let Some(fns) = &self.device {
            unsafe {
                fns.device
                    .cmd_reset_query_pool(command_buffer, pool, first_query, query_count);
            }
        }
    }

    fn cmd_write_timestamp(&self, command_buffer: vk::CommandBuffer, pool: vk::QueryPool, query: u32) {
        if let Some(fns) = &self.device {
            unsafe {
                fns.device.cmd_write_timestamp(
                    command_buffer,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    pool,
                    query,
                );
            }
        }
    }

    fn query_timestamps(
        &self,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) -> Result<Vec<Option<u64>>> {
        // Each query yields its value followed by an availability word.
        let mut data = vec![[0_u64; 2]; query_count as usize];
        let fetched = unsafe {
            self.raw_device()?.get_query_pool_results(
                pool,
                first_query,
                &mut data,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WITH_AVAILABILITY,
            )
        };
        match fetched {
            Ok(()) | Err(vk::Result::NOT_READY) => {}
            Err(err) => return Err(err.into()),
        }
        Ok(data
            .into_iter()
            .map(|[ticks, available]| (available != 0).then_some(ticks))
            .collect())
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        Ok(unsafe { self.raw_device()?.create_descriptor_pool(&info, None)? })
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        unsafe {
            self.raw_device()?
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        if let Some(fns) = &self.device {
            unsafe { fns.device.destroy_descriptor_pool(pool, None) };
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.raw_device()?.allocate_descriptor_sets(&info)? };
        sets.into_iter()
            .next()
            .ok_or_else(|| GpuError::invalid_state("driver returned no descriptor set"))
    }

    fn create_surface(&self, provider: &dyn SurfaceProvider) -> Result<vk::SurfaceKHR> {
        let fns = self.instance()?;
        let display = provider.raw_display_handle()?;
        let window = provider.raw_window_handle()?;
        unsafe { ash_window::create_surface(&self.entry, &fns.instance, display, window, None) }
            .map_err(|e| GpuError::SurfaceCreation(e.to_string()))
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        if let Some(fns) = &self.instance {
            unsafe { fns.surface.destroy_surface(surface, None) };
        }
    }

    fn create_swapchain(&self, desc: &SwapchainCreate) -> Result<SwapchainImages> {
        let surface_fns = &self.instance()?.surface;
        let fns = self.device()?;
        let physical_device = self.physical_device;

        let (capabilities, formats, present_modes, supported) = unsafe {
            (
                surface_fns
                    .get_physical_device_surface_capabilities(physical_device, desc.surface)?,
                surface_fns.get_physical_device_surface_formats(physical_device, desc.surface)?,
                surface_fns
                    .get_physical_device_surface_present_modes(physical_device, desc.surface)?,
                surface_fns.get_physical_device_surface_support(
                    physical_device,
                    desc.queue_family,
                    desc.surface,
                )?,
            )
        };
        if !supported {
            return Err(GpuError::SwapchainCreation(format!(
                "queue family {} cannot present to this surface",
                desc.queue_family
            )));
        }

        let surface_format = select_surface_format(&formats)
            .ok_or_else(|| GpuError::SwapchainCreation("surface reports no formats".into()))?;
        let present_mode = select_present_mode(&present_modes, desc.vsync);
        let extent = calculate_extent(&capabilities, desc.extent.width, desc.extent.height);

        let queue_families = [desc.queue_family];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(desc.surface)
            .min_image_count(image_count(&capabilities))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);

        let swapchain = unsafe { fns.swapchain.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;
        let images = match unsafe { fns.swapchain.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(err) => {
                unsafe { fns.swapchain.destroy_swapchain(swapchain, None) };
                return Err(err.into());
            }
        };

        Ok(SwapchainImages {
            swapchain,
            images,
            format: surface_format.format,
            extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if let Some(fns) = &self.device {
            unsafe { fns.swapchain.destroy_swapchain(swapchain, None) };
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool)> {
        let fns = self.device()?;
        // OUT_OF_DATE means no image was acquired; the caller must recreate.
        let acquired = unsafe {
            fns.swapchain
                .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())?
        };
        Ok(acquired)
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let fns = self.device()?;
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { fns.swapchain.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(err) => Err(err.into()),
        }
    }
}
