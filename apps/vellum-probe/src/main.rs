//! Vellum device probe
//!
//! Brings up a Vulkan device without a window, prints what the adapter
//! supports and runs a few headless frames through the frame ring.
//!
//! ```bash
//! cargo run -p vellum-probe -- --frames 120 --validation
//! cargo run -p vellum-probe -- --formats
//! ```
//!
//! `RUST_LOG` sets the log level (e.g. `info`, `vellum_gal=trace`).

use std::time::{Duration, Instant};

use anyhow::Context;
use bytemuck::{Pod, Zeroable};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vellum_gal::{
    BufferDesc, BufferUsage, Device, DeviceConfig, ResourceFormat, TextureData, TextureDesc,
    TextureUsage, VulkanBackend,
};

#[derive(Parser)]
#[command(name = "vellum-probe")]
#[command(about = "Bring up a Vulkan device and exercise its frame ring")]
#[command(version)]
struct Cli {
    /// Headless frames to run
    #[arg(short, long, default_value_t = 60)]
    frames: u64,

    /// Frames the CPU may record ahead of the GPU
    #[arg(long, default_value_t = 2)]
    frames_in_flight: usize,

    /// Enable validation layers and debug names
    #[arg(long)]
    validation: bool,

    /// Print the resolved format table
    #[arg(long)]
    formats: bool,

    /// Seconds to wait on a fence before treating the device as lost
    #[arg(long, default_value_t = 5)]
    fence_timeout: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 4],
    color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FrameConstants {
    frame: [u32; 4],
    time: [f32; 4],
}

fn init_logging() {
    #[cfg(feature = "profiling-tracy")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,vellum_gal=trace,vellum_probe=trace"));
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }
    #[cfg(not(feature = "profiling-tracy"))]
    {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = DeviceConfig::new("vellum-probe")
        .with_debug_device(cli.validation)
        .with_frames_in_flight(cli.frames_in_flight)
        .with_fence_timeout(
            Duration::from_millis(100),
            Duration::from_secs(cli.fence_timeout),
        );
    let backend = VulkanBackend::new(None).context("Failed to load Vulkan")?;
    let mut device = Device::create(backend, config).context("Failed to bring up the device")?;

    if let Some(adapter) = device.adapter() {
        info!("Adapter: {} ({:?})", adapter.name, adapter.device_type);
    }
    println!("{}", device.capabilities().summary());
    if cli.formats {
        print_formats(&device);
    }

    run_frames(&mut device, cli.frames)?;
    let stats = device.pool_stats();
    println!(
        "pools: {} fences, {} semaphores, {} command buffers, {} descriptor pools, {} staging buffers",
        stats.fences_allocated,
        stats.semaphores_allocated,
        stats.command_buffers_allocated,
        stats.descriptor_pools_allocated,
        stats.staging_buffers_allocated
    );

    device.wait_idle().context("Failed to idle the device")?;
    device.shutdown();
    Ok(())
}

fn print_formats(device: &Device<VulkanBackend>) {
    println!("{:<20} {:<28} support", "format", "native");
    for (format, entry) in device.formats().iter() {
        let native = if entry.is_supported() {
            format!("{:?}", entry.format)
        } else {
            "-".to_string()
        };
        println!("{:<20} {native:<28} {:?}", format!("{format:?}"), entry.support);
    }
}

/// Upload a small scene once, then stream constants and copy buffers every
/// frame. Resources are destroyed partway through to drive deferred deletion.
fn run_frames(device: &mut Device<VulkanBackend>, frames: u64) -> anyhow::Result<()> {
    let vertices = [
        Vertex {
            position: [-1.0, -1.0, 0.0, 1.0],
            color: [1.0, 0.0, 0.0, 1.0],
        },
        Vertex {
            position: [3.0, -1.0, 0.0, 1.0],
            color: [0.0, 1.0, 0.0, 1.0],
        },
        Vertex {
            position: [-1.0, 3.0, 0.0, 1.0],
            color: [0.0, 0.0, 1.0, 1.0],
        },
    ];
    let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
    let vertex_buffer = device
        .create_buffer(
            BufferDesc::new(vertex_bytes.len() as u64, BufferUsage::VERTEX).with_name("probe vertices"),
            Some(vertex_bytes),
        )
        .context("Failed to create the vertex buffer")?;
    let constants = device
        .create_buffer(
            BufferDesc::new(
                std::mem::size_of::<FrameConstants>() as u64,
                BufferUsage::CONSTANT,
            )
            .with_name("probe constants"),
            None,
        )
        .context("Failed to create the constant buffer")?;

    let checker: Vec<u8> = (0..64_u32 * 64)
        .flat_map(|texel| {
            let on = ((texel % 64) / 8 + (texel / 64) / 8) % 2 == 0;
            if on {
                [255, 255, 255, 255]
            } else {
                [32, 32, 32, 255]
            }
        })
        .collect();
    let mut texture = Some(
        device
            .create_texture(
                TextureDesc::texture_2d(64, 64, ResourceFormat::Rgba8Unorm)
                    .with_usage(TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET)
                    .with_name("probe checker"),
                &[TextureData {
                    mip_level: 0,
                    array_layer: 0,
                    data: &checker,
                }],
            )
            .context("Failed to create the checker texture")?,
    );

    let start = Instant::now();
    for frame in 0..frames {
        device.begin_frame(frame)?;

        device.begin_pass("Constants")?;
        let data = FrameConstants {
            frame: [u32::try_from(frame).unwrap_or(u32::MAX), 0, 0, 0],
            time: [start.elapsed().as_secs_f32(), 0.0, 0.0, 0.0],
        };
        device.update_buffer(constants, 0, bytemuck::bytes_of(&data))?;
        device.end_pass();

        if frame == frames / 2 {
            if let Some(texture) = texture.take() {
                device.destroy_texture(texture)?;
            }
        }
        device.end_frame()?;
    }

    let elapsed = start.elapsed();
    info!(
        "Ran {frames} frames in {elapsed:?}, safe frame {:?}",
        device.safe_frame()
    );
    if let Some(texture) = texture {
        device.destroy_texture(texture)?;
    }
    device.destroy_buffer(vertex_buffer)?;
    device.destroy_buffer(constants)?;
    Ok(())
}
