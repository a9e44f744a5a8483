//! Abstract resource formats and their native lookup table.

use ash::vk;
use bitflags::bitflags;

/// Device-independent resource format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceFormat {
    Rgba32Float,
    Rgba32Uint,
    Rgba32Sint,
    Rgb32Float,
    Rgb32Uint,
    Rgb32Sint,
    B5G6R5Unorm,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba16Uint,
    Rgba16Unorm,
    Rgba16Sint,
    Rgba16Snorm,
    Rg32Float,
    Rg32Uint,
    Rg32Sint,
    Rgb10A2Uint,
    Rgb10A2Unorm,
    Rg11B10Float,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba8Uint,
    Rgba8Snorm,
    Rgba8Sint,
    Rg16Float,
    Rg16Uint,
    Rg16Unorm,
    Rg16Sint,
    Rg16Snorm,
    Rg8Uint,
    Rg8Unorm,
    Rg8Sint,
    Rg8Snorm,
    R32Float,
    R32Uint,
    R32Sint,
    R16Float,
    R16Uint,
    R16Unorm,
    R16Sint,
    R16Snorm,
    R8Uint,
    R8Unorm,
    R8Sint,
    R8Snorm,
    A8Unorm,
    D16,
    D24S8,
    DFloat,
    Bc1,
    Bc1Srgb,
    Bc2,
    Bc2Srgb,
    Bc3,
    Bc3Srgb,
    Bc4Unorm,
    Bc4Snorm,
    Bc5Unorm,
    Bc5Snorm,
    Bc6Ufloat,
    Bc6Sfloat,
    Bc7Unorm,
    Bc7UnormSrgb,
}

const RGBA32: &[vk::Format] = &[
    vk::Format::R32G32B32A32_SFLOAT,
    vk::Format::R32G32B32A32_UINT,
    vk::Format::R32G32B32A32_SINT,
];
const RGB32: &[vk::Format] = &[
    vk::Format::R32G32B32_SFLOAT,
    vk::Format::R32G32B32_UINT,
    vk::Format::R32G32B32_SINT,
];
const BGRA8: &[vk::Format] = &[vk::Format::B8G8R8A8_UNORM, vk::Format::B8G8R8A8_SRGB];
const RGBA16: &[vk::Format] = &[
    vk::Format::R16G16B16A16_SFLOAT,
    vk::Format::R16G16B16A16_UNORM,
    vk::Format::R16G16B16A16_UINT,
    vk::Format::R16G16B16A16_SNORM,
    vk::Format::R16G16B16A16_SINT,
];
const RG32: &[vk::Format] = &[
    vk::Format::R32G32_SFLOAT,
    vk::Format::R32G32_UINT,
    vk::Format::R32G32_SINT,
];
const RGB10A2: &[vk::Format] = &[
    vk::Format::A2B10G10R10_UINT_PACK32,
    vk::Format::A2B10G10R10_UNORM_PACK32,
];
const RGBA8: &[vk::Format] = &[
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::R8G8B8A8_UINT,
    vk::Format::R8G8B8A8_SNORM,
    vk::Format::R8G8B8A8_SINT,
];
const RG16: &[vk::Format] = &[
    vk::Format::R16G16_SFLOAT,
    vk::Format::R16G16_UNORM,
    vk::Format::R16G16_UINT,
    vk::Format::R16G16_SNORM,
    vk::Format::R16G16_SINT,
];
const RG8: &[vk::Format] = &[
    vk::Format::R8G8_UNORM,
    vk::Format::R8G8_UINT,
    vk::Format::R8G8_SNORM,
    vk::Format::R8G8_SINT,
];
const R32: &[vk::Format] = &[
    vk::Format::R32_SFLOAT,
    vk::Format::R32_UINT,
    vk::Format::R32_SINT,
];
const R16: &[vk::Format] = &[
    vk::Format::R16_SFLOAT,
    vk::Format::R16_UNORM,
    vk::Format::R16_UINT,
    vk::Format::R16_SNORM,
    vk::Format::R16_SINT,
];
const R8: &[vk::Format] = &[
    vk::Format::R8_UNORM,
    vk::Format::R8_UINT,
    vk::Format::R8_SNORM,
    vk::Format::R8_SINT,
];
const BC1: &[vk::Format] = &[vk::Format::BC1_RGBA_UNORM_BLOCK, vk::Format::BC1_RGBA_SRGB_BLOCK];
const BC2: &[vk::Format] = &[vk::Format::BC2_UNORM_BLOCK, vk::Format::BC2_SRGB_BLOCK];
const BC3: &[vk::Format] = &[vk::Format::BC3_UNORM_BLOCK, vk::Format::BC3_SRGB_BLOCK];
const BC7: &[vk::Format] = &[vk::Format::BC7_UNORM_BLOCK, vk::Format::BC7_SRGB_BLOCK];

/// Smallest sufficient depth first.
pub const D16_CANDIDATES: &[vk::Format] = &[
    vk::Format::D16_UNORM,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
];
/// Combined depth-stencil, richest first after the exact match.
pub const D24S8_CANDIDATES: &[vk::Format] = &[
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
];
pub const DFLOAT_CANDIDATES: &[vk::Format] = &[
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

impl ResourceFormat {
    pub const COUNT: usize = 64;

    /// Every format, in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Rgba32Float,
        Self::Rgba32Uint,
        Self::Rgba32Sint,
        Self::Rgb32Float,
        Self::Rgb32Uint,
        Self::Rgb32Sint,
        Self::B5G6R5Unorm,
        Self::Bgra8Unorm,
        Self::Bgra8UnormSrgb,
        Self::Rgba16Float,
        Self::Rgba16Uint,
        Self::Rgba16Unorm,
        Self::Rgba16Sint,
        Self::Rgba16Snorm,
        Self::Rg32Float,
        Self::Rg32Uint,
        Self::Rg32Sint,
        Self::Rgb10A2Uint,
        Self::Rgb10A2Unorm,
        Self::Rg11B10Float,
        Self::Rgba8Unorm,
        Self::Rgba8UnormSrgb,
        Self::Rgba8Uint,
        Self::Rgba8Snorm,
        Self::Rgba8Sint,
        Self::Rg16Float,
        Self::Rg16Uint,
        Self::Rg16Unorm,
        Self::Rg16Sint,
        Self::Rg16Snorm,
        Self::Rg8Uint,
        Self::Rg8Unorm,
        Self::Rg8Sint,
        Self::Rg8Snorm,
        Self::R32Float,
        Self::R32Uint,
        Self::R32Sint,
        Self::R16Float,
        Self::R16Uint,
        Self::R16Unorm,
        Self::R16Sint,
        Self::R16Snorm,
        Self::R8Uint,
        Self::R8Unorm,
        Self::R8Sint,
        Self::R8Snorm,
        Self::A8Unorm,
        Self::D16,
        Self::D24S8,
        Self::DFloat,
        Self::Bc1,
        Self::Bc1Srgb,
        Self::Bc2,
        Self::Bc2Srgb,
        Self::Bc3,
        Self::Bc3Srgb,
        Self::Bc4Unorm,
        Self::Bc4Snorm,
        Self::Bc5Unorm,
        Self::Bc5Snorm,
        Self::Bc6Ufloat,
        Self::Bc6Sfloat,
        Self::Bc7Unorm,
        Self::Bc7UnormSrgb,
    ];

    pub const fn is_depth(self) -> bool {
        matches!(self, Self::D16 | Self::D24S8 | Self::DFloat)
    }

    pub const fn is_compressed(self) -> bool {
        (self as usize) >= (Self::Bc1 as usize)
    }

    /// Texels per block edge: 4 for block-compressed formats, 1 otherwise.
    pub const fn block_extent(self) -> u32 {
        if self.is_compressed() {
            4
        } else {
            1
        }
    }

    /// Bytes per block (per texel for uncompressed formats).
    pub const fn block_size(self) -> u32 {
        match self {
            Self::Rgba32Float | Self::Rgba32Uint | Self::Rgba32Sint => 16,
            Self::Rgb32Float | Self::Rgb32Uint | Self::Rgb32Sint => 12,
            Self::Rgba16Float
            | Self::Rgba16Uint
            | Self::Rgba16Unorm
            | Self::Rgba16Sint
            | Self::Rgba16Snorm
            | Self::Rg32Float
            | Self::Rg32Uint
            | Self::Rg32Sint
            | Self::Bc1
            | Self::Bc1Srgb
            | Self::Bc4Unorm
            | Self::Bc4Snorm => 8,
            Self::B5G6R5Unorm
            | Self::Rg8Uint
            | Self::Rg8Unorm
            | Self::Rg8Sint
            | Self::Rg8Snorm
            | Self::R16Float
            | Self::R16Uint
            | Self::R16Unorm
            | Self::R16Sint
            | Self::R16Snorm
            | Self::D16 => 2,
            Self::R8Uint | Self::R8Unorm | Self::R8Sint | Self::R8Snorm | Self::A8Unorm => 1,
            Self::Bc2
            | Self::Bc2Srgb
            | Self::Bc3
            | Self::Bc3Srgb
            | Self::Bc5Unorm
            | Self::Bc5Snorm
            | Self::Bc6Ufloat
            | Self::Bc6Sfloat
            | Self::Bc7Unorm
            | Self::Bc7UnormSrgb => 16,
            _ => 4,
        }
    }

    /// Native color format and its view-compatible family.
    const fn color_mapping(self) -> Option<(vk::Format, &'static [vk::Format])> {
        use vk::Format as F;
        let mapping: (vk::Format, &'static [vk::Format]) = match self {
            Self::Rgba32Float => (F::R32G32B32A32_SFLOAT, RGBA32),
            Self::Rgba32Uint => (F::R32G32B32A32_UINT, RGBA32),
            Self::Rgba32Sint => (F::R32G32B32A32_SINT, RGBA32),
            Self::Rgb32Float => (F::R32G32B32_SFLOAT, RGB32),
            Self::Rgb32Uint => (F::R32G32B32_UINT, RGB32),
            Self::Rgb32Sint => (F::R32G32B32_SINT, RGB32),
            Self::B5G6R5Unorm => (F::B5G6R5_UNORM_PACK16, &[]),
            Self::Bgra8Unorm => (F::B8G8R8A8_UNORM, BGRA8),
            Self::Bgra8UnormSrgb => (F::B8G8R8A8_SRGB, BGRA8),
            Self::Rgba16Float => (F::R16G16B16A16_SFLOAT, RGBA16),
            Self::Rgba16Uint => (F::R16G16B16A16_UINT, RGBA16),
            Self::Rgba16Unorm => (F::R16G16B16A16_UNORM, RGBA16),
            Self::Rgba16Sint => (F::R16G16B16A16_SINT, RGBA16),
            Self::Rgba16Snorm => (F::R16G16B16A16_SNORM, RGBA16),
            Self::Rg32Float => (F::R32G32_SFLOAT, RG32),
            Self::Rg32Uint => (F::R32G32_UINT, RG32),
            Self::Rg32Sint => (F::R32G32_SINT, RG32),
            Self::Rgb10A2Uint => (F::A2B10G10R10_UINT_PACK32, RGB10A2),
            Self::Rgb10A2Unorm => (F::A2B10G10R10_UNORM_PACK32, RGB10A2),
            Self::Rg11B10Float => (F::B10G11R11_UFLOAT_PACK32, &[]),
            Self::Rgba8Unorm => (F::R8G8B8A8_UNORM, RGBA8),
            Self::Rgba8UnormSrgb => (F::R8G8B8A8_SRGB, RGBA8),
            Self::Rgba8Uint => (F::R8G8B8A8_UINT, RGBA8),
            Self::Rgba8Snorm => (F::R8G8B8A8_SNORM, RGBA8),
            Self::Rgba8Sint => (F::R8G8B8A8_SINT, RGBA8),
            Self::Rg16Float => (F::R16G16_SFLOAT, RG16),
            Self::Rg16Uint => (F::R16G16_UINT, RG16),
            Self::Rg16Unorm => (F::R16G16_UNORM, RG16),
            Self::Rg16Sint => (F::R16G16_SINT, RG16),
            Self::Rg16Snorm => (F::R16G16_SNORM, RG16),
            Self::Rg8Uint => (F::R8G8_UINT, RG8),
            Self::Rg8Unorm => (F::R8G8_UNORM, RG8),
            Self::Rg8Sint => (F::R8G8_SINT, RG8),
            Self::Rg8Snorm => (F::R8G8_SNORM, RG8),
            Self::R32Float => (F::R32_SFLOAT, R32),
            Self::R32Uint => (F::R32_UINT, R32),
            Self::R32Sint => (F::R32_SINT, R32),
            Self::R16Float => (F::R16_SFLOAT, R16),
            Self::R16Uint => (F::R16_UINT, R16),
            Self::R16Unorm => (F::R16_UNORM, R16),
            Self::R16Sint => (F::R16_SINT, R16),
            Self::R16Snorm => (F::R16_SNORM, R16),
            Self::R8Uint => (F::R8_UINT, R8),
            Self::R8Unorm => (F::R8_UNORM, R8),
            Self::R8Sint => (F::R8_SINT, R8),
            Self::R8Snorm => (F::R8_SNORM, R8),
            // Vulkan 1.1 has no alpha-only format; sampled as red.
            Self::A8Unorm => (F::R8_UNORM, R8),
            Self::D16 | Self::D24S8 | Self::DFloat => return None,
            Self::Bc1 => (F::BC1_RGBA_UNORM_BLOCK, BC1),
            Self::Bc1Srgb => (F::BC1_RGBA_SRGB_BLOCK, BC1),
            Self::Bc2 => (F::BC2_UNORM_BLOCK, BC2),
            Self::Bc2Srgb => (F::BC2_SRGB_BLOCK, BC2),
            Self::Bc3 => (F::BC3_UNORM_BLOCK, BC3),
            Self::Bc3Srgb => (F::BC3_SRGB_BLOCK, BC3),
            Self::Bc4Unorm => (F::BC4_UNORM_BLOCK, &[]),
            Self::Bc4Snorm => (F::BC4_SNORM_BLOCK, &[]),
            Self::Bc5Unorm => (F::BC5_UNORM_BLOCK, &[]),
            Self::Bc5Snorm => (F::BC5_SNORM_BLOCK, &[]),
            Self::Bc6Ufloat => (F::BC6H_UFLOAT_BLOCK, &[]),
            Self::Bc6Sfloat => (F::BC6H_SFLOAT_BLOCK, &[]),
            Self::Bc7Unorm => (F::BC7_UNORM_BLOCK, BC7),
            Self::Bc7UnormSrgb => (F::BC7_SRGB_BLOCK, BC7),
        };
        Some(mapping)
    }

    const fn depth_candidates(self) -> &'static [vk::Format] {
        match self {
            Self::D16 => D16_CANDIDATES,
            Self::D24S8 => D24S8_CANDIDATES,
            Self::DFloat => DFLOAT_CANDIDATES,
            _ => &[],
        }
    }
}

bitflags! {
    /// What a format can be used for on the selected device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FormatSupport: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const BLENDABLE = 1 << 3;
        const DEPTH_STENCIL = 1 << 4;
        const TEXEL_BUFFER = 1 << 5;
        const VERTEX_BUFFER = 1 << 6;
    }
}

impl FormatSupport {
    pub fn from_properties(properties: &vk::FormatProperties) -> Self {
        let tiling = properties.optimal_tiling_features;
        let buffer = properties.buffer_features;
        let mut support = Self::empty();
        support.set(
            Self::SAMPLED,
            tiling.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE),
        );
        support.set(
            Self::STORAGE,
            tiling.contains(vk::FormatFeatureFlags::STORAGE_IMAGE),
        );
        support.set(
            Self::RENDER_TARGET,
            tiling.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT),
        );
        support.set(
            Self::BLENDABLE,
            tiling.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND),
        );
        support.set(
            Self::DEPTH_STENCIL,
            tiling.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT),
        );
        support.set(
            Self::TEXEL_BUFFER,
            buffer.contains(vk::FormatFeatureFlags::UNIFORM_TEXEL_BUFFER),
        );
        support.set(
            Self::VERTEX_BUFFER,
            buffer.contains(vk::FormatFeatureFlags::VERTEX_BUFFER),
        );
        support
    }
}

/// Native counterpart of one [`ResourceFormat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatEntry {
    /// Format used to create images and views. `UNDEFINED` when unsupported.
    pub format: vk::Format,
    /// Format for reading the resource as a color texture.
    pub storage_format: vk::Format,
    /// View-compatible formats, excluding `format` itself.
    pub alternatives: Vec<vk::Format>,
    pub support: FormatSupport,
}

impl FormatEntry {
    pub fn is_supported(&self) -> bool {
        self.format != vk::Format::UNDEFINED
    }

    /// Whether a view of an image in this format may use `format`.
    pub fn is_view_compatible(&self, format: vk::Format) -> bool {
        format == self.format || self.alternatives.contains(&format)
    }
}

/// Abstract-to-native format mapping for the selected physical device.
#[derive(Debug, Clone)]
pub struct FormatLookupTable {
    entries: Vec<FormatEntry>,
}

impl FormatLookupTable {
    /// Build the table from the device's reported format properties.
    pub fn fill(query: impl Fn(vk::Format) -> vk::FormatProperties) -> Self {
        let entries = ResourceFormat::ALL
            .iter()
            .map(|&format| {
                if let Some((native, family)) = format.color_mapping() {
                    FormatEntry {
                        format: native,
                        storage_format: native,
                        alternatives: family.iter().copied().filter(|&f| f != native).collect(),
                        support: FormatSupport::from_properties(&query(native)),
                    }
                } else {
                    let native = select_depth_format(&query, format.depth_candidates());
                    if native == vk::Format::UNDEFINED {
                        tracing::warn!("No supported depth format for {format:?}");
                    } else {
                        tracing::debug!("{format:?} resolves to {native:?}");
                    }
                    FormatEntry {
                        format: native,
                        storage_format: depth_storage_format(native),
                        alternatives: Vec::new(),
                        support: if native == vk::Format::UNDEFINED {
                            FormatSupport::empty()
                        } else {
                            FormatSupport::from_properties(&query(native))
                        },
                    }
                }
            })
            .collect();

        Self { entries }
    }

    pub fn get(&self, format: ResourceFormat) -> &FormatEntry {
        &self.entries[format as usize]
    }

    pub fn native(&self, format: ResourceFormat) -> vk::Format {
        self.get(format).format
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceFormat, &FormatEntry)> {
        ResourceFormat::ALL.iter().copied().zip(self.entries.iter())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FormatLookupTable {
    /// A table with nothing supported, used before the device is initialized.
    fn default() -> Self {
        Self::fill(|_| vk::FormatProperties::default())
    }
}

/// First candidate usable as an optimally tiled depth-stencil attachment.
pub fn select_depth_format(
    query: impl Fn(vk::Format) -> vk::FormatProperties,
    candidates: &[vk::Format],
) -> vk::Format {
    candidates
        .iter()
        .copied()
        .find(|&candidate| {
            query(candidate)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .unwrap_or(vk::Format::UNDEFINED)
}

fn depth_storage_format(depth: vk::Format) -> vk::Format {
    match depth {
        vk::Format::D16_UNORM => vk::Format::R16_UNORM,
        vk::Format::D32_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT => vk::Format::R32_SFLOAT,
        _ => vk::Format::UNDEFINED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn everything(_: vk::Format) -> vk::FormatProperties {
        vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::empty(),
            optimal_tiling_features: vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            buffer_features: vk::FormatFeatureFlags::VERTEX_BUFFER,
        }
    }

    fn only_d32(format: vk::Format) -> vk::FormatProperties {
        let mut properties = vk::FormatProperties::default();
        if format == vk::Format::D32_SFLOAT {
            properties.optimal_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        } else if format == vk::Format::R8G8B8A8_UNORM {
            properties.optimal_tiling_features =
                vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::COLOR_ATTACHMENT;
        }
        properties
    }

    #[test]
    fn all_lists_every_variant_in_order() {
        for (index, format) in ResourceFormat::ALL.iter().enumerate() {
            assert_eq!(*format as usize, index);
        }
    }

    #[test]
    fn every_format_has_an_entry() {
        let table = FormatLookupTable::fill(everything);
        assert_eq!(table.len(), ResourceFormat::COUNT);
        for (format, entry) in table.iter() {
            assert!(entry.is_supported(), "{format:?} unresolved");
        }
    }

    #[test]
    fn depth_prefers_smallest_then_falls_back() {
        let table = FormatLookupTable::fill(everything);
        assert_eq!(table.native(ResourceFormat::D16), vk::Format::D16_UNORM);
        assert_eq!(table.native(ResourceFormat::D24S8), vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(table.native(ResourceFormat::DFloat), vk::Format::D32_SFLOAT);
        assert_eq!(
            table.get(ResourceFormat::D16).storage_format,
            vk::Format::R16_UNORM
        );

        let sparse = FormatLookupTable::fill(only_d32);
        assert_eq!(sparse.len(), ResourceFormat::COUNT);
        assert_eq!(sparse.native(ResourceFormat::D16), vk::Format::D32_SFLOAT);
        assert_eq!(sparse.native(ResourceFormat::DFloat), vk::Format::D32_SFLOAT);
        assert_eq!(sparse.native(ResourceFormat::D24S8), vk::Format::UNDEFINED);
        assert_eq!(
            sparse.get(ResourceFormat::D16).storage_format,
            vk::Format::R32_SFLOAT
        );
    }

    #[test]
    fn alternatives_exclude_self() {
        let table = FormatLookupTable::fill(everything);
        let rgba8 = table.get(ResourceFormat::Rgba8Unorm);
        assert!(rgba8.alternatives.contains(&vk::Format::R8G8B8A8_SRGB));
        assert!(!rgba8.alternatives.contains(&vk::Format::R8G8B8A8_UNORM));
        assert!(rgba8.is_view_compatible(vk::Format::R8G8B8A8_UINT));
        assert!(!rgba8.is_view_compatible(vk::Format::R32_UINT));
    }

    #[test]
    fn support_flags_follow_properties() {
        let table = FormatLookupTable::fill(only_d32);
        let rgba8 = table.get(ResourceFormat::Rgba8Unorm);
        assert!(rgba8.support.contains(FormatSupport::SAMPLED | FormatSupport::RENDER_TARGET));
        assert!(!rgba8.support.contains(FormatSupport::STORAGE));
        assert!(table
            .get(ResourceFormat::DFloat)
            .support
            .contains(FormatSupport::DEPTH_STENCIL));
    }

    #[test]
    fn block_sizes() {
        assert_eq!(ResourceFormat::Rgba8Unorm.block_size(), 4);
        assert_eq!(ResourceFormat::Bc1.block_size(), 8);
        assert_eq!(ResourceFormat::Bc7Unorm.block_extent(), 4);
        assert_eq!(ResourceFormat::Rgb32Float.block_size(), 12);
        assert_eq!(ResourceFormat::D24S8.block_size(), 4);
    }
}
