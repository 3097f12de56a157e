use std::fmt;

/// Opaque handle to a backend-owned GPU resource.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceId(pub(crate) u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

/// Opaque handle to a compiled pipeline state object.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PipelineId(pub(crate) u64);

/// Opaque handle to a root signature (binding layout).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RootSignatureId(pub(crate) u64);

/// Adapter enumeration order hint.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PowerPreference {
    Unspecified,
    HighPerformance,
}

/// Capability tier a device is created at.
///
/// Ordered: a device supporting a level supports every lower one.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FeatureLevel {
    Level11_0,
    Level11_1,
    Level12_0,
    Level12_1,
}

impl FeatureLevel {
    /// Lowest level the renderer can run on.
    pub const MINIMUM: FeatureLevel = FeatureLevel::Level11_0;
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureLevel::Level11_0 => "11_0",
            FeatureLevel::Level11_1 => "11_1",
            FeatureLevel::Level12_0 => "12_0",
            FeatureLevel::Level12_1 => "12_1",
        };
        f.write_str(s)
    }
}

/// Description of a physical or virtual GPU.
///
/// Produced by enumeration and never mutated afterwards.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AdapterInfo {
    /// Backend-local index used to open the adapter.
    pub index: usize,
    pub name: String,
    pub vendor_id: u32,
    /// Dedicated video memory in bytes (0 when the backend cannot report it).
    pub dedicated_memory: u64,
    pub is_software: bool,
    pub max_feature_level: FeatureLevel,
}

/// Texel formats usable for back buffers and textures.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
}

impl TextureFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        4
    }

    /// Packs a linear RGBA color into this format's byte order.
    pub fn encode(self, rgba: [f32; 4]) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let [r, g, b, a] = rgba.map(q);
        match self {
            TextureFormat::Rgba8Unorm => [r, g, b, a],
            TextureFormat::Bgra8Unorm => [b, g, r, a],
        }
    }

    /// Unpacks a texel into linear RGBA.
    pub fn decode(self, texel: [u8; 4]) -> [f32; 4] {
        let [r, g, b, a] = match self {
            TextureFormat::Rgba8Unorm => texel,
            TextureFormat::Bgra8Unorm => [texel[2], texel[1], texel[0], texel[3]],
        };
        [r, g, b, a].map(|v| v as f32 / 255.0)
    }
}

/// Memory pool a resource lives in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HeapKind {
    /// GPU-resident, not CPU-visible.
    Default,
    /// CPU-writable, GPU-readable staging memory.
    Upload,
    /// GPU-writable, CPU-readable memory.
    Readback,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResourceKind {
    Buffer { size: u64 },
    Texture2d { width: u32, height: u32, format: TextureFormat },
}

impl ResourceKind {
    /// Size of the tightly packed contents in bytes.
    pub fn byte_size(&self) -> u64 {
        match *self {
            ResourceKind::Buffer { size } => size,
            ResourceKind::Texture2d { width, height, format } => {
                width as u64 * height as u64 * format.bytes_per_pixel() as u64
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDesc {
    pub label: String,
    pub kind: ResourceKind,
    pub heap: HeapKind,
    pub initial_state: ResourceState,
    /// Whether the resource may be bound as a render target.
    pub render_target: bool,
}

impl ResourceDesc {
    /// GPU-resident buffer, created ready to receive a copy.
    pub fn buffer(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            kind: ResourceKind::Buffer { size },
            heap: HeapKind::Default,
            initial_state: ResourceState::CopyDest,
            render_target: false,
        }
    }

    /// CPU-writable staging buffer.
    pub fn upload_buffer(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            kind: ResourceKind::Buffer { size },
            heap: HeapKind::Upload,
            initial_state: ResourceState::GenericRead,
            render_target: false,
        }
    }

    /// CPU-readable destination for GPU copies.
    pub fn readback_buffer(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            kind: ResourceKind::Buffer { size },
            heap: HeapKind::Readback,
            initial_state: ResourceState::CopyDest,
            render_target: false,
        }
    }

    /// GPU-resident 2D texture, created ready to receive a copy.
    pub fn texture2d(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            kind: ResourceKind::Texture2d { width, height, format },
            heap: HeapKind::Default,
            initial_state: ResourceState::CopyDest,
            render_target: false,
        }
    }
}

/// Usage state of a resource on the GPU timeline.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    CopyDest,
    CopySource,
    VertexBuffer,
    PixelShaderResource,
    /// Upload-heap state: readable by copies, vertex fetch and shaders.
    GenericRead,
}

/// The way a command touches a resource.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    RenderTargetWrite,
    CopyWrite,
    CopyRead,
    VertexRead,
    ShaderRead,
    Present,
}

impl ResourceState {
    /// Whether a command performing `access` may use a resource in this state.
    pub fn permits(self, access: Access) -> bool {
        use ResourceState as S;
        matches!(
            (self, access),
            (S::RenderTarget, Access::RenderTargetWrite)
                | (S::CopyDest, Access::CopyWrite)
                | (S::CopySource | S::GenericRead, Access::CopyRead)
                | (S::VertexBuffer | S::GenericRead, Access::VertexRead)
                | (S::PixelShaderResource | S::GenericRead, Access::ShaderRead)
                | (S::Present | S::Common, Access::Present)
        )
    }
}

/// Rasterizer viewport in pixels.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle in pixels, half-open on the right/bottom edges.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ScissorRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl ScissorRect {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self { left: 0, top: 0, right: width, bottom: height }
    }
}

/// Required alignment of a texture row inside a buffer, in bytes.
pub const TEXTURE_PITCH_ALIGNMENT: u32 = 256;

/// Kind of descriptor a heap stores.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorKind {
    RenderTarget,
    ShaderResource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootSignatureDesc {
    pub label: String,
    /// One shader-resource descriptor table (texture + static sampler) at slot 0.
    pub shader_resource_table: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    pub label: String,
    pub root_signature: RootSignatureId,
    pub vertex_layout: super::VertexLayout,
    pub target_format: TextureFormat,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub format: TextureFormat,
    /// Whether presentation waits for vertical blank.
    pub vsync: bool,
}
