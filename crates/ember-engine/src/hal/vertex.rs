use bytemuck::{Pod, Zeroable};

/// Position + color vertex (triangle scene).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

/// Position + texture coordinate vertex (textured quad scene).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Input layout a pipeline consumes from vertex buffer slot 0.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VertexLayout {
    PositionColor,
    PositionUv,
}

impl VertexLayout {
    pub const fn stride(self) -> u32 {
        match self {
            VertexLayout::PositionColor => std::mem::size_of::<ColorVertex>() as u32,
            VertexLayout::PositionUv => std::mem::size_of::<TexturedVertex>() as u32,
        }
    }
}
