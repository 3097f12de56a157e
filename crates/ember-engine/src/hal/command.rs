use super::types::{PipelineId, ResourceId, ResourceState, RootSignatureId, ScissorRect, Viewport};

/// A declared state transition of one resource.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Transition {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl Transition {
    pub fn new(resource: ResourceId, before: ResourceState, after: ResourceState) -> Self {
        Self { resource, before, after }
    }

    /// The transition that undoes this one.
    pub fn reversed(self) -> Self {
        Self { resource: self.resource, before: self.after, after: self.before }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VertexBufferView {
    pub resource: ResourceId,
    pub stride: u32,
    pub size: u32,
}

/// One recorded GPU instruction.
///
/// Descriptor handles are resolved at record time, so backends only see
/// resource ids.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetPipeline(PipelineId),
    SetRootSignature(RootSignatureId),
    SetShaderResource { slot: u32, resource: ResourceId },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    Barrier(Transition),
    SetRenderTarget(ResourceId),
    ClearRenderTarget { target: ResourceId, color: [f32; 4] },
    SetVertexBuffer(VertexBufferView),
    Draw { vertex_count: u32, instance_count: u32 },
    CopyBuffer { src: ResourceId, dst: ResourceId, size: u64 },
    /// `row_pitch` is the byte distance between rows in the buffer.
    CopyBufferToTexture { src: ResourceId, dst: ResourceId, row_pitch: u32 },
    CopyTextureToBuffer { src: ResourceId, dst: ResourceId, row_pitch: u32 },
}

impl Command {
    /// Resources this command reads or writes.
    pub fn resources(&self) -> Vec<ResourceId> {
        match *self {
            Command::SetShaderResource { resource, .. } => vec![resource],
            Command::Barrier(t) => vec![t.resource],
            Command::SetRenderTarget(r) => vec![r],
            Command::ClearRenderTarget { target, .. } => vec![target],
            Command::SetVertexBuffer(v) => vec![v.resource],
            Command::CopyBuffer { src, dst, .. }
            | Command::CopyBufferToTexture { src, dst, .. }
            | Command::CopyTextureToBuffer { src, dst, .. } => vec![src, dst],
            Command::SetPipeline(_)
            | Command::SetRootSignature(_)
            | Command::SetViewport(_)
            | Command::SetScissor(_)
            | Command::Draw { .. } => Vec::new(),
        }
    }
}
