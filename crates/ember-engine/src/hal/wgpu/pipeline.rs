use crate::hal::{PipelineDesc, RootSignatureDesc, TextureFormat, VertexLayout};

/// Binding layout backing a root signature.
pub(super) struct RootSignature {
    pub bind_group_layout: Option<wgpu::BindGroupLayout>,
    pub layout: wgpu::PipelineLayout,
}

pub(super) struct Pipeline {
    pub pipeline: wgpu::RenderPipeline,
    pub root_signature: crate::hal::RootSignatureId,
}

pub(super) fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
    }
}

const COLOR_ATTRS: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x4];
const TEXTURED_ATTRS: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

fn vertex_buffer_layout(layout: VertexLayout) -> wgpu::VertexBufferLayout<'static> {
    let attributes: &'static [wgpu::VertexAttribute] = match layout {
        VertexLayout::PositionColor => &COLOR_ATTRS,
        VertexLayout::PositionUv => &TEXTURED_ATTRS,
    };
    wgpu::VertexBufferLayout {
        array_stride: layout.stride() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes,
    }
}

pub(super) fn create_root_signature(device: &wgpu::Device, desc: &RootSignatureDesc) -> RootSignature {
    let bind_group_layout = desc.shader_resource_table.then(|| {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&desc.label),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        })
    });

    let layouts: Vec<&wgpu::BindGroupLayout> = bind_group_layout.iter().collect();
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&desc.label),
        bind_group_layouts: &layouts,
        immediate_size: 0,
    });

    RootSignature { bind_group_layout, layout }
}

pub(super) fn create_pipeline(
    device: &wgpu::Device,
    desc: &PipelineDesc,
    root: &RootSignature,
) -> wgpu::RenderPipeline {
    let source = match desc.vertex_layout {
        VertexLayout::PositionColor => include_str!("shaders/color.wgsl"),
        VertexLayout::PositionUv => include_str!("shaders/textured.wgsl"),
    };
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&desc.label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&desc.label),
        layout: Some(&root.layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[vertex_buffer_layout(desc.vertex_layout)],
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: texture_format(desc.target_format),
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Cw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

pub(super) fn create_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("ember point sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    })
}
