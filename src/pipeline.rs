//! Graphics and compute pipeline builders.
//!
//! Builders collect state device-free; [`GraphicsPipelineBuilder::build`] and
//! [`ComputePipelineBuilder::build`] create the Vulkan objects against the
//! engine's device. Every pipeline layout is the same shape: set 0 is the
//! global binding table, plus at most one push-constant range visible to all
//! stages.

use std::ffi::CStr;
use std::io::Cursor;

use ash::vk;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::resources::PipelineResource;
use crate::types::{CullMode, ShaderStage, TextureFormat, VertexFormat};

const SHADER_ENTRY: &CStr = c"main";

/// A built graphics pipeline and its layout.
///
/// Hand it back to `Engine::destroy_graphics_pipeline` when done; destruction
/// is deferred until in-flight frames have drained.
#[derive(Debug)]
pub struct GraphicsPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout for push-constant uploads.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub(crate) fn into_resource(self) -> PipelineResource {
        PipelineResource {
            pipeline: self.pipeline,
            layout: self.layout,
        }
    }
}

/// A built compute pipeline and its layout.
#[derive(Debug)]
pub struct ComputePipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl ComputePipeline {
    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout for push-constant uploads.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub(crate) fn into_resource(self) -> PipelineResource {
        PipelineResource {
            pipeline: self.pipeline,
            layout: self.layout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepthMode {
    Disabled,
    Read,
    ReadWrite,
}

#[derive(Debug, Clone)]
struct StageSource {
    code: Vec<u8>,
    stage: ShaderStage,
}

#[derive(Debug, Clone, Copy)]
struct VertexAttribute {
    location: u32,
    format: VertexFormat,
    offset: u32,
}

/// Collects graphics pipeline state, then builds it in one call.
///
/// Defaults describe a minimal line-drawing pipeline: line-list topology with
/// line polygon mode, counter-clockwise front faces, no culling, one sample,
/// depth disabled, dynamic viewport and scissor. Attribute locations are
/// assigned in call order; offsets are caller-supplied.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineBuilder {
    stages: Vec<StageSource>,
    push_constant_size: u32,
    vertex_stride: u32,
    vertex_attributes: Vec<VertexAttribute>,
    color_formats: Vec<TextureFormat>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: CullMode,
    control_points: u32,
    depth: DepthMode,
}

impl Default for GraphicsPipelineBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            push_constant_size: 0,
            vertex_stride: 0,
            vertex_attributes: Vec::new(),
            color_formats: Vec::new(),
            topology: vk::PrimitiveTopology::LINE_LIST,
            polygon_mode: vk::PolygonMode::LINE,
            cull_mode: CullMode::None,
            control_points: 0,
            depth: DepthMode::Disabled,
        }
    }
}

impl GraphicsPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a SPIR-V stage. Entry point is always `main`.
    pub fn add_stage(mut self, spirv: &[u8], stage: ShaderStage) -> Self {
        self.stages.push(StageSource {
            code: spirv.to_vec(),
            stage,
        });
        self
    }

    /// Drop all attached stages, for builder reuse.
    pub fn clear_stages(mut self) -> Self {
        self.stages.clear();
        self
    }

    /// Declare `T` as the push-constant block, visible to all stages.
    pub fn push_constant<T: bytemuck::Pod>(mut self) -> Self {
        self.push_constant_size = std::mem::size_of::<T>() as u32;
        self
    }

    /// Stride of the vertex buffer bound at binding 0.
    pub fn vertex_stride(mut self, stride: u32) -> Self {
        self.vertex_stride = stride;
        self
    }

    /// Append a vertex attribute at `offset` within the vertex. Locations are
    /// assigned in call order.
    pub fn add_vertex_attribute(mut self, offset: u32, format: VertexFormat) -> Self {
        let location = self.vertex_attributes.len() as u32;
        self.vertex_attributes.push(VertexAttribute {
            location,
            format,
            offset,
        });
        self
    }

    pub fn clear_vertex_attributes(mut self) -> Self {
        self.vertex_attributes.clear();
        self
    }

    /// Append a color attachment. Blending is disabled; all channels written.
    pub fn add_color_attachment(mut self, format: TextureFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn clear_color_attachments(mut self) -> Self {
        self.color_formats.clear();
        self
    }

    pub fn fill_triangles(mut self) -> Self {
        self.topology = vk::PrimitiveTopology::TRIANGLE_LIST;
        self.polygon_mode = vk::PolygonMode::FILL;
        self
    }

    pub fn wireframe_triangles(mut self) -> Self {
        self.topology = vk::PrimitiveTopology::TRIANGLE_LIST;
        self.polygon_mode = vk::PolygonMode::LINE;
        self
    }

    pub fn lines(mut self) -> Self {
        self.topology = vk::PrimitiveTopology::LINE_LIST;
        self.polygon_mode = vk::PolygonMode::LINE;
        self
    }

    /// Switch to patch-list topology for tessellation stages.
    pub fn tessellation(mut self, control_points: u32) -> Self {
        self.topology = vk::PrimitiveTopology::PATCH_LIST;
        self.polygon_mode = vk::PolygonMode::FILL;
        self.control_points = control_points;
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn depth_test_disabled(mut self) -> Self {
        self.depth = DepthMode::Disabled;
        self
    }

    /// Test against depth without writing it.
    pub fn depth_read(mut self) -> Self {
        self.depth = DepthMode::Read;
        self
    }

    /// Test against depth and write passing fragments.
    pub fn depth_read_write(mut self) -> Self {
        self.depth = DepthMode::ReadWrite;
        self
    }

    fn depth_flags(&self) -> (bool, bool, vk::CompareOp) {
        match self.depth {
            DepthMode::Disabled => (false, false, vk::CompareOp::NEVER),
            DepthMode::Read => (true, false, vk::CompareOp::LESS_OR_EQUAL),
            DepthMode::ReadWrite => (true, true, vk::CompareOp::LESS_OR_EQUAL),
        }
    }

    /// Create the pipeline and its layout. Shader modules are transient and
    /// destroyed before returning.
    pub fn build(&self, engine: &Engine) -> Result<GraphicsPipeline> {
        let device = engine.device();

        let mut modules: Vec<(vk::ShaderStageFlags, vk::ShaderModule)> =
            Vec::with_capacity(self.stages.len());
        for source in &self.stages {
            match create_shader_module(device, &source.code) {
                Ok(module) => modules.push((source.stage.to_vk(), module)),
                Err(e) => {
                    unsafe { destroy_modules(device, &modules) };
                    return Err(e);
                }
            }
        }

        let layout = match create_pipeline_layout(
            device,
            engine.binding_layout(),
            self.push_constant_size,
        ) {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { destroy_modules(device, &modules) };
                return Err(e);
            }
        };

        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = modules
            .iter()
            .map(|&(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage)
                    .module(module)
                    .name(SHADER_ENTRY)
            })
            .collect();

        let binding_descriptions: Vec<vk::VertexInputBindingDescription> =
            if self.vertex_stride > 0 {
                vec![vk::VertexInputBindingDescription::default()
                    .binding(0)
                    .stride(self.vertex_stride)
                    .input_rate(vk::VertexInputRate::VERTEX)]
            } else {
                Vec::new()
            };

        let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = self
            .vertex_attributes
            .iter()
            .map(|attr| {
                vk::VertexInputAttributeDescription::default()
                    .location(attr.location)
                    .binding(0)
                    .format(attr.format.to_vk())
                    .offset(attr.offset)
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let tessellation_state = vk::PipelineTessellationStateCreateInfo::default()
            .patch_control_points(self.control_points);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let (depth_test, depth_write, compare_op) = self.depth_flags();
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth_test)
            .depth_write_enable(depth_write)
            .depth_compare_op(compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = self
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .blend_enable(false)
            })
            .collect();

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_attachment_formats: Vec<vk::Format> =
            self.color_formats.iter().map(|f| f.to_vk()).collect();

        // The depth format is declared even for pipelines built without a
        // depth mode, so the same pipeline works in passes that attach depth.
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_attachment_formats)
            .depth_attachment_format(TextureFormat::Depth32F.to_vk());

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .tessellation_state(&tessellation_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let result = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        unsafe { destroy_modules(device, &modules) };

        let pipelines = match result {
            Ok(pipelines) => pipelines,
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(Error::ResourceCreationFailed(format!(
                    "Failed to create graphics pipeline: {:?}",
                    e
                )));
            }
        };

        Ok(GraphicsPipeline {
            pipeline: pipelines[0],
            layout,
        })
    }
}

/// Collects compute pipeline state, then builds it in one call.
#[derive(Debug, Clone, Default)]
pub struct ComputePipelineBuilder {
    shader: Option<Vec<u8>>,
    push_constant_size: u32,
}

impl ComputePipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The compute shader in SPIR-V. Entry point is always `main`.
    pub fn shader(mut self, spirv: &[u8]) -> Self {
        self.shader = Some(spirv.to_vec());
        self
    }

    /// Declare `T` as the push-constant block.
    pub fn push_constant<T: bytemuck::Pod>(mut self) -> Self {
        self.push_constant_size = std::mem::size_of::<T>() as u32;
        self
    }

    pub fn build(&self, engine: &Engine) -> Result<ComputePipeline> {
        let code = self.shader.as_deref().ok_or_else(|| {
            Error::InvalidParameter("compute pipeline requires a shader".into())
        })?;

        let device = engine.device();
        let module = create_shader_module(device, code)?;

        let layout = match create_pipeline_layout(
            device,
            engine.binding_layout(),
            self.push_constant_size,
        ) {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_shader_module(module, None) };
                return Err(e);
            }
        };

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(SHADER_ENTRY);

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);

        let result = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        unsafe { device.destroy_shader_module(module, None) };

        let pipelines = match result {
            Ok(pipelines) => pipelines,
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(Error::ResourceCreationFailed(format!(
                    "Failed to create compute pipeline: {:?}",
                    e
                )));
            }
        };

        Ok(ComputePipeline {
            pipeline: pipelines[0],
            layout,
        })
    }
}

fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| Error::InvalidParameter(format!("Invalid SPIR-V: {}", e)))
}

fn create_shader_module(device: &ash::Device, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = parse_spirv(code)?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
    unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
        Error::ResourceCreationFailed(format!("Failed to create shader module: {:?}", e))
    })
}

fn create_pipeline_layout(
    device: &ash::Device,
    set_layout: vk::DescriptorSetLayout,
    push_constant_size: u32,
) -> Result<vk::PipelineLayout> {
    let set_layouts = [set_layout];
    let push_ranges = [vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::ALL)
        .offset(0)
        .size(push_constant_size)];

    let mut create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    if push_constant_size > 0 {
        create_info = create_info.push_constant_ranges(&push_ranges);
    }

    unsafe { device.create_pipeline_layout(&create_info, None) }.map_err(|e| {
        Error::ResourceCreationFailed(format!("Failed to create pipeline layout: {:?}", e))
    })
}

unsafe fn destroy_modules(device: &ash::Device, modules: &[(vk::ShaderStageFlags, vk::ShaderModule)]) {
    for &(_, module) in modules {
        unsafe { device.destroy_shader_module(module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_are_line_drawing() {
        let builder = GraphicsPipelineBuilder::new();
        assert_eq!(builder.topology, vk::PrimitiveTopology::LINE_LIST);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::LINE);
        assert_eq!(builder.cull_mode, CullMode::None);
        assert_eq!(builder.control_points, 0);
        assert_eq!(builder.depth_flags(), (false, false, vk::CompareOp::NEVER));
        assert!(builder.stages.is_empty());
        assert!(builder.color_formats.is_empty());
        assert_eq!(builder.push_constant_size, 0);
    }

    #[test]
    fn test_topology_setters() {
        let builder = GraphicsPipelineBuilder::new().fill_triangles();
        assert_eq!(builder.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::FILL);

        let builder = GraphicsPipelineBuilder::new().wireframe_triangles();
        assert_eq!(builder.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::LINE);

        let builder = GraphicsPipelineBuilder::new().fill_triangles().lines();
        assert_eq!(builder.topology, vk::PrimitiveTopology::LINE_LIST);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::LINE);

        let builder = GraphicsPipelineBuilder::new().tessellation(4);
        assert_eq!(builder.topology, vk::PrimitiveTopology::PATCH_LIST);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(builder.control_points, 4);
    }

    #[test]
    fn test_vertex_attribute_locations_follow_call_order() {
        let builder = GraphicsPipelineBuilder::new()
            .vertex_stride(36)
            .add_vertex_attribute(0, VertexFormat::Float3)
            .add_vertex_attribute(12, VertexFormat::Float2)
            .add_vertex_attribute(20, VertexFormat::Float4);

        let attrs = &builder.vertex_attributes;
        assert_eq!(attrs.len(), 3);
        assert_eq!((attrs[0].location, attrs[0].offset), (0, 0));
        assert_eq!((attrs[1].location, attrs[1].offset), (1, 12));
        assert_eq!((attrs[2].location, attrs[2].offset), (2, 20));
        assert_eq!(builder.vertex_stride, 36);
    }

    #[test]
    fn test_clear_methods_reset_for_reuse() {
        let builder = GraphicsPipelineBuilder::new()
            .add_stage(&[0x03, 0x02, 0x23, 0x07], ShaderStage::Vertex)
            .add_vertex_attribute(0, VertexFormat::Float3)
            .add_color_attachment(TextureFormat::Rgba16F)
            .fill_triangles();

        let builder = builder
            .clear_stages()
            .clear_vertex_attributes()
            .clear_color_attachments();

        assert!(builder.stages.is_empty());
        assert!(builder.vertex_attributes.is_empty());
        assert!(builder.color_formats.is_empty());
        // Topology and the rest of the state survive the clears.
        assert_eq!(builder.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
    }

    #[test]
    fn test_depth_modes() {
        let read = GraphicsPipelineBuilder::new().depth_read();
        assert_eq!(read.depth_flags(), (true, false, vk::CompareOp::LESS_OR_EQUAL));

        let read_write = GraphicsPipelineBuilder::new().depth_read_write();
        assert_eq!(
            read_write.depth_flags(),
            (true, true, vk::CompareOp::LESS_OR_EQUAL)
        );

        let disabled = GraphicsPipelineBuilder::new().depth_read().depth_test_disabled();
        assert_eq!(disabled.depth_flags(), (false, false, vk::CompareOp::NEVER));
    }

    #[test]
    fn test_push_constant_takes_struct_size() {
        #[repr(C)]
        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        struct Push {
            transform: [f32; 16],
            texture: u32,
            _pad: [u32; 3],
        }

        let builder = GraphicsPipelineBuilder::new().push_constant::<Push>();
        assert_eq!(builder.push_constant_size, 80);
    }

    #[test]
    fn test_parse_spirv_accepts_magic_and_rejects_garbage() {
        // Minimal valid stream: magic number followed by one word.
        let good = [0x03u8, 0x02, 0x23, 0x07, 0, 0, 0, 0];
        assert_eq!(parse_spirv(&good).unwrap()[0], 0x0723_0203);

        let truncated = [0x03u8, 0x02, 0x23];
        assert!(matches!(
            parse_spirv(&truncated),
            Err(Error::InvalidParameter(_))
        ));

        let wrong_magic = [0xffu8; 8];
        assert!(matches!(
            parse_spirv(&wrong_magic),
            Err(Error::InvalidParameter(_))
        ));
    }
}
