//! wgpu implementation of [`Device`].
//!
//! Every pixel program is a fragment entry point in one WGSL module, drawn
//! as a fullscreen triangle into the bound destination. Draws are recorded
//! into a single command encoder per frame; [`Device::end_frame`] submits it
//! and presents the window surface.

use std::collections::HashMap;

use image::RgbaImage;
use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use crate::device::{Destination, Device, Program, ProgramKind, Rgba, SurfaceKind, TargetDesc};
use crate::error::ResourceError;
use crate::gpu::{GpuContext, OFFSCREEN_FORMAT};
use crate::render_graph::Filter;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Per-draw program parameters.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ProgramUniforms {
    /// Size of one primary-input texel in UV units.
    texel: [f32; 2],
    gamma: f32,
    antialias: u32,
}

/// An offscreen color texture with an optional depth attachment.
pub struct GpuTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub depth: Option<(wgpu::Texture, wgpu::TextureView)>,
    width: u32,
    height: u32,
}

impl GpuTarget {
    fn new(gpu: &GpuContext, desc: &TargetDesc, format: wgpu::TextureFormat) -> Self {
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth = desc.depth.then(|| {
            let depth = gpu.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: DEPTH_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let view = depth.create_view(&wgpu::TextureViewDescriptor::default());
            (depth, view)
        });
        Self {
            texture,
            view,
            depth,
            width: desc.width,
            height: desc.height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Visible surfaces: the window (or its headless stand-in) and the overlay.
struct Surfaces {
    overlay: GpuTarget,
    /// Stands in for the window surface on headless contexts.
    offscreen_scene: Option<GpuTarget>,
    /// The swapchain image acquired by `begin_frame`.
    current: Option<(wgpu::SurfaceTexture, wgpu::TextureView)>,
    scene_format: wgpu::TextureFormat,
}

impl Surfaces {
    fn new(gpu: &GpuContext) -> Self {
        let desc = |label| TargetDesc {
            width: gpu.width(),
            height: gpu.height(),
            depth: false,
            label,
        };
        Self {
            overlay: GpuTarget::new(gpu, &desc("overlay surface"), OFFSCREEN_FORMAT),
            offscreen_scene: gpu
                .is_headless()
                .then(|| GpuTarget::new(gpu, &desc("scene surface"), OFFSCREEN_FORMAT)),
            current: None,
            scene_format: gpu.config.format,
        }
    }

    fn get(&self, kind: SurfaceKind) -> Option<&GpuTarget> {
        match kind {
            SurfaceKind::Scene => self.offscreen_scene.as_ref(),
            SurfaceKind::Overlay => Some(&self.overlay),
        }
    }

    /// Color view, depth view and format of `dest`.
    fn attachment<'d>(
        &'d self,
        dest: &'d Destination<'_, GpuTarget>,
    ) -> Result<(&'d wgpu::TextureView, Option<&'d wgpu::TextureView>, wgpu::TextureFormat), ResourceError>
    {
        match dest {
            Destination::Target(target) => Ok((
                &target.view,
                target.depth.as_ref().map(|(_, view)| view),
                OFFSCREEN_FORMAT,
            )),
            Destination::Surface(SurfaceKind::Overlay) => Ok((&self.overlay.view, None, OFFSCREEN_FORMAT)),
            Destination::Surface(SurfaceKind::Scene) => {
                if let Some(target) = &self.offscreen_scene {
                    return Ok((&target.view, None, OFFSCREEN_FORMAT));
                }
                let (_, view) = self.current.as_ref().ok_or_else(|| ResourceError::Surface {
                    surface: SurfaceKind::Scene,
                    reason: "no frame in flight".into(),
                })?;
                Ok((view, None, self.scene_format))
            }
        }
    }
}

/// Shared pipeline state for every pixel program.
struct Programs {
    shader: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    bind_group_layout: wgpu::BindGroupLayout,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    pipelines: HashMap<(ProgramKind, wgpu::TextureFormat), wgpu::RenderPipeline>,
}

impl Programs {
    fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("pixel programs"),
            source: wgpu::ShaderSource::Wgsl(PROGRAM_SHADER.into()),
        });

        let sampler = |label, filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let linear_sampler = sampler("linear sampler", wgpu::FilterMode::Linear);
        let nearest_sampler = sampler("nearest sampler", wgpu::FilterMode::Nearest);

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pixel program bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                sampler_entry(3),
                sampler_entry(4),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pixel program pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Self {
            shader,
            layout,
            bind_group_layout,
            linear_sampler,
            nearest_sampler,
            pipelines: HashMap::new(),
        }
    }

    /// Compiles `kind` for `format` unless it is already cached.
    fn ensure(
        &mut self,
        gpu: &GpuContext,
        kind: ProgramKind,
        format: wgpu::TextureFormat,
    ) -> Result<(), ResourceError> {
        if !self.pipelines.contains_key(&(kind, format)) {
            gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let pipeline = gpu
                .device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(kind.name()),
                    layout: Some(&self.layout),
                    vertex: wgpu::VertexState {
                        module: &self.shader,
                        entry_point: Some("vs"),
                        buffers: &[],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &self.shader,
                        entry_point: Some(entry_point(kind)),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: Some(wgpu::BlendState::REPLACE),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                });
            if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
                return Err(ResourceError::ProgramCompile {
                    program: kind.name(),
                    reason: err.to_string(),
                });
            }
            debug!(program = kind.name(), ?format, "program compiled");
            self.pipelines.insert((kind, format), pipeline);
        }
        Ok(())
    }

    fn pipeline(
        &self,
        kind: ProgramKind,
        format: wgpu::TextureFormat,
    ) -> Result<&wgpu::RenderPipeline, ResourceError> {
        self.pipelines
            .get(&(kind, format))
            .ok_or_else(|| ResourceError::ProgramCompile {
                program: kind.name(),
                reason: "not prepared".into(),
            })
    }
}

fn entry_point(kind: ProgramKind) -> &'static str {
    match kind {
        ProgramKind::Filter(filter) => match filter {
            Filter::None => "fs_none",
            Filter::LinearInterp => "fs_linear_interp",
            Filter::BlurHorizontal => "fs_blur_horizontal",
            Filter::BlurVertical => "fs_blur_vertical",
            Filter::LightThreshold => "fs_light_threshold",
            Filter::Blur3x3 => "fs_blur_3x3",
            Filter::Blur5x5 => "fs_blur_5x5",
            Filter::Antialias => "fs_antialias",
            Filter::AntialiasLinear => "fs_antialias_linear",
        },
        ProgramKind::Composite => "fs_composite",
        ProgramKind::Blit => "fs_blit",
    }
}

fn wgpu_color(color: Rgba) -> wgpu::Color {
    wgpu::Color {
        r: color[0] as f64,
        g: color[1] as f64,
        b: color[2] as f64,
        a: color[3] as f64,
    }
}

/// The wgpu-backed graphics device.
pub struct GpuDevice {
    gpu: GpuContext,
    programs: Programs,
    surfaces: Surfaces,
    /// Sampled in place of absent inputs.
    fallback: GpuTarget,
    encoder: Option<wgpu::CommandEncoder>,
}

impl GpuDevice {
    pub fn new(gpu: GpuContext) -> Self {
        let programs = Programs::new(&gpu);
        let surfaces = Surfaces::new(&gpu);
        let fallback = GpuTarget::new(
            &gpu,
            &TargetDesc {
                width: 1,
                height: 1,
                depth: false,
                label: "transparent fallback",
            },
            OFFSCREEN_FORMAT,
        );
        gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &fallback.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0u8; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        Self {
            gpu,
            programs,
            surfaces,
            fallback,
            encoder: None,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Runs `draw` inside a render pass on `dest` that keeps its contents.
    ///
    /// This is the hook [`Scene`](crate::Scene) implementations use to issue
    /// their own pipelines against the bound target.
    pub fn scene_pass(
        &mut self,
        dest: &Destination<'_, GpuTarget>,
        draw: impl FnOnce(&mut wgpu::RenderPass<'_>, &GpuContext),
    ) -> Result<(), ResourceError> {
        let (view, depth, _) = self.surfaces.attachment(dest)?;
        let encoder = self.encoder.get_or_insert_with(|| {
            self.gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("renderdag frame encoder"),
                })
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("scene pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        draw(&mut pass, &self.gpu);
        Ok(())
    }

    /// Submits recorded work without presenting.
    pub fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.gpu.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    /// Copies an offscreen surface back to the CPU.
    ///
    /// Only available for the overlay and for headless scene surfaces.
    pub fn read_surface(&mut self, kind: SurfaceKind) -> Result<RgbaImage, ResourceError> {
        self.flush();
        let target = self.surfaces.get(kind).ok_or_else(|| ResourceError::Surface {
            surface: kind,
            reason: "window surfaces cannot be read back".into(),
        })?;
        read_texture(&self.gpu, &target.texture, target.width, target.height)
    }

    /// Copies an offscreen target back to the CPU.
    pub fn read_target(&mut self, target: &GpuTarget) -> Result<RgbaImage, ResourceError> {
        self.flush();
        read_texture(&self.gpu, &target.texture, target.width, target.height)
    }
}

fn read_texture(
    gpu: &GpuContext,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<RgbaImage, ResourceError> {
    let readback_err = |reason: String| ResourceError::Upload(format!("readback failed: {reason}"));
    let row_bytes = width * 4;
    let padded = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback buffer"),
        size: padded as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    gpu.device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| readback_err(format!("{e:?}")))?;
    rx.recv()
        .map_err(|_| readback_err("channel closed".into()))?
        .map_err(|e| readback_err(format!("{e:?}")))?;

    let mapped = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((row_bytes * height) as usize);
    for row in 0..height as usize {
        let start = row * padded as usize;
        pixels.extend_from_slice(&mapped[start..start + row_bytes as usize]);
    }
    drop(mapped);
    buffer.unmap();
    RgbaImage::from_raw(width, height, pixels).ok_or_else(|| readback_err("short buffer".into()))
}

impl Device for GpuDevice {
    type Target = GpuTarget;

    fn create_target(&mut self, desc: &TargetDesc) -> Result<GpuTarget, ResourceError> {
        let max = self.gpu.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(ResourceError::TargetAllocation {
                width: desc.width,
                height: desc.height,
                reason: format!("outside 1..={max}"),
            });
        }
        Ok(GpuTarget::new(&self.gpu, desc, OFFSCREEN_FORMAT))
    }

    fn upload_image(&mut self, image: &RgbaImage) -> Result<GpuTarget, ResourceError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ResourceError::Upload("image has no pixels".into()));
        }
        let texture = self.gpu.device.create_texture_with_data(
            &self.gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some("source image"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: OFFSCREEN_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            image.as_raw(),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuTarget {
            texture,
            view,
            depth: None,
            width,
            height,
        })
    }

    fn prepare_program(&mut self, kind: ProgramKind) -> Result<(), ResourceError> {
        self.programs.ensure(&self.gpu, kind, OFFSCREEN_FORMAT)
    }

    // Passes are opened per draw, so binding has no state of its own.
    fn bind(&mut self, _dest: &Destination<'_, GpuTarget>) {}

    fn unbind(&mut self) {}

    fn clear(&mut self, dest: &mut Destination<'_, GpuTarget>, color: Rgba) {
        let (view, depth, _) = match self.surfaces.attachment(dest) {
            Ok(attachment) => attachment,
            Err(err) => {
                warn!(%err, "clear skipped");
                return;
            }
        };
        let encoder = self.encoder.get_or_insert_with(|| {
            self.gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("renderdag frame encoder"),
                })
        });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu_color(color)),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    fn draw_with_program(
        &mut self,
        dest: &mut Destination<'_, GpuTarget>,
        program: &Program,
        inputs: &[Option<&GpuTarget>],
    ) -> Result<(), ResourceError> {
        let (dest_width, dest_height) = match &*dest {
            Destination::Target(target) => (target.width, target.height),
            Destination::Surface(_) => (self.gpu.width(), self.gpu.height()),
        };
        let format = self.surfaces.attachment(dest)?.2;
        self.programs.ensure(&self.gpu, program.kind, format)?;
        let (view, _, _) = self.surfaces.attachment(dest)?;
        let pipeline = self.programs.pipeline(program.kind, format)?;

        let primary = inputs.first().copied().flatten().unwrap_or(&self.fallback);
        let secondary = inputs.get(1).copied().flatten().unwrap_or(&self.fallback);
        let uniforms = ProgramUniforms {
            texel: [1.0 / primary.width as f32, 1.0 / primary.height as f32],
            gamma: program.gamma,
            antialias: program.antialias as u32,
        };
        // One buffer per draw: all draws of a frame share one submission.
        let uniform_buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("program uniforms"),
                contents: bytemuck::cast_slice(&[uniforms]),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self
            .gpu
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("program bind group"),
                layout: &self.programs.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&primary.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&secondary.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::Sampler(&self.programs.linear_sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::Sampler(&self.programs.nearest_sampler),
                    },
                ],
            });

        let (x, y, w, h) = program.viewport.to_pixels(dest_width, dest_height);
        if w == 0 || h == 0 {
            return Ok(());
        }
        let encoder = self.encoder.get_or_insert_with(|| {
            self.gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("renderdag frame encoder"),
                })
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(program.kind.name()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_viewport(x as f32, y as f32, w as f32, h as f32, 0.0, 1.0);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.flush();
        self.gpu.resize(width, height);
        self.surfaces = Surfaces::new(&self.gpu);
    }

    fn begin_frame(&mut self, surface: SurfaceKind) -> Result<(), ResourceError> {
        if surface != SurfaceKind::Scene || self.surfaces.current.is_some() {
            return Ok(());
        }
        let Some(window_surface) = &self.gpu.surface else {
            return Ok(());
        };
        let output = window_surface
            .get_current_texture()
            .map_err(|e| ResourceError::Surface {
                surface,
                reason: e.to_string(),
            })?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.surfaces.current = Some((output, view));
        Ok(())
    }

    fn end_frame(&mut self, surface: SurfaceKind) -> Result<(), ResourceError> {
        self.flush();
        if surface == SurfaceKind::Scene {
            if let Some((output, _)) = self.surfaces.current.take() {
                output.present();
            }
        }
        Ok(())
    }
}

/// Fullscreen-triangle vertex stage plus one fragment entry point per program.
const PROGRAM_SHADER: &str = r#"
struct Uniforms {
    texel: vec2f,
    gamma: f32,
    antialias: u32,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(0) @binding(1) var primary: texture_2d<f32>;
@group(0) @binding(2) var secondary: texture_2d<f32>;
@group(0) @binding(3) var linear_sampler: sampler;
@group(0) @binding(4) var nearest_sampler: sampler;

struct VsOut {
    @builtin(position) pos: vec4f,
    @location(0) uv: vec2f,
}

@vertex
fn vs(@builtin(vertex_index) vi: u32) -> VsOut {
    let uv = vec2f(f32((vi << 1u) & 2u), f32(vi & 2u));
    var out: VsOut;
    out.pos = vec4f(uv * vec2f(2.0, -2.0) + vec2f(-1.0, 1.0), 0.0, 1.0);
    out.uv = uv;
    return out;
}

fn luma(c: vec4f) -> f32 {
    return dot(c.rgb, vec3f(0.299, 0.587, 0.114));
}

fn fetch(uv: vec2f, linear: bool) -> vec4f {
    if linear {
        return textureSampleLevel(primary, linear_sampler, uv, 0.0);
    }
    return textureSampleLevel(primary, nearest_sampler, uv, 0.0);
}

fn antialiased(uv: vec2f, linear: bool) -> vec4f {
    let center = fetch(uv, linear);
    let l = fetch(uv - vec2f(u.texel.x, 0.0), linear);
    let r = fetch(uv + vec2f(u.texel.x, 0.0), linear);
    let t = fetch(uv - vec2f(0.0, u.texel.y), linear);
    let b = fetch(uv + vec2f(0.0, u.texel.y), linear);
    let lo = min(luma(center), min(min(luma(l), luma(r)), min(luma(t), luma(b))));
    let hi = max(luma(center), max(max(luma(l), luma(r)), max(luma(t), luma(b))));
    if hi - lo < 0.1 {
        return center;
    }
    return mix(center, (l + r + t + b) * 0.25, 0.5);
}

fn gaussian(uv: vec2f, step: vec2f) -> vec4f {
    var w = array<f32, 5>(0.2270270270, 0.1945945946, 0.1216216216, 0.0540540541, 0.0162162162);
    var acc = fetch(uv, true) * w[0];
    for (var i = 1; i < 5; i++) {
        let o = step * f32(i);
        acc += fetch(uv + o, true) * w[i];
        acc += fetch(uv - o, true) * w[i];
    }
    return acc;
}

fn box_blur(uv: vec2f, radius: i32) -> vec4f {
    var acc = vec4f(0.0);
    for (var y = -radius; y <= radius; y++) {
        for (var x = -radius; x <= radius; x++) {
            acc += fetch(uv + vec2f(f32(x), f32(y)) * u.texel, false);
        }
    }
    let taps = f32((2 * radius + 1) * (2 * radius + 1));
    return acc / taps;
}

fn finish(base: vec4f, uv: vec2f) -> vec4f {
    let c = base + textureSampleLevel(secondary, linear_sampler, uv, 0.0);
    if u.gamma == 1.0 {
        return c;
    }
    return vec4f(pow(max(c.rgb, vec3f(0.0)), vec3f(u.gamma)), c.a);
}

@fragment
fn fs_none(in: VsOut) -> @location(0) vec4f {
    if u.antialias != 0u {
        return finish(antialiased(in.uv, false), in.uv);
    }
    return finish(fetch(in.uv, false), in.uv);
}

@fragment
fn fs_linear_interp(in: VsOut) -> @location(0) vec4f {
    if u.antialias != 0u {
        return finish(antialiased(in.uv, true), in.uv);
    }
    return finish(fetch(in.uv, true), in.uv);
}

@fragment
fn fs_blur_horizontal(in: VsOut) -> @location(0) vec4f {
    return finish(gaussian(in.uv, vec2f(u.texel.x, 0.0)), in.uv);
}

@fragment
fn fs_blur_vertical(in: VsOut) -> @location(0) vec4f {
    return finish(gaussian(in.uv, vec2f(0.0, u.texel.y)), in.uv);
}

@fragment
fn fs_light_threshold(in: VsOut) -> @location(0) vec4f {
    let c = fetch(in.uv, true);
    let k = smoothstep(0.5, 1.0, luma(c));
    return finish(vec4f(c.rgb * k, c.a), in.uv);
}

@fragment
fn fs_blur_3x3(in: VsOut) -> @location(0) vec4f {
    return finish(box_blur(in.uv, 1), in.uv);
}

@fragment
fn fs_blur_5x5(in: VsOut) -> @location(0) vec4f {
    return finish(box_blur(in.uv, 2), in.uv);
}

@fragment
fn fs_antialias(in: VsOut) -> @location(0) vec4f {
    return finish(antialiased(in.uv, false), in.uv);
}

@fragment
fn fs_antialias_linear(in: VsOut) -> @location(0) vec4f {
    return finish(antialiased(in.uv, true), in.uv);
}

@fragment
fn fs_composite(in: VsOut) -> @location(0) vec4f {
    var p = fetch(in.uv, true);
    if u.antialias != 0u {
        p = antialiased(in.uv, true);
    }
    let s = textureSampleLevel(secondary, linear_sampler, in.uv, 0.0);
    let rgb = clamp(pow(max(p.rgb + s.rgb, vec3f(0.0)), vec3f(1.0 / u.gamma)), vec3f(0.0), vec3f(1.0));
    return vec4f(rgb, max(p.a, s.a));
}

@fragment
fn fs_blit(in: VsOut) -> @location(0) vec4f {
    return fetch(in.uv, true);
}
"#;
