use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use renderdag::{
    Bound, Camera, Destination, DirectionalLight, GpuContext, GpuDevice, PipelineConfig,
    Renderer, ResourceError, Scene, SceneView, ShadowContext, SoftwareDevice, SoftwareTarget,
    SurfaceKind, Vec3, Vec4,
};

#[derive(Parser, Debug)]
#[command(name = "renderdag", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one frame of the demo scene on the CPU and save it as a PNG.
    Frame(FrameArgs),
    /// Open a window and drive the pipeline on the GPU.
    Window(WindowArgs),
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Pipeline options JSON (defaults when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Optional PNG registered as the image named "background".
    #[arg(long)]
    background: Option<PathBuf>,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,
}

#[derive(Parser, Debug)]
struct WindowArgs {
    /// Pipeline options JSON (defaults when omitted).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "renderdag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Frame(args) => cmd_frame(args),
        Command::Window(args) => cmd_window(args),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    PipelineConfig::from_json(&json).with_context(|| format!("parse config {}", path.display()))
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_ref())?;
    let (width, height) = (args.width, args.height);

    let mut renderer = Renderer::new(SoftwareDevice::new(width, height), width, height);
    if let Some(background) = &args.background {
        renderer
            .images_mut()
            .load("background", background)
            .with_context(|| format!("load background {}", background.display()))?;
    }
    renderer.configure(config)?;

    let mut scene = BoxScene::demo();
    let report = renderer.tick(&mut scene)?;
    info!(rendered = ?report.rendered, "frame rendered");

    renderer
        .device()
        .surface(SurfaceKind::Scene)
        .save(&args.out)
        .with_context(|| format!("write {}", args.out.display()))?;
    if renderer.pipeline().is_some_and(|p| p.nodes.background.is_some()) {
        let overlay = args.out.with_extension("overlay.png");
        renderer
            .device()
            .surface(SurfaceKind::Overlay)
            .save(&overlay)
            .with_context(|| format!("write {}", overlay.display()))?;
    }
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_window(args: WindowArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_ref())?;
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

// ============================================================================
// Demo scene (CPU)
// ============================================================================

struct Block {
    center: Vec3,
    half: Vec3,
    color: [f32; 4],
}

/// A handful of axis-aligned boxes on a floor, rasterized as depth-tested
/// screen rectangles.
struct BoxScene {
    camera: Camera,
    light: DirectionalLight,
    floor: Block,
    blocks: Vec<Block>,
}

impl BoxScene {
    fn demo() -> Self {
        Self {
            camera: Camera::new().at(0.0, 4.0, 10.0).looking_at(0.0, 0.0, 0.0).with_fov(60.0),
            light: DirectionalLight::new(Vec3::new(-0.4, -1.0, -0.3), Vec3::ZERO),
            floor: Block {
                center: Vec3::new(0.0, -1.05, 0.0),
                half: Vec3::new(6.0, 0.05, 6.0),
                color: [0.35, 0.35, 0.4, 1.0],
            },
            blocks: vec![
                Block {
                    center: Vec3::new(-2.0, 0.0, 0.0),
                    half: Vec3::splat(1.0),
                    color: [0.9, 0.25, 0.2, 1.0],
                },
                Block {
                    center: Vec3::new(1.5, -0.5, 1.0),
                    half: Vec3::splat(0.5),
                    color: [0.2, 0.6, 0.95, 1.0],
                },
                Block {
                    center: Vec3::new(2.5, 0.5, -2.0),
                    half: Vec3::new(0.5, 1.5, 0.5),
                    color: [1.0, 0.95, 0.6, 1.0],
                },
            ],
        }
    }
}

/// Screen-space bounds `(x, y, w, h)` and nearest NDC depth of a projected box.
fn project(view_projection: renderdag::Mat4, block: &Block, size: (u32, u32)) -> Option<((u32, u32, u32, u32), f32)> {
    let (w, h) = (size.0 as f32, size.1 as f32);
    let (mut min, mut max) = (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN));
    for i in 0..8 {
        let sign = Vec3::new(
            if i & 1 == 0 { -1.0 } else { 1.0 },
            if i & 2 == 0 { -1.0 } else { 1.0 },
            if i & 4 == 0 { -1.0 } else { 1.0 },
        );
        let clip: Vec4 = view_projection * (block.center + block.half * sign).extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        min = min.min(ndc);
        max = max.max(ndc);
    }
    let x0 = ((min.x * 0.5 + 0.5) * w).clamp(0.0, w);
    let x1 = ((max.x * 0.5 + 0.5) * w).clamp(0.0, w);
    let y0 = ((0.5 - max.y * 0.5) * h).clamp(0.0, h);
    let y1 = ((0.5 - min.y * 0.5) * h).clamp(0.0, h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let rect = (x0 as u32, y0 as u32, (x1 - x0).ceil() as u32, (y1 - y0).ceil() as u32);
    Some((rect, min.z.clamp(0.0, 1.0)))
}

/// True when the shadow map holds something nearer the light than `point`.
fn in_shadow(shadow: &ShadowContext<'_, SoftwareTarget>, point: Vec3) -> bool {
    let Some(depth) = shadow.map.depth() else {
        return false;
    };
    let ndc = (shadow.light_view_projection * point.extend(1.0)).truncate();
    let (w, h) = (shadow.map.width(), shadow.map.height());
    let u = ((ndc.x * 0.5 + 0.5) * w as f32) as i64;
    let v = ((0.5 - ndc.y * 0.5) * h as f32) as i64;
    if u < 0 || v < 0 || u >= w as i64 || v >= h as i64 {
        return false;
    }
    depth[(v as u32 * w + u as u32) as usize] + 0.005 < ndc.z
}

impl Scene<SoftwareDevice> for BoxScene {
    fn draw(
        &mut self,
        target: &mut Bound<'_, SoftwareDevice>,
        view: &SceneView,
        shadow: Option<ShadowContext<'_, SoftwareTarget>>,
    ) -> Result<(), ResourceError> {
        let (device, dest) = target.parts();
        let size = match &*dest {
            Destination::Target(t) => (t.width(), t.height()),
            Destination::Surface(kind) => device.surface(*kind).dimensions(),
        };
        let (view_projection, depth_only) = match *view {
            SceneView::Camera { aspect } => (self.camera.view_projection(aspect), false),
            SceneView::Light { view_projection } => (view_projection, true),
        };

        for block in std::iter::once(&self.floor).chain(&self.blocks) {
            let Some((rect, depth)) = project(view_projection, block, size) else {
                continue;
            };
            let color = if depth_only {
                [depth, depth, depth, 1.0]
            } else {
                block.color
            };
            device.fill_rect(dest, rect, color, depth);
        }

        // Darken the floor under each block the light cannot see past.
        if let (false, Some(shadow)) = (depth_only, shadow.as_ref()) {
            for block in &self.blocks {
                let footprint = Block {
                    center: Vec3::new(block.center.x, self.floor.center.y + self.floor.half.y, block.center.z),
                    half: Vec3::new(block.half.x, 0.0, block.half.z),
                    color: [0.0; 4],
                };
                if !in_shadow(shadow, footprint.center) {
                    continue;
                }
                if let Some((rect, depth)) = project(view_projection, &footprint, size) {
                    let [r, g, b, a] = self.floor.color;
                    device.fill_rect(dest, rect, [r * 0.4, g * 0.4, b * 0.4, a], depth - 1e-4);
                }
            }
        }
        Ok(())
    }

    fn light(&self) -> Option<DirectionalLight> {
        Some(self.light)
    }
}

// ============================================================================
// Window mode (GPU)
// ============================================================================

/// Clears to a slowly cycling color; enough to watch the pipeline tick.
struct PulseScene {
    start: Instant,
}

impl Scene<GpuDevice> for PulseScene {
    fn draw(
        &mut self,
        target: &mut Bound<'_, GpuDevice>,
        view: &SceneView,
        _shadow: Option<ShadowContext<'_, renderdag::GpuTarget>>,
    ) -> Result<(), ResourceError> {
        let t = self.start.elapsed().as_secs_f32();
        match view {
            SceneView::Camera { .. } => target.clear([
                0.5 + 0.5 * t.sin(),
                0.5 + 0.5 * (t * 0.7).sin(),
                0.5 + 0.5 * (t * 1.3).sin(),
                1.0,
            ]),
            SceneView::Light { .. } => target.clear([1.0; 4]),
        }
        Ok(())
    }
}

struct App {
    config: PipelineConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer<GpuDevice>>,
    scene: PulseScene,
}

impl App {
    fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            scene: PulseScene {
                start: Instant::now(),
            },
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window = Arc::new(event_loop.create_window(
            Window::default_attributes().with_title("renderdag"),
        )?);
        let size = window.inner_size();
        let gpu = GpuContext::new(window.clone())?;
        let mut renderer = Renderer::new(GpuDevice::new(gpu), size.width, size.height);
        renderer.configure(self.config.clone())?;

        window.request_redraw();
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            error!("failed to start: {err:#}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    if size.width > 0 && size.height > 0 {
                        renderer.resize(size.width, size.height);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.mark_dirty(SurfaceKind::Scene);
                    if let Err(err) = renderer.tick(&mut self.scene) {
                        error!(%err, "frame failed");
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}
