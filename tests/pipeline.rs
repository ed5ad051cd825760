use renderdag::{
    Bound, DirectionalLight, Filter, ImageCache, NodeKind, PipelineAssembler, PipelineConfig,
    PreviewGridNode, ProgramKind, Renderer, ResourceError, Scene, SceneView, ShadowContext, Slot,
    SoftwareDevice, SoftwareTarget, SurfaceKind, Vec3, Viewport,
};

/// Clears every view to one gray level and remembers what it was handed.
#[derive(Default)]
struct GrayScene {
    level: f32,
    light: Option<DirectionalLight>,
    camera_draws: usize,
    light_draws: usize,
    saw_shadow: Option<bool>,
}

impl GrayScene {
    fn new(level: u8) -> Self {
        Self {
            level: level as f32 / 255.0,
            ..Self::default()
        }
    }
}

impl Scene<SoftwareDevice> for GrayScene {
    fn draw(
        &mut self,
        target: &mut Bound<'_, SoftwareDevice>,
        view: &SceneView,
        shadow: Option<ShadowContext<'_, SoftwareTarget>>,
    ) -> Result<(), ResourceError> {
        match view {
            SceneView::Camera { .. } => {
                self.camera_draws += 1;
                self.saw_shadow = Some(shadow.is_some());
            }
            SceneView::Light { .. } => self.light_draws += 1,
        }
        let l = self.level;
        target.clear([l, l, l, 1.0]);
        Ok(())
    }

    fn light(&self) -> Option<DirectionalLight> {
        self.light
    }
}

fn bloom_config() -> PipelineConfig {
    PipelineConfig::from_json(
        r#"{
            "enablePostprocess": true,
            "bloomEffect": { "enabled": true, "threshold": 0.5 }
        }"#,
    )
    .unwrap()
}

fn center(renderer: &Renderer<SoftwareDevice>, surface: SurfaceKind) -> [u8; 4] {
    let image = renderer.device().surface(surface);
    image.get_pixel(image.width() / 2, image.height() / 2).0
}

#[test]
fn shadow_without_postprocess_topology() {
    let config = PipelineConfig::from_json(
        r#"{ "enableShadow": true, "shadowQuality": { "resolution": 64 } }"#,
    )
    .unwrap();
    let images = ImageCache::new();
    let mut device = SoftwareDevice::new(64, 48);
    let pipeline = PipelineAssembler::new(&config, &images)
        .assemble(&mut device, 64, 48)
        .unwrap();

    assert_eq!(
        pipeline.graph.describe(),
        ["shadow-map", "scene-capture", "screen-composite"]
    );
    let shadow = pipeline.nodes.shadow_map.unwrap();
    let capture = pipeline.graph.node(pipeline.nodes.scene_capture).unwrap();
    assert_eq!(capture.input(Slot::Shadow), Some(shadow));
    assert_eq!(pipeline.graph.node(shadow).unwrap().size(), (64, 64));
    assert!(pipeline.nodes.downsample.is_none());
    assert!(pipeline.nodes.blur.is_none());
}

#[test]
fn bloom_buffers_follow_threshold() {
    let config = PipelineConfig::from_json(
        r#"{ "enablePostprocess": true, "bloomEffect": { "enabled": true, "threshold": 0.3 } }"#,
    )
    .unwrap();
    let mut renderer = Renderer::new(SoftwareDevice::new(800, 600), 800, 600);
    renderer.configure(config).unwrap();

    let pipeline = renderer.pipeline().unwrap();
    let downsample = pipeline.nodes.downsample.unwrap();
    let node = pipeline.graph.node(downsample).unwrap();
    assert_eq!(node.size(), (240, 180));
    assert!(matches!(node.kind(), NodeKind::Filter(pass) if pass.filter() == Filter::LinearInterp));

    renderer.resize(400, 300);
    let pipeline = renderer.pipeline().unwrap();
    assert_eq!(pipeline.graph.node(downsample).unwrap().size(), (120, 90));
}

#[test]
fn bloom_adds_blurred_copy_of_the_scene() {
    let mut renderer = Renderer::new(SoftwareDevice::new(40, 30), 40, 30);
    renderer.configure(bloom_config()).unwrap();
    renderer.tick(&mut GrayScene::new(128)).unwrap();
    assert_eq!(center(&renderer, SurfaceKind::Scene), [255, 255, 255, 255]);

    renderer.configure(PipelineConfig::default()).unwrap();
    renderer.tick(&mut GrayScene::new(128)).unwrap();
    assert_eq!(center(&renderer, SurfaceKind::Scene), [128, 128, 128, 255]);
}

#[test]
fn idle_ticks_skip_all_work() {
    let mut renderer = Renderer::new(SoftwareDevice::new(16, 16), 16, 16);
    renderer.configure(bloom_config()).unwrap();
    let mut scene = GrayScene::new(10);

    assert_eq!(renderer.tick(&mut scene).unwrap().rendered, [SurfaceKind::Scene]);
    let stats = renderer.device().stats();
    for _ in 0..3 {
        assert!(renderer.tick(&mut scene).unwrap().is_idle());
    }
    assert_eq!(renderer.device().stats(), stats);
    assert_eq!(scene.camera_draws, 1);

    renderer.mark_dirty(SurfaceKind::Scene);
    renderer.tick(&mut scene).unwrap();
    assert_eq!(scene.camera_draws, 2);
    assert_eq!(renderer.scheduler().traversals(SurfaceKind::Scene), 2);
}

#[test]
fn scene_capture_receives_shadow_map() {
    let config = PipelineConfig::from_json(
        r#"{ "enableShadow": true, "shadowQuality": { "resolution": 32, "scale": 4.0, "viewDepth": 20.0 } }"#,
    )
    .unwrap();
    let mut renderer = Renderer::new(SoftwareDevice::new(16, 16), 16, 16);
    renderer.configure(config).unwrap();

    let mut scene = GrayScene::new(50);
    scene.light = Some(DirectionalLight::new(Vec3::new(0.0, -1.0, -1.0), Vec3::ZERO));
    renderer.tick(&mut scene).unwrap();
    assert_eq!(scene.light_draws, 1);
    assert_eq!(scene.saw_shadow, Some(true));

    let pipeline = renderer.pipeline().unwrap();
    let shadow = pipeline.graph.node(pipeline.nodes.shadow_map.unwrap()).unwrap();
    let context = shadow.shadow_context().unwrap();
    let expected = DirectionalLight::new(Vec3::new(0.0, -1.0, -1.0), Vec3::ZERO)
        .view_projection(4.0, 20.0);
    assert_eq!(context.light_view_projection, expected);
}

#[test]
fn lightless_scene_gets_no_shadow() {
    let config =
        PipelineConfig::from_json(r#"{ "enableShadow": true, "shadowQuality": { "resolution": 8 } }"#)
            .unwrap();
    let mut renderer = Renderer::new(SoftwareDevice::new(8, 8), 8, 8);
    renderer.configure(config).unwrap();

    let mut scene = GrayScene::new(50);
    renderer.tick(&mut scene).unwrap();
    assert_eq!(scene.light_draws, 0);
    assert_eq!(scene.saw_shadow, Some(false));
}

#[test]
fn failed_bloom_pass_degrades_to_plain_scene() {
    let mut device = SoftwareDevice::new(20, 20);
    device.fail_program(ProgramKind::Filter(Filter::LinearInterp));
    let mut renderer = Renderer::new(device, 20, 20);
    renderer.configure(bloom_config()).unwrap();

    let report = renderer.tick(&mut GrayScene::new(128)).unwrap();
    assert_eq!(report.rendered, [SurfaceKind::Scene]);
    assert_eq!(center(&renderer, SurfaceKind::Scene), [128, 128, 128, 255]);

    let pipeline = renderer.pipeline().unwrap();
    let downsample = pipeline.graph.node(pipeline.nodes.downsample.unwrap()).unwrap();
    assert!(downsample.is_evaluated());
    assert!(downsample.output().is_none());
}

#[test]
fn oversized_shadow_map_is_skipped() {
    let config = PipelineConfig::from_json(
        r#"{ "enableShadow": true, "shadowQuality": { "resolution": 4096 } }"#,
    )
    .unwrap();
    let device = SoftwareDevice::new(16, 16).with_target_limit(16 * 16);
    let mut renderer = Renderer::new(device, 16, 16);
    renderer.configure(config).unwrap();

    let mut scene = GrayScene::new(200);
    scene.light = Some(DirectionalLight::new(Vec3::NEG_Y, Vec3::ZERO));
    renderer.tick(&mut scene).unwrap();
    assert_eq!(scene.saw_shadow, Some(false));
    assert_eq!(center(&renderer, SurfaceKind::Scene), [200, 200, 200, 255]);
}

#[test]
fn background_lands_on_overlay() {
    let mut renderer = Renderer::new(SoftwareDevice::new(12, 12), 12, 12);
    renderer
        .images_mut()
        .insert("sky", image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 255, 255])));
    let config = PipelineConfig::from_json(r#"{ "backgroundImage": "sky" }"#).unwrap();
    renderer.configure(config).unwrap();

    let report = renderer.tick(&mut GrayScene::new(90)).unwrap();
    assert_eq!(report.rendered, [SurfaceKind::Scene, SurfaceKind::Overlay]);
    assert_eq!(center(&renderer, SurfaceKind::Overlay), [0, 0, 255, 255]);
    assert_eq!(center(&renderer, SurfaceKind::Scene), [90, 90, 90, 255]);
}

/// Bloom and a lit shadow map, two dirty ticks. Returns total node
/// evaluations plus camera and light draws.
fn bloom_and_shadow_run(preview: bool) -> (u64, usize, usize) {
    let mut config = bloom_config();
    config.enable_shadow = true;
    config.shadow_quality.resolution = 16;
    config.enable_preview = preview;
    let mut renderer = Renderer::new(SoftwareDevice::new(16, 16), 16, 16);
    renderer.configure(config).unwrap();

    let mut scene = GrayScene::new(80);
    scene.light = Some(DirectionalLight::new(Vec3::NEG_Y, Vec3::ZERO));
    renderer.tick(&mut scene).unwrap();
    renderer.mark_dirty(SurfaceKind::Scene);
    renderer.tick(&mut scene).unwrap();

    let evaluations = renderer.pipeline().unwrap().graph.evaluations();
    (evaluations, scene.camera_draws, scene.light_draws)
}

#[test]
fn preview_grid_adds_only_its_own_evaluation() {
    let plain = bloom_and_shadow_run(false);
    let previewed = bloom_and_shadow_run(true);

    // shadow, capture, downsample, blur and composite, once per tick.
    assert_eq!(plain, (10, 2, 2));
    assert_eq!(previewed, (plain.0 + 2, 2, 2));
}

#[test]
fn preview_tiles_cover_the_scene_from_the_top_left() {
    let mut config = bloom_config();
    config.enable_preview = true;
    let mut renderer = Renderer::new(SoftwareDevice::new(40, 40), 40, 40);
    renderer.configure(config).unwrap();
    renderer.tick(&mut GrayScene::new(128)).unwrap();

    let pipeline = renderer.pipeline().unwrap();
    let preview = pipeline.graph.node(pipeline.nodes.preview.unwrap()).unwrap();
    assert_eq!(preview.inputs().len(), 3);
    assert_eq!(
        PreviewGridNode::tile_viewport(0, 3),
        Viewport {
            x: 0.0,
            y: 0.0,
            width: 0.5,
            height: 0.5
        }
    );

    let surface = renderer.device().surface(SurfaceKind::Scene);
    // Tile 0 is the plain scene capture.
    assert_eq!(surface.get_pixel(10, 10).0, [128, 128, 128, 255]);
    // Three tiles leave the bottom-right cell to the bloomed composite.
    assert_eq!(surface.get_pixel(30, 30).0, [255, 255, 255, 255]);
}
