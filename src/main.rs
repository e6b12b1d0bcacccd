use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use afterglow::{Camera, EffectsPipeline, GpuContext, Mat4, Mesh, MeshInstance, Scene, Vec3};

struct App {
    window: Option<Arc<Window>>,
    gpu: Option<GpuContext>,
    pipeline: Option<EffectsPipeline>,
    scene: Option<Scene>,
    // Constructed once: capture buffers and the effects graph are memoized
    // on camera identity, and moving a camera keeps its identity.
    camera: Camera,
    spinner: usize,
    start_time: Instant,
}

impl Default for App {
    fn default() -> Self {
        Self {
            window: None,
            gpu: None,
            pipeline: None,
            scene: None,
            camera: Camera::new().at(6.0, 4.0, 8.0).looking_at(0.0, 0.5, 0.0),
            spinner: 0,
            start_time: Instant::now(),
        }
    }
}

fn build_scene(gpu: &GpuContext) -> (Scene, usize) {
    let mut scene = Scene::new();

    let floor = Arc::new(Mesh::plane(gpu, 30.0));
    scene.add(
        MeshInstance::new(floor, Mat4::IDENTITY)
            .with_color(0.8, 0.8, 0.85)
            .with_material(0.9, 0.15),
    );

    let cube = Arc::new(Mesh::cube(gpu));
    let spinner = scene.add(
        MeshInstance::new(cube.clone(), Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)))
            .with_color(0.9, 0.3, 0.2)
            .with_material(0.1, 0.6),
    );
    scene.add(
        MeshInstance::new(cube.clone(), Mat4::from_translation(Vec3::new(3.0, 1.0, -2.0)))
            .with_color(0.2, 0.5, 0.9)
            .with_material(0.8, 0.2),
    );
    scene.add(
        MeshInstance::new(cube, Mat4::from_translation(Vec3::new(-3.0, 1.0, -1.0)))
            .with_color(2.5, 2.2, 1.8)
            .with_material(0.0, 0.9),
    );

    (scene, spinner)
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let window = Arc::new(
            event_loop
                .create_window(Window::default_attributes().with_title("afterglow"))
                .unwrap(),
        );

        let gpu = GpuContext::new(window.clone()).unwrap();
        let pipeline = EffectsPipeline::new(&gpu);
        let (scene, spinner) = build_scene(&gpu);

        self.gpu = Some(gpu);
        self.pipeline = Some(pipeline);
        self.scene = Some(scene);
        self.spinner = spinner;
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.physical_key == PhysicalKey::Code(KeyCode::Space) && event.state.is_pressed()
                    && let Some(pipeline) = &mut self.pipeline
                {
                    let enabled = pipeline.params().enabled();
                    pipeline.params_mut().set_enabled(!enabled);
                }
            }
            WindowEvent::RedrawRequested => {
                if let (Some(gpu), Some(pipeline), Some(scene)) =
                    (&mut self.gpu, &mut self.pipeline, &mut self.scene)
                {
                    let time = self.start_time.elapsed().as_secs_f32();

                    if let Some(instance) = scene.instance_mut(self.spinner) {
                        instance.set_transform(
                            Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0))
                                * Mat4::from_rotation_y(time * 0.7),
                        );
                    }

                    let angle = time * 0.2;
                    self.camera.position = Vec3::new(8.0 * angle.cos(), 4.0, 8.0 * angle.sin());

                    pipeline.render(gpu, scene, &self.camera);
                }

                self.window.as_ref().unwrap().request_redraw();
            }
            _ => (),
        }
    }
}

fn main() {
    env_logger::init();

    let event_loop = EventLoop::new().unwrap();
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    event_loop.run_app(&mut app).unwrap();
}
