use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use softbuffer::Surface;
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::keyboard::Key;
use winit::window::{Window, WindowId};

use crate::fetcher::{FetchQueue, UserEvent};
use crate::surface::ScrollStrip;
use crate::ui::state::ViewerState;
use crate::viewer::{ViewerController, ViewerEvent};

pub mod render;
pub mod state;

pub type Viewer = ViewerController<ScrollStrip, Arc<FetchQueue>>;

const APP_TITLE: &str = "cbzv";

// ---------------------------------------------------------------------------
// Application handler (winit 0.30 style)
// ---------------------------------------------------------------------------

pub struct App {
    pub viewer: Viewer,
    pub state: ViewerState,
    pub window: Option<Arc<Window>>,
    pub context: Option<softbuffer::Context<Arc<Window>>>,
    pub surface: Option<Surface<Arc<Window>, Arc<Window>>>,
    /// Document generation the window title was last set for.
    titled_generation: u64,
}

impl App {
    pub fn new(viewer: Viewer, state: ViewerState) -> Self {
        Self {
            viewer,
            state,
            window: None,
            context: None,
            surface: None,
            titled_generation: 0,
        }
    }

    fn request_redraw(&self) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn sync_title(&mut self) {
        if self.titled_generation == self.viewer.generation() {
            return;
        }
        self.titled_generation = self.viewer.generation();
        if let Some(ref window) = self.window {
            let title = match self.viewer.document() {
                Some(doc) => doc.path.display().to_string(),
                None => APP_TITLE.to_string(),
            };
            window.set_title(&title);
        }
    }
}

impl ApplicationHandler<UserEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(APP_TITLE)
            .with_inner_size(LogicalSize::new(800u32, 1000u32));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        let surface = softbuffer::Context::new(Arc::clone(&window)).and_then(|context| {
            Surface::new(&context, Arc::clone(&window)).map(|surface| (context, surface))
        });
        let (context, surface) = match surface {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("Failed to create drawing surface: {}", e);
                event_loop.exit();
                return;
            }
        };

        let size = window.inner_size();
        self.viewer.surface_mut().set_viewport(size.width, size.height);
        self.state.viewport_dirty = true;

        window.request_redraw();
        self.window = Some(window);
        self.context = Some(context);
        self.surface = Some(surface);
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: UserEvent) {
        match event {
            UserEvent::PageFetched { generation, ordinal, result } => {
                self.viewer.handle(ViewerEvent::PageFetched { generation, ordinal, result });
                self.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.viewer.handle(ViewerEvent::Close);
                event_loop.exit();
            }

            WindowEvent::Resized(PhysicalSize { width, height }) => {
                let w = width.max(1);
                let h = height.max(1);
                if let Some(ref mut surface) = self.surface {
                    if let (Some(nw), Some(nh)) = (NonZeroU32::new(w), NonZeroU32::new(h)) {
                        let _ = surface.resize(nw, nh);
                    }
                }
                self.viewer.surface_mut().set_viewport(w, h);
                self.state.viewport_dirty = true;
                self.request_redraw();
            }

            WindowEvent::DroppedFile(path) => {
                log::info!("Dropped {:?}", path);
                self.viewer.handle(ViewerEvent::Open(path));
                self.request_redraw();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed {
                    match &event.logical_key {
                        Key::Named(named) => {
                            self.state.keys_pressed.insert(*named);
                        }
                        Key::Character(s) => {
                            if let Some(c) = s.chars().next() {
                                self.state.chars_pressed.insert(c.to_ascii_lowercase());
                            }
                        }
                        _ => {}
                    }
                    self.request_redraw();
                }
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let y = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(PhysicalPosition { y, .. }) => y as f32 / 40.0,
                };
                self.state.wheel_y += y;
                self.request_redraw();
            }

            WindowEvent::RedrawRequested => {
                if self.state.update(&mut self.viewer) {
                    self.viewer.handle(ViewerEvent::Close);
                    event_loop.exit();
                    return;
                }
                self.sync_title();

                let Some(window) = self.window.as_ref() else { return };
                if let Some(ref mut surface) = self.surface {
                    let size = window.inner_size();
                    let fb_w = size.width.max(1);
                    let fb_h = size.height.max(1);
                    if let Ok(mut buffer) = surface.buffer_mut() {
                        self.state.render(&self.viewer, &mut buffer, fb_w, fb_h);
                        let _ = buffer.present();
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // Wake up when the oldest page request exceeds its hold limit.
        match self.viewer.next_deadline() {
            Some(when) if Instant::now() >= when => {
                self.viewer.reap_stalled(Instant::now());
                self.request_redraw();
            }
            Some(when) => event_loop.set_control_flow(ControlFlow::WaitUntil(when)),
            None => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }
}
