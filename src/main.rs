use std::any::Any;
use std::fmt;
use std::io::{self, BufRead};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use pollster::block_on;
use winit::dpi::LogicalSize;
use winit::event::{DeviceEvent, ElementState, Event, KeyboardInput, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::platform::run_return::EventLoopExtRunReturn;
use winit::window::{CursorGrabMode, Window, WindowBuilder};

use hsml_runtime::config::{Cli, Command as CliCommand, ServeOptions, ViewOptions};
use hsml_runtime::inspector::Command;
use hsml_runtime::{server, KeyCode, NamedKey, Renderer, Viewer};

/// How long summary mode waits for model loads before printing.
const MODEL_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        CliCommand::View(options) => view(&options),
        CliCommand::Serve(options) => serve(&options),
    }
}

fn serve(options: &ServeOptions) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(server::run(options))
}

fn view(options: &ViewOptions) -> Result<()> {
    let mut viewer = Viewer::new(!options.no_scripts);
    viewer
        .load_document(&options.document)
        .with_context(|| format!("failed to load {}", options.document.display()))?;

    if options.summary_only {
        return run_headless(viewer, options.frames);
    }

    match run_interactive(viewer) {
        Ok(()) => Ok(()),
        Err(InteractiveError::Window(err, viewer)) => {
            eprintln!(
                "{err}. Falling back to --summary-only mode (set DISPLAY or install X11 libs to enable rendering)."
            );
            run_headless(*viewer, options.frames)
        }
        Err(InteractiveError::Runtime(err)) => Err(err),
    }
}

fn run_headless(mut viewer: Viewer, frames: u32) -> Result<()> {
    for _ in 0..frames {
        if let Some(panel) = viewer.frame() {
            println!("{panel}");
        }
    }
    let applied = viewer.settle(MODEL_TIMEOUT);
    info!("applied {applied} model(s)");
    print!("{}", viewer.summary());
    Ok(())
}

enum InteractiveError {
    /// No window could be created; the viewer is handed back for summary mode.
    Window(WindowInitError, Box<Viewer>),
    Runtime(anyhow::Error),
}

fn run_interactive(viewer: Viewer) -> Result<(), InteractiveError> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let mut event_loop = match event_loop {
        Ok(event_loop) => event_loop,
        Err(panic) => {
            return Err(InteractiveError::Window(
                WindowInitError::from_panic("event loop", panic),
                Box::new(viewer),
            ))
        }
    };
    let window = match WindowBuilder::new()
        .with_title("HSML Runtime")
        .with_inner_size(LogicalSize::new(1280.0, 720.0))
        .build(&event_loop)
    {
        Ok(window) => Arc::new(window),
        Err(err) => {
            return Err(InteractiveError::Window(
                WindowInitError::from_error("window", err),
                Box::new(viewer),
            ))
        }
    };
    let renderer = match block_on(Renderer::new(Arc::clone(&window))) {
        Ok(renderer) => renderer,
        Err(err) => {
            return Err(InteractiveError::Window(
                WindowInitError::from_error("renderer", format!("{err:#}")),
                Box::new(viewer),
            ))
        }
    };

    println!("Type `help` for console commands. F1 inspector, F2 free camera, F3 lighting, F5 reload.");
    let mut app = AppState {
        renderer,
        viewer,
        console: spawn_console(),
        last_error: None,
    };

    event_loop.run_return(|event, _, control_flow| {
        *control_flow = ControlFlow::Poll;
        if let Err(err) = app.process_event(&event, control_flow) {
            app.last_error = Some(err);
            control_flow.set_exit();
        }
    });

    print!("{}", app.viewer.summary());
    match app.last_error {
        Some(err) => Err(InteractiveError::Runtime(err)),
        None => Ok(()),
    }
}

/// Reads console commands from stdin on a background thread.
fn spawn_console() -> Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if sender.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        warn!("console unavailable: {err}");
    }
    receiver
}

struct AppState {
    renderer: Renderer,
    viewer: Viewer,
    console: Receiver<String>,
    last_error: Option<anyhow::Error>,
}

impl AppState {
    fn process_event(&mut self, event: &Event<()>, control_flow: &mut ControlFlow) -> Result<()> {
        match event {
            Event::WindowEvent { event, window_id } if *window_id == self.renderer.window_id() => {
                match event {
                    WindowEvent::CloseRequested => {
                        control_flow.set_exit();
                    }
                    WindowEvent::Resized(size) => {
                        self.renderer.resize(*size);
                    }
                    WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                        self.renderer.resize(**new_inner_size);
                    }
                    WindowEvent::KeyboardInput { input, .. } => {
                        self.handle_keyboard(input);
                    }
                    WindowEvent::Focused(false) => {
                        self.viewer.input_mut().clear_keys();
                    }
                    _ => {}
                }
            }
            Event::DeviceEvent {
                event: DeviceEvent::MouseMotion { delta },
                ..
            } => {
                self.viewer
                    .input_mut()
                    .add_mouse_motion(delta.0 as f32, delta.1 as f32);
            }
            Event::RedrawRequested(window_id) if *window_id == self.renderer.window_id() => {
                let camera = self.viewer.camera().params(self.renderer.aspect());
                let light = self.viewer.host().light();
                self.renderer.update_globals(&camera, &light);
                let items = self
                    .viewer
                    .host()
                    .root()
                    .map(|root| root.draw_list())
                    .unwrap_or_default();
                if let Err(err) = self.renderer.render(&items) {
                    match err {
                        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
                            self.renderer.reconfigure();
                        }
                        wgpu::SurfaceError::OutOfMemory => {
                            return Err(anyhow!("GPU is out of memory"));
                        }
                        wgpu::SurfaceError::Timeout => {
                            info!("Surface timeout; retrying next frame");
                        }
                    }
                }
            }
            Event::MainEventsCleared => {
                self.drain_console();
                if let Some(panel) = self.viewer.frame() {
                    println!("{panel}");
                }
                self.renderer.window().request_redraw();
            }
            _ => {}
        }
        Ok(())
    }

    fn drain_console(&mut self) {
        while let Ok(line) = self.console.try_recv() {
            if line.trim().is_empty() {
                continue;
            }
            println!("{}", self.viewer.execute_line(&line));
        }
    }

    fn handle_keyboard(&mut self, input: &KeyboardInput) {
        let Some(key) = input.virtual_keycode.and_then(map_keycode) else {
            return;
        };
        match input.state {
            ElementState::Pressed => {
                self.handle_shortcut(key);
                self.viewer.input_mut().set_key_down(key);
            }
            ElementState::Released => self.viewer.input_mut().set_key_up(key),
        }
    }

    fn handle_shortcut(&mut self, key: KeyCode) {
        // Key repeat delivers Pressed again; only react to the first press.
        if self.viewer.input().is_key_down(key) {
            return;
        }
        match key {
            KeyCode::Function(1) => println!("{}", self.viewer.apply_command(Command::Inspector)),
            KeyCode::Function(2) => {
                let locked = !self.viewer.input().pointer_locked();
                self.set_pointer_lock(locked);
            }
            KeyCode::Function(3) => println!("{}", self.viewer.apply_command(Command::Lighting)),
            KeyCode::Function(5) => {
                if let Err(err) = self.viewer.reload() {
                    error!("{err:#}");
                }
            }
            KeyCode::Named(NamedKey::Escape) => self.set_pointer_lock(false),
            _ => {}
        }
    }

    fn set_pointer_lock(&mut self, locked: bool) {
        let window: &Window = self.renderer.window();
        if locked {
            let grabbed = window
                .set_cursor_grab(CursorGrabMode::Locked)
                .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
            if let Err(err) = grabbed {
                warn!("pointer lock unavailable: {err}");
                return;
            }
        } else if let Err(err) = window.set_cursor_grab(CursorGrabMode::None) {
            warn!("failed to release pointer: {err}");
        }
        window.set_cursor_visible(!locked);
        self.viewer.input_mut().set_pointer_locked(locked);
    }
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

fn map_keycode(code: winit::event::VirtualKeyCode) -> Option<KeyCode> {
    use winit::event::VirtualKeyCode as Key;
    Some(match code {
        Key::Escape => KeyCode::Named(NamedKey::Escape),
        Key::A => KeyCode::Character('A'),
        Key::D => KeyCode::Character('D'),
        Key::S => KeyCode::Character('S'),
        Key::W => KeyCode::Character('W'),
        Key::F1 => KeyCode::Function(1),
        Key::F2 => KeyCode::Function(2),
        Key::F3 => KeyCode::Function(3),
        Key::F5 => KeyCode::Function(5),
        _ => return None,
    })
}
