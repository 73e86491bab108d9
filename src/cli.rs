use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use notify::{Event, EventKind, RecursiveMode, Watcher};

use crate::config::HostConfig;
use crate::host::{HostListener, RecompileHandle, SketchHost};
use crate::loading_state::LoadingState;
use crate::native_frame::{CanvasStream, RhaiFrame};
use crate::script_list::{compile_script_list, parse_persisted_scripts, ScriptRef};
use crate::update_gate::SketchProps;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the script load plan for a sketch as JSON
    Plan {
        /// Sketch source file
        #[arg(long)]
        sketch: PathBuf,

        /// JSON file with the persisted script list ([{"id":..,"path":..}])
        #[arg(long)]
        persisted: Option<PathBuf>,
    },
    /// Host a sketch in a native frame
    Run {
        /// Sketch source file (Rhai)
        #[arg(long)]
        sketch: PathBuf,

        /// JSON file with the persisted script list
        #[arg(long)]
        persisted: Option<PathBuf>,

        /// JSON host configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Frames to draw before exiting (or between reloads with --watch)
        #[arg(long, default_value_t = 60)]
        frames: u32,

        /// Open the stream view once the sketch is running
        #[arg(long)]
        popup: bool,

        /// Keep running and hot reload the sketch when the file changes
        #[arg(long)]
        watch: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { sketch, persisted } => print_plan(&sketch, persisted.as_deref()),
        Commands::Run {
            sketch,
            persisted,
            config,
            frames,
            popup,
            watch,
        } => {
            let config = match config {
                Some(path) => HostConfig::from_json_file(&path)?,
                None => HostConfig::default(),
            };
            let persisted = read_persisted(persisted.as_deref())?;
            run_sketch(&sketch, persisted, config, frames, popup, watch)
        }
    }
}

fn read_persisted(path: Option<&Path>) -> Result<Vec<ScriptRef>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let contents = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("Failed to read persisted scripts {}: {}", path.display(), e)
    })?;
    parse_persisted_scripts(&contents)
}

fn print_plan(sketch: &Path, persisted: Option<&Path>) -> Result<()> {
    let code = std::fs::read_to_string(sketch)?;
    let persisted = read_persisted(persisted)?;
    let plan = compile_script_list(&code, &persisted);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

/// Listener that logs host notifications and keeps the recompile handle.
#[derive(Default)]
struct ConsoleListener {
    recompile: RefCell<Option<RecompileHandle<RhaiFrame>>>,
}

impl ConsoleListener {
    fn recompile(&self) {
        match self.recompile.borrow().as_ref() {
            Some(handle) => handle.recompile(),
            None => log::warn!("Sketch is not ready to recompile"),
        }
    }
}

impl HostListener<RhaiFrame> for ConsoleListener {
    fn set_iframe_ref(&self, frame: Rc<RhaiFrame>) {
        log::debug!("Sketch frame ready (margin {})", frame.margin());
    }

    fn set_recompile_sketch(&self, recompile: RecompileHandle<RhaiFrame>) {
        *self.recompile.borrow_mut() = Some(recompile);
    }

    fn set_canvas_media_stream(&self, stream: CanvasStream) {
        log::info!(
            "Canvas stream: {}x{} @ {} fps",
            stream.width,
            stream.height,
            stream.frame_rate
        );
    }

    fn set_sketch_loaded(&self) {
        log::info!("Sketch loaded");
    }
}

fn report_diagnostics(frame: &RhaiFrame) -> Result<()> {
    for diag in frame.take_diagnostics() {
        eprintln!("{}", serde_json::to_string(&diag)?);
    }
    Ok(())
}

fn draw_frames(frame: &RhaiFrame, frames: u32, interval: Duration) {
    for _ in 0..frames {
        if let Err(e) = frame.draw_frame() {
            log::error!("draw() failed: {}", e);
            break;
        }
        std::thread::sleep(interval);
    }
}

fn frame_interval(config: &HostConfig) -> Duration {
    Duration::from_secs_f32(1.0 / config.sketch_frame_rate.max(1) as f32)
}

fn run_sketch(
    sketch: &Path,
    persisted: Vec<ScriptRef>,
    config: HostConfig,
    frames: u32,
    popup: bool,
    watch: bool,
) -> Result<()> {
    let code = std::fs::read_to_string(sketch)?;
    let base_dir = sketch
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let listener = Rc::new(ConsoleListener::default());
    let host = SketchHost::new(
        RhaiFrame::new(base_dir),
        listener.clone(),
        SketchProps::new(code.clone(), false),
        persisted,
        config,
    );
    let interval = frame_interval(host.config());

    pollster::block_on(host.mount());
    let frame = host.frame();
    report_diagnostics(&frame)?;

    if host.loading_state() == LoadingState::UserCodeLoaded {
        listener.recompile();
        if popup {
            pollster::block_on(host.apply_update(SketchProps::new(code, true)));
        }
        draw_frames(&frame, frames, interval);
    } else {
        log::warn!("Sketch did not load ({})", host.loading_state());
    }
    report_diagnostics(&frame)?;

    if watch {
        watch_sketch(&host, &listener, sketch, popup, interval)?;
    }
    Ok(())
}

fn is_sketch_change(event: &Event, sketch: &Path) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == sketch.file_name())
}

fn watch_sketch(
    host: &SketchHost<RhaiFrame>,
    listener: &ConsoleListener,
    sketch: &Path,
    popup: bool,
    interval: Duration,
) -> Result<()> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Err(e) = tx.send(res) {
            log::error!("Error sending watch event: {}", e);
        }
    })?;
    let dir = match sketch.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    log::info!("Watching {} for changes", sketch.display());

    let frame = host.frame();
    // Stop drawing after a draw() error until the next reload.
    let mut drawing = true;
    loop {
        match rx.recv_timeout(interval) {
            Ok(Ok(event)) if is_sketch_change(&event, sketch) => {
                let code = match std::fs::read_to_string(sketch) {
                    Ok(code) => code,
                    Err(e) => {
                        log::warn!("Could not read {}: {}", sketch.display(), e);
                        continue;
                    }
                };
                if pollster::block_on(host.apply_update(SketchProps::new(code, popup))) {
                    log::info!("Reloaded {}", sketch.display());
                    listener.recompile();
                    drawing = true;
                }
                report_diagnostics(&frame)?;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::warn!("Watch error: {}", e),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if drawing && host.loading_state() == LoadingState::UserCodeLoaded {
            if let Err(e) = frame.draw_frame() {
                log::error!("draw() failed: {}", e);
                drawing = false;
                report_diagnostics(&frame)?;
            }
        }
    }
    Ok(())
}
