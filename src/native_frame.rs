//! Rhai-backed execution frame for the native host.
//!
//! Sketches are Rhai scripts written against a small p5-style drawing API:
//!
//! - `fn setup()` - Called on recompile (and by the run loop once after load)
//! - `fn draw()` - Called every frame
//!
//! Available API:
//! - `createCanvas(w, h)`, `width()`, `height()`
//! - `background(..)`, `fill(..)`, `stroke(..)`, `noStroke()`
//! - `ellipse(x, y, w, h)`, `circle(x, y, d)`, `rect(x, y, w, h)`, `line(x1, y1, x2, y2)`
//! - `frame_count()` - frames drawn since the last reset
//! - `lerp`, `map_range`, `constrain`, `dist` from the bundled library
//!
//! Logging:
//! - `print(value)`, `console_log(value)`, `console_warn(value)`, `console_error(value)`
//!
//! Rhai functions cannot see top-level variables, which is why the frame
//! counter and canvas size are exposed as functions.
//!
//! The `libs = [...]` declaration line is read by the host when it builds the
//! load plan. Injection blanks it out before compiling, so JS-style forms
//! (single quotes, no trailing `;`) do not break the sketch.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST};

use crate::frame::{ExecutionFrame, FrameError};
use crate::script_list::{libs_declaration_span, ScriptRef, DRAWING_LIBRARY_PATH};
use crate::sketch_console::{console_text, ConsoleLevel, ConsoleLine, SketchConsole};
use crate::sketch_diagnostics::{
    from_eval_error, from_parse_error, ScriptDiagnostic, ScriptPhase,
};

/// Rhai source served for the drawing-library entry of the load plan.
pub const DRAWING_LIBRARY_PRELUDE: &str = r#"
// Bundled drawing library helpers.
fn lerp(start, stop, amt) {
    start + (stop - start) * amt
}

fn map_range(value, start1, stop1, start2, stop2) {
    start2 + (stop2 - start2) * ((value - start1) / (stop1 - start1))
}

fn constrain(n, low, high) {
    if n < low { low } else if n > high { high } else { n }
}

fn dist(x1, y1, x2, y2) {
    let dx = x2 - x1;
    let dy = y2 - y1;
    (dx * dx + dy * dy).sqrt()
}
"#;

/// Keep a bounded queue so repeated draw errors don't grow without limit.
const MAX_DIAGNOSTICS: usize = 32;

/// Drawing surface state recorded by the native drawing API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Canvas {
    pub created: bool,
    pub width: u32,
    pub height: u32,
    /// Shape calls since the canvas was created.
    pub draw_calls: u64,
    /// Last background colour, as written by the sketch.
    pub background: Option<String>,
}

/// Stream handed out by canvas capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasStream {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

struct UserProgram {
    id: String,
    program: AST,
}

struct FrameDocument {
    scope: Scope<'static>,
    /// Functions of every library loaded so far.
    library: AST,
    /// Ids of loaded library scripts, in load order.
    scripts: Vec<String>,
    user_code: Option<UserProgram>,
    /// Scope length after the last library ran; user code runs above it.
    library_scope_len: usize,
    margin: u32,
}

pub struct RhaiFrame {
    engine: Engine,
    base_dir: PathBuf,
    document: RefCell<FrameDocument>,
    canvas: Rc<RefCell<Canvas>>,
    frame_count: Rc<Cell<u64>>,
    console: Rc<SketchConsole>,
    diagnostics: RefCell<Vec<ScriptDiagnostic>>,
}

fn number(value: &Dynamic) -> Option<f32> {
    if let Ok(f) = value.as_float() {
        return Some(f);
    }
    value.as_int().ok().map(|i| i as f32)
}

fn canvas_size(value: &Dynamic) -> Result<u32, Box<EvalAltResult>> {
    match number(value) {
        Some(n) if n >= 0.0 => Ok(n as u32),
        _ => Err(format!("createCanvas expects non-negative numbers, got {}", value).into()),
    }
}

fn colour(parts: &[&Dynamic]) -> String {
    let parts: Vec<String> = parts.iter().map(|p| console_text(p)).collect();
    parts.join(",")
}

fn without_libs_declaration(code: &str) -> Cow<'_, str> {
    let Some(span) = libs_declaration_span(code) else {
        return Cow::Borrowed(code);
    };
    // Newlines stay so diagnostics keep their line numbers.
    let blank: String = code[span.clone()]
        .chars()
        .map(|c| if c == '\n' { '\n' } else { ' ' })
        .collect();
    Cow::Owned(format!("{}{}{}", &code[..span.start], blank, &code[span.end..]))
}

impl RhaiFrame {
    /// Create a frame that resolves local script paths against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let mut engine = Engine::new();

        // Sandbox settings
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(64);
        engine.set_max_operations(1_000_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(1_000);

        let console = Rc::new(SketchConsole::new(true));
        register_console(&mut engine, &console);

        let canvas = Rc::new(RefCell::new(Canvas::default()));
        let frame_count = Rc::new(Cell::new(0_u64));
        register_drawing_api(&mut engine, &canvas, &frame_count);

        Self {
            engine,
            base_dir: base_dir.into(),
            document: RefCell::new(FrameDocument {
                scope: Scope::new(),
                library: AST::empty(),
                scripts: Vec::new(),
                user_code: None,
                library_scope_len: 0,
                margin: 8,
            }),
            canvas,
            frame_count,
            console,
            diagnostics: RefCell::new(Vec::new()),
        }
    }

    fn record(&self, diag: ScriptDiagnostic) -> FrameError {
        let mut diagnostics = self.diagnostics.borrow_mut();
        diagnostics.push(diag.clone());
        if diagnostics.len() > MAX_DIAGNOSTICS {
            let excess = diagnostics.len() - MAX_DIAGNOSTICS;
            diagnostics.drain(0..excess);
        }
        FrameError::Script(diag)
    }

    fn resolve(&self, script: &ScriptRef) -> Result<Cow<'static, str>, FrameError> {
        if script.path == DRAWING_LIBRARY_PATH {
            return Ok(Cow::Borrowed(DRAWING_LIBRARY_PRELUDE));
        }
        let path = script.path.as_str();
        if path.starts_with("http://") || path.starts_with("https://") || path.starts_with("//") {
            return Err(FrameError::Unreachable(script.path.clone()));
        }

        let full_path = self.base_dir.join(path);
        std::fs::read_to_string(&full_path)
            .map(Cow::Owned)
            .map_err(|source| FrameError::Io {
                path: full_path.display().to_string(),
                source,
            })
    }

    fn run_library(&self, script: &ScriptRef, source: &str) -> Result<(), FrameError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| {
                self.record(from_parse_error(&e, ScriptPhase::LibraryLoad, &script.id))
            })?;

        let mut doc = self.document.borrow_mut();
        let doc = &mut *doc;
        let program = doc.library.merge(&ast);
        if let Err(e) = self.engine.run_ast_with_scope(&mut doc.scope, &program) {
            doc.scope.rewind(doc.library_scope_len);
            return Err(self.record(from_eval_error(&e, ScriptPhase::LibraryLoad, &script.id)));
        }

        doc.library_scope_len = doc.scope.len();
        doc.library.combine(ast.clone_functions_only());
        doc.scripts.push(script.id.clone());
        Ok(())
    }

    fn call_sketch_fn(&self, name: &str, phase: ScriptPhase) -> Result<(), FrameError> {
        let mut doc = self.document.borrow_mut();
        let FrameDocument {
            scope, user_code, ..
        } = &mut *doc;
        let Some(user) = user_code.as_ref() else {
            return Err(FrameError::MissingCapability("user code"));
        };

        // Top-level statements already ran on injection.
        let options = CallFnOptions::new().eval_ast(false);
        let result: Result<Dynamic, Box<EvalAltResult>> =
            self.engine
                .call_fn_with_options(options, scope, &user.program, name, ());
        result
            .map(|_| ())
            .map_err(|e| self.record(from_eval_error(&e, phase, &user.id)))
    }

    /// Whether the current user program defines `name`.
    pub fn has_function(&self, name: &str) -> bool {
        self.document
            .borrow()
            .user_code
            .as_ref()
            .map(|u| u.program.iter_functions().any(|f| f.name == name))
            .unwrap_or(false)
    }

    /// Advance the frame counter and run `draw()` if the sketch defines it.
    pub fn draw_frame(&self) -> Result<(), FrameError> {
        let count = self.frame_count.get() + 1;
        self.frame_count.set(count);
        self.console.begin_frame(count);
        if !self.has_function("draw") {
            return Ok(());
        }
        self.call_sketch_fn("draw", ScriptPhase::Draw)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.get()
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas.borrow().clone()
    }

    pub fn margin(&self) -> u32 {
        self.document.borrow().margin
    }

    /// Ids of library scripts that loaded, in load order.
    pub fn loaded_scripts(&self) -> Vec<String> {
        self.document.borrow().scripts.clone()
    }

    /// Recent console output from the sketch, oldest first.
    pub fn console_history(&self) -> Vec<ConsoleLine> {
        self.console.history()
    }

    pub fn take_diagnostics(&self) -> Vec<ScriptDiagnostic> {
        std::mem::take(&mut *self.diagnostics.borrow_mut())
    }
}

fn register_console(engine: &mut Engine, console: &Rc<SketchConsole>) {
    let out = Rc::clone(console);
    engine.on_print(move |text| {
        out.write(ConsoleLevel::Log, text);
    });
    let out = Rc::clone(console);
    engine.on_debug(move |text, source, pos| {
        let origin = source.unwrap_or("sketch");
        out.write(ConsoleLevel::Log, format!("{} {:?}: {}", origin, pos, text));
    });

    for (name, level) in [
        ("console_log", ConsoleLevel::Log),
        ("console_warn", ConsoleLevel::Warn),
        ("console_error", ConsoleLevel::Error),
    ] {
        let out = Rc::clone(console);
        engine.register_fn(name, move |value: Dynamic| {
            out.write(level, console_text(&value));
        });
    }
}

fn register_drawing_api(
    engine: &mut Engine,
    canvas: &Rc<RefCell<Canvas>>,
    frame_count: &Rc<Cell<u64>>,
) {
    let c = Rc::clone(canvas);
    engine.register_fn(
        "createCanvas",
        move |w: Dynamic, h: Dynamic| -> Result<(), Box<EvalAltResult>> {
            let (width, height) = (canvas_size(&w)?, canvas_size(&h)?);
            let mut canvas = c.borrow_mut();
            *canvas = Canvas {
                created: true,
                width,
                height,
                ..Canvas::default()
            };
            Ok(())
        },
    );

    let c = Rc::clone(canvas);
    engine.register_fn("width", move || c.borrow().width as i64);
    let c = Rc::clone(canvas);
    engine.register_fn("height", move || c.borrow().height as i64);

    let counter = Rc::clone(frame_count);
    engine.register_fn("frame_count", move || counter.get() as i64);

    let c = Rc::clone(canvas);
    engine.register_fn("background", move |v: Dynamic| {
        c.borrow_mut().background = Some(colour(&[&v]));
    });
    let c = Rc::clone(canvas);
    engine.register_fn("background", move |r: Dynamic, g: Dynamic, b: Dynamic| {
        c.borrow_mut().background = Some(colour(&[&r, &g, &b]));
    });

    // Style calls only need to be accepted.
    engine.register_fn("fill", |_v: Dynamic| {});
    engine.register_fn("fill", |_r: Dynamic, _g: Dynamic, _b: Dynamic| {});
    engine.register_fn("stroke", |_v: Dynamic| {});
    engine.register_fn("noStroke", || {});

    for name in ["ellipse", "rect", "line"] {
        let c = Rc::clone(canvas);
        engine.register_fn(name, move |_a: Dynamic, _b: Dynamic, _c: Dynamic, _d: Dynamic| {
            c.borrow_mut().draw_calls += 1;
        });
    }
    let c = Rc::clone(canvas);
    engine.register_fn("circle", move |_x: Dynamic, _y: Dynamic, _d: Dynamic| {
        c.borrow_mut().draw_calls += 1;
    });
}

impl ExecutionFrame for RhaiFrame {
    type Stream = CanvasStream;

    fn prepare_document(&self) {
        self.document.borrow_mut().margin = 0;
    }

    async fn load_script(&self, script: &ScriptRef) -> Result<(), FrameError> {
        let source = match self.resolve(script) {
            Ok(source) => source,
            Err(e) => {
                let message = e.to_string();
                self.record(ScriptDiagnostic::host_error(
                    ScriptPhase::LibraryLoad,
                    &script.id,
                    message,
                ));
                return Err(e);
            }
        };
        self.run_library(script, &source)
    }

    fn inject_user_code(&self, id: &str, code: &str) -> Result<(), FrameError> {
        let source = without_libs_declaration(code);
        let ast = self
            .engine
            .compile(source.as_ref())
            .map_err(|e| self.record(from_parse_error(&e, ScriptPhase::UserCode, id)))?;

        let mut doc = self.document.borrow_mut();
        let doc = &mut *doc;
        if let Some(previous) = &doc.user_code {
            if previous.id != id {
                log::debug!("Replacing user code block {} with {}", previous.id, id);
            }
        }

        // Drop the previous injection's top-level variables.
        doc.scope.rewind(doc.library_scope_len);
        let program = doc.library.merge(&ast);
        self.engine
            .run_ast_with_scope(&mut doc.scope, &program)
            .map_err(|e| self.record(from_eval_error(&e, ScriptPhase::UserCode, id)))?;

        doc.user_code = Some(UserProgram {
            id: id.to_string(),
            program,
        });
        Ok(())
    }

    fn call_setup(&self) -> Result<(), FrameError> {
        if !self.has_function("setup") {
            return Err(FrameError::MissingCapability("setup"));
        }
        self.console.begin_frame(self.frame_count.get());
        self.call_sketch_fn("setup", ScriptPhase::Setup)
    }

    fn set_frame_count(&self, count: u64) -> Result<(), FrameError> {
        self.frame_count.set(count);
        Ok(())
    }

    fn capture_canvas(&self, frame_rate: u32) -> Option<CanvasStream> {
        let canvas = self.canvas.borrow();
        if !canvas.created {
            return None;
        }
        Some(CanvasStream {
            width: canvas.width,
            height: canvas.height,
            frame_rate,
        })
    }

    // The native host is driven by `pollster` on one thread, so the timer
    // simply blocks it.
    async fn delay(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
