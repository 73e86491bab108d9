//! Hosting real Rhai sketches in the native frame.
//!
//! Run with: cargo test --test native_sketch

#![cfg(not(target_arch = "wasm32"))]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use sketch_host::config::HostConfig;
use sketch_host::host::{HostListener, RecompileHandle, SketchHost};
use sketch_host::loading_state::LoadingState;
use sketch_host::native_frame::{CanvasStream, RhaiFrame};
use sketch_host::script_list::ScriptRef;
use sketch_host::sketch_diagnostics::{ScriptDiagnosticKind, ScriptPhase};
use sketch_host::update_gate::SketchProps;

#[derive(Default)]
struct Recorder {
    loaded: RefCell<u32>,
    streams: RefCell<Vec<CanvasStream>>,
    recompile: RefCell<Option<RecompileHandle<RhaiFrame>>>,
}

impl HostListener<RhaiFrame> for Recorder {
    fn set_iframe_ref(&self, _frame: Rc<RhaiFrame>) {}

    fn set_recompile_sketch(&self, recompile: RecompileHandle<RhaiFrame>) {
        *self.recompile.borrow_mut() = Some(recompile);
    }

    fn set_canvas_media_stream(&self, stream: CanvasStream) {
        self.streams.borrow_mut().push(stream);
    }

    fn set_sketch_loaded(&self) {
        *self.loaded.borrow_mut() += 1;
    }
}

fn sketch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sketch_host_{}_{}", name, std::process::id()));
    fs::create_dir_all(dir.join("lib")).unwrap();
    dir
}

fn fast_config() -> HostConfig {
    HostConfig {
        capture_delay_ms: 0,
        ..HostConfig::default()
    }
}

const SKETCH: &str = r#"
const libs = ["lib/shapes.rhai","https://cdn.example.com/p5.sound.js"]

fn setup() {
    createCanvas(320, 240);
    background(0);
}

fn draw() {
    ring(width() / 2, height() / 2, frame_count());
}
"#;

const SHAPES: &str = r#"
fn ring(x, y, r) {
    circle(x, y, r);
    circle(x, y, r + 10);
}
"#;

fn mount(dir: &Path, code: &str) -> (SketchHost<RhaiFrame>, Rc<Recorder>) {
    let recorder = Rc::new(Recorder::default());
    let host = SketchHost::new(
        RhaiFrame::new(dir),
        recorder.clone(),
        SketchProps::new(code, false),
        Vec::new(),
        fast_config(),
    );
    pollster::block_on(host.mount());
    (host, recorder)
}

#[test]
fn test_sketch_uses_declared_library() {
    let dir = sketch_dir("declared");
    fs::write(dir.join("lib/shapes.rhai"), SHAPES).unwrap();

    let (host, recorder) = mount(&dir, SKETCH);
    let frame = host.frame();

    // The unreachable CDN script is skipped; loading still completes.
    assert_eq!(host.loading_state(), LoadingState::UserCodeLoaded);
    assert_eq!(frame.loaded_scripts(), vec!["p5.js", "lib/shapes.rhai"]);
    assert_eq!(*recorder.loaded.borrow(), 1);

    recorder.recompile.borrow().as_ref().unwrap().recompile();
    assert_eq!(frame.frame_count(), 0);
    assert_eq!(frame.canvas().width, 320);
    assert_eq!(frame.canvas().background.as_deref(), Some("0"));

    for _ in 0..3 {
        frame.draw_frame().unwrap();
    }
    assert_eq!(frame.frame_count(), 3);
    assert_eq!(frame.canvas().draw_calls, 6);
}

#[test]
fn test_missing_library_breaks_only_draw() {
    let dir = sketch_dir("missing");

    let (host, _recorder) = mount(&dir, SKETCH);
    let frame = host.frame();
    assert_eq!(host.loading_state(), LoadingState::UserCodeLoaded);
    assert_eq!(frame.loaded_scripts(), vec!["p5.js"]);

    host.recompile();
    assert!(frame.draw_frame().is_err());
    let diagnostics = frame.take_diagnostics();
    assert!(diagnostics.iter().any(|d| d.phase == ScriptPhase::Draw));
}

#[test]
fn test_hot_reload_and_popup_capture() {
    let dir = sketch_dir("reload");
    let (host, recorder) = mount(&dir, "fn setup() { createCanvas(10, 10); }");
    host.recompile();

    let next = "fn setup() { createCanvas(64, 48); }";
    assert!(pollster::block_on(host.apply_update(SketchProps::new(next, false))));
    host.recompile();
    assert_eq!(host.frame().canvas().width, 64);

    assert!(pollster::block_on(host.apply_update(SketchProps::new(next, true))));
    assert_eq!(
        *recorder.streams.borrow(),
        vec![CanvasStream { width: 64, height: 48, frame_rate: 30 }]
    );
}

#[test]
fn test_syntax_error_keeps_previous_program() {
    let dir = sketch_dir("syntax");
    let (host, _recorder) = mount(&dir, "fn setup() { createCanvas(5, 5); }");
    assert_eq!(host.loading_state(), LoadingState::UserCodeLoaded);

    assert!(pollster::block_on(host.apply_update(SketchProps::new("fn setup( {", false))));
    let diagnostics = host.frame().take_diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].phase, ScriptPhase::UserCode);

    // The earlier program is still in place.
    assert!(host.frame().has_function("setup"));
}

#[test]
fn test_persisted_scripts_load_before_declared() {
    let dir = sketch_dir("persisted");
    fs::write(dir.join("lib/first.rhai"), "fn base() { 1 }").unwrap();
    fs::write(dir.join("lib/second.rhai"), "fn derived() { base() + 1 }").unwrap();

    let recorder = Rc::new(Recorder::default());
    let host = SketchHost::new(
        RhaiFrame::new(dir.clone()),
        recorder,
        SketchProps::new(
            "let libs = [\"lib/second.rhai\"]\nfn setup() { createCanvas(derived(), 1); }",
            false,
        ),
        vec![ScriptRef::new("first", "lib/first.rhai")],
        fast_config(),
    );
    pollster::block_on(host.mount());

    assert_eq!(host.frame().loaded_scripts(), vec!["p5.js", "first", "lib/second.rhai"]);
    host.recompile();
    assert_eq!(host.frame().canvas().width, 2);
}

#[test]
fn test_js_style_declaration_runs() {
    let dir = sketch_dir("js_style");
    fs::write(dir.join("lib/a.rhai"), "fn half(n) { n / 2 }").unwrap();
    fs::write(dir.join("lib/b.rhai"), "fn twice(n) { n * 2 }").unwrap();

    // Mixed quotes and no trailing `;`, as a p5 sketch would write it.
    let code = "const libs = [\"lib/a.rhai\",'lib/b.rhai']\n\
                fn setup() { createCanvas(twice(half(40)), 10); }";
    let (host, recorder) = mount(&dir, code);

    assert_eq!(
        host.frame().loaded_scripts(),
        vec!["p5.js", "lib/a.rhai", "lib/b.rhai"]
    );
    assert_eq!(host.loading_state(), LoadingState::UserCodeLoaded);
    assert_eq!(*recorder.loaded.borrow(), 1);

    host.recompile();
    assert_eq!(host.frame().canvas().width, 40);
    assert!(host.frame().take_diagnostics().is_empty());
}

#[test]
fn test_unloadable_libraries_are_reported() {
    let dir = sketch_dir("reported");
    let (host, _recorder) = mount(&dir, SKETCH);

    let diagnostics = host.frame().take_diagnostics();
    let failed: Vec<&str> = diagnostics
        .iter()
        .filter(|d| d.kind == ScriptDiagnosticKind::HostError)
        .map(|d| d.script.as_str())
        .collect();
    assert_eq!(failed, vec!["lib/shapes.rhai", "https://cdn.example.com/p5.sound.js"]);
}
