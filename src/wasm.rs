//! Browser binding.
//!
//! `DomFrame` drives a real `<iframe>`: library scripts become `<script src>`
//! tags, user code becomes one inline `<script>` with a fixed id. The
//! surrounding application constructs a `WasmSketchHost` with an object of JS
//! callbacks (`setIframeRef`, `setRecompileSketch`, `setCanvasMediaStream`,
//! `setSketchLoaded`).

use std::rc::Rc;
use std::time::Duration;

use js_sys::{Function, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{
    Document, Event, HtmlCanvasElement, HtmlIFrameElement, HtmlScriptElement, MediaStream, Node,
    Window,
};

use crate::config::HostConfig;
use crate::frame::{ExecutionFrame, FrameError};
use crate::host::{HostListener, RecompileHandle, SketchHost};
use crate::script_list::{compile_script_list, parse_persisted_scripts, ScriptRef};
use crate::update_gate::SketchProps;

fn js_error(value: JsValue) -> FrameError {
    FrameError::Js(value.as_string().unwrap_or_else(|| format!("{:?}", value)))
}

fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Execution frame backed by an `<iframe>` element.
pub struct DomFrame {
    iframe: HtmlIFrameElement,
}

impl DomFrame {
    pub fn new(iframe: HtmlIFrameElement) -> Self {
        Self { iframe }
    }

    pub fn iframe(&self) -> &HtmlIFrameElement {
        &self.iframe
    }

    fn document(&self) -> Result<Document, FrameError> {
        self.iframe
            .content_document()
            .ok_or(FrameError::MissingCapability("document"))
    }

    fn window(&self) -> Result<Window, FrameError> {
        self.iframe
            .content_window()
            .ok_or(FrameError::MissingCapability("window"))
    }

    fn create_script(doc: &Document) -> Result<HtmlScriptElement, FrameError> {
        doc.create_element("script")
            .map_err(js_error)?
            .dyn_into::<HtmlScriptElement>()
            .map_err(|_| FrameError::Js("created element is not a script".to_string()))
    }
}

impl ExecutionFrame for DomFrame {
    type Stream = MediaStream;

    fn prepare_document(&self) {
        let Ok(doc) = self.document() else {
            log::warn!("Sketch frame has no document to prepare");
            return;
        };
        if let Some(body) = doc.body() {
            if let Err(e) = body.style().set_property("margin", "0") {
                log::warn!("Could not clear sketch frame margin: {:?}", e);
            }
        }
    }

    async fn load_script(&self, script: &ScriptRef) -> Result<(), FrameError> {
        let doc = self.document()?;
        let element = Self::create_script(&doc)?;
        element.set_src(&script.path);

        // Both events settle the wait; the event type tells them apart.
        let settled = Promise::new(&mut |resolve, _reject| {
            element.set_onload(Some(&resolve));
            element.set_onerror(Some(&resolve));
        });

        let parent: Node = match doc.head() {
            Some(head) => head.into(),
            None => doc
                .body()
                .ok_or(FrameError::MissingCapability("document body"))?
                .into(),
        };
        parent.append_child(&element).map_err(js_error)?;

        let event = JsFuture::from(settled).await.map_err(js_error)?;
        let failed = event
            .dyn_ref::<Event>()
            .map(|e| e.type_() == "error")
            .unwrap_or(false);
        if failed {
            return Err(FrameError::Load {
                id: script.id.clone(),
                path: script.path.clone(),
            });
        }
        Ok(())
    }

    fn inject_user_code(&self, id: &str, code: &str) -> Result<(), FrameError> {
        let doc = self.document()?;
        if let Some(existing) = doc.get_element_by_id(id) {
            existing.remove();
        }

        let element = Self::create_script(&doc)?;
        element.set_id(id);
        element.set_text(code).map_err(js_error)?;

        let body = doc.body().ok_or(FrameError::MissingCapability("document body"))?;
        body.append_child(&element).map_err(js_error)?;
        Ok(())
    }

    fn call_setup(&self) -> Result<(), FrameError> {
        let window = self.window()?;
        let setup = Reflect::get(&window, &JsValue::from_str("setup")).map_err(js_error)?;
        let setup: Function = setup
            .dyn_into()
            .map_err(|_| FrameError::MissingCapability("setup"))?;
        setup.call0(&window).map_err(js_error)?;
        Ok(())
    }

    fn set_frame_count(&self, count: u64) -> Result<(), FrameError> {
        let window = self.window()?;
        let written = Reflect::set(
            &window,
            &JsValue::from_str("frameCount"),
            &JsValue::from_f64(count as f64),
        )
        .map_err(js_error)?;
        if !written {
            return Err(FrameError::MissingCapability("frameCount"));
        }
        Ok(())
    }

    fn capture_canvas(&self, frame_rate: u32) -> Option<MediaStream> {
        let doc = self.document().ok()?;
        let canvas = doc
            .query_selector("canvas")
            .ok()
            .flatten()?
            .dyn_into::<HtmlCanvasElement>()
            .ok()?;
        match canvas.capture_stream_with_frame_request_rate(frame_rate as f64) {
            Ok(stream) => Some(stream),
            Err(e) => {
                log::warn!("Canvas capture failed: {:?}", e);
                None
            }
        }
    }

    async fn delay(&self, duration: Duration) {
        let Some(window) = web_sys::window() else {
            return;
        };
        let millis = duration.as_millis().min(i32::MAX as u128) as i32;
        let timer = Promise::new(&mut |resolve, _reject| {
            let scheduled =
                window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis);
            if let Err(e) = scheduled {
                log::warn!("setTimeout failed: {:?}", e);
                let _ = resolve.call0(&JsValue::NULL);
            }
        });
        let _ = JsFuture::from(timer).await;
    }
}

/// Callbacks supplied by the surrounding application.
struct JsCallbacks {
    set_iframe_ref: Function,
    set_recompile_sketch: Function,
    set_canvas_media_stream: Function,
    set_sketch_loaded: Function,
}

fn callback(callbacks: &JsValue, name: &str) -> Result<Function, JsValue> {
    Reflect::get(callbacks, &JsValue::from_str(name))?
        .dyn_into::<Function>()
        .map_err(|_| JsValue::from_str(&format!("callback `{}` is not a function", name)))
}

fn notify(name: &str, f: &Function, arg: &JsValue) {
    if let Err(e) = f.call1(&JsValue::NULL, arg) {
        log::error!("{} callback threw: {:?}", name, e);
    }
}

impl JsCallbacks {
    fn from_object(callbacks: &JsValue) -> Result<Self, JsValue> {
        Ok(Self {
            set_iframe_ref: callback(callbacks, "setIframeRef")?,
            set_recompile_sketch: callback(callbacks, "setRecompileSketch")?,
            set_canvas_media_stream: callback(callbacks, "setCanvasMediaStream")?,
            set_sketch_loaded: callback(callbacks, "setSketchLoaded")?,
        })
    }
}

impl HostListener<DomFrame> for JsCallbacks {
    fn set_iframe_ref(&self, frame: Rc<DomFrame>) {
        notify("setIframeRef", &self.set_iframe_ref, frame.iframe());
    }

    fn set_recompile_sketch(&self, recompile: RecompileHandle<DomFrame>) {
        let trigger = Closure::<dyn Fn()>::new(move || recompile.recompile());
        notify("setRecompileSketch", &self.set_recompile_sketch, &trigger.into_js_value());
    }

    fn set_canvas_media_stream(&self, stream: MediaStream) {
        notify("setCanvasMediaStream", &self.set_canvas_media_stream, &stream);
    }

    fn set_sketch_loaded(&self) {
        notify("setSketchLoaded", &self.set_sketch_loaded, &JsValue::UNDEFINED);
    }
}

#[wasm_bindgen]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
    let _ = console_log::init_with_level(log::Level::Info);
}

/// Compile the load plan for `code` and return it as a JSON array.
#[wasm_bindgen]
pub fn compile_script_list_json(code: &str, persisted_json: &str) -> Result<String, JsValue> {
    let persisted = parse_persisted_scripts(persisted_json).map_err(to_js_error)?;
    let plan = compile_script_list(code, &persisted);
    serde_json::to_string(&plan).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[wasm_bindgen]
pub struct WasmSketchHost {
    host: Rc<SketchHost<DomFrame>>,
}

#[wasm_bindgen]
impl WasmSketchHost {
    #[wasm_bindgen(constructor)]
    pub fn new(
        iframe: HtmlIFrameElement,
        code: String,
        persisted_json: &str,
        config_json: &str,
        callbacks: JsValue,
    ) -> Result<WasmSketchHost, JsValue> {
        let persisted = parse_persisted_scripts(persisted_json).map_err(to_js_error)?;
        let config = HostConfig::from_json(config_json).map_err(to_js_error)?;
        let listener = JsCallbacks::from_object(&callbacks)?;

        let host = SketchHost::new(
            DomFrame::new(iframe),
            Rc::new(listener),
            SketchProps::new(code, false),
            persisted,
            config,
        );
        Ok(Self { host: Rc::new(host) })
    }

    pub fn mount(&self) {
        let host = Rc::clone(&self.host);
        spawn_local(async move {
            host.mount().await;
        });
    }

    /// Offer new props; the update gate decides whether anything runs.
    pub fn update(&self, code: String, popup_open: bool) {
        let host = Rc::clone(&self.host);
        spawn_local(async move {
            host.apply_update(SketchProps::new(code, popup_open)).await;
        });
    }

    pub fn recompile(&self) {
        self.host.recompile();
    }

    pub fn loading_state(&self) -> String {
        self.host.loading_state().as_str().to_string()
    }
}
