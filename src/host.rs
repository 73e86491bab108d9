//! Sketch host controller.
//!
//! Owns the execution frame and coordinates its lifecycle:
//!
//! 1. `mount()` loads the compiled script list into the frame one script at
//!    a time, then moves to `scriptsLoaded`.
//! 2. Every update (including the state change at the end of mounting) goes
//!    through the update gate, and accepted updates re-inject user code once
//!    scripts have loaded. The first successful injection moves to
//!    `userCodeLoaded`.
//! 3. `recompile()` re-injects the code and restarts the sketch's `setup()`.
//!
//! Work is single-threaded. A script load or capture that is already in flight
//! is never cancelled; the frame handle is created once and never replaced, so
//! late completions always land in the same document.
//!
//! Nothing here returns errors to the caller. Failures are logged and the host
//! carries on.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::config::HostConfig;
use crate::frame::ExecutionFrame;
use crate::loading_state::LoadingState;
use crate::script_list::{compile_script_list, ScriptRef};
use crate::update_gate::{should_update, GateState, SketchProps};

/// Notifications published to the surrounding application.
pub trait HostListener<F: ExecutionFrame> {
    /// Sent once, right after the frame document is prepared.
    fn set_iframe_ref(&self, frame: Rc<F>);

    /// Sent once, after all mount-time scripts have settled.
    fn set_recompile_sketch(&self, recompile: RecompileHandle<F>);

    fn set_canvas_media_stream(&self, stream: F::Stream);

    /// Sent once, after the first successful user-code injection.
    fn set_sketch_loaded(&self);
}

#[derive(Debug, Clone)]
struct HostState {
    loading: LoadingState,
    /// Only ever written by the update gate.
    last_seen_code: String,
    props: SketchProps,
    persisted: Vec<ScriptRef>,
    mounted: bool,
}

struct HostInner<F: ExecutionFrame> {
    frame: Rc<F>,
    listener: Rc<dyn HostListener<F>>,
    config: HostConfig,
    state: RefCell<HostState>,
}

/// Handle given to the application for triggering a recompile.
///
/// Holds the host weakly; recompiling after the host is dropped does nothing.
pub struct RecompileHandle<F: ExecutionFrame> {
    host: Weak<HostInner<F>>,
}

impl<F: ExecutionFrame> Clone for RecompileHandle<F> {
    fn clone(&self) -> Self {
        Self {
            host: Weak::clone(&self.host),
        }
    }
}

impl<F: ExecutionFrame> RecompileHandle<F> {
    pub fn recompile(&self) {
        match self.host.upgrade() {
            Some(host) => host.recompile(),
            None => log::debug!("Recompile requested after the sketch host was dropped"),
        }
    }
}

pub struct SketchHost<F: ExecutionFrame> {
    inner: Rc<HostInner<F>>,
}

impl<F: ExecutionFrame> SketchHost<F> {
    pub fn new(
        frame: F,
        listener: Rc<dyn HostListener<F>>,
        props: SketchProps,
        persisted: Vec<ScriptRef>,
        config: HostConfig,
    ) -> Self {
        let state = HostState {
            loading: LoadingState::Started,
            last_seen_code: props.code.clone(),
            props,
            persisted,
            mounted: false,
        };
        Self {
            inner: Rc::new(HostInner {
                frame: Rc::new(frame),
                listener,
                config,
                state: RefCell::new(state),
            }),
        }
    }

    /// Load the script list into the frame and run the first code injection.
    ///
    /// Runs once; later calls are ignored.
    pub async fn mount(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.borrow_mut();
            if state.mounted {
                log::warn!("Sketch host is already mounted");
                return;
            }
            state.mounted = true;
        }

        inner.frame.prepare_document();
        inner.listener.set_iframe_ref(Rc::clone(&inner.frame));

        let plan = {
            let state = inner.state.borrow();
            compile_script_list(&state.props.code, &state.persisted)
        };
        log::info!("Loading {} scripts into the sketch frame", plan.len());

        // Strictly one after another: later scripts may depend on earlier ones.
        for script in &plan {
            match inner.frame.load_script(script).await {
                Ok(()) => log::debug!("Loaded script {} ({})", script.id, script.path),
                Err(e) => log::warn!("Script {} did not load: {}", script.id, e),
            }
        }

        inner.transition(LoadingState::ScriptsLoaded);
        inner.listener.set_recompile_sketch(self.recompile_handle());

        // Leaving `started` is itself an update with unchanged props.
        let props = inner.state.borrow().props.clone();
        self.apply_update(props).await;
    }

    /// Offer new props to the host. Returns whether the update was accepted.
    ///
    /// Props are always replaced; only accepted updates run the post-update
    /// sequence (code injection, optional canvas capture).
    pub async fn apply_update(&self, next: SketchProps) -> bool {
        let accepted = {
            let mut state = self.inner.state.borrow_mut();
            let verdict = should_update(
                &GateState {
                    loading: state.loading,
                    last_seen_code: &state.last_seen_code,
                },
                &state.props,
                &next,
            );
            if let Some(code) = verdict.store_code {
                state.last_seen_code = code;
            }
            state.props = next;
            verdict.accept
        };

        if !accepted {
            log::debug!("Sketch update rejected");
            return false;
        }
        self.inner.after_update().await;
        true
    }

    /// Re-run the sketch without reloading its scripts.
    pub fn recompile(&self) {
        self.inner.recompile();
    }

    pub fn recompile_handle(&self) -> RecompileHandle<F> {
        RecompileHandle {
            host: Rc::downgrade(&self.inner),
        }
    }

    pub fn loading_state(&self) -> LoadingState {
        self.inner.state.borrow().loading
    }

    pub fn last_seen_code(&self) -> String {
        self.inner.state.borrow().last_seen_code.clone()
    }

    pub fn props(&self) -> SketchProps {
        self.inner.state.borrow().props.clone()
    }

    pub fn frame(&self) -> Rc<F> {
        Rc::clone(&self.inner.frame)
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }
}

impl<F: ExecutionFrame> HostInner<F> {
    fn transition(&self, next: LoadingState) -> bool {
        let result = self.state.borrow_mut().loading.advance(next);
        match result {
            Ok(()) => {
                log::info!("Sketch loading state: {}", next);
                true
            }
            Err(e) => {
                log::error!("{}", e);
                false
            }
        }
    }

    async fn after_update(&self) {
        let (code, popup_open, loading) = {
            let state = self.state.borrow();
            (state.props.code.clone(), state.props.popup_open, state.loading)
        };

        // User code only goes in after the load plan has settled. The update
        // at the end of mount injects whatever props are current by then.
        if loading.is_at_least(LoadingState::ScriptsLoaded) {
            self.update_user_code(&code);
        } else {
            log::debug!("Holding user code until scripts load ({})", loading);
        }

        if popup_open {
            self.frame.delay(self.config.capture_delay()).await;
            match self.frame.capture_canvas(self.config.capture_frame_rate) {
                Some(stream) => self.listener.set_canvas_media_stream(stream),
                None => log::warn!("No canvas in the sketch frame to capture"),
            }
        }
    }

    fn update_user_code(&self, code: &str) {
        if let Err(e) = self.frame.inject_user_code(&self.config.user_code_id, code) {
            log::error!("User code failed to load: {}", e);
            return;
        }

        let first_load = self.state.borrow().loading == LoadingState::ScriptsLoaded;
        if first_load && self.transition(LoadingState::UserCodeLoaded) {
            self.listener.set_sketch_loaded();
        }
    }

    fn recompile(&self) {
        let code = {
            let state = self.state.borrow();
            if state.loading != LoadingState::UserCodeLoaded {
                log::debug!("Recompile ignored while {}", state.loading);
                return;
            }
            state.props.code.clone()
        };

        self.update_user_code(&code);

        if let Err(e) = self.frame.call_setup() {
            log::error!("Recompile could not restart the sketch: {}", e);
            return;
        }
        if let Err(e) = self.frame.set_frame_count(0) {
            log::error!("Recompile could not reset the frame counter: {}", e);
        }
    }
}
