pub mod config;
pub mod frame;
pub mod host;
pub mod loading_state;
pub mod script_list;
pub mod sketch_diagnostics;
pub mod update_gate;

#[cfg(not(target_arch = "wasm32"))]
pub mod native_frame;

#[cfg(not(target_arch = "wasm32"))]
pub mod sketch_console;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(target_arch = "wasm32")]
pub mod wasm;
