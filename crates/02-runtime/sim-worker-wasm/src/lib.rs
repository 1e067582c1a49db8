//! Web-worker entry point for the simulation host.
//!
//! On `wasm32` the worker keeps a [`sim_host::SimulationHost`] in thread-local
//! state, binds the compute module the page hands it through a loader
//! function, and posts every event back with `postMessage`. The message shape
//! lives in [`envelope`] and the solver buffer layout in [`buffer`]; both are
//! plain Rust so they can be tested natively.
//!
//! The page-side glue is expected to look like:
//!
//! ```js
//! import init, { worker_init } from "./pkg/sim_worker_wasm.js";
//! await init();
//! worker_init(() => import("./solver.js"), 30000);
//! ```
#![allow(missing_docs)]

pub mod buffer;
pub mod envelope;

#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(target_arch = "wasm32")]
pub use wasm::{worker_init, worker_post, worker_state};

#[cfg(not(target_arch = "wasm32"))]
mod stubs {
    /// There is no web worker outside `wasm32`.
    pub fn worker_state() -> String {
        "unsupported".to_owned()
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use stubs::*;
