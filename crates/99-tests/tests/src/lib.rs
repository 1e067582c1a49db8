//! End-to-end tests for the simulation worker.

#[cfg(all(test, not(target_arch = "wasm32")))]
mod native_e2e;
