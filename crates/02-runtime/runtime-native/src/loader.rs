use std::thread;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use sim_host::{ComputeModule, LoadError};

/// Produces the compute module on demand.
///
/// Each call starts an independent load; the worker runs the returned future
/// to completion on a dedicated thread and ignores results it no longer wants.
pub trait ModuleLoader: Send + 'static {
    type Module: ComputeModule + Send + 'static;

    fn load(&self) -> BoxFuture<'static, Result<Self::Module, LoadError>>;
}

/// Hands out clones of an already available module, optionally after a delay.
#[derive(Debug, Clone)]
pub struct ReadyLoader<M> {
    module: M,
    delay: Option<Duration>,
}

impl<M> ReadyLoader<M> {
    pub fn new(module: M) -> Self {
        Self {
            module,
            delay: None,
        }
    }

    /// Simulates a slow fetch: every load blocks its thread for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl<M> ModuleLoader for ReadyLoader<M>
where
    M: ComputeModule + Clone + Send + 'static,
{
    type Module = M;

    fn load(&self) -> BoxFuture<'static, Result<M, LoadError>> {
        let module = self.module.clone();
        match self.delay {
            None => future::ready(Ok(module)).boxed(),
            Some(delay) => future::lazy(move |_| {
                thread::sleep(delay);
                Ok(module)
            })
            .boxed(),
        }
    }
}

/// Loader backed by a closure returning the load future.
pub struct FnLoader<F>(F);

impl<F> FnLoader<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<M, F> ModuleLoader for FnLoader<F>
where
    M: ComputeModule + Send + 'static,
    F: Fn() -> BoxFuture<'static, Result<M, LoadError>> + Send + 'static,
{
    type Module = M;

    fn load(&self) -> BoxFuture<'static, Result<M, LoadError>> {
        (self.0)()
    }
}
