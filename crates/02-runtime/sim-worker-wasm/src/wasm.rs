use std::cell::{Cell, RefCell};
use std::time::Duration;

use futures::future::{self, Either};
use gloo_timers::future::TimeoutFuture;
use js_sys::{Array, Float64Array, Function, Promise, Reflect, SharedArrayBuffer, Uint8Array};
use sim_host::{
    ComputeModule, EventSink, HostCapabilities, HostConfig, LoadError, LoadRequest, ModuleError,
    SimulationHost, SolverInstance,
};
use sim_protocol::{Configuration, Event, Solution};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{console, DedicatedWorkerGlobalScope, MessageEvent};

use crate::buffer::solution_from_interleaved;
use crate::envelope::{outbound, Body};

#[wasm_bindgen]
extern "C" {
    /// Compute module object resolved by the loader promise.
    #[derive(Clone, Debug)]
    type JsComputeModule;

    #[wasm_bindgen(method, catch, js_name = createSolver)]
    fn create_solver(this: &JsComputeModule, configuration: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, catch)]
    fn step(this: &JsComputeModule, handle: &JsValue, dt: f64) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = solutionAsBuffer)]
    fn solution_as_buffer(this: &JsComputeModule, handle: &JsValue)
        -> Result<Float64Array, JsValue>;

    #[wasm_bindgen(method)]
    fn iteration(this: &JsComputeModule, handle: &JsValue) -> f64;

    #[wasm_bindgen(method)]
    fn time(this: &JsComputeModule, handle: &JsValue) -> f64;
}

#[derive(Clone)]
struct JsModule {
    inner: JsComputeModule,
}

impl ComputeModule for JsModule {
    type Instance = JsSolver;

    fn name(&self) -> &str {
        "js"
    }

    fn create_instance(&self, configuration: &Configuration) -> Result<JsSolver, ModuleError> {
        let text = configuration
            .to_json()
            .map_err(|err| ModuleError::InvalidConfiguration(err.to_string()))?;
        let handle = self
            .inner
            .create_solver(&text)
            .map_err(|err| ModuleError::InvalidConfiguration(describe(&err)))?;
        let mut solver = JsSolver {
            module: self.inner.clone(),
            handle,
            snapshot: Solution::default(),
        };
        solver.refresh()?;
        Ok(solver)
    }
}

struct JsSolver {
    module: JsComputeModule,
    handle: JsValue,
    /// Copy of the solver's buffer taken after creation and after every step.
    snapshot: Solution,
}

impl JsSolver {
    fn refresh(&mut self) -> Result<(), ModuleError> {
        let buffer = self
            .module
            .solution_as_buffer(&self.handle)
            .map_err(|err| ModuleError::solver(describe(&err)))?;
        self.snapshot = solution_from_interleaved(self.iteration(), self.time(), &buffer.to_vec())?;
        Ok(())
    }
}

impl SolverInstance for JsSolver {
    fn step(&mut self, dt: f64) -> Result<(), ModuleError> {
        self.module
            .step(&self.handle, dt)
            .map_err(|err| ModuleError::solver(describe(&err)))?;
        self.refresh()
    }

    fn iteration(&self) -> u64 {
        self.module.iteration(&self.handle) as u64
    }

    fn time(&self) -> f64 {
        self.module.time(&self.handle)
    }

    fn solution(&self) -> Solution {
        self.snapshot.clone()
    }
}

/// Posts every event to the owning page as soon as the host emits it.
struct PostSink {
    scope: DedicatedWorkerGlobalScope,
    shared: Option<SharedArrayBuffer>,
}

impl EventSink for PostSink {
    fn emit(&mut self, event: Event) {
        if let Err(err) = self.post(&event) {
            console::error_1(&JsValue::from_str(&format!(
                "failed to post {} event: {}",
                event.name(),
                describe(&err)
            )));
        }
    }
}

impl PostSink {
    fn post(&mut self, event: &Event) -> Result<(), JsValue> {
        let out = outbound(event);
        let header = out
            .envelope
            .to_json()
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        let message = js_sys::JSON::parse(&header)?;
        match out.body {
            Body::Empty => self.scope.post_message(&message),
            Body::Text(text) => {
                set_field(&message, "solution", &JsValue::from_str(text))?;
                self.scope.post_message(&message)
            }
            Body::Owned(bytes) => {
                let array = Uint8Array::from(bytes);
                set_field(&message, "solution", &array)?;
                self.scope
                    .post_message_with_transfer(&message, &Array::of1(&array.buffer()))
            }
            Body::Shared(frame) => {
                let bytes = frame.bytes();
                let buffer = self.shared_buffer(bytes.len());
                Uint8Array::new(&buffer)
                    .subarray(0, bytes.len() as u32)
                    .copy_from(bytes);
                set_field(&message, "solution", &buffer)?;
                self.scope.post_message(&message)
            }
        }
    }

    /// The region shared with the page, grown when a frame no longer fits.
    fn shared_buffer(&mut self, len: usize) -> SharedArrayBuffer {
        match &self.shared {
            Some(buffer) if buffer.byte_length() as usize >= len => buffer.clone(),
            _ => {
                let buffer = SharedArrayBuffer::new(len.max(1) as u32);
                self.shared = Some(buffer.clone());
                buffer
            }
        }
    }
}

type Host = SimulationHost<JsModule, PostSink>;

thread_local! {
    static HOST: RefCell<Option<Host>> = RefCell::new(None);
    static LOADER: RefCell<Option<Function>> = RefCell::new(None);
    static STEP_LOOP: Cell<bool> = Cell::new(false);
}

fn with_host<R>(f: impl FnOnce(&mut Host) -> R) -> Result<R, JsValue> {
    HOST.with(|host| match host.borrow_mut().as_mut() {
        Some(host) => Ok(f(host)),
        None => Err(JsValue::from_str("simulation worker is not initialized")),
    })
}

/// Sets up the worker and starts listening for commands.
///
/// `loader` is called with no arguments whenever the compute module is needed
/// and must return the module object (or a promise of it).
#[wasm_bindgen]
pub fn worker_init(loader: Function, load_timeout_ms: Option<u32>) -> Result<(), JsValue> {
    let scope: DedicatedWorkerGlobalScope = js_sys::global().dyn_into()?;
    let mut config = HostConfig::default()
        .with_capabilities(HostCapabilities {
            shared_memory: cross_origin_isolated(),
        })
        .with_clock(js_sys::Date::now);
    if let Some(ms) = load_timeout_ms {
        config = config.with_load_timeout(Duration::from_millis(ms.into()));
    }

    let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
        if let Err(err) = worker_post(event.data()) {
            console::error_1(&err);
        }
    }) as Box<dyn FnMut(MessageEvent)>);
    scope.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
    on_message.forget();

    HOST.with(|host| {
        *host.borrow_mut() = Some(SimulationHost::new(
            config,
            PostSink {
                scope,
                shared: None,
            },
        ))
    });
    LOADER.with(|slot| *slot.borrow_mut() = Some(loader));
    Ok(())
}

/// Handles one command, given as JSON text or as a plain object.
#[wasm_bindgen]
pub fn worker_post(message: JsValue) -> Result<(), JsValue> {
    let text = match message.as_string() {
        Some(text) => text,
        None => String::from(js_sys::JSON::stringify(&message)?),
    };
    with_host(|host| {
        if let Err(err) = host.handle_json(&text) {
            host.report(err);
        }
    })?;
    pump();
    Ok(())
}

#[wasm_bindgen]
pub fn worker_state() -> String {
    with_host(|host| host.state().as_str().to_owned())
        .unwrap_or_else(|_| "uninitialized".to_owned())
}

/// Starts whatever the last command asked for: a module load, the step loop, or both.
fn pump() {
    if let Ok(Some(request)) = with_host(|host| host.take_load_request()) {
        start_load(request);
    }
    ensure_step_loop();
}

fn start_load(request: LoadRequest) {
    let generation = request.generation;
    let timeout = with_host(|host| host.config().load_timeout)
        .ok()
        .flatten();
    let called = LOADER.with(|slot| slot.borrow().as_ref().map(|f| f.call0(&JsValue::NULL)));
    let promise = match called {
        Some(Ok(value)) => Ok(Promise::resolve(&value)),
        Some(Err(err)) => Err(LoadError::Failed(describe(&err))),
        None => Err(LoadError::Unavailable("no module loader registered".into())),
    };
    wasm_bindgen_futures::spawn_local(async move {
        let result = match promise {
            Ok(promise) => await_module(promise, timeout).await,
            Err(err) => Err(err),
        };
        if let Err(err) = with_host(|host| host.complete_load(generation, result)) {
            console::error_1(&err);
        }
        pump();
    });
}

async fn await_module(promise: Promise, timeout: Option<Duration>) -> Result<JsModule, LoadError> {
    let load = Box::pin(JsFuture::from(promise));
    let value = match timeout {
        None => load.await,
        Some(limit) => {
            let timer = Box::pin(TimeoutFuture::new(limit.as_millis() as u32));
            match future::select(load, timer).await {
                Either::Left((value, _)) => value,
                Either::Right(_) => return Err(LoadError::TimedOut(limit)),
            }
        }
    };
    value
        .map(|module| JsModule {
            inner: module.unchecked_into(),
        })
        .map_err(|err| LoadError::Failed(describe(&err)))
}

/// Runs one tick per macrotask while the host is stepping, so commands posted
/// in between are handled before the next tick.
fn ensure_step_loop() {
    let stepping = with_host(|host| host.is_stepping()).unwrap_or(false);
    if !stepping || STEP_LOOP.with(|running| running.replace(true)) {
        return;
    }
    wasm_bindgen_futures::spawn_local(async {
        while with_host(|host| host.tick()).unwrap_or(false) {
            TimeoutFuture::new(0).await;
        }
        STEP_LOOP.with(|running| running.set(false));
    });
}

fn cross_origin_isolated() -> bool {
    Reflect::get(&js_sys::global(), &JsValue::from_str("crossOriginIsolated"))
        .ok()
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

fn set_field(target: &JsValue, key: &str, value: &JsValue) -> Result<(), JsValue> {
    Reflect::set(target, &JsValue::from_str(key), value)?;
    Ok(())
}

fn describe(err: &JsValue) -> String {
    if let Some(text) = err.as_string() {
        return text;
    }
    if let Some(error) = err.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    format!("{err:?}")
}
