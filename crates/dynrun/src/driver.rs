//! # Invocation Driver
//!
//! Runs one invocation through a fixed sequence of states:
//!
//! ```text
//! Init -> CodeLoaded -> SymbolsResolved -> ContextConstructed -> Evaluated -> TornDown
//! ```
//!
//! Each step runs exactly once. The first failure ends the invocation and is
//! reported together with the last state reached.

use tracing::debug;
use tracing::warn;
use wasmtime::Config;
use wasmtime::Engine;
use wasmtime::Linker;
use wasmtime::Store;
use wasmtime::Trap;

use crate::arena;
use crate::arena::ExecutionArena;
use crate::args;
use crate::config::LoaderConfig;
use crate::context::DynrunCtx;
use crate::envelope;
use crate::error::code;
use crate::error::ConfigError;
use crate::error::LoaderError;
use crate::error::Result;
use crate::host;
use crate::resolver::CodeImage;
use crate::resolver::CodeResolver;
use crate::symbol::find_symbol;
use crate::symbol::Construct;
use crate::symbol::Evaluate;
use crate::symbol::Symbol;
use crate::symbol::Teardown;
use crate::syscalls::Syscalls;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Init,
    CodeLoaded,
    SymbolsResolved,
    ContextConstructed,
    Evaluated,
    TornDown,
}

impl Stage {
    /// The state the transition out of `self` leads to.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Init => Some(Stage::CodeLoaded),
            Stage::CodeLoaded => Some(Stage::SymbolsResolved),
            Stage::SymbolsResolved => Some(Stage::ContextConstructed),
            Stage::ContextConstructed => Some(Stage::Evaluated),
            Stage::Evaluated => Some(Stage::TornDown),
            Stage::TornDown => None,
        }
    }
}

/// The terminal result of an invocation.
#[derive(Debug)]
pub struct Report {
    /// Last state reached.
    pub reached: Stage,
    /// The failure that stopped the invocation, if any.
    pub error: Option<LoaderError>,
    /// Value returned by `evaluate`, when it was called and returned.
    pub outcome: Option<i32>,
    /// Fuel consumed by entry-point calls.
    pub cycles: u64,
    /// Debug messages emitted by the loaded code.
    pub messages: Vec<String>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.reached == Stage::TornDown
    }

    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(code::SUCCESS, LoaderError::exit_code)
    }

    /// The state whose outgoing transition failed.
    ///
    /// A step fails at one state however it fails: a trapping `evaluate` and
    /// a nonzero status both report `ContextConstructed`.
    pub fn failed_at(&self) -> Option<Stage> {
        self.error.as_ref().map(|_| self.reached)
    }
}

/// Which bytes `evaluate` receives.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'p> {
    /// The argument bytes following the code reference.
    FromArgs,
    /// Bytes chosen by the caller.
    Literal(&'p [u8]),
}

/// Loads and runs dynamically referenced code.
///
/// Holds configuration and the compilation engine only. Nothing resolved
/// during an invocation outlives it.
pub struct Loader {
    engine: Engine,
    config: LoaderConfig,
}

impl Loader {
    /// Validates `config` and creates a metering engine.
    pub fn new(config: LoaderConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let mut wasm = Config::new();
        wasm.consume_fuel(true);
        let engine = Engine::new(&wasm).map_err(ConfigError::Engine)?;
        Ok(Self { engine, config })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Runs the current script, evaluating its argument payload.
    pub fn invoke(&self, host: &dyn Syscalls, label: &str) -> Report {
        self.invoke_with(host, Payload::FromArgs, label)
    }

    pub fn invoke_with(&self, host: &dyn Syscalls, payload: Payload<'_>, label: &str) -> Report {
        let span = tracing::debug_span!("invoke", label);
        let _enter = span.enter();

        let mut run = Run {
            reached: Stage::Init,
            outcome: None,
            store: Store::new(&self.engine, DynrunCtx::new(self.config.capture_debug)),
        };
        let result = run
            .store
            .set_fuel(self.config.max_cycles)
            .map_err(LoaderError::CannotLoad)
            .and_then(|()| self.drive(&mut run, host, payload, label));

        let cycles = run
            .store
            .get_fuel()
            .map(|left| self.config.max_cycles.saturating_sub(left))
            .unwrap_or(0);
        let messages = run.store.data_mut().take_messages();

        let error = match result {
            Ok(()) => {
                debug!(cycles, "invocation complete");
                None
            }
            Err(e) => {
                warn!(stage = ?run.reached, exit_code = e.exit_code(), error = %e, "invocation failed");
                Some(e)
            }
        };

        Report {
            reached: run.reached,
            error,
            outcome: run.outcome,
            cycles,
            messages,
        }
    }

    fn drive(
        &self,
        run: &mut Run,
        host: &dyn Syscalls,
        payload: Payload<'_>,
        label: &str,
    ) -> Result<()> {
        let mut script = vec![0u8; self.config.max_script_size];
        let raw = envelope::load(host, &mut script)?;
        let envelope = envelope::parse(raw, self.config.max_script_size)?;
        let reference = args::decode(envelope.args())?;
        let payload = match payload {
            Payload::FromArgs => args::payload(envelope.args()),
            Payload::Literal(bytes) => bytes,
        };
        arena::check_input(payload, label)?;

        let image = CodeResolver::new(&self.engine, host)
            .resolve(&reference, self.config.max_code_size)?;
        run.advance(Stage::CodeLoaded);

        let symbols = Symbols::resolve(&image)?;
        run.advance(Stage::SymbolsResolved);

        let store = &mut run.store;
        let arena = ExecutionArena::reserve(&mut *store, self.config.arena_size)?;
        let input = arena.stage_input(&mut *store, payload, label)?;

        let mut linker = Linker::new(&self.engine);
        host::link(&mut linker, store, &arena).map_err(LoaderError::CannotLoad)?;
        let instance = linker
            .instantiate(&mut *store, image.module())
            .map_err(classify_instantiate)?;

        let construct = symbols.construct.bind(&mut *store, &instance)?;
        let evaluate = symbols.evaluate.bind(&mut *store, &instance)?;
        let teardown = symbols.teardown.bind(&mut *store, &instance)?;

        let (base, limit) = arena.bounds();
        let ctx = construct.call(&mut *store, (base, limit)).map_err(classify_trap)?;
        if ctx == 0 {
            return Err(LoaderError::ConstructFailed);
        }
        run.advance(Stage::ContextConstructed);

        let store = &mut run.store;
        let status = evaluate
            .call(
                &mut *store,
                (ctx, input.payload_ptr, input.payload_len, input.label_ptr),
            )
            .map_err(classify_trap)?;
        run.outcome = Some(status);
        if status != 0 {
            return Err(LoaderError::EvaluateFailed(status));
        }
        run.advance(Stage::Evaluated);

        teardown.call(&mut run.store, ctx).map_err(classify_trap)?;
        run.advance(Stage::TornDown);
        Ok(())
    }
}

struct Run {
    reached: Stage,
    outcome: Option<i32>,
    store: Store<DynrunCtx>,
}

impl Run {
    fn advance(&mut self, to: Stage) {
        debug_assert_eq!(self.reached.next(), Some(to));
        debug!(from = ?self.reached, to = ?to, "transition");
        self.reached = to;
    }
}

struct Symbols<'img> {
    construct: Symbol<'img, Construct>,
    evaluate: Symbol<'img, Evaluate>,
    teardown: Symbol<'img, Teardown>,
}

impl<'img> Symbols<'img> {
    fn resolve(image: &'img CodeImage) -> Result<Self> {
        Ok(Self {
            construct: find_symbol(image)?,
            evaluate: find_symbol(image)?,
            teardown: find_symbol(image)?,
        })
    }
}

/// Link errors mean the image cannot be loaded; a trapping start function is
/// an execution failure.
fn classify_instantiate(e: wasmtime::Error) -> LoaderError {
    if e.downcast_ref::<Trap>().is_some() {
        classify_trap(e)
    } else {
        LoaderError::CannotLoad(e)
    }
}

fn classify_trap(e: wasmtime::Error) -> LoaderError {
    match e.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => LoaderError::ExceededMaxCycles,
        _ => LoaderError::Trapped(e),
    }
}
