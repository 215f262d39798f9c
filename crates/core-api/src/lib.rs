//! The embedding surface.
//!
//! An [`Engine`] wraps one interpreter machine. Values handed out are
//! [`OwnedValue`] handles pinned against collection until released (or
//! until the engine drops). Templates splice argument values by
//! identity — `{}` marks a slot — so actions and series pass through
//! without reparsing.

use core_eval::{Machine, Raise, RunOutcome};
use core_heap::{HandleData, RemoteSignals, SeriesFlags};
use core_value::{Cell, Kind};
use tracing::info;

pub use core_eval::{BootError, ErrId, MachineConfig};
pub use core_heap::HandleCleaner;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("boot failed: {0}")]
    Boot(#[from] BootError),
    #[error("{message}")]
    Script { code: i64, message: String },
    #[error("value is not an integer")]
    NotAnInteger,
    #[error("engine already shut down")]
    ShutDown,
}

/// A value pinned against garbage collection, owned by the embedder.
#[derive(Debug, Clone)]
pub struct OwnedValue {
    cell: Cell,
    guard: usize,
}

/// Result of a host-level run, QUIT distinguished.
#[derive(Debug)]
pub enum EngineOutcome {
    Value(Option<OwnedValue>),
    Quit(i32),
}

impl OwnedValue {
    pub fn kind_name(&self) -> &'static str {
        self.cell.kind().name()
    }
}

pub struct Engine {
    machine: Option<Machine>,
}

impl Engine {
    pub fn startup() -> Result<Engine, EngineError> {
        Engine::startup_with(MachineConfig::default())
    }

    pub fn startup_with(config: MachineConfig) -> Result<Engine, EngineError> {
        let machine = Machine::startup_with(config)?;
        info!("engine started");
        Ok(Engine {
            machine: Some(machine),
        })
    }

    /// Orderly teardown. `clean` runs a final collection first so
    /// handle cleanups fire deterministically.
    pub fn shutdown(mut self, clean: bool) {
        if let Some(mut machine) = self.machine.take() {
            if clean {
                machine.heap.drop_guards_to(0);
                machine.recycle();
            }
            info!(clean, "engine shut down");
        }
    }

    fn machine(&mut self) -> Result<&mut Machine, EngineError> {
        self.machine.as_mut().ok_or(EngineError::ShutDown)
    }

    fn raise_to_error(machine: &Machine, raise: Raise) -> EngineError {
        match raise {
            Raise::Error(ctx) => EngineError::Script {
                code: machine.error_code(ctx),
                message: machine.mold_error(ctx),
            },
            Raise::Thrown => EngineError::Script {
                code: 0,
                message: "** Internal Error: throw escaped the engine".into(),
            },
        }
    }

    fn own(&mut self, cell: Cell) -> Result<OwnedValue, EngineError> {
        let machine = self.machine()?;
        let guard = machine.heap.guard_cell(cell.clone());
        Ok(OwnedValue { cell, guard })
    }

    /// Evaluate source text; `None` means the script produced no value.
    pub fn run(&mut self, source: &str) -> Result<Option<OwnedValue>, EngineError> {
        let machine = self.machine()?;
        match machine.run_source(source, None) {
            Ok(Some(cell)) => Ok(Some(self.own(cell)?)),
            Ok(None) => Ok(None),
            Err(raise) => {
                let machine = self.machine.as_ref().expect("machine checked above");
                Err(Self::raise_to_error(machine, raise))
            }
        }
    }

    /// Evaluate with QUIT surfaced separately, for hosts that map
    /// results to a process exit status.
    pub fn run_outcome(&mut self, source: &str) -> Result<EngineOutcome, EngineError> {
        let machine = self.machine()?;
        match machine.run_source_outcome(source, None) {
            Ok(RunOutcome::Quit(code)) => Ok(EngineOutcome::Quit(
                code.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            )),
            Ok(RunOutcome::Value(None)) => Ok(EngineOutcome::Value(None)),
            Ok(RunOutcome::Value(Some(cell))) => {
                let owned = self.own(cell)?;
                Ok(EngineOutcome::Value(Some(owned)))
            }
            Err(raise) => {
                let machine = self.machine.as_ref().expect("machine checked above");
                Err(Self::raise_to_error(machine, raise))
            }
        }
    }

    /// The host exit-status convention: integers are themselves
    /// (clipped), nothing is 0, errors are their code, anything else
    /// is 1.
    pub fn exit_status(&mut self, outcome: &Result<EngineOutcome, EngineError>) -> i32 {
        match outcome {
            Ok(EngineOutcome::Quit(code)) => *code,
            Ok(EngineOutcome::Value(None)) => 0,
            Ok(EngineOutcome::Value(Some(value))) => match value.cell.kind() {
                Kind::Integer => value
                    .cell
                    .as_integer()
                    .unwrap_or(0)
                    .clamp(i32::MIN as i64, i32::MAX as i64) as i32,
                Kind::Null | Kind::Blank | Kind::Trash => 0,
                Kind::Error => match (self.machine.as_ref(), value.cell.as_context()) {
                    (Some(machine), Some(ctx)) => {
                        machine.error_code(ctx).clamp(1, i32::MAX as i64) as i32
                    }
                    _ => 1,
                },
                _ => 1,
            },
            Err(EngineError::Script { code, .. }) => (*code).clamp(1, i32::MAX as i64) as i32,
            Err(_) => 1,
        }
    }

    /// Evaluate a template, splicing each `{}` with the corresponding
    /// argument value by identity.
    pub fn call(
        &mut self,
        template: &str,
        args: &[&OwnedValue],
    ) -> Result<Option<OwnedValue>, EngineError> {
        let machine = self.machine()?;
        let chunks: Vec<&str> = template.split("{}").collect();
        if chunks.len() != args.len() + 1 {
            return Err(EngineError::Script {
                code: 0,
                message: format!(
                    "** Script Error: template has {} slots but {} arguments given",
                    chunks.len() - 1,
                    args.len()
                ),
            });
        }
        // Build one reified array: scanned chunk cells interleaved with
        // the spliced values (quoted so they do not re-evaluate).
        let combined = match machine
            .heap
            .make_array(args.len() * 2 + 1, SeriesFlags::MANAGED)
        {
            Ok(array) => array,
            Err(_) => return Err(EngineError::ShutDown),
        };
        let guard = machine.heap.guard_cell(Cell::array(Kind::Block, combined));
        for (i, chunk) in chunks.iter().enumerate() {
            if !chunk.trim().is_empty() {
                let scanned = match core_scan_chunk(machine, chunk) {
                    Ok(scanned) => scanned,
                    Err(message) => {
                        machine.heap.drop_guards_to(guard);
                        return Err(EngineError::Script { code: 100, message });
                    }
                };
                for cell in scanned {
                    let _ = machine.heap.array_push(combined, cell);
                }
            }
            if let Some(arg) = args.get(i) {
                let _ = machine.heap.array_push(combined, arg.cell.clone().quoted(1));
            }
        }
        let block = Cell::array(Kind::Block, combined);
        let result = machine.eval_block_cell(&block, core_value::Specifier::Specified);
        machine.heap.drop_guards_to(guard);
        match result {
            Ok(out) => {
                let stable = match machine.settle(out) {
                    Ok(stable) => stable,
                    Err(raise) => {
                        let machine = self.machine.as_ref().expect("machine checked above");
                        return Err(Self::raise_to_error(machine, raise));
                    }
                };
                match stable {
                    Some(cell) => Ok(Some(self.own(cell)?)),
                    None => Ok(None),
                }
            }
            Err(raise) => {
                let machine = self.machine.as_ref().expect("machine checked above");
                Err(Self::raise_to_error(machine, raise))
            }
        }
    }

    pub fn unbox_integer(&self, value: &OwnedValue) -> Result<i64, EngineError> {
        value.cell.as_integer().ok_or(EngineError::NotAnInteger)
    }

    pub fn unbox_text(&mut self, value: &OwnedValue) -> Result<String, EngineError> {
        let machine = self.machine()?;
        Ok(machine.form(&value.cell))
    }

    pub fn mold(&mut self, value: &OwnedValue) -> Result<String, EngineError> {
        let machine = self.machine()?;
        Ok(machine.mold(&value.cell))
    }

    /// Make a text value from UTF-8.
    pub fn text(&mut self, utf8: &str) -> Result<OwnedValue, EngineError> {
        let machine = self.machine()?;
        let series = machine
            .heap
            .make_text(utf8, SeriesFlags::MANAGED)
            .map_err(|_| EngineError::ShutDown)?;
        self.own(Cell::text(series))
    }

    pub fn integer(&mut self, value: i64) -> Result<OwnedValue, EngineError> {
        self.own(Cell::integer(value))
    }

    /// Wrap host data as a handle; `cleaner` runs when the handle is
    /// collected (or at clean shutdown).
    pub fn handle(
        &mut self,
        data: HandleData,
        cleaner: Option<HandleCleaner>,
    ) -> Result<OwnedValue, EngineError> {
        let machine = self.machine()?;
        let series = machine
            .heap
            .make_handle(data, cleaner, SeriesFlags::MANAGED)
            .map_err(|_| EngineError::ShutDown)?;
        self.own(Cell::handle(series))
    }

    /// Release a handle's pin; the value may be collected afterwards.
    pub fn release(&mut self, value: OwnedValue) {
        if let Some(machine) = self.machine.as_mut() {
            machine.heap.guard_clear(value.guard);
        }
    }

    /// A handle the host can use to request cancellation from another
    /// thread; the interpreter honors it at the next step boundary.
    pub fn halt_handle(&mut self) -> Result<RemoteSignals, EngineError> {
        Ok(self.machine()?.heap.signals.remote())
    }

    pub fn collect_garbage(&mut self) -> Result<(), EngineError> {
        self.machine()?.recycle();
        Ok(())
    }

    /// Install the host argv as `system/options/args`, a block of text
    /// values.
    pub fn set_script_args(&mut self, args: &[String]) -> Result<(), EngineError> {
        let machine = self.machine()?;
        let block = machine
            .heap
            .make_array(args.len(), SeriesFlags::MANAGED)
            .map_err(|_| EngineError::ShutDown)?;
        for arg in args {
            let text = machine
                .heap
                .make_text(arg, SeriesFlags::MANAGED)
                .map_err(|_| EngineError::ShutDown)?;
            machine
                .heap
                .array_push(block, Cell::text(text))
                .map_err(|_| EngineError::ShutDown)?;
        }
        let system = machine.system;
        let options_sym = machine.heap.symbols.intern("options");
        let args_sym = machine.heap.symbols.intern("args");
        let options = machine
            .heap
            .context_find(system, options_sym, false)
            .ok()
            .flatten()
            .and_then(|index| machine.heap.context_var(system, index).ok())
            .and_then(|cell| cell.as_context());
        let Some(options) = options else {
            return Err(EngineError::ShutDown);
        };
        let slot = machine
            .heap
            .context_find(options, args_sym, false)
            .ok()
            .flatten();
        let Some(slot) = slot else {
            return Err(EngineError::ShutDown);
        };
        machine
            .heap
            .context_var_set(options, slot, Cell::array(Kind::Block, block))
            .map_err(|_| EngineError::ShutDown)?;
        Ok(())
    }

    /// Redirect PRINT's output (tests capture into a buffer).
    pub fn set_sink(&mut self, sink: Box<dyn std::io::Write>) -> Result<(), EngineError> {
        self.machine()?.set_sink(sink);
        Ok(())
    }
}

/// Scan a template chunk into cells.
fn core_scan_chunk(machine: &mut Machine, chunk: &str) -> Result<Vec<Cell>, String> {
    match core_scan::scan_source(&mut machine.heap, chunk, None) {
        Ok(series) => match machine.heap.array_view(series) {
            Ok(cells) => Ok(cells.to_vec()),
            Err(fault) => Err(format!("** Internal Error: {fault}")),
        },
        Err(err) => Err(format!("** Syntax Error: {err}")),
    }
}
