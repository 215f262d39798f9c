//! Boot: build a machine from nothing.
//!
//! Order matters. The heap and the user module come first; then the
//! pre-allocated errors (out-of-memory, stack overflow, halt) so that
//! raising them later needs no allocation; then the dispatcher table
//! and the native catalog, whose parameter specs are scanned and parsed
//! with the same code user FUNC specs go through; finally the system
//! object with the typeset and error catalogs.

use std::rc::Rc;

use core_heap::{
    ContextKind, Heap, Param, ParamClass, ParamFlags, ParamList, SeriesFlags,
};
use core_value::{Cell, CellFlags, Kind, TypeSet, typesets};

use crate::error::ErrId;
use crate::machine::{CommonSyms, Machine, MachineConfig, NativeFn};
use crate::natives;
use crate::raise::Raise;

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("heap fault during boot: {0}")]
    Heap(#[from] core_heap::HeapFault),
    #[error("scan error in native spec: {0}")]
    Scan(#[from] core_scan::ScanError),
    #[error("invalid native spec for {0}")]
    BadNativeSpec(&'static str),
}

impl Machine {
    pub fn startup() -> Result<Machine, BootError> {
        Machine::startup_with(MachineConfig::default())
    }

    pub fn startup_with(config: MachineConfig) -> Result<Machine, BootError> {
        let mut heap = Heap::new(config.watermark, config.max_request);
        let empty_array = heap.make_array(0, SeriesFlags::MANAGED)?;
        let lib = heap.make_context(ContextKind::Module, 0)?;
        heap.manage_context(lib)?;
        let system = heap.make_context(ContextKind::Object, 4)?;
        heap.manage_context(system)?;

        let syms = CommonSyms {
            return_: heap.symbols.intern("return"),
            break_: heap.symbols.intern("break"),
            continue_: heap.symbols.intern("continue"),
            throw: heap.symbols.intern("throw"),
            quit: heap.symbols.intern("quit"),
            unwind: heap.symbols.intern("unwind"),
        };

        let placeholder = core_value::ContextId(u32::MAX);
        let mut m = Machine {
            heap,
            levels: Vec::new(),
            dispatchers: Vec::new(),
            lib,
            system,
            syms,
            thrown_label: None,
            thrown_arg: Cell::trash(),
            next_serial: 0,
            depth_ceiling: config.depth_ceiling,
            halt_error: placeholder,
            stack_overflow_error: placeholder,
            oom_error: placeholder,
            return_action: core_value::ActionId(u32::MAX),
            specializer_dispatcher: core_value::DispatcherId(0),
            func_dispatcher: core_value::DispatcherId(0),
            empty_array,
            sink: Box::new(std::io::stdout()),
        };
        m.heap.add_root_cell(Cell::context(Kind::Module, lib));
        m.heap.add_root_cell(Cell::context(Kind::Object, system));
        m.heap
            .add_root_cell(Cell::array(Kind::Block, empty_array));

        // Errors whose raising must not allocate.
        m.oom_error = m.build_error_object(ErrId::OutOfMemory, &[], None, None)?;
        m.stack_overflow_error = m.build_error_object(ErrId::StackOverflow, &[], None, None)?;
        m.halt_error = m.build_error_object(ErrId::Halt, &[], None, None)?;
        for error in [m.oom_error, m.stack_overflow_error, m.halt_error] {
            m.heap.add_root_cell(Cell::context(Kind::Error, error));
        }

        m.specializer_dispatcher =
            m.register_dispatcher(crate::specialize::dispatch_specializer);
        m.func_dispatcher = m.register_dispatcher(natives::func::dispatch_func);

        for def in natives::CATALOG {
            let spec_block = core_scan::scan_source(&mut m.heap, def.spec, None)?;
            let spec_cell = Cell::array(Kind::Block, spec_block);
            let params = m
                .parse_param_spec(&spec_cell)
                .map_err(|_| BootError::BadNativeSpec(def.name))?;
            let params = Rc::new(ParamList { params });
            let details = m.heap.make_array(0, SeriesFlags::MANAGED)?;
            let dispatcher = m.register_dispatcher(def.func);
            let name_sym = m.heap.symbols.intern(def.name);
            let action = m.heap.make_action(params, details, dispatcher, Some(name_sym));
            if def.name == "return" {
                m.return_action = action;
            }
            let mut cell = Cell::action(action);
            if def.enfix {
                cell.set_flag(CellFlags::ENFIXED);
            }
            m.heap.module_write(lib, name_sym, cell)?;
        }

        let true_sym = m.heap.symbols.intern("true");
        let false_sym = m.heap.symbols.intern("false");
        m.heap.module_write(lib, true_sym, Cell::logic(true))?;
        m.heap.module_write(lib, false_sym, Cell::logic(false))?;

        m.build_system_object()?;
        Ok(m)
    }

    pub(crate) fn register_dispatcher(&mut self, func: NativeFn) -> core_value::DispatcherId {
        self.dispatchers.push(func);
        core_value::DispatcherId(self.dispatchers.len() as u16 - 1)
    }

    /// Parse a parameter spec block into params. Shared between the
    /// native catalog and FUNC.
    pub(crate) fn parse_param_spec(&mut self, spec: &Cell) -> Result<Vec<Param>, Raise> {
        let Some((series, index, _)) = spec.as_array() else {
            return Err(self.fail(ErrId::BadSpec, &[spec.clone()]));
        };
        let cells: Vec<Cell> = match self.heap.array_view(series) {
            Ok(view) => view.get(index as usize..).map(|s| s.to_vec()).unwrap_or_default(),
            Err(fault) => return Err(self.fault(fault)),
        };

        let mut params: Vec<Param> = Vec::new();
        let mut locals = false;
        let mut skip_return_block = false;
        for cell in cells {
            if skip_return_block && cell.kind() == Kind::Block {
                skip_return_block = false;
                continue;
            }
            if cell.is_quoted() && cell.kind() == Kind::Word {
                let symbol = cell.word_symbol().expect("word");
                params.push(Param::new(symbol, ParamClass::HardQuote, typesets::ANY_VALUE));
                continue;
            }
            match cell.kind() {
                Kind::Text => {
                    let text = cell
                        .as_text()
                        .and_then(|(s, _)| self.heap.text_str(s).ok().map(str::to_string));
                    if let (Some(last), Some(text)) = (params.last_mut(), text) {
                        last.summary = Some(text);
                    }
                }
                Kind::Word => {
                    let symbol = cell.word_symbol().expect("word");
                    match self.heap.symbols.text(symbol) {
                        "<end>" => match params.last_mut() {
                            Some(last) => last.flags |= ParamFlags::ENDABLE,
                            None => return Err(self.fail(ErrId::BadSpec, &[cell.clone()])),
                        },
                        "<variadic>" => match params.last_mut() {
                            Some(last) => last.flags |= ParamFlags::VARIADIC,
                            None => return Err(self.fail(ErrId::BadSpec, &[cell.clone()])),
                        },
                        "<local>" => locals = true,
                        _ if locals => {
                            params.push(Param::new(symbol, ParamClass::Local, TypeSet::EMPTY));
                        }
                        _ => {
                            params.push(Param::new(symbol, ParamClass::Normal, typesets::ANY_VALUE));
                        }
                    }
                }
                Kind::GetWord => {
                    let symbol = cell.word_symbol().expect("get-word");
                    params.push(Param::new(symbol, ParamClass::SoftQuote, typesets::ANY_VALUE));
                }
                Kind::Refinement => {
                    let symbol = cell.word_symbol().expect("refinement");
                    params.push(Param::new(
                        symbol,
                        ParamClass::Refinement,
                        TypeSet::of(Kind::Logic),
                    ));
                }
                Kind::SetWord => {
                    // `return:` type annotation; its block is skipped.
                    skip_return_block = true;
                }
                Kind::Block => {
                    let Some(last) = params.last_mut() else {
                        return Err(self.fail(ErrId::BadSpec, &[cell.clone()]));
                    };
                    let Some((types_series, types_index, _)) = cell.as_array() else {
                        return Err(self.fail(ErrId::BadSpec, &[cell.clone()]));
                    };
                    let mut types = TypeSet::EMPTY;
                    let names: Vec<String> = match self.heap.array_view(types_series) {
                        Ok(view) => view
                            .get(types_index as usize..)
                            .unwrap_or(&[])
                            .iter()
                            .filter_map(|c| c.word_symbol())
                            .map(|s| self.heap.symbols.text(s).to_string())
                            .collect(),
                        Err(fault) => return Err(self.fault(fault)),
                    };
                    for name in names {
                        match typesets::lookup(&name) {
                            Some(set) => types = types.union(set),
                            None => return Err(self.fail(ErrId::BadSpec, &[cell.clone()])),
                        }
                    }
                    last.types = types;
                }
                _ => return Err(self.fail(ErrId::BadSpec, &[cell.clone()])),
            }
        }
        Ok(params)
    }

    /// `system`: version, typeset catalog, error catalog, options.
    fn build_system_object(&mut self) -> Result<(), BootError> {
        let version = self.heap.make_text("0.0.1", SeriesFlags::MANAGED)?;

        // catalog/typesets: the named typesets as words.
        let typeset_block = self
            .heap
            .make_array(typesets::CATALOG.len(), SeriesFlags::MANAGED)?;
        for (name, _) in typesets::CATALOG {
            let sym = self.heap.symbols.intern(name);
            self.heap
                .array_push(typeset_block, Cell::word(Kind::Word, sym))?;
        }

        // catalog/errors: id -> numeric code.
        let errors = self.heap.make_context(ContextKind::Object, 16)?;
        for id in ErrId::all() {
            let sym = self.heap.symbols.intern(id.id_name());
            self.heap
                .context_append(errors, sym, Cell::integer(id.code()))?;
        }
        self.heap.manage_context(errors)?;

        let catalog = self.heap.make_context(ContextKind::Object, 2)?;
        let typesets_sym = self.heap.symbols.intern("typesets");
        self.heap
            .context_append(catalog, typesets_sym, Cell::array(Kind::Block, typeset_block))?;
        let errors_sym = self.heap.symbols.intern("errors");
        self.heap
            .context_append(catalog, errors_sym, Cell::context(Kind::Object, errors))?;
        self.heap.manage_context(catalog)?;

        // options: security policy defaults and the host argv block.
        let options = self.heap.make_context(ContextKind::Object, 2)?;
        let secure_sym = self.heap.symbols.intern("secure");
        let allow_sym = self.heap.symbols.intern("allow");
        self.heap
            .context_append(options, secure_sym, Cell::word(Kind::Word, allow_sym))?;
        let args_sym = self.heap.symbols.intern("args");
        let args_block = self.heap.make_array(0, SeriesFlags::MANAGED)?;
        self.heap
            .context_append(options, args_sym, Cell::array(Kind::Block, args_block))?;
        self.heap.manage_context(options)?;

        let system = self.system;
        let version_sym = self.heap.symbols.intern("version");
        self.heap
            .context_append(system, version_sym, Cell::text(version))?;
        let catalog_sym = self.heap.symbols.intern("catalog");
        self.heap
            .context_append(system, catalog_sym, Cell::context(Kind::Object, catalog))?;
        let options_sym = self.heap.symbols.intern("options");
        self.heap
            .context_append(system, options_sym, Cell::context(Kind::Object, options))?;

        // Make `system` reachable from user code.
        let system_sym = self.heap.symbols.intern("system");
        self.heap
            .module_write(self.lib, system_sym, Cell::context(Kind::Object, system))?;
        Ok(())
    }
}
