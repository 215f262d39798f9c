//! Control-flow natives.
//!
//! Branching natives stage their branch through the trampoline
//! (`Delegate`), so deeply chained IFs do not pile native frames onto
//! the Rust stack. COMPOSE is the resumable kind: it keeps its walk
//! position in a frame local, requests one group evaluation per
//! `Continue` bounce, and picks up where it left off when the spare
//! slot comes back filled.
//!
//! Loop natives run their bodies directly and are the catchers for the
//! break/continue labels; an unlabeled throw passes through them to the
//! nearest CATCH.

use core_value::{Cell, Kind, Specifier};

use crate::error::ErrId;
use crate::level::Pending;
use crate::machine::Machine;
use crate::raise::{Bounce, Raise};
use crate::step::Step;

/// What a loop body evaluation asked of its enclosing loop.
enum LoopSignal {
    Value(Cell),
    Break,
    Continue,
}

impl Machine {
    /// Evaluate a loop body, translating break/continue labels.
    fn eval_loop_body(&mut self, body: &Cell) -> Result<LoopSignal, Raise> {
        match self.eval_block_cell(body, Specifier::Specified) {
            Ok(value) => Ok(LoopSignal::Value(value)),
            Err(Raise::Thrown) => {
                let symbol = self
                    .thrown_label_ref()
                    .and_then(|label| label.word_symbol());
                match symbol {
                    Some(symbol)
                        if self.heap.symbols.same_spelling(symbol, self.syms.break_)
                            && !self.thrown_is_definitional() =>
                    {
                        self.take_thrown();
                        Ok(LoopSignal::Break)
                    }
                    Some(symbol)
                        if self.heap.symbols.same_spelling(symbol, self.syms.continue_)
                            && !self.thrown_is_definitional() =>
                    {
                        self.take_thrown();
                        Ok(LoopSignal::Continue)
                    }
                    _ => Err(Raise::Thrown),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// A definitional label (bound to a frame) is never caught by name.
    fn thrown_is_definitional(&self) -> bool {
        matches!(
            self.thrown_label_ref().and_then(|c| c.as_word()),
            Some((_, binding, _)) if !binding.is_unbound()
        )
    }

    /// Step through a block, handing each expression's stable value to
    /// `visit`; stop early when it returns `false`.
    fn eval_stepwise(
        &mut self,
        block: &Cell,
        mut visit: impl FnMut(&mut Machine, Cell) -> Result<bool, Raise>,
    ) -> Result<(), Raise> {
        let Some((series, index, binding)) = block.as_array() else {
            return Err(self.fail(ErrId::InvalidArg, &[block.clone()]));
        };
        let specifier = binding.as_specifier();
        self.push_level(crate::feed::Feed::new(series, index, specifier))?;
        let outcome = loop {
            match self.eval_step() {
                Ok(Step::End) => break Ok(()),
                Ok(Step::Done) => {
                    // Barriers and invisible steps contribute nothing.
                    if self
                        .top_ref()
                        .flags
                        .contains(crate::level::LevelFlags::OUT_STALE)
                    {
                        continue;
                    }
                    let out = self.top_ref().out.clone();
                    let value = match self.decay_cell(out) {
                        Ok(value) => value,
                        Err(err) => break Err(err),
                    };
                    match visit(self, value) {
                        Ok(true) => continue,
                        Ok(false) => break Ok(()),
                        Err(err) => break Err(err),
                    }
                }
                Err(err) => break Err(err),
            }
        };
        self.pop_level();
        outcome
    }
}

pub(crate) fn native_if(m: &mut Machine) -> Result<Bounce, Raise> {
    let condition = m.arg(1);
    let branch = m.arg(2);
    match condition.truthiness() {
        Some(true) => {
            m.top().pending = Some(Pending::Branch {
                value: branch,
                with: Some(condition),
            });
            Ok(Bounce::Delegate)
        }
        Some(false) => m.out_done(Cell::null()),
        None => Err(m.fail(ErrId::InvalidArg, &[condition])),
    }
}

pub(crate) fn native_either(m: &mut Machine) -> Result<Bounce, Raise> {
    let condition = m.arg(1);
    let branch = match condition.truthiness() {
        Some(true) => m.arg(2),
        Some(false) => m.arg(3),
        None => return Err(m.fail(ErrId::InvalidArg, &[condition])),
    };
    m.top().pending = Some(Pending::Branch {
        value: branch,
        with: Some(condition),
    });
    Ok(Bounce::Delegate)
}

pub(crate) fn native_any(m: &mut Machine) -> Result<Bounce, Raise> {
    let block = m.arg(1);
    let mut found: Option<Cell> = None;
    m.eval_stepwise(&block, |_, value| {
        if value.truthiness() == Some(true) {
            found = Some(value);
            Ok(false)
        } else {
            Ok(true)
        }
    })?;
    let result = found.unwrap_or_else(Cell::null);
    m.out_done(result)
}

pub(crate) fn native_all(m: &mut Machine) -> Result<Bounce, Raise> {
    let block = m.arg(1);
    let mut last: Option<Cell> = None;
    let mut failed = false;
    m.eval_stepwise(&block, |_, value| {
        if value.truthiness() == Some(true) {
            last = Some(value);
            Ok(true)
        } else {
            failed = true;
            Ok(false)
        }
    })?;
    let result = if failed {
        Cell::null()
    } else {
        last.unwrap_or_else(Cell::null)
    };
    m.out_done(result)
}

pub(crate) fn native_case(m: &mut Machine) -> Result<Bounce, Raise> {
    let block = m.arg(1);
    let mut pending_condition: Option<bool> = None;
    let mut result: Option<Cell> = None;
    m.eval_stepwise(&block, |m, value| match pending_condition.take() {
        None => {
            let truthy = value
                .truthiness()
                .ok_or_else(|| m.fail(ErrId::InvalidArg, &[value.clone()]))?;
            pending_condition = Some(truthy);
            Ok(true)
        }
        Some(truthy) => {
            if truthy {
                let outcome = match value.kind() {
                    Kind::Block | Kind::Group => {
                        let atom = m.eval_block_cell(&value, Specifier::Specified)?;
                        m.decay_cell(atom)?
                    }
                    _ => value,
                };
                result = Some(outcome);
                Ok(false)
            } else {
                Ok(true)
            }
        }
    })?;
    let out = result.unwrap_or_else(Cell::null);
    m.out_done(out)
}

pub(crate) fn native_repeat(m: &mut Machine) -> Result<Bounce, Raise> {
    let count = m.arg(1).as_integer().unwrap_or(0);
    let body = m.arg(2);
    let mut last = Cell::null();
    for _ in 0..count.max(0) {
        m.poll_signals()?;
        match m.eval_loop_body(&body)? {
            LoopSignal::Value(value) => last = m.decay_cell(value)?,
            LoopSignal::Break => return m.out_done(Cell::null()),
            LoopSignal::Continue => continue,
        }
    }
    m.out_done(last)
}

pub(crate) fn native_while(m: &mut Machine) -> Result<Bounce, Raise> {
    let condition = m.arg(1);
    let body = m.arg(2);
    let mut last = Cell::null();
    loop {
        m.poll_signals()?;
        let cond = m.eval_block_cell(&condition, Specifier::Specified)?;
        let cond = m.decay_cell(cond)?;
        match cond.truthiness() {
            Some(true) => {}
            Some(false) => break,
            None => return Err(m.fail(ErrId::InvalidArg, &[cond])),
        }
        match m.eval_loop_body(&body)? {
            LoopSignal::Value(value) => last = m.decay_cell(value)?,
            LoopSignal::Break => return m.out_done(Cell::null()),
            LoopSignal::Continue => continue,
        }
    }
    m.out_done(last)
}

pub(crate) fn native_catch(m: &mut Machine) -> Result<Bounce, Raise> {
    let block = m.arg(1);
    match m.eval_block_cell(&block, Specifier::Specified) {
        Ok(value) => {
            let value = m.decay_cell(value)?;
            m.out_done(value)
        }
        Err(Raise::Thrown) => {
            let caught = matches!(
                m.thrown_label_ref().and_then(|c| c.word_symbol()),
                Some(symbol) if m.heap.symbols.same_spelling(symbol, m.syms.throw)
            );
            if caught {
                let (_, arg) = m.take_thrown();
                m.out_done(arg)
            } else {
                Err(Raise::Thrown)
            }
        }
        Err(err) => Err(err),
    }
}

pub(crate) fn native_throw(m: &mut Machine) -> Result<Bounce, Raise> {
    let value = m.arg(1);
    let label = Cell::word(Kind::Word, m.syms.throw);
    Err(m.throw_labeled(label, value))
}

pub(crate) fn native_break(m: &mut Machine) -> Result<Bounce, Raise> {
    let label = Cell::word(Kind::Word, m.syms.break_);
    Err(m.throw_labeled(label, Cell::null()))
}

pub(crate) fn native_continue(m: &mut Machine) -> Result<Bounce, Raise> {
    let label = Cell::word(Kind::Word, m.syms.continue_);
    Err(m.throw_labeled(label, Cell::null()))
}

/// Vanishes entirely: the previous output stays as if the comment had
/// not been there.
pub(crate) fn native_comment(m: &mut Machine) -> Result<Bounce, Raise> {
    let _ = m.arg(1);
    Ok(Bounce::Invisible)
}

pub(crate) fn native_quit(m: &mut Machine) -> Result<Bounce, Raise> {
    let value = m.arg(1);
    let code = value.as_integer().unwrap_or(0);
    let label = Cell::word(Kind::Word, m.syms.quit);
    Err(m.throw_labeled(label, Cell::integer(code)))
}

pub(crate) fn native_do(m: &mut Machine) -> Result<Bounce, Raise> {
    let source = m.arg(1);
    match source.kind() {
        Kind::Block | Kind::Group => {
            m.top().pending = Some(Pending::Block {
                value: source,
                specifier: Specifier::Specified,
            });
            Ok(Bounce::Delegate)
        }
        Kind::Text => {
            let text = source
                .as_text()
                .and_then(|(series, _)| m.heap.text_str(series).ok().map(str::to_string))
                .unwrap_or_default();
            match m.run_source(&text, None)? {
                Some(value) => m.out_done(value),
                None => m.out_done(Cell::null()),
            }
        }
        Kind::Frame => {
            let result = m.do_frame(&source)?;
            let value = m.decay_cell(result)?;
            m.out_done(value)
        }
        Kind::Error => {
            let ctx = source.as_context().expect("error context");
            Err(Raise::Error(ctx))
        }
        Kind::Action => {
            let result = m.invoke_with_values(&source, &[])?;
            m.out_done(result)
        }
        _ => m.out_done(source),
    }
}

pub(crate) fn native_reduce(m: &mut Machine) -> Result<Bounce, Raise> {
    let block = m.arg(1);
    // Accumulate on the data stack so a collection mid-reduce still
    // sees every produced value as a root.
    let base = m.heap.ds_depth();
    let stepped = m.eval_stepwise(&block, |m, value| {
        m.heap.ds_push(value);
        Ok(true)
    });
    if let Err(err) = stepped {
        m.heap.ds_drop_to(base);
        return Err(err);
    }
    let values = m.heap.ds_take_from(base);
    let array = match m
        .heap
        .make_array(values.len(), core_heap::SeriesFlags::MANAGED)
    {
        Ok(array) => array,
        Err(fault) => return Err(m.fault(fault)),
    };
    for value in values {
        if let Err(fault) = m.heap.array_push(array, value) {
            return Err(m.fault(fault));
        }
    }
    m.out_done(Cell::array(Kind::Block, array))
}

// COMPOSE frame slots (after the template parameter).
const COMPOSE_TEMPLATE: usize = 1;
const COMPOSE_POSITION: usize = 2;
const COMPOSE_OUTPUT: usize = 3;

/// Resumable template filler. State 0 initializes; each unquoted group
/// suspends with a `Continue` bounce and resumes in state 1 with the
/// group's value in the spare slot.
pub(crate) fn native_compose(m: &mut Machine) -> Result<Bounce, Raise> {
    let template = m.arg(COMPOSE_TEMPLATE);
    let Some((series, base, binding)) = template.as_array() else {
        return Err(m.fail(ErrId::InvalidArg, &[template]));
    };
    let varlist = m.top_ref().varlist.expect("compose frame");

    if m.top_ref().state == 0 {
        let output = match m.heap.make_array(4, core_heap::SeriesFlags::MANAGED) {
            Ok(array) => array,
            Err(fault) => return Err(m.fault(fault)),
        };
        m.heap
            .context_var_set(varlist, COMPOSE_POSITION, Cell::integer(0))
            .map_err(|fault| m.fault(fault))?;
        m.heap
            .context_var_set(varlist, COMPOSE_OUTPUT, Cell::array(Kind::Block, output))
            .map_err(|fault| m.fault(fault))?;
        m.top().state = 1;
    } else {
        // A group's value just landed in spare; splice it in (dropping
        // nulls and vanishing results, as templates expect).
        let spare = m.top_ref().spare.clone();
        let value = m.decay_cell(spare)?;
        if !matches!(value.kind(), Kind::Null | Kind::Blank) {
            let output = output_series(m)?;
            if let Err(fault) = m.heap.array_push(output, value) {
                return Err(m.fault(fault));
            }
        }
    }

    loop {
        let position = m
            .arg(COMPOSE_POSITION)
            .as_integer()
            .unwrap_or(0) as usize;
        let at = base as usize + position;
        let item = match m.heap.array_cell(series, at) {
            Ok(cell) if !cell.is_end() => cell.clone(),
            Ok(_) => break,
            Err(fault) => return Err(m.fault(fault)),
        };
        m.heap
            .context_var_set(varlist, COMPOSE_POSITION, Cell::integer(position as i64 + 1))
            .map_err(|fault| m.fault(fault))?;
        if item.kind() == Kind::Group && !item.is_quoted() {
            m.top().pending = Some(Pending::Block {
                value: item,
                specifier: binding.as_specifier(),
            });
            return Ok(Bounce::Continue);
        }
        let output = output_series(m)?;
        if let Err(fault) = m.heap.array_push(output, item) {
            return Err(m.fault(fault));
        }
    }

    let output = output_series(m)?;
    m.out_done(Cell::array(Kind::Block, output))
}

fn output_series(m: &mut Machine) -> Result<core_value::SeriesId, Raise> {
    match m.arg(COMPOSE_OUTPUT).as_array() {
        Some((series, _, _)) => Ok(series),
        None => Err(m.fail(ErrId::MiscInternal, &[])),
    }
}
