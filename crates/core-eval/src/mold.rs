//! Molding and forming: values back to source-shaped text.
//!
//! `mold` produces loadable text where the kind permits (integers,
//! words, strings, blocks round-trip through the scanner); `form`
//! produces human text (strings lose their quotes, blocks their
//! brackets).

use core_value::{Cell, CellFlags, Kind, Payload};

use crate::machine::Machine;

/// Nesting depth past which molding cuts off (self-referential trees).
const MOLD_DEPTH_LIMIT: usize = 32;

impl Machine {
    pub fn mold(&self, cell: &Cell) -> String {
        let mut buf = String::new();
        self.mold_into(&mut buf, cell, true, 0);
        buf
    }

    pub fn form(&self, cell: &Cell) -> String {
        let mut buf = String::new();
        self.mold_into(&mut buf, cell, false, 0);
        buf
    }

    fn mold_into(&self, buf: &mut String, cell: &Cell, molded: bool, depth: usize) {
        if depth > MOLD_DEPTH_LIMIT {
            buf.push_str("...");
            return;
        }
        for _ in 1..cell.quote_byte().max(1) {
            buf.push('\'');
        }
        match cell.kind() {
            Kind::Free => buf.push_str("~free~"),
            Kind::End => buf.push_str("~end~"),
            Kind::Trash => buf.push_str("~trash~"),
            Kind::Null => buf.push_str("~null~"),
            Kind::Nihil => buf.push_str("~nihil~"),
            Kind::Blank => buf.push('_'),
            Kind::Comma => buf.push(','),
            Kind::Logic => buf.push_str(if cell.as_logic() == Some(true) {
                "true"
            } else {
                "false"
            }),
            Kind::Integer => {
                buf.push_str(&cell.as_integer().unwrap_or(0).to_string());
            }
            Kind::Text => {
                let text = cell
                    .as_text()
                    .and_then(|(series, index)| {
                        self.heap
                            .text_str(series)
                            .ok()
                            .map(|s| s.get(index as usize..).unwrap_or("").to_string())
                    })
                    .unwrap_or_default();
                if molded {
                    buf.push('"');
                    for c in text.chars() {
                        match c {
                            '\n' => buf.push_str("^/"),
                            '\t' => buf.push_str("^-"),
                            '^' => buf.push_str("^^"),
                            '"' => buf.push_str("^\""),
                            other => buf.push(other),
                        }
                    }
                    buf.push('"');
                } else {
                    buf.push_str(&text);
                }
            }
            Kind::Word | Kind::SetWord | Kind::GetWord | Kind::Refinement => {
                let spelling = cell
                    .word_symbol()
                    .map(|s| self.heap.symbols.text(s))
                    .unwrap_or("?");
                match cell.kind() {
                    Kind::GetWord => {
                        buf.push(':');
                        buf.push_str(spelling);
                    }
                    Kind::SetWord => {
                        buf.push_str(spelling);
                        buf.push(':');
                    }
                    Kind::Refinement => {
                        buf.push('/');
                        buf.push_str(spelling);
                    }
                    _ => buf.push_str(spelling),
                }
            }
            Kind::Block | Kind::Group | Kind::Pack => {
                let (open, close) = match cell.kind() {
                    Kind::Group => ("(", ")"),
                    _ => ("[", "]"),
                };
                if molded || cell.kind() == Kind::Group {
                    buf.push_str(open);
                }
                self.mold_array_contents(buf, cell, molded, depth);
                if molded || cell.kind() == Kind::Group {
                    buf.push_str(close);
                }
            }
            Kind::Path | Kind::SetPath | Kind::GetPath => {
                if cell.kind() == Kind::GetPath {
                    buf.push(':');
                }
                if let Some((series, index, _)) = cell.as_array() {
                    if let Ok(cells) = self.heap.array_view(series) {
                        for (i, segment) in cells.iter().enumerate().skip(index as usize) {
                            if i > index as usize {
                                buf.push('/');
                            }
                            self.mold_into(buf, segment, molded, depth + 1);
                        }
                    }
                }
                if cell.kind() == Kind::SetPath {
                    buf.push(':');
                }
            }
            Kind::Action => {
                let label = cell
                    .as_action()
                    .and_then(|(id, _)| self.heap.action(id).ok())
                    .and_then(|action| action.label)
                    .map(|s| self.heap.symbols.text(s))
                    .unwrap_or("anonymous");
                buf.push_str("#[action! ");
                buf.push_str(label);
                buf.push(']');
            }
            Kind::Frame | Kind::Object | Kind::Module | Kind::Port => {
                let name = cell.kind().name();
                buf.push_str("make ");
                buf.push_str(name);
                buf.push_str(" [");
                if let Some(ctx) = cell.as_context() {
                    self.mold_context_fields(buf, ctx, depth);
                }
                buf.push(']');
            }
            Kind::Error => {
                if let Some(ctx) = cell.as_context() {
                    buf.push_str(&self.mold_error(ctx));
                } else {
                    buf.push_str("make error! []");
                }
            }
            Kind::Handle => buf.push_str("#[handle!]"),
            Kind::Varargs => buf.push_str("#[varargs!]"),
        }
    }

    fn mold_array_contents(&self, buf: &mut String, cell: &Cell, molded: bool, depth: usize) {
        let Some((series, index, _)) = cell.as_array() else {
            return;
        };
        let Ok(cells) = self.heap.array_view(series) else {
            buf.push_str("...");
            return;
        };
        let mut first = true;
        for item in cells.iter().skip(index as usize) {
            if !first {
                if molded && item.has_flag(CellFlags::NEWLINE_BEFORE) {
                    buf.push('\n');
                } else {
                    buf.push(' ');
                }
            }
            first = false;
            self.mold_into(buf, item, molded, depth + 1);
        }
    }

    fn mold_context_fields(&self, buf: &mut String, ctx: core_value::ContextId, depth: usize) {
        let Ok(context) = self.heap.context(ctx) else {
            return;
        };
        let keys: Vec<(core_value::SymbolId, usize)> = context
            .keylist
            .keys
            .iter()
            .enumerate()
            .filter(|(_, k)| !k.flags.contains(core_heap::KeyFlags::HIDDEN))
            .map(|(i, k)| (k.symbol, i + 1))
            .collect();
        let mut first = true;
        for (symbol, index) in keys {
            if !first {
                buf.push(' ');
            }
            first = false;
            buf.push_str(self.heap.symbols.text(symbol));
            buf.push_str(": ");
            match self.heap.context_var(ctx, index) {
                Ok(value) => {
                    // Guard molding against frame cycles through the
                    // archetype.
                    if matches!(value.payload(), Payload::Context(inner) if *inner == ctx) {
                        buf.push_str("...");
                    } else {
                        let value = value.clone();
                        self.mold_into(buf, &value, true, depth + 1);
                    }
                }
                Err(_) => buf.push_str("~trash~"),
            }
        }
    }
}
