//! Scanner: UTF-8 source text to arrays of cells.
//!
//! Covers the token subset the core runtime consumes: words and their
//! set/get/refinement decorations, integers, quoted text with caret
//! escapes, blocks, groups, paths, quote marks, semicolon comments, and
//! the comma expression barrier. Scanned arrays carry file/line
//! annotation, and cells that started a source line carry the
//! newline-before hint for molding.

use core_heap::{Heap, SeriesFlags};
use core_value::{Cell, CellFlags, Kind, SeriesId};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("line {line}: unexpected '{found}'")]
    Unexpected { line: u32, found: char },
    #[error("line {line}: missing closing '{expected}'")]
    Unclosed { line: u32, expected: char },
    #[error("line {line}: invalid integer \"{text}\"")]
    BadInteger { line: u32, text: String },
    #[error("line {line}: bad caret escape '^{found}'")]
    BadEscape { line: u32, found: char },
    #[error("line {line}: path segment must be a word or integer")]
    BadPathSegment { line: u32 },
    #[error("heap fault while scanning: {0}")]
    Heap(#[from] core_heap::HeapFault),
}

/// Scan a complete source string into a managed block array.
pub fn scan_source(
    heap: &mut Heap,
    source: &str,
    file: Option<&str>,
) -> Result<SeriesId, ScanError> {
    let mut scanner = Scanner {
        src: source.as_bytes(),
        pos: 0,
        line: 1,
        newline_pending: false,
    };
    let array = scanner.scan_sequence(heap, None)?;
    if let Some(file) = file {
        let file_sym = heap.symbols.intern(file);
        heap.set_file_line(array, file_sym, 1)?;
    }
    trace!(
        tokens = heap.array_len(array).unwrap_or(0),
        file = file.unwrap_or("(none)"),
        "scanned source"
    );
    Ok(array)
}

struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    /// A newline was consumed since the last emitted token.
    newline_pending: bool,
}

fn is_word_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || b"+-*=<>!?._&|~".contains(&c) || c >= 0x80
}

fn is_word_char(c: u8) -> bool {
    is_word_start(c) || c.is_ascii_digit()
}

fn is_delimiter(c: u8) -> bool {
    c.is_ascii_whitespace() || b"[](),;\"".contains(&c)
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.newline_pending = true;
        }
        Some(c)
    }

    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b';') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Scan tokens until end of input (`closer` None) or the matching
    /// close bracket.
    fn scan_sequence(
        &mut self,
        heap: &mut Heap,
        closer: Option<u8>,
    ) -> Result<SeriesId, ScanError> {
        let open_line = self.line;
        let array = heap.make_array(4, SeriesFlags::MANAGED)?;
        loop {
            self.skip_blanks();
            match self.peek() {
                None => {
                    if let Some(expected) = closer {
                        return Err(ScanError::Unclosed {
                            line: open_line,
                            expected: expected as char,
                        });
                    }
                    break;
                }
                Some(c) if Some(c) == closer => {
                    self.bump();
                    break;
                }
                Some(c @ (b']' | b')')) => {
                    return Err(ScanError::Unexpected {
                        line: self.line,
                        found: c as char,
                    });
                }
                Some(_) => {
                    let newline = std::mem::take(&mut self.newline_pending);
                    let mut cell = self.scan_value(heap)?;
                    if newline {
                        cell.set_flag(CellFlags::NEWLINE_BEFORE);
                    }
                    heap.array_push(array, cell)?;
                }
            }
        }
        Ok(array)
    }

    fn scan_value(&mut self, heap: &mut Heap) -> Result<Cell, ScanError> {
        // Quote marks stack; they apply to whatever value follows.
        let mut quotes: u8 = 0;
        while self.peek() == Some(b'\'') {
            self.bump();
            quotes += 1;
        }
        let cell = self.scan_unquoted(heap)?;
        Ok(if quotes > 0 { cell.quoted(quotes) } else { cell })
    }

    fn scan_unquoted(&mut self, heap: &mut Heap) -> Result<Cell, ScanError> {
        let line = self.line;
        let Some(first) = self.peek() else {
            // Dangling quote marks at end of input.
            return Err(ScanError::Unexpected { line, found: '\'' });
        };
        match first {
            b'[' => {
                self.bump();
                let inner = self.scan_sequence(heap, Some(b']'))?;
                Ok(Cell::array(Kind::Block, inner))
            }
            b'(' => {
                self.bump();
                let inner = self.scan_sequence(heap, Some(b')'))?;
                Ok(Cell::array(Kind::Group, inner))
            }
            b',' => {
                self.bump();
                Ok(Cell::comma())
            }
            b'"' => {
                self.bump();
                self.scan_string(heap, line)
            }
            b':' => {
                self.bump();
                let segments = self.scan_path_segments(heap)?;
                self.finish_path(heap, segments, Kind::GetWord, Kind::GetPath, line)
            }
            b'/' => {
                self.bump();
                let word = self.scan_word_spelling(line)?;
                let sym = heap.symbols.intern(&word);
                Ok(Cell::word(Kind::Refinement, sym))
            }
            c if c.is_ascii_digit()
                || (matches!(c, b'+' | b'-')
                    && self.peek_at(1).map(|d| d.is_ascii_digit()).unwrap_or(false)) =>
            {
                self.scan_integer(line)
            }
            c if is_word_start(c) => {
                let segments = self.scan_path_segments(heap)?;
                if self.peek() == Some(b':') {
                    self.bump();
                    self.finish_path(heap, segments, Kind::SetWord, Kind::SetPath, line)
                } else {
                    self.finish_path(heap, segments, Kind::Word, Kind::Path, line)
                }
            }
            other => Err(ScanError::Unexpected {
                line,
                found: other as char,
            }),
        }
    }

    /// One or more path segments separated by slashes. A single segment
    /// is just a word (or integer pick inside a longer path).
    fn scan_path_segments(&mut self, heap: &mut Heap) -> Result<Vec<Cell>, ScanError> {
        let line = self.line;
        let mut segments = Vec::new();
        loop {
            let segment = if self
                .peek()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
            {
                if segments.is_empty() {
                    return Err(ScanError::BadPathSegment { line });
                }
                self.scan_integer(line)?
            } else {
                let word = self.scan_word_spelling(line)?;
                Cell::word(Kind::Word, heap.symbols.intern(&word))
            };
            segments.push(segment);
            if self.peek() == Some(b'/') && !self.peek_at(1).map(is_delimiter).unwrap_or(true) {
                self.bump();
            } else {
                break;
            }
        }
        Ok(segments)
    }

    fn finish_path(
        &mut self,
        heap: &mut Heap,
        mut segments: Vec<Cell>,
        word_kind: Kind,
        path_kind: Kind,
        line: u32,
    ) -> Result<Cell, ScanError> {
        debug_assert!(!segments.is_empty());
        if segments.len() == 1 {
            let only = segments.pop().expect("length checked");
            let sym = only.word_symbol().ok_or(ScanError::BadPathSegment { line })?;
            return Ok(Cell::word(word_kind, sym));
        }
        let array = heap.make_array(segments.len(), SeriesFlags::MANAGED)?;
        for segment in segments {
            heap.array_push(array, segment)?;
        }
        Ok(Cell::array(path_kind, array))
    }

    fn scan_word_spelling(&mut self, line: u32) -> Result<String, ScanError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if is_word_start(c) => {}
            other => {
                return Err(ScanError::Unexpected {
                    line,
                    found: other.map(|c| c as char).unwrap_or(' '),
                });
            }
        }
        while let Some(c) = self.peek() {
            if is_word_char(c) {
                self.bump();
            } else {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }

    fn scan_integer(&mut self, line: u32) -> Result<Cell, ScanError> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.bump();
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else if is_word_char(c) {
                // "1st" and friends are not integers and not words.
                while let Some(c) = self.peek() {
                    if is_word_char(c) {
                        self.bump();
                    } else {
                        break;
                    }
                }
                return Err(ScanError::BadInteger {
                    line,
                    text: String::from_utf8_lossy(&self.src[start..self.pos]).into_owned(),
                });
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("ascii digits");
        let value: i64 = text.parse().map_err(|_| ScanError::BadInteger {
            line,
            text: text.to_string(),
        })?;
        Ok(Cell::integer(value))
    }

    fn scan_string(&mut self, heap: &mut Heap, open_line: u32) -> Result<Cell, ScanError> {
        let mut bytes: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                None => {
                    return Err(ScanError::Unclosed {
                        line: open_line,
                        expected: '"',
                    });
                }
                Some(b'"') => break,
                Some(b'^') => match self.bump() {
                    Some(b'/') => bytes.push(b'\n'),
                    Some(b'-') => bytes.push(b'\t'),
                    Some(b'^') => bytes.push(b'^'),
                    Some(b'"') => bytes.push(b'"'),
                    other => {
                        return Err(ScanError::BadEscape {
                            line: self.line,
                            found: other.map(|c| c as char).unwrap_or(' '),
                        });
                    }
                },
                // Multibyte sequences re-join byte-for-byte; the source
                // slice is valid UTF-8 so the buffer ends up valid too.
                Some(c) => bytes.push(c),
            }
        }
        let text = String::from_utf8_lossy(&bytes);
        let series = heap.make_text(&text, SeriesFlags::MANAGED)?;
        Ok(Cell::text(series))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_heap::Heap;

    fn scan(heap: &mut Heap, text: &str) -> SeriesId {
        scan_source(heap, text, Some("test.r")).unwrap()
    }

    #[test]
    fn words_and_integers() {
        let mut h = Heap::with_defaults();
        let block = scan(&mut h, "add 1 -2");
        assert_eq!(h.array_len(block).unwrap(), 3);
        assert_eq!(h.array_cell(block, 0).unwrap().kind(), Kind::Word);
        assert_eq!(h.array_cell(block, 1).unwrap().as_integer(), Some(1));
        assert_eq!(h.array_cell(block, 2).unwrap().as_integer(), Some(-2));
    }

    #[test]
    fn set_and_get_words() {
        let mut h = Heap::with_defaults();
        let block = scan(&mut h, "x: 10 :x");
        assert_eq!(h.array_cell(block, 0).unwrap().kind(), Kind::SetWord);
        assert_eq!(h.array_cell(block, 2).unwrap().kind(), Kind::GetWord);
    }

    #[test]
    fn nested_blocks_and_groups() {
        let mut h = Heap::with_defaults();
        let block = scan(&mut h, "[1 (2 3)]");
        let outer = h.array_cell(block, 0).unwrap().as_array().unwrap().0;
        assert_eq!(h.array_len(outer).unwrap(), 2);
        let group = h.array_cell(outer, 1).unwrap();
        assert_eq!(group.kind(), Kind::Group);
    }

    #[test]
    fn paths_and_refinements() {
        let mut h = Heap::with_defaults();
        let block = scan(&mut h, "foo/b/c :foo/b foo/1: /only");
        let path = h.array_cell(block, 0).unwrap();
        assert_eq!(path.kind(), Kind::Path);
        let inner = path.as_array().unwrap().0;
        assert_eq!(h.array_len(inner).unwrap(), 3);
        assert_eq!(h.array_cell(block, 1).unwrap().kind(), Kind::GetPath);
        assert_eq!(h.array_cell(block, 2).unwrap().kind(), Kind::SetPath);
        assert_eq!(h.array_cell(block, 3).unwrap().kind(), Kind::Refinement);
    }

    #[test]
    fn quoted_values_carry_quote_levels() {
        let mut h = Heap::with_defaults();
        let block = scan(&mut h, "'foo ''[1]");
        let word = h.array_cell(block, 0).unwrap();
        assert_eq!(word.quote_byte(), 2);
        let nested = h.array_cell(block, 1).unwrap();
        assert_eq!(nested.quote_byte(), 3);
        assert_eq!(nested.kind(), Kind::Block);
    }

    #[test]
    fn strings_with_escapes() {
        let mut h = Heap::with_defaults();
        let block = scan(&mut h, r#""a^/b^^c""#);
        let text = h.array_cell(block, 0).unwrap();
        let (series, _) = text.as_text().unwrap();
        assert_eq!(h.text_str(series).unwrap(), "a\nb^c");
    }

    #[test]
    fn comments_and_commas() {
        let mut h = Heap::with_defaults();
        let block = scan(&mut h, "1 ; ignored to end of line\n2, 3");
        assert_eq!(h.array_len(block).unwrap(), 4);
        assert_eq!(h.array_cell(block, 2).unwrap().kind(), Kind::Comma);
    }

    #[test]
    fn newline_hints_and_file_line() {
        let mut h = Heap::with_defaults();
        let block = scan(&mut h, "1 2\n3");
        assert!(
            h.array_cell(block, 2)
                .unwrap()
                .has_flag(CellFlags::NEWLINE_BEFORE)
        );
        assert!(
            !h.array_cell(block, 1)
                .unwrap()
                .has_flag(CellFlags::NEWLINE_BEFORE)
        );
        let (file, line) = h.file_line(block).unwrap();
        assert_eq!(h.symbols.text(file), "test.r");
        assert_eq!(line, 1);
    }

    #[test]
    fn unclosed_block_reports_open_line() {
        let mut h = Heap::with_defaults();
        let err = scan_source(&mut h, "[1 2", None).unwrap_err();
        assert_eq!(
            err,
            ScanError::Unclosed {
                line: 1,
                expected: ']'
            }
        );
    }

    #[test]
    fn stray_close_is_rejected() {
        let mut h = Heap::with_defaults();
        let err = scan_source(&mut h, "1 ]", None).unwrap_err();
        assert!(matches!(err, ScanError::Unexpected { found: ']', .. }));
    }

    #[test]
    fn division_slash_is_a_word() {
        let mut h = Heap::with_defaults();
        // A solitary slash-word is not supported in the token subset;
        // division is spelled `divide`.
        assert!(scan_source(&mut h, "1 / 2", None).is_err());
    }
}
