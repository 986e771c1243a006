//! Source arena: owner of physical lines and tokens.
//!
//! The arena keeps two storage tiers:
//!
//! - **Permanent tables** indexed by `LineId` and `SpanId`. Append-only and
//!   retained for the lifetime of the arena, so every handle stored in an AST
//!   node stays valid. `get_line`, `get_token` and `get_code_string` read from
//!   here and keep working after any number of discards.
//! - **Active window**: the lines added since the last discard, in insertion
//!   order. Only the linear-scan helpers (`snip_code_string`,
//!   `save_lines_and_discard`) read it. Callers prune it at safe points
//!   (after each top-level statement in an interactive session) to bound
//!   the cost of those scans.
//!
//! Discarding never frees line text: tier one is not evicted. Lines promoted
//! with `save_lines_and_discard` are recorded in a saved-lines log, which is
//! append-only too.
//!
//! ```
//! use brash_kernel::arena::SourceArena;
//! use brash_types::{Provenance, TokenKind};
//!
//! let mut arena = SourceArena::new();
//! let mut src = arena.push_source(Provenance::Interactive);
//! let line = src.add_line("echo hi\n", 1).unwrap();
//! let tok = src.new_token_id(TokenKind::Word, 5, 2, line, "hi").unwrap();
//! drop(src);
//!
//! arena.discard_lines();
//! assert_eq!(arena.get_line(line).unwrap(), "echo hi\n");
//! assert_eq!(arena.get_token(tok).unwrap().text, "hi");
//! ```

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use brash_types::{LineId, NO_SPAN, Provenance, SourceId, SourceLine, SpanId, Token, TokenKind};
use thiserror::Error;

/// Arena invariant violations. Each one indicates a bug in the caller
/// (parser or evaluator), not a user error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("the no-span sentinel was passed where a token was required")]
    NoSpan,
    #[error("span id out of range: {span_id} is not below {allocated}")]
    SpanOutOfRange { span_id: SpanId, allocated: usize },
    #[error("line id out of range: {line_id} is not below {allocated}")]
    LineOutOfRange { line_id: LineId, allocated: usize },
    #[error("line {line_id} is not in the active window")]
    LineNotInWindow { line_id: LineId },
    #[error("line {right} comes before line {left}")]
    InvertedRange { left: LineId, right: LineId },
    #[error("spans {left} and {right} come from different sources")]
    ProvenanceMismatch { left: SpanId, right: SpanId },
    #[error("column {col} is not a valid boundary of line {line_id}")]
    BadColumn { line_id: LineId, col: u32 },
    #[error("no source has been pushed")]
    NoActiveSource,
    #[error("pop_source called on an empty source stack")]
    SourceStackEmpty,
    #[error("handle space exhausted")]
    Exhausted,
}

pub type ArenaResult<T> = Result<T, ArenaError>;

/// Sizes of the arena's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    pub lines: usize,
    pub tokens: usize,
    pub active: usize,
    pub saved: usize,
    pub sources: usize,
}

/// Owner of lines, tokens, and source provenance.
#[derive(Debug, Default)]
pub struct SourceArena {
    /// Permanent line table, indexed by `LineId`.
    lines: Vec<SourceLine>,
    /// Permanent token table, indexed by `SpanId`.
    tokens: Vec<Token>,
    /// Every provenance ever pushed, indexed by `SourceId`.
    sources: Vec<Provenance>,
    /// Currently open sources, innermost last.
    stack: Vec<SourceId>,
    /// Lines added since the last discard.
    active: Vec<LineId>,
    /// Lines promoted out of the active window. Never pruned.
    saved: Vec<LineId>,
    /// Interned decimal line numbers.
    line_num_strs: HashMap<u32, String>,
    saved_soft_limit: Option<usize>,
}

impl SourceArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warn once the saved-lines log grows past `limit`. Nothing is pruned.
    pub fn with_saved_lines_soft_limit(mut self, limit: Option<usize>) -> Self {
        self.saved_soft_limit = limit;
        self
    }

    // ═══════════════════════════════════════════════════════════════════
    // Provenance stack
    // ═══════════════════════════════════════════════════════════════════

    /// Enter a new source. The returned guard pops it when dropped and
    /// derefs to the arena, so lines can be added through it.
    pub fn push_source(&mut self, provenance: Provenance) -> SourceGuard<'_> {
        self.push_source_raw(provenance);
        SourceGuard { arena: self }
    }

    /// Enter a new source without a guard. Pair with `pop_source`.
    pub fn push_source_raw(&mut self, provenance: Provenance) -> SourceId {
        let id = SourceId(self.sources.len() as u32);
        tracing::trace!(source = %provenance, "push source");
        self.sources.push(provenance);
        self.stack.push(id);
        id
    }

    pub fn pop_source(&mut self) -> ArenaResult<SourceId> {
        self.stack.pop().ok_or(ArenaError::SourceStackEmpty)
    }

    /// The innermost open source.
    pub fn current_source(&self) -> Option<SourceId> {
        self.stack.last().copied()
    }

    pub fn source(&self, id: SourceId) -> Option<&Provenance> {
        self.sources.get(id.0 as usize)
    }

    pub fn source_depth(&self) -> usize {
        self.stack.len()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lines
    // ═══════════════════════════════════════════════════════════════════

    /// Save a physical line and return its id. `line_number` is 1-based.
    ///
    /// The line is tagged with the innermost open source.
    pub fn add_line(&mut self, text: impl Into<String>, line_number: u32) -> ArenaResult<LineId> {
        let source = self.current_source().ok_or(ArenaError::NoActiveSource)?;
        let line_id = LineId(next_handle(self.lines.len())?);
        self.lines.push(SourceLine {
            line_id,
            line_number,
            text: text.into(),
            source,
        });
        self.active.push(line_id);
        Ok(line_id)
    }

    /// Clear the active window. The permanent line table is untouched.
    pub fn discard_lines(&mut self) {
        tracing::trace!(count = self.active.len(), "discarding active lines");
        self.active.clear();
    }

    /// Save the lines from `left`'s line through `right`'s line (inclusive)
    /// into the saved-lines log, then clear the active window.
    ///
    /// Used when capturing a `{ … }` block, so that lines no token points
    /// at (comments, blank lines) are preserved with it.
    pub fn save_lines_and_discard(&mut self, left: SpanId, right: SpanId) -> ArenaResult<usize> {
        let left_line = self.get_token(left)?.line_id;
        let right_line = self.get_token(right)?.line_id;
        let (start, end) = self.window_range(left_line, right_line)?;

        let count = end - start + 1;
        self.saved.extend_from_slice(&self.active[start..=end]);
        tracing::debug!(saved = count, total = self.saved.len(), "saved lines from active window");

        if let Some(limit) = self.saved_soft_limit
            && self.saved.len() > limit
        {
            tracing::warn!(saved = self.saved.len(), limit, "saved-lines log exceeds soft limit");
        }

        self.discard_lines();
        Ok(count)
    }

    /// Return the source text from the start of `left` through the end of
    /// `right`, inclusive, by scanning the active window.
    ///
    /// Used for alias expansion, where an argument may span lines:
    ///
    /// ```text
    /// $ myalias '1
    ///     2
    ///     3'
    /// ```
    pub fn snip_code_string(&self, left: SpanId, right: SpanId) -> ArenaResult<String> {
        let left_tok = self.get_token(left)?;
        let right_tok = self.get_token(right)?;
        let (start, end) = self.window_range(left_tok.line_id, right_tok.line_id)?;

        if start == end {
            let line = &self.lines[left_tok.line_id.index()];
            return Ok(slice_line(line, Some(left_tok.col), Some(right_tok.end_col()))?.to_string());
        }

        let mut out = String::new();
        for (pos, line_id) in self.active[start..=end].iter().enumerate() {
            let line = &self.lines[line_id.index()];
            let piece = if pos == 0 {
                slice_line(line, Some(left_tok.col), None)?
            } else if start + pos == end {
                slice_line(line, None, Some(right_tok.end_col()))?
            } else {
                line.text.as_str()
            };
            out.push_str(piece);
        }
        Ok(out)
    }

    /// Return the text strictly between two tokens (e.g. `{` and `}`),
    /// reading the permanent line table, so it survives discards.
    ///
    /// The result is left-padded with spaces so that column numbers in the
    /// snippet match the original source.
    pub fn get_code_string(&self, left: SpanId, right: SpanId) -> ArenaResult<String> {
        let left_tok = self.get_token(left)?;
        let right_tok = self.get_token(right)?;
        let left_line = self.line(left_tok.line_id)?;
        let right_line = self.line(right_tok.line_id)?;

        if left_line.source != right_line.source {
            return Err(ArenaError::ProvenanceMismatch { left, right });
        }
        if left_line.line_id > right_line.line_id {
            return Err(ArenaError::InvertedRange {
                left: left_line.line_id,
                right: right_line.line_id,
            });
        }

        let start_col = left_tok.end_col();
        let mut out = " ".repeat(start_col as usize);

        if left_line.line_id == right_line.line_id {
            out.push_str(slice_line(left_line, Some(start_col), Some(right_tok.col))?);
        } else {
            out.push_str(slice_line(left_line, Some(start_col), None)?);
            for idx in left_line.line_id.index() + 1..right_line.line_id.index() {
                out.push_str(&self.lines[idx].text);
            }
            out.push_str(slice_line(right_line, None, Some(right_tok.col))?);
        }
        Ok(out)
    }

    pub fn get_line(&self, line_id: LineId) -> ArenaResult<&str> {
        Ok(&self.line(line_id)?.text)
    }

    pub fn get_line_number(&self, line_id: LineId) -> ArenaResult<u32> {
        Ok(self.line(line_id)?.line_number)
    }

    pub fn get_line_source(&self, line_id: LineId) -> ArenaResult<&Provenance> {
        let line = self.line(line_id)?;
        // Every recorded SourceId came from push_source_raw.
        self.sources
            .get(line.source.0 as usize)
            .ok_or(ArenaError::NoActiveSource)
    }

    /// The line number as an interned string, for `$LINENO`.
    pub fn get_line_num_str(&mut self, line_id: LineId) -> ArenaResult<&str> {
        let num = self.get_line_number(line_id)?;
        Ok(self.line_num_strs.entry(num).or_insert_with(|| num.to_string()))
    }

    /// Full record of a line in the permanent table.
    pub fn line(&self, line_id: LineId) -> ArenaResult<&SourceLine> {
        self.lines.get(line_id.index()).ok_or(ArenaError::LineOutOfRange {
            line_id,
            allocated: self.lines.len(),
        })
    }

    /// Lines currently in the active window, in insertion order.
    pub fn active_lines(&self) -> impl Iterator<Item = &SourceLine> {
        self.active.iter().map(|id| &self.lines[id.index()])
    }

    /// The saved-lines log, oldest first.
    pub fn saved_lines(&self) -> impl Iterator<Item = &SourceLine> {
        self.saved.iter().map(|id| &self.lines[id.index()])
    }

    // ═══════════════════════════════════════════════════════════════════
    // Tokens
    // ═══════════════════════════════════════════════════════════════════

    /// Allocate the next span id for a new token. The token's end column
    /// must fit in a `u32`.
    pub fn new_token_id(
        &mut self,
        kind: TokenKind,
        col: u32,
        length: u32,
        line_id: LineId,
        text: impl Into<String>,
    ) -> ArenaResult<SpanId> {
        if col.checked_add(length).is_none() {
            return Err(ArenaError::BadColumn { line_id, col });
        }
        let span_id = SpanId(next_handle(self.tokens.len())?);
        debug_assert!(line_id.index() < self.lines.len(), "token on unknown line {line_id}");
        self.tokens.push(Token {
            kind,
            col,
            length,
            line_id,
            span_id,
            text: text.into(),
        });
        Ok(span_id)
    }

    /// Like `new_token_id`, returning the stored record.
    pub fn new_token(
        &mut self,
        kind: TokenKind,
        col: u32,
        length: u32,
        line_id: LineId,
        text: impl Into<String>,
    ) -> ArenaResult<&Token> {
        let span_id = self.new_token_id(kind, col, length, line_id, text)?;
        Ok(&self.tokens[span_id.index()])
    }

    pub fn get_token(&self, span_id: SpanId) -> ArenaResult<&Token> {
        if span_id.is_none() {
            return Err(ArenaError::NoSpan);
        }
        self.tokens.get(span_id.index()).ok_or(ArenaError::SpanOutOfRange {
            span_id,
            allocated: self.tokens.len(),
        })
    }

    /// One past the last allocated span id.
    pub fn last_span_id(&self) -> SpanId {
        SpanId(self.tokens.len() as u32)
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            lines: self.lines.len(),
            tokens: self.tokens.len(),
            active: self.active.len(),
            saved: self.saved.len(),
            sources: self.sources.len(),
        }
    }

    /// Positions of `left` and `right` in the active window.
    fn window_range(&self, left: LineId, right: LineId) -> ArenaResult<(usize, usize)> {
        let start = self
            .active
            .iter()
            .position(|&id| id == left)
            .ok_or(ArenaError::LineNotInWindow { line_id: left })?;
        let end = self.active[start..]
            .iter()
            .position(|&id| id == right)
            .map(|offset| start + offset);
        match end {
            Some(end) => Ok((start, end)),
            None if self.active.contains(&right) => Err(ArenaError::InvertedRange { left, right }),
            None => Err(ArenaError::LineNotInWindow { line_id: right }),
        }
    }
}

/// Scoped provenance: pops the source pushed by `SourceArena::push_source`
/// when dropped, on every exit path.
pub struct SourceGuard<'a> {
    arena: &'a mut SourceArena,
}

impl Deref for SourceGuard<'_> {
    type Target = SourceArena;

    fn deref(&self) -> &SourceArena {
        self.arena
    }
}

impl DerefMut for SourceGuard<'_> {
    fn deref_mut(&mut self) -> &mut SourceArena {
        self.arena
    }
}

impl Drop for SourceGuard<'_> {
    fn drop(&mut self) {
        if self.arena.pop_source().is_err() {
            tracing::error!("source stack emptied while a guard was still open");
        }
    }
}

fn next_handle(len: usize) -> ArenaResult<u32> {
    // u32::MAX is the NO_SPAN sentinel.
    match u32::try_from(len) {
        Ok(n) if n < NO_SPAN.0 => Ok(n),
        _ => Err(ArenaError::Exhausted),
    }
}

fn slice_line(line: &SourceLine, start: Option<u32>, end: Option<u32>) -> ArenaResult<&str> {
    let start_idx = start.unwrap_or(0) as usize;
    let end_idx = end.map_or(line.text.len(), |e| e as usize);
    line.text.get(start_idx..end_idx).ok_or(ArenaError::BadColumn {
        line_id: line.line_id,
        col: if line.text.get(start_idx..).is_none() {
            start.unwrap_or(0)
        } else {
            end.unwrap_or(0)
        },
    })
}
