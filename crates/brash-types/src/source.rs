//! Source provenance, physical lines, and lexical tokens.
//!
//! Lines and tokens are addressed by bare integer handles (`LineId`,
//! `SpanId`) so AST nodes can store them by value and use them as map keys.
//! The records themselves live in the arena of the kernel crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle of a physical source line. Allocated 0, 1, 2, … and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(pub u32);

/// Handle of a token. Allocated 0, 1, 2, … and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(pub u32);

/// The reserved "no span" sentinel. Never allocated, never valid for lookup.
pub const NO_SPAN: SpanId = SpanId(u32::MAX);

/// Handle of a provenance record pushed onto the arena's source stack.
///
/// Two lines share a source only if they were added under the same push,
/// even when the provenance values compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u32);

impl SpanId {
    /// True for the `NO_SPAN` sentinel.
    pub fn is_none(self) -> bool {
        self == NO_SPAN
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl LineId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "<no span>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a physical line came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// Lines typed at an interactive prompt.
    Interactive,
    /// The argument of `-c`.
    CommandFlag,
    /// A script read from standard input.
    Stdin,
    /// The main script file.
    MainFile { path: String },
    /// A file read by `source` / `.`; `origin` is the token of the command.
    SourcedFile { path: String, origin: SpanId },
    /// The string argument of `eval`.
    Eval { origin: SpanId },
    /// The body of an alias expanded at `origin`.
    Alias { name: String, origin: SpanId },
    /// Code synthesized by the shell itself (traps, completion hooks, tests).
    Synthetic { label: String },
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Interactive => write!(f, "[ interactive ]"),
            Provenance::CommandFlag => write!(f, "[ -c flag ]"),
            Provenance::Stdin => write!(f, "[ stdin ]"),
            Provenance::MainFile { path } => write!(f, "{path}"),
            Provenance::SourcedFile { path, .. } => write!(f, "{path}"),
            Provenance::Eval { .. } => write!(f, "[ eval ]"),
            Provenance::Alias { name, .. } => write!(f, "[ expansion of alias '{name}' ]"),
            Provenance::Synthetic { label } => write!(f, "[ {label} ]"),
        }
    }
}

/// A physical line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLine {
    pub line_id: LineId,
    /// 1-based line number within its source.
    pub line_number: u32,
    pub text: String,
    pub source: SourceId,
}

/// Keywords that raise a control signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKeyword {
    Break,
    Continue,
    Return,
}

impl ControlKeyword {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlKeyword::Break => "break",
            ControlKeyword::Continue => "continue",
            ControlKeyword::Return => "return",
        }
    }

    /// The kind of frame that consumes this keyword's signal.
    pub fn frame_name(self) -> &'static str {
        match self {
            ControlKeyword::Break | ControlKeyword::Continue => "a loop",
            ControlKeyword::Return => "a function",
        }
    }

    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "break" => Some(ControlKeyword::Break),
            "continue" => Some(ControlKeyword::Continue),
            "return" => Some(ControlKeyword::Return),
            _ => None,
        }
    }
}

impl fmt::Display for ControlKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse lexical class of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Unquoted word characters.
    Word,
    /// A complete single- or double-quoted string on one line.
    Quoted,
    /// One physical-line piece of a quoted string that spans lines.
    QuotedPart,
    /// `;`, `|`, `&`, `&&`, `||`, `(`, `)`, `;;`.
    Operator,
    /// `<`, `>`, `>>`, `2>`, `&>`, `<<`, …
    Redirect,
    LBrace,
    RBrace,
    Comment,
    Newline,
    ControlFlow(ControlKeyword),
    /// Bytes the lexer could not classify.
    Unknown,
}

/// A lexical token. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// 0-based byte column within the owning line.
    pub col: u32,
    /// Length in bytes.
    pub length: u32,
    pub line_id: LineId,
    pub span_id: SpanId,
    /// Snapshot of the token text.
    pub text: String,
}

impl Token {
    /// Column one past the last byte of the token.
    pub fn end_col(&self) -> u32 {
        self.col + self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_none() {
        assert!(NO_SPAN.is_none());
        assert!(!SpanId(0).is_none());
        assert_eq!(NO_SPAN.to_string(), "<no span>");
    }

    #[test]
    fn control_keyword_round_trips_through_word() {
        for kw in [ControlKeyword::Break, ControlKeyword::Continue, ControlKeyword::Return] {
            assert_eq!(ControlKeyword::from_word(kw.as_str()), Some(kw));
        }
        assert_eq!(ControlKeyword::from_word("exit"), None);
    }

    #[test]
    fn provenance_display_names_location() {
        let p = Provenance::MainFile { path: "deploy.sh".into() };
        assert_eq!(p.to_string(), "deploy.sh");
        let p = Provenance::Alias { name: "ll".into(), origin: SpanId(3) };
        assert_eq!(p.to_string(), "[ expansion of alias 'll' ]");
    }

    #[test]
    fn provenance_serializes_with_kind_tag() {
        let p = Provenance::Eval { origin: SpanId(7) };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "eval", "origin": 7}));
    }

    #[test]
    fn token_end_col() {
        let tok = Token {
            kind: TokenKind::Word,
            col: 5,
            length: 3,
            line_id: LineId(0),
            span_id: SpanId(0),
            text: "abc".into(),
        };
        assert_eq!(tok.end_col(), 8);
    }
}
