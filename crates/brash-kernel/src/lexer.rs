//! Line lexer: registers physical lines and their tokens with the arena.
//!
//! This is the narrow front end the arena is designed around. Each call to
//! `LineLexer::feed_line` adds one line (`SourceArena::add_line`) and
//! allocates one token per lexeme (`SourceArena::new_token_id`). Columns and
//! lengths are byte offsets within the line.
//!
//! Quoted strings may span lines. The lexer then emits one `QuotedPart`
//! token per physical line, and a later `snip_code_string` between the first
//! and last part recovers the verbatim text.
//!
//! No grammar is built here; the parser consumes the span ids.

use brash_types::{ControlKeyword, LineId, Provenance, SpanId, TokenKind};
use logos::Logos;

use crate::arena::{ArenaResult, SourceArena};

/// Lexemes of one physical line.
///
/// Keywords are literal tokens, which logos prefers over the `Word` regex
/// at equal length.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t]+")]
enum Lexeme {
    #[token("break")]
    Break,

    #[token("continue")]
    Continue,

    #[token("return")]
    Return,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("&&")]
    #[token("||")]
    #[token(";;")]
    #[token(";")]
    #[token("|")]
    #[token("&")]
    #[token("(")]
    #[token(")")]
    Operator,

    #[token("&>")]
    #[regex(r"[0-9]*(>>|>&|<&|<<-|<<|>|<)")]
    Redirect,

    #[regex(r"'[^']*'")]
    #[regex(r#""([^"\\]|\\.)*""#)]
    Quoted,

    /// A single-quoted string still open at end of line.
    #[regex(r"'[^']*")]
    OpenSingle,

    /// A double-quoted string still open at end of line.
    #[regex(r#""([^"\\]|\\.)*"#)]
    OpenDouble,

    #[regex(r"#[^\n]*")]
    Comment,

    #[token("\n")]
    Newline,

    #[regex(r#"[^\s'"|&;<>(){}#][^\s'"|&;<>(){}]*"#)]
    Word,
}

impl Lexeme {
    fn kind(self) -> TokenKind {
        match self {
            Lexeme::Break => TokenKind::ControlFlow(ControlKeyword::Break),
            Lexeme::Continue => TokenKind::ControlFlow(ControlKeyword::Continue),
            Lexeme::Return => TokenKind::ControlFlow(ControlKeyword::Return),
            Lexeme::LBrace => TokenKind::LBrace,
            Lexeme::RBrace => TokenKind::RBrace,
            Lexeme::Operator => TokenKind::Operator,
            Lexeme::Redirect => TokenKind::Redirect,
            Lexeme::Quoted => TokenKind::Quoted,
            Lexeme::OpenSingle | Lexeme::OpenDouble => TokenKind::QuotedPart,
            Lexeme::Comment => TokenKind::Comment,
            Lexeme::Newline => TokenKind::Newline,
            Lexeme::Word => TokenKind::Word,
        }
    }
}

/// One lexed physical line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexedLine {
    pub line_id: LineId,
    pub tokens: Vec<SpanId>,
}

/// Stateful lexer over a sequence of physical lines.
#[derive(Debug, Default)]
pub struct LineLexer {
    /// Quote character of a string left open by the previous line.
    open_quote: Option<char>,
}

impl LineLexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a quoted string is open across lines (PS2 territory).
    pub fn in_quote(&self) -> bool {
        self.open_quote.is_some()
    }

    /// Register `text` as the next physical line and lex it.
    ///
    /// The line is tagged with the arena's innermost open source.
    pub fn feed_line(
        &mut self,
        arena: &mut SourceArena,
        text: &str,
        line_number: u32,
    ) -> ArenaResult<LexedLine> {
        let line_id = arena.add_line(text, line_number)?;
        let mut tokens = Vec::new();
        let mut offset = 0usize;

        if let Some(quote) = self.open_quote {
            match find_closing_quote(text, quote) {
                Some(end) => {
                    let part = new_token(arena, TokenKind::QuotedPart, line_id, text, 0, end + 1)?;
                    tokens.push(part);
                    self.open_quote = None;
                    offset = end + 1;
                }
                None => {
                    let part =
                        new_token(arena, TokenKind::QuotedPart, line_id, text, 0, text.len())?;
                    tokens.push(part);
                    return Ok(LexedLine { line_id, tokens });
                }
            }
        }

        let rest = &text[offset..];
        let mut lex = Lexeme::lexer(rest);
        while let Some(result) = lex.next() {
            let span = lex.span();
            let (start, end) = (offset + span.start, offset + span.end);
            let kind = match result {
                Ok(lexeme) => {
                    match lexeme {
                        Lexeme::OpenSingle => self.open_quote = Some('\''),
                        Lexeme::OpenDouble => self.open_quote = Some('"'),
                        _ => {}
                    }
                    lexeme.kind()
                }
                Err(()) => TokenKind::Unknown,
            };
            tokens.push(new_token(arena, kind, line_id, text, start, end)?);
        }

        tracing::trace!(line = %line_id, tokens = tokens.len(), "lexed line");
        Ok(LexedLine { line_id, tokens })
    }

    /// Lex a whole source under `provenance`, splitting it into physical
    /// lines that keep their trailing newline.
    pub fn lex_source(
        &mut self,
        arena: &mut SourceArena,
        provenance: Provenance,
        source: &str,
    ) -> ArenaResult<Vec<LexedLine>> {
        let mut guard = arena.push_source(provenance);
        source
            .split_inclusive('\n')
            .zip(1u32..)
            .map(|(line, number)| self.feed_line(&mut guard, line, number))
            .collect()
    }
}

fn new_token(
    arena: &mut SourceArena,
    kind: TokenKind,
    line_id: LineId,
    text: &str,
    start: usize,
    end: usize,
) -> ArenaResult<SpanId> {
    arena.new_token_id(kind, start as u32, (end - start) as u32, line_id, &text[start..end])
}

/// Byte index of the quote that closes a string continued from a previous line.
fn find_closing_quote(text: &str, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if quote == '"' && escaped {
            escaped = false;
            continue;
        }
        if quote == '"' && ch == '\\' {
            escaped = true;
        } else if ch == quote {
            return Some(idx);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> (SourceArena, Vec<LexedLine>) {
        let mut arena = SourceArena::new();
        let lines = LineLexer::new()
            .lex_source(&mut arena, Provenance::Synthetic { label: "test".into() }, source)
            .unwrap();
        (arena, lines)
    }

    fn kinds(arena: &SourceArena, line: &LexedLine) -> Vec<(TokenKind, String)> {
        line.tokens
            .iter()
            .map(|&id| {
                let tok = arena.get_token(id).unwrap();
                (tok.kind, tok.text.clone())
            })
            .collect()
    }

    #[test]
    fn lexes_words_operators_and_keywords() {
        let (arena, lines) = lex("for i in 1 2; do break 2; done\n");
        let toks = kinds(&arena, &lines[0]);
        assert_eq!(toks[0], (TokenKind::Word, "for".into()));
        assert!(toks.contains(&(TokenKind::ControlFlow(ControlKeyword::Break), "break".into())));
        assert!(toks.contains(&(TokenKind::Operator, ";".into())));
        assert_eq!(toks.last(), Some(&(TokenKind::Newline, "\n".into())));
    }

    #[test]
    fn keyword_prefix_is_a_word() {
        let (arena, lines) = lex("breakfast\n");
        assert_eq!(kinds(&arena, &lines[0])[0], (TokenKind::Word, "breakfast".into()));
    }

    #[test]
    fn columns_match_line_offsets() {
        let (arena, lines) = lex("  echo  hi\n");
        let tok = arena.get_token(lines[0].tokens[1]).unwrap();
        assert_eq!((tok.col, tok.length), (8, 2));
        assert_eq!(&arena.get_line(tok.line_id).unwrap()[8..10], "hi");
    }

    #[test]
    fn redirects_and_comments() {
        let (arena, lines) = lex("cat 2>err.txt >> out # trailing\n");
        let toks = kinds(&arena, &lines[0]);
        assert_eq!(toks[1], (TokenKind::Redirect, "2>".into()));
        assert_eq!(toks[3], (TokenKind::Redirect, ">>".into()));
        assert_eq!(toks[5], (TokenKind::Comment, "# trailing".into()));
    }

    #[test]
    fn multi_line_single_quote_is_snippable() {
        let (arena, lines) = lex("myalias '1\n    2\n    3'\n");
        let first = *lines[0].tokens.last().unwrap();
        assert_eq!(arena.get_token(first).unwrap().kind, TokenKind::QuotedPart);
        let last = lines[2].tokens[0];
        assert_eq!(arena.get_token(last).unwrap().text, "    3'");

        let snippet = arena.snip_code_string(first, last).unwrap();
        assert_eq!(snippet, "'1\n    2\n    3'");
    }

    #[test]
    fn open_quote_state_tracks_lines() {
        let mut arena = SourceArena::new();
        let mut guard = arena.push_source(Provenance::Interactive);
        let mut lexer = LineLexer::new();
        lexer.feed_line(&mut guard, "echo \"a\n", 1).unwrap();
        assert!(lexer.in_quote());
        lexer.feed_line(&mut guard, "b\\\" c\" d\n", 2).unwrap();
        assert!(!lexer.in_quote());
    }

    #[test]
    fn braces_are_their_own_tokens() {
        let (arena, lines) = lex("f() { echo; }\n");
        let toks = kinds(&arena, &lines[0]);
        assert!(toks.contains(&(TokenKind::LBrace, "{".into())));
        assert!(toks.contains(&(TokenKind::RBrace, "}".into())));
    }
}
