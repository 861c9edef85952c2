//! UTF-8 source → token stream.
//!
//! Whitespace is skipped. `#` starts a comment that runs to end of line; a
//! `COMMENT` token is still emitted so tools that want it (formatters, the
//! out-of-scope LSP) can retrieve it, but the parser discards it.

use crate::error::LexError;
use crate::position::Position;
use crate::token::{keyword_lookup, Token, TokenKind};

pub struct Lexer<'a> {
    src: &'a [u8],
    filename: String,
    offset: usize,
    line: usize,
    column: usize,
    pub errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, filename: impl Into<String>) -> Self {
        Self {
            src: src.as_bytes(),
            filename: filename.into(),
            offset: 0,
            line: 1,
            column: 1,
            errors: Vec::new(),
        }
    }

    /// Tokenize the whole input, terminating in `Eof`.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<LexError>) {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok);
            if done {
                break;
            }
        }
        (out, self.errors)
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.offset += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn pos(&self) -> Position {
        Position {
            filename: self.filename.clone(),
            line: self.line,
            column: self.column,
            byte_offset: self.offset,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_byte() {
            if b == b' ' || b == b'\t' || b == b'\r' || b == b'\n' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn is_ident_start(b: u8) -> bool {
        b.is_ascii_alphabetic() || b == b'_'
    }

    fn is_ident_continue(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        let start = self.pos();

        let Some(b) = self.peek_byte() else {
            return Token {
                kind: TokenKind::Eof,
                text: String::new(),
                pos: start,
            };
        };

        match b {
            b'#' => self.read_comment(start),
            b'"' => self.read_string(start),
            b'0'..=b'9' => self.read_number(start),
            b'{' => self.single(start, TokenKind::LBrace, "{"),
            b'}' => self.single(start, TokenKind::RBrace, "}"),
            b'(' => self.single(start, TokenKind::LParen, "("),
            b')' => self.single(start, TokenKind::RParen, ")"),
            b',' => self.single(start, TokenKind::Comma, ","),
            b':' => self.single(start, TokenKind::Colon, ":"),
            b'=' => self.read_eq(start),
            b'!' => self.read_bang(start),
            _ if Self::is_ident_start(b) => self.read_ident(start),
            _ => {
                self.advance();
                let text = (b as char).to_string();
                self.errors.push(LexError::MalformedToken {
                    pos: start.clone(),
                    text: text.clone(),
                });
                Token {
                    kind: TokenKind::Illegal,
                    text,
                    pos: start,
                }
            }
        }
    }

    fn single(&mut self, start: Position, kind: TokenKind, text: &str) -> Token {
        self.advance();
        Token {
            kind,
            text: text.to_string(),
            pos: start,
        }
    }

    fn read_comment(&mut self, start: Position) -> Token {
        let from = self.offset;
        while let Some(b) = self.peek_byte() {
            if b == b'\n' {
                break;
            }
            self.advance();
        }
        let text = String::from_utf8_lossy(&self.src[from..self.offset]).into_owned();
        Token {
            kind: TokenKind::Comment,
            text,
            pos: start,
        }
    }

    fn read_string(&mut self, start: Position) -> Token {
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek_byte() {
                None => break, // unterminated: return what we have, parser surfaces the defect
                Some(b'"') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    // escape-skip semantics: consume exactly one more byte, no translation
                    if let Some(b) = self.advance() {
                        text.push(b as char);
                    }
                }
                Some(b) => {
                    self.advance();
                    text.push(b as char);
                }
            }
        }
        Token {
            kind: TokenKind::String,
            text,
            pos: start,
        }
    }

    fn read_number(&mut self, start: Position) -> Token {
        let from = self.offset;
        while matches!(self.peek_byte(), Some(b'0'..=b'9')) {
            self.advance();
        }
        let text = String::from_utf8_lossy(&self.src[from..self.offset]).into_owned();
        Token {
            kind: TokenKind::Number,
            text,
            pos: start,
        }
    }

    fn read_eq(&mut self, start: Position) -> Token {
        self.advance();
        if self.peek_byte() == Some(b'=') {
            self.advance();
            Token {
                kind: TokenKind::EqEq,
                text: "==".to_string(),
                pos: start,
            }
        } else {
            self.errors.push(LexError::MalformedToken {
                pos: start.clone(),
                text: "=".to_string(),
            });
            Token {
                kind: TokenKind::Illegal,
                text: "=".to_string(),
                pos: start,
            }
        }
    }

    fn read_bang(&mut self, start: Position) -> Token {
        self.advance();
        if self.peek_byte() == Some(b'=') {
            self.advance();
            Token {
                kind: TokenKind::NotEq,
                text: "!=".to_string(),
                pos: start,
            }
        } else {
            self.errors.push(LexError::MalformedToken {
                pos: start.clone(),
                text: "!".to_string(),
            });
            Token {
                kind: TokenKind::Illegal,
                text: "!".to_string(),
                pos: start,
            }
        }
    }

    fn read_ident(&mut self, start: Position) -> Token {
        let from = self.offset;
        while let Some(b) = self.peek_byte() {
            if Self::is_ident_continue(b) {
                self.advance();
            } else {
                break;
            }
        }
        let text = String::from_utf8_lossy(&self.src[from..self.offset]).into_owned();
        let kind = match keyword_lookup(&text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident,
        };
        Token { kind, text, pos: start }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (toks, _) = Lexer::new(src, "test.ens").tokenize();
        toks.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_ensure_statement() {
        let (toks, errs) = Lexer::new(
            r#"ensure encrypted on file "s.db" with AES:256 key "env:K""#,
            "test.ens",
        )
        .tokenize();
        assert!(errs.is_empty());
        assert_eq!(toks[0].kind, TokenKind::Keyword("ensure"));
        assert_eq!(toks[1].kind, TokenKind::Ident);
        assert_eq!(toks[1].text, "encrypted");
        assert_eq!(toks[2].kind, TokenKind::Keyword("on"));
        assert_eq!(toks[3].kind, TokenKind::Keyword("file"));
        assert_eq!(toks[4].kind, TokenKind::String);
        assert_eq!(toks[4].text, "s.db");
    }

    #[test]
    fn identifier_allows_dots() {
        let toks = kinds("fs.native");
        assert_eq!(toks, vec![TokenKind::Ident, TokenKind::Eof]);
    }

    #[test]
    fn bare_equals_is_illegal() {
        let (toks, errs) = Lexer::new("a = b", "t.ens").tokenize();
        assert_eq!(errs.len(), 1);
        assert!(toks.iter().any(|t| t.kind == TokenKind::Illegal));
    }

    #[test]
    fn comment_runs_to_eol() {
        let (toks, _) = Lexer::new("ensure exists # a comment\nensure readable", "t.ens").tokenize();
        assert!(toks.iter().any(|t| t.kind == TokenKind::Comment));
        assert_eq!(
            toks.iter().filter(|t| t.kind == TokenKind::Keyword("ensure")).count(),
            2
        );
    }

    #[test]
    fn unterminated_string_yields_partial_text() {
        let (toks, _) = Lexer::new(r#""abc"#, "t.ens").tokenize();
        assert_eq!(toks[0].kind, TokenKind::String);
        assert_eq!(toks[0].text, "abc");
    }

    #[test]
    fn colon_is_its_own_token() {
        let toks = kinds("AES:256");
        assert_eq!(
            toks,
            vec![TokenKind::Ident, TokenKind::Colon, TokenKind::Number, TokenKind::Eof]
        );
    }

    #[test]
    fn line_and_column_track_newlines() {
        let (toks, _) = Lexer::new("ensure\nexists", "t.ens").tokenize();
        assert_eq!(toks[0].pos.line, 1);
        assert_eq!(toks[1].pos.line, 2);
        assert_eq!(toks[1].pos.column, 1);
    }
}
