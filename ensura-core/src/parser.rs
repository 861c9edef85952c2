//! Token stream → `Program`.
//!
//! Recursive-descent with two-token lookahead (current + peek). Errors are
//! collected rather than thrown, so a single pass can report every
//! diagnostic in the file. Comments are skipped here (the lexer already
//! retained them for tools that want them).

use crate::ast::*;
use crate::error::{LexError, ParseError};
use crate::lexer::Lexer;
use crate::position::Position;
use crate::token::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    cur: usize,
    pub errors: Vec<ParseError>,
    pub lex_errors: Vec<LexError>,
}

/// Keywords that may start a top-level statement; used both for dispatch
/// and for error recovery (skip tokens until one of these is seen again).
const STATEMENT_STARTERS: &[&str] = &[
    "resource", "ensure", "on", "policy", "apply", "for", "invariant", "assume", "parallel",
];

impl Parser {
    pub fn new(src: &str, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let (all_tokens, lex_errors) = Lexer::new(src, filename).tokenize();
        let tokens: Vec<Token> = all_tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Comment)
            .collect();
        Self {
            tokens,
            cur: 0,
            errors: Vec::new(),
            lex_errors,
        }
    }

    pub fn parse_program(&mut self) -> Program {
        let mut stmts = Vec::new();
        while !self.at_eof() {
            match self.parse_statement() {
                Some(stmt) => stmts.push(stmt),
                None => self.recover(),
            }
        }
        stmts
    }

    // ---------- token cursor helpers ----------

    fn at_eof(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn current(&self) -> &Token {
        &self.tokens[self.cur.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        let idx = (self.cur + 1).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.cur < self.tokens.len() - 1 {
            self.cur += 1;
        }
        tok
    }

    fn pos(&self) -> Position {
        self.current().pos.clone()
    }

    fn is_kw(&self, kw: &str) -> bool {
        self.current().is_keyword(kw)
    }

    fn peek_is_kw(&self, kw: &str) -> bool {
        self.peek().is_keyword(kw)
    }

    fn eat_kw(&mut self, kw: &str) -> Option<Token> {
        if self.is_kw(kw) {
            Some(self.advance())
        } else {
            self.errors.push(ParseError::UnexpectedToken {
                pos: self.pos(),
                found: self.current().text.clone(),
                expected: format!("`{kw}`"),
            });
            None
        }
    }

    fn eat_kind(&mut self, kind: TokenKind, what: &str) -> Option<Token> {
        if self.current().kind == kind {
            Some(self.advance())
        } else {
            self.errors.push(ParseError::UnexpectedToken {
                pos: self.pos(),
                found: self.current().text.clone(),
                expected: what.to_string(),
            });
            None
        }
    }

    fn eat_ident(&mut self) -> Option<Token> {
        self.eat_kind(TokenKind::Ident, "identifier")
    }

    fn eat_string(&mut self) -> Option<Token> {
        self.eat_kind(TokenKind::String, "string literal")
    }

    /// Error recovery: skip tokens until one that can start a statement, or
    /// EOF. A deliberately simple strategy that trades precise error counts
    /// for never getting stuck mid-file.
    fn recover(&mut self) {
        while !self.at_eof() {
            let is_starter = STATEMENT_STARTERS
                .iter()
                .any(|kw| self.current().is_keyword(kw));
            if is_starter {
                return;
            }
            self.advance();
        }
    }

    // ---------- statement dispatch ----------

    fn parse_statement(&mut self) -> Option<Statement> {
        if self.is_kw("resource") {
            self.parse_resource_decl().map(Statement::ResourceDecl)
        } else if self.is_kw("ensure") {
            self.parse_ensure_stmt().map(Statement::Ensure)
        } else if self.is_kw("on") {
            self.parse_on_dispatch()
        } else if self.is_kw("policy") {
            self.parse_policy_decl().map(Statement::Policy)
        } else if self.is_kw("apply") {
            self.parse_apply_stmt().map(Statement::Apply)
        } else if self.is_kw("for") {
            self.parse_for_each().map(Statement::ForEach)
        } else if self.is_kw("invariant") {
            self.parse_invariant().map(Statement::Invariant)
        } else if self.is_kw("assume") {
            self.parse_assume_stmt().map(Statement::Assume)
        } else if self.is_kw("parallel") {
            self.parse_parallel_block().map(Statement::Parallel)
        } else {
            self.errors.push(ParseError::UnexpectedToken {
                pos: self.pos(),
                found: self.current().text.clone(),
                expected: "a statement".to_string(),
            });
            None
        }
    }

    fn parse_block_body(&mut self) -> Vec<Statement> {
        let mut body = Vec::new();
        while !self.is_kw_or_kind(TokenKind::RBrace) && !self.at_eof() {
            match self.parse_statement() {
                Some(s) => body.push(s),
                None => self.recover(),
            }
            if self.current().kind == TokenKind::RBrace {
                break;
            }
        }
        body
    }

    fn is_kw_or_kind(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    // ---------- resource_decl ----------

    fn parse_resource_decl(&mut self) -> Option<ResourceDecl> {
        let start = self.pos();
        self.eat_kw("resource")?;
        let res_type = self.parse_res_type()?;
        let path_tok = self.eat_string()?;
        let alias = if self.is_kw("as") {
            self.advance();
            Some(self.eat_ident()?.text)
        } else {
            None
        };
        Some(ResourceDecl {
            res_type,
            path: path_tok.text,
            alias,
            pos: start,
        })
    }

    fn parse_res_type(&mut self) -> Option<ResourceType> {
        let tok = self.current().clone();
        if let Some(rt) = ResourceType::parse(&tok.text) {
            self.advance();
            Some(rt)
        } else {
            self.errors.push(ParseError::UnexpectedToken {
                pos: self.pos(),
                found: tok.text,
                expected: "a resource type".to_string(),
            });
            None
        }
    }

    /// `res_ref = res_type STRING | IDENT STRING | IDENT`
    fn parse_res_ref(&mut self) -> Option<ResourceRef> {
        let tok = self.current().clone();
        if let Some(rt) = ResourceType::parse(&tok.text) {
            self.advance();
            let path = self.eat_string()?;
            return Some(ResourceRef::Inline {
                res_type: rt,
                path: path.text,
            });
        }
        if tok.kind == TokenKind::Ident {
            self.advance();
            if self.current().kind == TokenKind::String {
                let path = self.advance();
                // IDENT STRING: treated as a resource-type/path pair where
                // IDENT names a type-like keyword not in the closed set is
                // disallowed; but the grammar explicitly allows a bare
                // IDENT followed by STRING, so we preserve the identifier as
                // the "type" token text in a generic inline ref by re-using
                // whatever resource type it lexically matches, else this is
                // a binder-time error surfaced as an unknown alias on use.
                return Some(ResourceRef::Inline {
                    res_type: ResourceType::parse(&tok.text).unwrap_or(ResourceType::File),
                    path: path.text,
                });
            }
            return Some(ResourceRef::Alias(tok.text));
        }
        self.errors.push(ParseError::UnexpectedToken {
            pos: self.pos(),
            found: tok.text,
            expected: "a resource reference".to_string(),
        });
        None
    }

    // ---------- ensure_stmt ----------

    fn parse_ensure_stmt(&mut self) -> Option<EnsureStmt> {
        let start = self.pos();
        self.eat_kw("ensure")?;
        let cond = self.eat_ident()?;
        let mut stmt = EnsureStmt::new(cond.text, start);

        loop {
            if self.is_kw("on") && self.peek_is_kw("violation") {
                // let the post-loop lookahead handle the violation handler
                break;
            } else if self.is_kw("on") {
                self.advance();
                stmt.subject = self.parse_res_ref();
            } else if self.is_kw("with") {
                self.advance();
                stmt.handler = self.parse_handler_spec();
            } else if self.is_kw("when") {
                self.advance();
                stmt.guard = self.parse_guard_expr();
            } else if self.is_kw("requires") {
                self.advance();
                if let Some(id) = self.eat_ident() {
                    stmt.requires.push(id.text);
                }
            } else if self.is_kw("after") {
                self.advance();
                if let Some(r) = self.parse_res_ref() {
                    stmt.after.push(r);
                }
            } else if self.is_kw("before") {
                self.advance();
                if let Some(r) = self.parse_res_ref() {
                    stmt.before.push(r);
                }
            } else {
                break;
            }
        }

        // single lookahead on `on violation`, no backtracking
        if self.is_kw("on") && self.peek_is_kw("violation") {
            self.advance(); // on
            self.advance(); // violation
            stmt.violation = self.parse_violation_body();
        }

        Some(stmt)
    }

    fn parse_guard_expr(&mut self) -> Option<GuardExpr> {
        let left = self.eat_ident()?;
        let op = if self.current().kind == TokenKind::EqEq {
            self.advance();
            GuardOp::Eq
        } else if self.current().kind == TokenKind::NotEq {
            self.advance();
            GuardOp::NotEq
        } else {
            self.errors.push(ParseError::UnexpectedToken {
                pos: self.pos(),
                found: self.current().text.clone(),
                expected: "`==` or `!=`".to_string(),
            });
            return None;
        };
        let right = self.eat_string()?;
        Some(GuardExpr {
            left: left.text,
            op,
            right: right.text,
        })
    }

    /// `handler_spec = IDENT (":" (NUMBER|IDENT))? (IDENT (STRING|IDENT))*`
    fn parse_handler_spec(&mut self) -> Option<HandlerSpec> {
        let name_tok = self.eat_ident()?;
        let mut name = name_tok.text;
        if self.current().kind == TokenKind::Colon {
            self.advance();
            let suffix = match self.current().kind {
                TokenKind::Number | TokenKind::Ident => self.advance().text,
                _ => {
                    self.errors.push(ParseError::UnexpectedToken {
                        pos: self.pos(),
                        found: self.current().text.clone(),
                        expected: "a number or identifier after `:`".to_string(),
                    });
                    return None;
                }
            };
            name = format!("{name}:{suffix}");
        }

        let mut args = std::collections::BTreeMap::new();
        loop {
            let key_ok = self.current().kind == TokenKind::Ident
                || self.is_kw("key")
                || self.is_kw("mode");
            if !key_ok {
                break;
            }
            // A bare clause keyword (on/with/when/requires/after/before/on-violation)
            // must not be swallowed as a handler arg key.
            if self.is_clause_keyword() {
                break;
            }
            let key = self.advance().text;
            let value = match self.current().kind {
                TokenKind::String | TokenKind::Ident => self.advance().text,
                _ => {
                    self.errors.push(ParseError::UnexpectedToken {
                        pos: self.pos(),
                        found: self.current().text.clone(),
                        expected: "a string or identifier value".to_string(),
                    });
                    break;
                }
            };
            args.insert(key, value);
        }

        Some(HandlerSpec { name, args })
    }

    fn is_clause_keyword(&self) -> bool {
        ["on", "with", "when", "requires", "after", "before"]
            .iter()
            .any(|kw| self.current().is_keyword(kw))
    }

    fn parse_violation_body(&mut self) -> Option<ViolationHandler> {
        self.eat_kind(TokenKind::LBrace, "`{`")?;
        let mut handler = ViolationHandler::default();
        while self.current().kind != TokenKind::RBrace && !self.at_eof() {
            if self.is_kw("retry") {
                self.advance();
                if let Some(n) = self.eat_kind(TokenKind::Number, "a number") {
                    handler.retry_count = n.text.parse().ok();
                }
            } else if self.is_kw("notify") {
                self.advance();
                if let Some(s) = self.eat_string() {
                    handler.notify.push(s.text);
                }
            } else {
                self.errors.push(ParseError::MalformedClause {
                    pos: self.pos(),
                    reason: "expected `retry` or `notify` inside `on violation`".to_string(),
                });
                self.advance();
            }
        }
        self.eat_kind(TokenKind::RBrace, "`}`")?;
        Some(handler)
    }

    // ---------- on (OnBlock vs OnViolationBlock) ----------

    fn parse_on_dispatch(&mut self) -> Option<Statement> {
        if self.peek_is_kw("violation") {
            let start = self.pos();
            self.advance(); // on
            self.advance(); // violation
            let handler = self.parse_violation_body()?;
            return Some(Statement::OnViolation(OnViolationBlock { handler, pos: start }));
        }
        let start = self.pos();
        self.advance(); // on
        let subject = self.parse_res_ref()?;
        self.eat_kind(TokenKind::LBrace, "`{`")?;
        let body = self.parse_block_body();
        self.eat_kind(TokenKind::RBrace, "`}`")?;
        Some(Statement::On(OnBlock { subject, body, pos: start }))
    }

    // ---------- policy_decl / apply_stmt ----------

    fn parse_policy_decl(&mut self) -> Option<PolicyDecl> {
        let start = self.pos();
        self.eat_kw("policy")?;
        let name = self.eat_ident()?.text;
        let mut params = Vec::new();
        if self.current().kind == TokenKind::LParen {
            self.advance();
            if self.current().kind != TokenKind::RParen {
                loop {
                    params.push(self.eat_ident()?.text);
                    if self.current().kind == TokenKind::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.eat_kind(TokenKind::RParen, "`)`")?;
        }
        self.eat_kind(TokenKind::LBrace, "`{`")?;
        let body = self.parse_block_body();
        self.eat_kind(TokenKind::RBrace, "`}`")?;
        Some(PolicyDecl { name, params, body, pos: start })
    }

    fn parse_apply_stmt(&mut self) -> Option<ApplyStmt> {
        let start = self.pos();
        self.eat_kw("apply")?;
        let name = self.eat_ident()?.text;
        let mut args = Vec::new();
        if self.current().kind == TokenKind::LParen {
            self.advance();
            if self.current().kind != TokenKind::RParen {
                loop {
                    args.push(self.eat_string()?.text);
                    if self.current().kind == TokenKind::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.eat_kind(TokenKind::RParen, "`)`")?;
        }
        Some(ApplyStmt { name, args, pos: start })
    }

    // ---------- for_each ----------

    fn parse_for_each(&mut self) -> Option<ForEachStmt> {
        let start = self.pos();
        self.eat_kw("for")?;
        self.eat_kw("each")?;
        let item_type = self.parse_res_type()?;
        self.eat_kw("in")?;
        let container = self.parse_res_ref()?;
        self.eat_kind(TokenKind::LBrace, "`{`")?;
        let body = self.parse_block_body();
        self.eat_kind(TokenKind::RBrace, "`}`")?;
        Some(ForEachStmt { item_type, container, body, pos: start })
    }

    // ---------- invariant ----------

    fn parse_invariant(&mut self) -> Option<InvariantBlock> {
        let start = self.pos();
        self.eat_kw("invariant")?;
        self.eat_kind(TokenKind::LBrace, "`{`")?;
        let body = self.parse_block_body();
        self.eat_kind(TokenKind::RBrace, "`}`")?;
        Some(InvariantBlock { body, pos: start })
    }

    // ---------- assume ----------

    fn parse_assume_stmt(&mut self) -> Option<AssumeStmt> {
        self.eat_kw("assume")?;
        let first = self.eat_ident()?;
        if self.current().kind == TokenKind::EqEq || self.current().kind == TokenKind::NotEq {
            let op = if self.advance().kind == TokenKind::EqEq {
                GuardOp::Eq
            } else {
                GuardOp::NotEq
            };
            let right = self.eat_string()?;
            return Some(AssumeStmt::Guard(GuardExpr {
                left: first.text,
                op,
                right: right.text,
            }));
        }
        let mut idents = vec![first.text];
        while self.current().kind == TokenKind::Ident {
            idents.push(self.advance().text);
        }
        Some(AssumeStmt::Simple(idents))
    }

    // ---------- parallel ----------

    fn parse_parallel_block(&mut self) -> Option<ParallelBlock> {
        let start = self.pos();
        self.eat_kw("parallel")?;
        self.eat_kind(TokenKind::LBrace, "`{`")?;
        let body = self.parse_block_body();
        self.eat_kind(TokenKind::RBrace, "`}`")?;
        Some(ParallelBlock { body, pos: start })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let mut p = Parser::new(src, "t.ens");
        let prog = p.parse_program();
        assert!(p.errors.is_empty(), "unexpected parse errors: {:?}", p.errors);
        prog
    }

    #[test]
    fn parses_resource_decl_with_alias() {
        let prog = parse_ok(r#"resource file "secrets.db" as secrets"#);
        match &prog[0] {
            Statement::ResourceDecl(d) => {
                assert_eq!(d.res_type, ResourceType::File);
                assert_eq!(d.path, "secrets.db");
                assert_eq!(d.alias.as_deref(), Some("secrets"));
            }
            other => panic!("expected ResourceDecl, got {other:?}"),
        }
    }

    #[test]
    fn parses_on_block_with_ensure_and_handler() {
        let prog = parse_ok(r#"on file "s.db" { ensure encrypted with AES:256 key "env:K" }"#);
        match &prog[0] {
            Statement::On(b) => {
                assert_eq!(b.body.len(), 1);
                match &b.body[0] {
                    Statement::Ensure(e) => {
                        assert_eq!(e.condition, "encrypted");
                        let h = e.handler.as_ref().unwrap();
                        assert_eq!(h.name, "AES:256");
                        assert_eq!(h.args.get("key"), Some(&"env:K".to_string()));
                    }
                    other => panic!("expected Ensure, got {other:?}"),
                }
            }
            other => panic!("expected On, got {other:?}"),
        }
    }

    #[test]
    fn disambiguates_on_violation_from_on_block() {
        let prog = parse_ok(r#"on violation { retry 5 notify "ops@example.com" }"#);
        match &prog[0] {
            Statement::OnViolation(v) => {
                assert_eq!(v.handler.retry_count, Some(5));
                assert_eq!(v.handler.notify, vec!["ops@example.com".to_string()]);
            }
            other => panic!("expected OnViolation, got {other:?}"),
        }
    }

    #[test]
    fn parses_ensure_with_all_clauses_in_any_order() {
        let prog = parse_ok(
            r#"ensure exists on file "a" before file "b" after file "c" requires readable when mode == "strict""#,
        );
        match &prog[0] {
            Statement::Ensure(e) => {
                assert!(e.subject.is_some());
                assert_eq!(e.before.len(), 1);
                assert_eq!(e.after.len(), 1);
                assert_eq!(e.requires, vec!["readable".to_string()]);
                assert!(e.guard.is_some());
            }
            other => panic!("expected Ensure, got {other:?}"),
        }
    }

    #[test]
    fn parses_policy_and_apply() {
        let prog = parse_ok(
            r#"policy secure(k){ ensure encrypted with AES:256 key k }
               on file "x" { apply secure("env:KK") }"#,
        );
        match &prog[0] {
            Statement::Policy(p) => {
                assert_eq!(p.name, "secure");
                assert_eq!(p.params, vec!["k".to_string()]);
            }
            other => panic!("expected Policy, got {other:?}"),
        }
        match &prog[1] {
            Statement::On(b) => match &b.body[0] {
                Statement::Apply(a) => {
                    assert_eq!(a.name, "secure");
                    assert_eq!(a.args, vec!["env:KK".to_string()]);
                }
                other => panic!("expected Apply, got {other:?}"),
            },
            other => panic!("expected On, got {other:?}"),
        }
    }

    #[test]
    fn recovers_after_malformed_ensure_clause() {
        let mut p = Parser::new(
            r#"ensure exists on file "a" ===
               ensure readable on file "a""#,
            "t.ens",
        );
        let prog = p.parse_program();
        assert!(!p.errors.is_empty());
        assert_eq!(prog.len(), 2);
    }

    #[test]
    fn parses_for_each_and_invariant_and_parallel() {
        let prog = parse_ok(
            r#"resource directory "d" as dirref
               for each file in dirref { ensure readable }
               invariant { ensure exists on file "x" }
               parallel { ensure exists on file "y" }"#,
        );
        assert!(matches!(prog[1], Statement::ForEach(_)));
        assert!(matches!(prog[2], Statement::Invariant(_)));
        assert!(matches!(prog[3], Statement::Parallel(_)));
    }
}
