//! The statement tree produced by the parser.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResourceType {
    File,
    Directory,
    Http,
    Database,
    Service,
    Process,
    Cron,
}

impl ResourceType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "file" => Self::File,
            "directory" => Self::Directory,
            "http" => Self::Http,
            "database" => Self::Database,
            "service" => Self::Service,
            "process" => Self::Process,
            "cron" => Self::Cron,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Http => "http",
            Self::Database => "database",
            Self::Service => "service",
            Self::Process => "process",
            Self::Cron => "cron",
        }
    }
}

/// Either an inline `(type, path)` or a named reference resolved through the
/// alias table. Two refs are equal iff they normalize to the same
/// `type:path`, or resolve through the alias table to the same declaration
/// (normalization/resolution is the binder's job; this type only carries the
/// syntax).
#[derive(Debug, Clone, Serialize)]
pub enum ResourceRef {
    Inline { res_type: ResourceType, path: String },
    Alias(String),
}

impl ResourceRef {
    /// Canonical `type:path` key, once the binder has resolved an alias to
    /// its declaration. Inline refs are canonical immediately.
    pub fn canonical_key(&self, resolved_inline: Option<(ResourceType, &str)>) -> Option<String> {
        match self {
            ResourceRef::Inline { res_type, path } => Some(format!("{}:{}", res_type.as_str(), path)),
            ResourceRef::Alias(_) => resolved_inline.map(|(t, p)| format!("{}:{}", t.as_str(), p)),
        }
    }
}

/// `(name, args)` where `name` may contain `:` (e.g. `AES:256`). Values are
/// literal strings at parse time; policy expansion may later substitute a
/// parameter name for the caller's argument string.
#[derive(Debug, Clone, Serialize, Default)]
pub struct HandlerSpec {
    pub name: String,
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuardOp {
    Eq,
    NotEq,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardExpr {
    pub left: String,
    pub op: GuardOp,
    pub right: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ViolationHandler {
    pub retry_count: Option<u32>,
    pub notify: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnsureStmt {
    pub condition: String,
    pub subject: Option<ResourceRef>,
    pub handler: Option<HandlerSpec>,
    pub guard: Option<GuardExpr>,
    pub requires: Vec<String>,
    pub after: Vec<ResourceRef>,
    pub before: Vec<ResourceRef>,
    pub violation: Option<ViolationHandler>,
    pub is_implied: bool,
    pub pos: Position,
}

impl EnsureStmt {
    pub fn new(condition: String, pos: Position) -> Self {
        Self {
            condition,
            subject: None,
            handler: None,
            guard: None,
            requires: Vec::new(),
            after: Vec::new(),
            before: Vec::new(),
            violation: None,
            is_implied: false,
            pos,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceDecl {
    pub res_type: ResourceType,
    pub path: String,
    pub alias: Option<String>,
    pub pos: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
    pub pos: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyStmt {
    pub name: String,
    pub args: Vec<String>,
    pub pos: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnBlock {
    pub subject: ResourceRef,
    pub body: Vec<Statement>,
    pub pos: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForEachStmt {
    pub item_type: ResourceType,
    pub container: ResourceRef,
    pub body: Vec<Statement>,
    pub pos: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvariantBlock {
    pub body: Vec<Statement>,
    pub pos: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnViolationBlock {
    pub handler: ViolationHandler,
    pub pos: Position,
}

#[derive(Debug, Clone, Serialize)]
pub enum AssumeStmt {
    Guard(GuardExpr),
    Simple(Vec<String>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ParallelBlock {
    pub body: Vec<Statement>,
    pub pos: Position,
}

#[derive(Debug, Clone, Serialize)]
pub enum Statement {
    ResourceDecl(ResourceDecl),
    Ensure(EnsureStmt),
    On(OnBlock),
    Policy(PolicyDecl),
    Apply(ApplyStmt),
    ForEach(ForEachStmt),
    Invariant(InvariantBlock),
    OnViolation(OnViolationBlock),
    Assume(AssumeStmt),
    Parallel(ParallelBlock),
}

pub type Program = Vec<Statement>;
