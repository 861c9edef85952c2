//! The error taxonomy, one variant family per pipeline stage. Static stages
//! accumulate these into a `Vec` and keep going as far as safely possible;
//! only the Runtime recovers `HandlerError`s locally via retry.

use thiserror::Error;

use crate::position::Position;

#[derive(Debug, Error)]
pub enum LexError {
    #[error("{pos}: malformed token `{text}`")]
    MalformedToken { pos: Position, text: String },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{pos}: unexpected token `{found}`, expected {expected}")]
    UnexpectedToken {
        pos: Position,
        found: String,
        expected: String,
    },
    #[error("{pos}: missing delimiter `{delim}`")]
    MissingDelimiter { pos: Position, delim: String },
    #[error("{pos}: malformed clause: {reason}")]
    MalformedClause { pos: Position, reason: String },
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("{pos}: unknown alias `{alias}`")]
    UnknownAlias { pos: Position, alias: String },
    #[error("{pos}: duplicate alias `{alias}`")]
    DuplicateAlias { pos: Position, alias: String },
    #[error("{pos}: duplicate resource declaration for `{key}`")]
    DuplicateResource { pos: Position, key: String },
    #[error("{pos}: duplicate policy `{name}`")]
    DuplicatePolicy { pos: Position, name: String },
    #[error("{pos}: ensure statement has no subject and none was inherited")]
    MissingImplicitSubject { pos: Position },
    #[error("{pos}: unknown policy `{name}`")]
    UnknownPolicy { pos: Position, name: String },
    #[error("{pos}: apply `{name}` passes {got} argument(s), policy declares {expected}")]
    ArgCountMismatch {
        pos: Position,
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("{pos}: for-each over non-enumerable container")]
    NonEnumerableForEach { pos: Position },
}

#[derive(Debug, Error)]
pub enum ImplyError {
    #[error("{pos}: condition `{condition}` is not applicable to resource type `{res_type}`")]
    TypeMismatch {
        pos: Position,
        condition: String,
        res_type: String,
    },
    #[error("conflicting conditions `{a_cond}` ({a_pos}) and `{b_cond}` ({b_pos}) on the same subject")]
    Conflict {
        a_cond: String,
        a_pos: Position,
        b_cond: String,
        b_pos: Position,
    },
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unresolved dependency reference `{reference}` from `{from}`")]
    UnresolvedDependency { from: String, reference: String },
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Semantic categories a handler may report inside `HandlerResult::error`.
/// `Other` carries an arbitrary underlying OS/network failure message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("no subject bound for this guarantee")]
    NoSubject,
    #[error("missing required argument `{0}`")]
    MissingArgument(String),
    #[error("unknown condition `{0}`")]
    UnknownCondition(String),
    #[error("unsupported on this platform: {0}")]
    UnsupportedPlatform(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no handler registered under the name `{0}`")]
    HandlerLookupMiss(String),
    #[error("run cancelled")]
    Cancelled,
}

/// Top-level union so CLI-boundary code has one type to match on. Each
/// stage's public entry point returns its own `Vec<XError>`; this enum
/// exists for code that needs to report any stage's failure uniformly (e.g.
/// the CLI's exit-code logic).
#[derive(Debug, Error)]
pub enum EnsuraError {
    #[error("{0}")]
    Lex(#[from] LexError),
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Bind(#[from] BindError),
    #[error("{0}")]
    Imply(#[from] ImplyError),
    #[error("{0}")]
    Graph(#[from] GraphError),
    #[error("{0}")]
    Plan(#[from] PlanError),
    #[error("{0}")]
    Handler(#[from] HandlerError),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}
