//! EnsuraScript: a declarative language and continuous enforcement runtime
//! for system-state invariants. This crate is the library half — lexer
//! through planner as a pure compilation pipeline, plus the handler
//! catalogue and enforcement loop that execute a compiled [`Plan`].
//!
//! `ensura-cli` is a thin binary wrapper around the functions here.

pub mod ast;
pub mod binder;
pub mod compile;
pub mod config;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod imply;
pub mod lexer;
pub mod parser;
pub mod plan;
pub mod planner;
pub mod position;
pub mod registry;
pub mod runtime;
pub mod token;

pub use compile::{compile, CompileError};
pub use plan::{Plan, Step};
pub use runtime::{CancelToken, RunResult, Runtime, StepResult, StepStatus};
