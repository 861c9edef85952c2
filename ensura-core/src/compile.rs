//! Chains the seven static stages into a `Plan`. A stage with errors
//! prevents the next stage from running — each variant of [`CompileError`]
//! carries exactly the errors its stage produced.

use thiserror::Error;

use crate::binder::bind;
use crate::error::{BindError, GraphError, ImplyError, LexError, ParseError, PlanError};
use crate::graph;
use crate::imply;
use crate::parser::Parser;
use crate::plan::Plan;
use crate::planner;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{} lexical error(s)", .0.len())]
    Lex(Vec<LexError>),
    #[error("{} parse error(s)", .0.len())]
    Parse(Vec<ParseError>),
    #[error("{} binding error(s)", .0.len())]
    Bind(Vec<BindError>),
    #[error("{} implication error(s)", .0.len())]
    Imply(Vec<ImplyError>),
    #[error("{} graph error(s)", .0.len())]
    Graph(Vec<GraphError>),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Runs lexing (inside the parser) through planning, stopping at the first
/// stage that reports any error.
pub fn compile(src: &str, filename: &str) -> Result<Plan, CompileError> {
    let mut parser = Parser::new(src, filename);
    let program = parser.parse_program();
    if !parser.lex_errors.is_empty() {
        return Err(CompileError::Lex(parser.lex_errors));
    }
    if !parser.errors.is_empty() {
        return Err(CompileError::Parse(parser.errors));
    }

    let bound = bind(program);
    if !bound.errors.is_empty() {
        return Err(CompileError::Bind(bound.errors));
    }

    let (expanded, imply_errors) = imply::expand(bound.program);
    if !imply_errors.is_empty() {
        return Err(CompileError::Imply(imply_errors));
    }

    let (graph, graph_errors) = graph::build(&expanded);
    if !graph_errors.is_empty() {
        return Err(CompileError::Graph(graph_errors));
    }

    Ok(planner::plan(&graph)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_minimal_program_to_a_plan() {
        let plan = compile(r#"on file "s.db" { ensure exists }"#, "t.ens").unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].condition, "exists");
    }

    #[test]
    fn conflict_stops_before_a_plan_is_produced() {
        let result = compile(
            r#"on file "f" { ensure encrypted with AES:256 key "env:K"; ensure unencrypted }"#,
            "t.ens",
        );
        assert!(matches!(result, Err(CompileError::Imply(_))));
    }

    #[test]
    fn unknown_alias_stops_at_the_binder() {
        let result = compile(r#"on nope { ensure exists }"#, "t.ens");
        assert!(matches!(result, Err(CompileError::Bind(_))));
    }

    #[test]
    fn dependency_cycle_stops_at_the_planner() {
        let result = compile(
            r#"on file "a" { ensure exists requires readable }
               on file "a" { ensure readable requires exists }"#,
            "t.ens",
        );
        assert!(matches!(result, Err(CompileError::Plan(PlanError::Cycle { .. }))));
    }
}
