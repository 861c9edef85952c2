//! Planner: Kahn's algorithm over the dependency graph with a deterministic
//! tie-break (priority descending, id ascending).

use std::collections::HashMap;

use crate::error::PlanError;
use crate::graph::Graph;
use crate::plan::{Plan, Step};

pub fn plan(graph: &Graph) -> Result<Plan, PlanError> {
    let mut indegree: HashMap<&str, usize> = graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in &graph.edges {
        *indegree.get_mut(e.to.as_str()).unwrap() += 1;
        successors.entry(e.from.as_str()).or_default().push(e.to.as_str());
    }

    let mut frontier: Vec<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    sort_frontier(graph, &mut frontier);

    let mut output: Vec<&str> = Vec::with_capacity(graph.nodes.len());
    while let Some(id) = frontier.first().copied() {
        frontier.remove(0);
        output.push(id);
        let mut newly_ready = Vec::new();
        if let Some(succs) = successors.get(id) {
            for &s in succs {
                let deg = indegree.get_mut(s).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(s);
                }
            }
        }
        frontier.extend(newly_ready);
        sort_frontier(graph, &mut frontier);
    }

    if output.len() != graph.nodes.len() {
        let cycle = graph.find_cycle().unwrap_or_default();
        return Err(PlanError::Cycle { path: cycle });
    }

    let steps = output
        .into_iter()
        .map(|id| Step::from_guarantee(graph.node(id).expect("planned id must exist in graph")))
        .collect();
    Ok(Plan {
        steps,
        default_retry: graph.default_retry,
    })
}

fn sort_frontier(graph: &Graph, frontier: &mut [&str]) {
    frontier.sort_by(|a, b| {
        let pa = graph.node(a).map(|n| n.priority).unwrap_or(0);
        let pb = graph.node(b).map(|n| n.priority).unwrap_or(0);
        pb.cmp(&pa).then_with(|| a.cmp(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use crate::graph::build;
    use crate::imply::expand;
    use crate::parser::Parser;

    fn plan_src(src: &str) -> Result<Plan, PlanError> {
        let mut p = Parser::new(src, "t.ens");
        let prog = p.parse_program();
        assert!(p.errors.is_empty());
        let bound = bind(prog);
        assert!(bound.errors.is_empty(), "{:?}", bound.errors);
        let (expanded, imply_errors) = expand(bound.program);
        assert!(imply_errors.is_empty(), "{:?}", imply_errors);
        let (graph, graph_errors) = build(&expanded);
        assert!(graph_errors.is_empty(), "{:?}", graph_errors);
        plan(&graph)
    }

    #[test]
    fn implied_prerequisite_is_ordered_before_dependent() {
        let p = plan_src(r#"on file "s.db" { ensure encrypted with AES:256 key "env:K" }"#).unwrap();
        let exists_idx = p.steps.iter().position(|s| s.condition == "exists").unwrap();
        let encrypted_idx = p.steps.iter().position(|s| s.condition == "encrypted").unwrap();
        assert!(exists_idx < encrypted_idx);
    }

    #[test]
    fn invariant_guarantees_sort_before_equal_indegree_regular_ones() {
        let p = plan_src(
            r#"invariant { ensure exists on file "a" }
               ensure exists on file "b""#,
        )
        .unwrap();
        let invariant_idx = p.steps.iter().position(|s| s.is_invariant).unwrap();
        let regular_idx = p.steps.iter().position(|s| !s.is_invariant).unwrap();
        assert!(invariant_idx < regular_idx);
    }

    #[test]
    fn cycle_via_requires_is_reported() {
        let result = plan_src(
            r#"on file "a" { ensure exists requires readable }
               on file "a" { ensure readable requires exists }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn default_handler_is_used_when_no_explicit_handler_given() {
        let p = plan_src(r#"ensure exists on file "a""#).unwrap();
        assert_eq!(p.steps[0].handler, "fs.native");
    }
}
