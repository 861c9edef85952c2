//! Dependency DAG built from the implication-expanded tree.
//!
//! A node is created per expanded `EnsureStmt`, walking the same nested
//! scopes the binder and expander use. Edges come from four sources:
//! implication (same table as [`crate::imply`]), `requires`, `after`,
//! `before`.

use std::collections::HashMap;

use crate::ast::{EnsureStmt, Program, ResourceRef, Statement};
use crate::error::GraphError;
use crate::registry::condition_info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Implies,
    Requires,
    After,
    Before,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone)]
pub struct Guarantee {
    pub id: String,
    pub stmt: EnsureStmt,
    pub subject_key: String,
    pub priority: i64,
}

#[derive(Debug, Default)]
pub struct Graph {
    pub nodes: Vec<Guarantee>,
    pub edges: Vec<Edge>,
    /// The program's top-level `on violation { retry N }` block, if any —
    /// the fallback retry budget for any step without its own override.
    pub default_retry: Option<u32>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Guarantee> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// DFS-with-recursion-stack cycle finder. Returns the offending node-id
    /// sequence, or `None` if the graph is acyclic.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
        for e in &self.edges {
            adj.entry(e.from.as_str()).or_default().push(e.to.as_str());
        }
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }
        let mut mark: HashMap<&str, Mark> = self.nodes.iter().map(|n| (n.id.as_str(), Mark::Unvisited)).collect();
        let mut stack: Vec<&str> = Vec::new();

        fn visit<'a>(
            id: &'a str,
            adj: &HashMap<&'a str, Vec<&'a str>>,
            mark: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            match mark.get(id) {
                Some(Mark::InStack) => {
                    let start = stack.iter().position(|x| *x == id).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(id.to_string());
                    return Some(cycle);
                }
                Some(Mark::Done) => return None,
                _ => {}
            }
            mark.insert(id, Mark::InStack);
            stack.push(id);
            if let Some(succs) = adj.get(id) {
                for s in succs {
                    if let Some(cycle) = visit(s, adj, mark, stack) {
                        return Some(cycle);
                    }
                }
            }
            stack.pop();
            mark.insert(id, Mark::Done);
            None
        }

        for n in &self.nodes {
            if let Some(cycle) = visit(n.id.as_str(), &adj, &mut mark, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }
}

fn subject_key(r: &ResourceRef) -> String {
    match r {
        ResourceRef::Inline { res_type, path } => format!("{}:{}", res_type.as_str(), path),
        ResourceRef::Alias(name) => format!("alias:{name}"),
    }
}

fn node_id(stmt: &EnsureStmt, subject_key: &str) -> String {
    format!("{}:{}@{}", stmt.condition, subject_key, stmt.pos)
}

/// Collects one `Guarantee` per `EnsureStmt`, tracking whether it sits
/// (directly or nested) inside an `InvariantBlock` for the +1000 priority
/// bump.
fn collect_guarantees(body: &[Statement], in_invariant: bool, out: &mut Vec<Guarantee>) {
    for stmt in body {
        match stmt {
            Statement::Ensure(e) => {
                let Some(subj) = &e.subject else { continue };
                let key = subject_key(subj);
                let id = node_id(e, &key);
                let priority = if in_invariant { 1000 } else { 0 };
                out.push(Guarantee {
                    id,
                    stmt: e.clone(),
                    subject_key: key,
                    priority,
                });
            }
            Statement::On(b) => collect_guarantees(&b.body, in_invariant, out),
            Statement::Invariant(b) => collect_guarantees(&b.body, true, out),
            Statement::Parallel(b) => collect_guarantees(&b.body, in_invariant, out),
            Statement::ForEach(f) => collect_guarantees(&f.body, in_invariant, out),
            _ => {}
        }
    }
}

pub fn build(program: &Program) -> (Graph, Vec<GraphError>) {
    let mut errors = Vec::new();
    let mut nodes = Vec::new();
    collect_guarantees(program, false, &mut nodes);

    let mut edges = Vec::new();
    add_implication_edges(&nodes, &mut edges);
    add_requires_edges(&nodes, &mut edges, &mut errors);
    add_after_before_edges(&nodes, &mut edges, &mut errors);

    let default_retry = program.iter().find_map(|s| match s {
        Statement::OnViolation(b) => b.handler.retry_count,
        _ => None,
    });

    (Graph { nodes, edges, default_retry }, errors)
}

/// For same-subject pair (A, B) where A's condition is in B's `implies`
/// list, add A -> B: the prerequisite (A) precedes the implier (B).
fn add_implication_edges(nodes: &[Guarantee], edges: &mut Vec<Edge>) {
    for b in nodes {
        let Some(info) = condition_info(&b.stmt.condition) else { continue };
        for a in nodes {
            if a.id == b.id || a.subject_key != b.subject_key {
                continue;
            }
            if info.implies.contains(&a.stmt.condition.as_str()) {
                edges.push(Edge {
                    from: a.id.clone(),
                    to: b.id.clone(),
                    kind: EdgeKind::Implies,
                });
            }
        }
    }
}

fn find_by_condition<'a>(nodes: &'a [Guarantee], condition: &str, subject_key: &str) -> Option<&'a Guarantee> {
    nodes
        .iter()
        .find(|n| n.stmt.condition == condition && n.subject_key == subject_key)
}

fn add_requires_edges(nodes: &[Guarantee], edges: &mut Vec<Edge>, errors: &mut Vec<GraphError>) {
    for x in nodes {
        for cond in &x.stmt.requires {
            match find_by_condition(nodes, cond, &x.subject_key) {
                Some(src) if src.id != x.id => edges.push(Edge {
                    from: src.id.clone(),
                    to: x.id.clone(),
                    kind: EdgeKind::Requires,
                }),
                Some(_) => {}
                None => errors.push(GraphError::UnresolvedDependency {
                    from: x.id.clone(),
                    reference: cond.clone(),
                }),
            }
        }
    }
}

/// `after`/`before` name a *resource*, not a condition: a resource with no
/// guarantees of its own in this program simply contributes no edges, which
/// is not an error (unlike an unresolved `requires` condition name).
fn add_after_before_edges(nodes: &[Guarantee], edges: &mut Vec<Edge>, _errors: &mut [GraphError]) {
    for x in nodes {
        for r in &x.stmt.after {
            let key = subject_key(r);
            for y in nodes {
                if y.subject_key == key && y.id != x.id {
                    edges.push(Edge {
                        from: y.id.clone(),
                        to: x.id.clone(),
                        kind: EdgeKind::After,
                    });
                }
            }
        }
        for r in &x.stmt.before {
            let key = subject_key(r);
            for y in nodes {
                if y.subject_key == key && y.id != x.id {
                    edges.push(Edge {
                        from: x.id.clone(),
                        to: y.id.clone(),
                        kind: EdgeKind::Before,
                    });
                }
            }
        }
    }
}
