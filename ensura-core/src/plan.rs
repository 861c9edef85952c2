//! The planner's output type: an ordered list of `Step`s.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::ResourceRef;
use crate::graph::Guarantee;
use crate::registry::default_handler;

#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub id: String,
    pub condition: String,
    pub subject_key: String,
    /// Always `ResourceRef::Inline` by the time a Step exists — the binder
    /// resolves every alias before the graph is built.
    pub subject: ResourceRef,
    pub description: String,
    pub handler: String,
    pub args: BTreeMap<String, String>,
    pub is_invariant: bool,
    /// This step's own `on violation { retry N }` override, if any. Falls
    /// back to [`Plan::default_retry`] and then `config.max_retries` at run
    /// time.
    pub retry_override: Option<u32>,
}

impl Step {
    pub fn from_guarantee(g: &Guarantee) -> Self {
        let handler = g
            .stmt
            .handler
            .as_ref()
            .map(|h| h.name.clone())
            .unwrap_or_else(|| default_handler(&g.stmt.condition).to_string());
        let args = g
            .stmt
            .handler
            .as_ref()
            .map(|h| h.args.clone())
            .unwrap_or_default();
        let description = format!("ensure {} on {}", g.stmt.condition, g.subject_key);
        Self {
            id: g.id.clone(),
            condition: g.stmt.condition.clone(),
            subject_key: g.subject_key.clone(),
            subject: g
                .stmt
                .subject
                .clone()
                .expect("binder resolves every guarantee's subject before planning"),
            description,
            handler,
            args,
            is_invariant: g.priority >= 1000,
            retry_override: g.stmt.violation.as_ref().and_then(|v| v.retry_count),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    /// The program's top-level `on violation { retry N }` default, if
    /// present, consulted when a step has no override of its own.
    pub default_retry: Option<u32>,
}
