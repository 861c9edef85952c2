//! Implication expansion: synthesizes prerequisite `EnsureStmt`s from the
//! condition registry, deduplicates per subject, and flags conflicting
//! conditions on the same subject.

use std::collections::{HashMap, HashSet};

use crate::ast::{EnsureStmt, Program, ResourceRef, Statement};
use crate::error::ImplyError;
use crate::position::Position;
use crate::registry::condition_info;

pub fn expand(program: Program) -> (Program, Vec<ImplyError>) {
    let mut errors = Vec::new();
    let expanded = expand_body(program, &mut errors);
    let deduped = dedup(expanded);
    detect_conflicts(&deduped, &mut errors);
    (deduped, errors)
}

fn subject_key(r: &ResourceRef) -> String {
    match r {
        ResourceRef::Inline { res_type, path } => format!("{}:{}", res_type.as_str(), path),
        ResourceRef::Alias(name) => format!("alias:{name}"),
    }
}

// ---------- step 1-3: synthesize implied statements, before the original ----------

fn expand_body(body: Vec<Statement>, errors: &mut Vec<ImplyError>) -> Vec<Statement> {
    let mut out = Vec::with_capacity(body.len());
    for stmt in body {
        match stmt {
            Statement::Ensure(e) => expand_one(e, errors, &mut out),
            Statement::On(mut b) => {
                b.body = expand_body(b.body, errors);
                out.push(Statement::On(b));
            }
            Statement::Invariant(mut b) => {
                b.body = expand_body(b.body, errors);
                out.push(Statement::Invariant(b));
            }
            Statement::Parallel(mut b) => {
                b.body = expand_body(b.body, errors);
                out.push(Statement::Parallel(b));
            }
            Statement::ForEach(mut f) => {
                f.body = expand_body(f.body, errors);
                out.push(Statement::ForEach(f));
            }
            other => out.push(other),
        }
    }
    out
}

fn expand_one(stmt: EnsureStmt, errors: &mut Vec<ImplyError>, out: &mut Vec<Statement>) {
    let Some(info) = condition_info(&stmt.condition) else {
        // unknown condition: pass through unchanged (rule 1)
        out.push(Statement::Ensure(stmt));
        return;
    };

    if let Some(ResourceRef::Inline { res_type, .. }) = &stmt.subject {
        if !info.applicable_types.contains(res_type) {
            errors.push(ImplyError::TypeMismatch {
                pos: stmt.pos.clone(),
                condition: stmt.condition.clone(),
                res_type: res_type.as_str().to_string(),
            });
        }
    }

    for implied_cond in info.implies {
        let mut synth = EnsureStmt::new((*implied_cond).to_string(), stmt.pos.clone());
        synth.subject = stmt.subject.clone();
        synth.guard = stmt.guard.clone();
        synth.is_implied = true;
        expand_one(synth, errors, out);
    }

    out.push(Statement::Ensure(stmt));
}

// ---------- step 4: dedup per subject, keeping the first occurrence ----------

type CondKey = (String, String);

fn dedup(program: Program) -> Program {
    let mut merged_implied: HashMap<CondKey, bool> = HashMap::new();
    collect_merged_flags(&program, &mut merged_implied);
    let mut seen = HashSet::new();
    filter_dupes(program, &merged_implied, &mut seen)
}

fn collect_merged_flags(body: &[Statement], merged: &mut HashMap<CondKey, bool>) {
    for stmt in body {
        match stmt {
            Statement::Ensure(e) => {
                if let Some(subj) = &e.subject {
                    let key = (subject_key(subj), e.condition.clone());
                    merged
                        .entry(key)
                        .and_modify(|implied| *implied = *implied && e.is_implied)
                        .or_insert(e.is_implied);
                }
            }
            Statement::On(b) => collect_merged_flags(&b.body, merged),
            Statement::Invariant(b) => collect_merged_flags(&b.body, merged),
            Statement::Parallel(b) => collect_merged_flags(&b.body, merged),
            Statement::ForEach(f) => collect_merged_flags(&f.body, merged),
            _ => {}
        }
    }
}

fn filter_dupes(
    body: Vec<Statement>,
    merged: &HashMap<CondKey, bool>,
    seen: &mut HashSet<CondKey>,
) -> Vec<Statement> {
    let mut out = Vec::with_capacity(body.len());
    for stmt in body {
        match stmt {
            Statement::Ensure(mut e) => {
                let Some(subj) = &e.subject else {
                    out.push(Statement::Ensure(e));
                    continue;
                };
                let key = (subject_key(subj), e.condition.clone());
                if seen.contains(&key) {
                    continue; // not the first occurrence
                }
                seen.insert(key.clone());
                e.is_implied = merged.get(&key).copied().unwrap_or(e.is_implied);
                out.push(Statement::Ensure(e));
            }
            Statement::On(mut b) => {
                b.body = filter_dupes(b.body, merged, seen);
                out.push(Statement::On(b));
            }
            Statement::Invariant(mut b) => {
                b.body = filter_dupes(b.body, merged, seen);
                out.push(Statement::Invariant(b));
            }
            Statement::Parallel(mut b) => {
                b.body = filter_dupes(b.body, merged, seen);
                out.push(Statement::Parallel(b));
            }
            Statement::ForEach(mut f) => {
                f.body = filter_dupes(f.body, merged, seen);
                out.push(Statement::ForEach(f));
            }
            other => out.push(other),
        }
    }
    out
}

// ---------- conflict detection ----------

fn detect_conflicts(program: &[Statement], errors: &mut Vec<ImplyError>) {
    let mut by_subject: HashMap<String, Vec<(String, Position)>> = HashMap::new();
    collect_conditions(program, &mut by_subject);

    for conds in by_subject.values() {
        for i in 0..conds.len() {
            for j in (i + 1)..conds.len() {
                let (a_cond, a_pos) = &conds[i];
                let (b_cond, b_pos) = &conds[j];
                let conflicts = condition_info(a_cond)
                    .map(|info| info.conflicts.contains(&b_cond.as_str()))
                    .unwrap_or(false)
                    || condition_info(b_cond)
                        .map(|info| info.conflicts.contains(&a_cond.as_str()))
                        .unwrap_or(false);
                if conflicts {
                    errors.push(ImplyError::Conflict {
                        a_cond: a_cond.clone(),
                        a_pos: a_pos.clone(),
                        b_cond: b_cond.clone(),
                        b_pos: b_pos.clone(),
                    });
                }
            }
        }
    }
}

fn collect_conditions(body: &[Statement], by_subject: &mut HashMap<String, Vec<(String, Position)>>) {
    for stmt in body {
        match stmt {
            Statement::Ensure(e) => {
                if let Some(subj) = &e.subject {
                    by_subject
                        .entry(subject_key(subj))
                        .or_default()
                        .push((e.condition.clone(), e.pos.clone()));
                }
            }
            Statement::On(b) => collect_conditions(&b.body, by_subject),
            Statement::Invariant(b) => collect_conditions(&b.body, by_subject),
            Statement::Parallel(b) => collect_conditions(&b.body, by_subject),
            Statement::ForEach(f) => collect_conditions(&f.body, by_subject),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use crate::parser::Parser;

    fn bind_src(src: &str) -> Program {
        let mut p = Parser::new(src, "t.ens");
        let prog = p.parse_program();
        assert!(p.errors.is_empty());
        let out = bind(prog);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        out.program
    }

    #[test]
    fn encrypted_implies_exists_readable_writable_emitted_before() {
        let prog = bind_src(r#"on file "s.db" { ensure encrypted with AES:256 key "env:K" }"#);
        let (expanded, errors) = expand(prog);
        assert!(errors.is_empty());
        let Statement::On(b) = &expanded[0] else { panic!() };
        let conds: Vec<&str> = b
            .body
            .iter()
            .filter_map(|s| match s {
                Statement::Ensure(e) => Some(e.condition.as_str()),
                _ => None,
            })
            .collect();
        let enc_idx = conds.iter().position(|c| *c == "encrypted").unwrap();
        for implied in ["exists", "readable", "writable"] {
            let idx = conds.iter().position(|c| *c == implied).unwrap();
            assert!(idx < enc_idx, "{implied} should precede encrypted");
        }
    }

    #[test]
    fn duplicate_condition_on_same_subject_collapses_to_one() {
        let prog = bind_src(r#"on file "s.db" { ensure exists; ensure readable }"#);
        let (expanded, errors) = expand(prog);
        assert!(errors.is_empty());
        let Statement::On(b) = &expanded[0] else { panic!() };
        let exists_count = b
            .body
            .iter()
            .filter(|s| matches!(s, Statement::Ensure(e) if e.condition == "exists"))
            .count();
        assert_eq!(exists_count, 1);
    }

    #[test]
    fn encrypted_and_unencrypted_on_same_subject_conflict() {
        let prog = bind_src(
            r#"on file "s.db" { ensure encrypted with AES:256 key "env:K"; ensure unencrypted }"#,
        );
        let (_expanded, errors) = expand(prog);
        assert!(errors.iter().any(|e| matches!(e, ImplyError::Conflict { .. })));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let prog = bind_src(r#"on directory "d" { ensure encrypted with AES:256 key "env:K" }"#);
        let (_expanded, errors) = expand(prog);
        assert!(errors.iter().any(|e| matches!(e, ImplyError::TypeMismatch { .. })));
    }
}
