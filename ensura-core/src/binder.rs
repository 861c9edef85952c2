//! Resolves implicit subjects, registers policies, validates cross
//! references, and expands policy applications.
//!
//! All errors are collected; binding never aborts mid-program. If any
//! errors were produced, the caller must not proceed to implication
//! expansion — a stage with errors blocks every stage after it.

use std::collections::HashMap;

use crate::ast::{ApplyStmt, EnsureStmt, PolicyDecl, Program, ResourceDecl, ResourceRef, Statement};
use crate::error::BindError;

#[derive(Debug, Default)]
pub struct AliasTable {
    /// alias name -> canonical `type:path` key
    aliases: HashMap<String, String>,
    /// canonical `type:path` key -> declaration (used to detect duplicates
    /// and to confirm a canonical key actually names a declared resource)
    decls: HashMap<String, ResourceDecl>,
}

impl AliasTable {
    pub fn canonical_key_of_decl(decl: &ResourceDecl) -> String {
        format!("{}:{}", decl.res_type.as_str(), decl.path)
    }

    /// Resolve a `ResourceRef` to its canonical `type:path` key, if possible.
    /// Inline refs are always resolvable; aliases only if registered.
    pub fn canonical_key(&self, r: &ResourceRef) -> Option<String> {
        match r {
            ResourceRef::Inline { res_type, path } => Some(format!("{}:{}", res_type.as_str(), path)),
            ResourceRef::Alias(name) => self.aliases.get(name).cloned(),
        }
    }

    pub fn alias_exists(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Resolves any `ResourceRef` down to its inline `(type, path)` form.
    /// Handlers never see an `Alias` — by the time the Runtime calls one,
    /// every subject has passed through here.
    pub fn resolve(&self, r: &ResourceRef) -> Option<ResourceRef> {
        match r {
            ResourceRef::Inline { .. } => Some(r.clone()),
            ResourceRef::Alias(name) => {
                let key = self.aliases.get(name)?;
                let decl = self.decls.get(key)?;
                Some(ResourceRef::Inline {
                    res_type: decl.res_type,
                    path: decl.path.clone(),
                })
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PolicyTable {
    policies: HashMap<String, PolicyDecl>,
}

impl PolicyTable {
    pub fn get(&self, name: &str) -> Option<&PolicyDecl> {
        self.policies.get(name)
    }
}

pub struct BindOutput {
    pub program: Program,
    pub errors: Vec<BindError>,
}

pub fn bind(program: Program) -> BindOutput {
    let mut errors = Vec::new();
    let (aliases, policies) = register(&program, &mut errors);
    let expanded = expand_policies(program, None, &policies, &mut errors);
    let mut resolved = expanded;
    resolve_subjects(&mut resolved, None, &aliases, &mut errors);
    BindOutput { program: resolved, errors }
}

// ---------- 1. registration pass ----------

fn register(program: &Program, errors: &mut Vec<BindError>) -> (AliasTable, PolicyTable) {
    let mut aliases = AliasTable::default();
    let mut policies = PolicyTable::default();
    for stmt in program {
        match stmt {
            Statement::ResourceDecl(decl) => {
                let key = AliasTable::canonical_key_of_decl(decl);
                if aliases.decls.contains_key(&key) {
                    errors.push(BindError::DuplicateResource {
                        pos: decl.pos.clone(),
                        key: key.clone(),
                    });
                } else {
                    aliases.decls.insert(key.clone(), decl.clone());
                }
                if let Some(alias) = &decl.alias {
                    if aliases.aliases.contains_key(alias) {
                        errors.push(BindError::DuplicateAlias {
                            pos: decl.pos.clone(),
                            alias: alias.clone(),
                        });
                    } else {
                        aliases.aliases.insert(alias.clone(), key.clone());
                    }
                }
            }
            Statement::Policy(p) => {
                if policies.policies.contains_key(&p.name) {
                    errors.push(BindError::DuplicatePolicy {
                        pos: p.pos.clone(),
                        name: p.name.clone(),
                    });
                } else {
                    policies.policies.insert(p.name.clone(), p.clone());
                }
            }
            _ => {}
        }
    }
    (aliases, policies)
}

// ---------- 2. ExpandPolicies sub-phase ----------

/// Replaces every `ApplyStmt` with the policy's cloned `EnsureStmt`s,
/// substituting parameter-name handler-argument *values* with the caller's
/// argument strings. The enclosing subject is the nearest `OnBlock`'s own
/// (syntactic, always-explicit) subject — policy
/// application outside any `OnBlock` leaves the clones subject-less, to be
/// picked up by ordinary last-subject inheritance in the resolution pass.
fn expand_policies(
    body: Vec<Statement>,
    enclosing_subject: Option<&ResourceRef>,
    policies: &PolicyTable,
    errors: &mut Vec<BindError>,
) -> Vec<Statement> {
    let mut out = Vec::with_capacity(body.len());
    for stmt in body {
        match stmt {
            Statement::Apply(apply) => {
                expand_one_apply(&apply, enclosing_subject, policies, errors, &mut out);
            }
            Statement::On(mut b) => {
                b.body = expand_policies(b.body, Some(&b.subject), policies, errors);
                out.push(Statement::On(b));
            }
            Statement::Invariant(mut b) => {
                b.body = expand_policies(b.body, enclosing_subject, policies, errors);
                out.push(Statement::Invariant(b));
            }
            Statement::Parallel(mut b) => {
                b.body = expand_policies(b.body, enclosing_subject, policies, errors);
                out.push(Statement::Parallel(b));
            }
            Statement::ForEach(mut f) => {
                f.body = expand_policies(f.body, enclosing_subject, policies, errors);
                out.push(Statement::ForEach(f));
            }
            other => out.push(other),
        }
    }
    out
}

fn expand_one_apply(
    apply: &ApplyStmt,
    enclosing_subject: Option<&ResourceRef>,
    policies: &PolicyTable,
    errors: &mut Vec<BindError>,
    out: &mut Vec<Statement>,
) {
    let Some(policy) = policies.get(&apply.name) else {
        errors.push(BindError::UnknownPolicy {
            pos: apply.pos.clone(),
            name: apply.name.clone(),
        });
        return;
    };
    if policy.params.len() != apply.args.len() {
        errors.push(BindError::ArgCountMismatch {
            pos: apply.pos.clone(),
            name: apply.name.clone(),
            expected: policy.params.len(),
            got: apply.args.len(),
        });
        return;
    }
    let subst: HashMap<&str, &str> = policy
        .params
        .iter()
        .map(String::as_str)
        .zip(apply.args.iter().map(String::as_str))
        .collect();

    for pstmt in &policy.body {
        if let Statement::Ensure(proto) = pstmt {
            let mut cloned: EnsureStmt = proto.clone();
            if let Some(h) = cloned.handler.as_mut() {
                for v in h.args.values_mut() {
                    if let Some(replacement) = subst.get(v.as_str()) {
                        *v = replacement.to_string();
                    }
                }
            }
            cloned.subject = enclosing_subject.cloned();
            cloned.is_implied = false;
            out.push(Statement::Ensure(cloned));
        } else {
            out.push(pstmt.clone());
        }
    }
}

// ---------- 3. subject resolution + alias validation ----------

fn resolve_subjects(
    body: &mut [Statement],
    initial_subject: Option<ResourceRef>,
    aliases: &AliasTable,
    errors: &mut Vec<BindError>,
) {
    let mut current = initial_subject;
    for stmt in body.iter_mut() {
        match stmt {
            Statement::Ensure(e) => {
                if e.subject.is_none() {
                    e.subject = current.clone();
                }
                match e.subject.take() {
                    None => errors.push(BindError::MissingImplicitSubject { pos: e.pos.clone() }),
                    Some(r) => e.subject = resolve_ref(r, &e.pos, aliases, errors),
                }
                e.after = e
                    .after
                    .drain(..)
                    .filter_map(|r| resolve_ref(r, &e.pos, aliases, errors))
                    .collect();
                e.before = e
                    .before
                    .drain(..)
                    .filter_map(|r| resolve_ref(r, &e.pos, aliases, errors))
                    .collect();
                current = e.subject.clone();
            }
            Statement::On(b) => {
                let pos = b.pos.clone();
                if let Some(resolved) = resolve_ref(b.subject.clone(), &pos, aliases, errors) {
                    b.subject = resolved.clone();
                    resolve_subjects(&mut b.body, Some(resolved), aliases, errors);
                } else {
                    resolve_subjects(&mut b.body, None, aliases, errors);
                }
            }
            Statement::Invariant(b) => {
                resolve_subjects(&mut b.body, current.clone(), aliases, errors);
            }
            Statement::Parallel(b) => {
                resolve_subjects(&mut b.body, current.clone(), aliases, errors);
            }
            Statement::ForEach(f) => {
                let pos = f.pos.clone();
                if !matches!(f.container, ResourceRef::Alias(_)) {
                    errors.push(BindError::NonEnumerableForEach { pos: pos.clone() });
                }
                let resolved = resolve_ref(f.container.clone(), &pos, aliases, errors);
                let resolved = match resolved {
                    Some(ResourceRef::Inline { res_type, path }) if res_type == f.item_type => {
                        Some(ResourceRef::Inline { res_type, path })
                    }
                    Some(_) => {
                        errors.push(BindError::NonEnumerableForEach { pos: pos.clone() });
                        None
                    }
                    None => None,
                };
                if let Some(r) = &resolved {
                    f.container = r.clone();
                }
                resolve_subjects(&mut f.body, resolved, aliases, errors);
            }
            _ => {}
        }
    }
}

/// Validates an alias reference and resolves it to its inline `(type,
/// path)` form in the same step, so every later stage only ever sees
/// `ResourceRef::Inline`.
fn resolve_ref(
    r: ResourceRef,
    pos: &crate::position::Position,
    aliases: &AliasTable,
    errors: &mut Vec<BindError>,
) -> Option<ResourceRef> {
    match &r {
        ResourceRef::Alias(name) if !aliases.alias_exists(name) => {
            errors.push(BindError::UnknownAlias {
                pos: pos.clone(),
                alias: name.clone(),
            });
            None
        }
        _ => aliases.resolve(&r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn parse(src: &str) -> Program {
        let mut p = Parser::new(src, "t.ens");
        let prog = p.parse_program();
        assert!(p.errors.is_empty());
        prog
    }

    #[test]
    fn ensure_inherits_last_subject_within_on_block() {
        let prog = parse(r#"on file "s.db" { ensure exists; ensure readable }"#);
        let out = bind(prog);
        assert!(out.errors.is_empty());
        match &out.program[0] {
            Statement::On(b) => {
                for s in &b.body {
                    if let Statement::Ensure(e) = s {
                        assert!(e.subject.is_some());
                    }
                }
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn missing_subject_with_no_context_is_an_error() {
        let prog = parse("ensure exists");
        let out = bind(prog);
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(out.errors[0], BindError::MissingImplicitSubject { .. }));
    }

    #[test]
    fn unknown_alias_is_rejected() {
        let prog = parse(r#"on nope { ensure exists }"#);
        let out = bind(prog);
        assert!(out
            .errors
            .iter()
            .any(|e| matches!(e, BindError::UnknownAlias { .. })));
    }

    #[test]
    fn duplicate_alias_is_rejected() {
        let prog = parse(
            r#"resource file "a" as x
               resource file "b" as x"#,
        );
        let out = bind(prog);
        assert!(out
            .errors
            .iter()
            .any(|e| matches!(e, BindError::DuplicateAlias { .. })));
    }

    #[test]
    fn apply_arg_count_mismatch_is_rejected() {
        let prog = parse(
            r#"policy secure(k){ ensure encrypted with AES:256 key k }
               on file "x" { apply secure("a", "b") }"#,
        );
        let out = bind(prog);
        assert!(out
            .errors
            .iter()
            .any(|e| matches!(e, BindError::ArgCountMismatch { .. })));
    }

    #[test]
    fn policy_expansion_substitutes_handler_args_and_subject() {
        let prog = parse(
            r#"policy secure(k){ ensure encrypted with AES:256 key k }
               on file "x" { apply secure("env:KK") }"#,
        );
        let out = bind(prog);
        assert!(out.errors.is_empty());
        let Statement::On(b) = &out.program[0] else {
            panic!("expected OnBlock")
        };
        let Statement::Ensure(e) = &b.body[0] else {
            panic!("expected Ensure")
        };
        assert_eq!(e.condition, "encrypted");
        assert_eq!(
            e.handler.as_ref().unwrap().args.get("key"),
            Some(&"env:KK".to_string())
        );
        match &e.subject {
            Some(ResourceRef::Inline { path, .. }) => assert_eq!(path, "x"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn alias_subject_is_resolved_to_inline_for_downstream_stages() {
        let prog = parse(
            r#"resource file "secrets.db" as secrets
               on secrets { ensure exists }"#,
        );
        let out = bind(prog);
        assert!(out.errors.is_empty());
        let Statement::On(b) = &out.program[1] else {
            panic!("expected OnBlock")
        };
        match &b.subject {
            ResourceRef::Inline { path, .. } => assert_eq!(path, "secrets.db"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn for_each_over_single_aliased_resource_expands_to_one_iteration() {
        let prog = parse(
            r#"resource file "only.db" as onlyone
               for each file in onlyone { ensure readable }"#,
        );
        let out = bind(prog);
        assert!(out.errors.is_empty());
        let Statement::ForEach(f) = &out.program[1] else {
            panic!("expected ForEach")
        };
        match &f.container {
            ResourceRef::Inline { path, .. } => assert_eq!(path, "only.db"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn for_each_over_inline_container_is_non_enumerable() {
        let prog = parse(r#"for each file in directory "d" { ensure readable }"#);
        let out = bind(prog);
        assert!(out
            .errors
            .iter()
            .any(|e| matches!(e, BindError::NonEnumerableForEach { .. })));
    }
}
