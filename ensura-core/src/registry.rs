//! The condition registry: a single static table mapping each known
//! condition to its applicable resource types, implied conditions,
//! conflicting conditions, and default handler name.
//!
//! Both the implication expander and the graph builder drive their edges
//! off this same table rather than keeping their own copies, so the two
//! stages can never disagree about what a condition implies or conflicts
//! with. Both `imply.rs` and `graph.rs` call [`condition_info`] for this.

use crate::ast::ResourceType;

#[derive(Debug, Clone)]
pub struct ConditionInfo {
    pub applicable_types: &'static [ResourceType],
    pub implies: &'static [&'static str],
    pub conflicts: &'static [&'static str],
    pub default_handler: &'static str,
}

use ResourceType::*;

const FILE_AND_DIR: &[ResourceType] = &[File, Directory];
const FILE_ONLY: &[ResourceType] = &[File];
const HTTP_ONLY: &[ResourceType] = &[Http];
const CRON_ONLY: &[ResourceType] = &[Cron];
const SERVICE_AND_PROCESS: &[ResourceType] = &[Service, Process];

const TABLE: &[(&str, ConditionInfo)] = &[
    (
        "exists",
        ConditionInfo {
            applicable_types: FILE_AND_DIR,
            implies: &[],
            conflicts: &[],
            default_handler: "fs.native",
        },
    ),
    (
        "readable",
        ConditionInfo {
            applicable_types: FILE_AND_DIR,
            implies: &["exists"],
            conflicts: &[],
            default_handler: "fs.native",
        },
    ),
    (
        "writable",
        ConditionInfo {
            applicable_types: FILE_AND_DIR,
            implies: &["exists"],
            conflicts: &[],
            default_handler: "fs.native",
        },
    ),
    (
        "encrypted",
        ConditionInfo {
            applicable_types: FILE_ONLY,
            implies: &["exists", "readable", "writable"],
            conflicts: &["unencrypted"],
            default_handler: "AES:256",
        },
    ),
    (
        "unencrypted",
        ConditionInfo {
            applicable_types: FILE_ONLY,
            implies: &["exists"],
            conflicts: &["encrypted"],
            default_handler: "fs.native",
        },
    ),
    (
        "permissions",
        ConditionInfo {
            applicable_types: FILE_AND_DIR,
            implies: &["exists"],
            conflicts: &[],
            default_handler: "posix",
        },
    ),
    (
        "reachable",
        ConditionInfo {
            applicable_types: HTTP_ONLY,
            implies: &[],
            conflicts: &["unreachable"],
            default_handler: "http.native",
        },
    ),
    (
        "unreachable",
        ConditionInfo {
            applicable_types: HTTP_ONLY,
            implies: &[],
            conflicts: &["reachable"],
            default_handler: "http.native",
        },
    ),
    (
        "tls",
        ConditionInfo {
            applicable_types: HTTP_ONLY,
            implies: &["reachable"],
            conflicts: &[],
            default_handler: "http.native",
        },
    ),
    (
        "scheduled",
        ConditionInfo {
            applicable_types: CRON_ONLY,
            implies: &[],
            conflicts: &["unscheduled"],
            default_handler: "cron.native",
        },
    ),
    (
        "unscheduled",
        ConditionInfo {
            applicable_types: CRON_ONLY,
            implies: &[],
            conflicts: &["scheduled"],
            default_handler: "cron.native",
        },
    ),
    (
        "running",
        ConditionInfo {
            applicable_types: SERVICE_AND_PROCESS,
            implies: &[],
            conflicts: &["stopped"],
            default_handler: "process.native",
        },
    ),
    (
        "stopped",
        ConditionInfo {
            applicable_types: SERVICE_AND_PROCESS,
            implies: &[],
            conflicts: &["running"],
            default_handler: "process.native",
        },
    ),
];

/// Looks up a condition's static metadata. `None` for conditions unknown to
/// the registry, which pass through unchanged rather than erroring.
pub fn condition_info(name: &str) -> Option<&'static ConditionInfo> {
    TABLE.iter().find(|(n, _)| *n == name).map(|(_, c)| c)
}

pub fn default_handler(condition: &str) -> &'static str {
    condition_info(condition)
        .map(|c| c.default_handler)
        .unwrap_or("fs.native")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_implies_exists_readable_writable() {
        let info = condition_info("encrypted").unwrap();
        assert_eq!(info.implies, &["exists", "readable", "writable"]);
        assert!(info.applicable_types.contains(&ResourceType::File));
        assert!(!info.applicable_types.contains(&ResourceType::Directory));
    }

    #[test]
    fn encrypted_conflicts_with_unencrypted_symmetrically() {
        let enc = condition_info("encrypted").unwrap();
        let unenc = condition_info("unencrypted").unwrap();
        assert!(enc.conflicts.contains(&"unencrypted"));
        assert!(unenc.conflicts.contains(&"encrypted"));
    }

    #[test]
    fn unknown_condition_has_no_info() {
        assert!(condition_info("bogus").is_none());
    }
}
