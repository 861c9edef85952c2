//! `permissions` on `file`/`directory` subjects: the `mode` argument parses
//! as octal. Real enforcement is Unix-only via
//! `std::os::unix::fs::PermissionsExt`; other targets report
//! `UnsupportedPlatform` from `enforce` (still satisfying the trait).

use crate::error::HandlerError;

use super::{subject_path, Handler, HandlerCtx, HandlerResult};

pub struct PermissionsHandler;

impl Handler for PermissionsHandler {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn check(&self, ctx: &HandlerCtx) -> HandlerResult {
        let path = match subject_path(ctx.subject) {
            Ok(p) => p,
            Err(e) => return HandlerResult::failed(e),
        };
        let Some(mode_str) = ctx.args.get("mode") else {
            return HandlerResult::failed(HandlerError::MissingArgument("mode".to_string()));
        };
        let Ok(expected) = u32::from_str_radix(mode_str, 8) else {
            return HandlerResult::failed(HandlerError::Other(format!("`{mode_str}` is not valid octal")));
        };
        current_mode(path)
            .map(|actual| {
                if actual == expected {
                    HandlerResult::ok(format!("{path} already mode {mode_str}"))
                } else {
                    HandlerResult::failed(HandlerError::Other(format!(
                        "{path} is mode {actual:o}, expected {expected:o}"
                    )))
                }
            })
            .unwrap_or_else(HandlerResult::failed)
    }

    fn enforce(&self, ctx: &HandlerCtx) -> HandlerResult {
        let path = match subject_path(ctx.subject) {
            Ok(p) => p,
            Err(e) => return HandlerResult::failed(e),
        };
        let Some(mode_str) = ctx.args.get("mode") else {
            return HandlerResult::failed(HandlerError::MissingArgument("mode".to_string()));
        };
        let Ok(mode) = u32::from_str_radix(mode_str, 8) else {
            return HandlerResult::failed(HandlerError::Other(format!("`{mode_str}` is not valid octal")));
        };
        set_mode(path, mode)
            .map(|()| HandlerResult::ok(format!("{path} set to mode {mode_str}")))
            .unwrap_or_else(HandlerResult::failed)
    }
}

#[cfg(unix)]
fn current_mode(path: &str) -> Result<u32, HandlerError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o777)
        .map_err(|e| HandlerError::Other(e.to_string()))
}

#[cfg(unix)]
fn set_mode(path: &str, mode: u32) -> Result<(), HandlerError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| HandlerError::Other(e.to_string()))
}

#[cfg(not(unix))]
fn current_mode(_path: &str) -> Result<u32, HandlerError> {
    Err(HandlerError::UnsupportedPlatform("posix permission bits".to_string()))
}

#[cfg(not(unix))]
fn set_mode(_path: &str, _mode: u32) -> Result<(), HandlerError> {
    Err(HandlerError::UnsupportedPlatform("posix permission bits".to_string()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ast::{ResourceRef, ResourceType};
    use std::collections::BTreeMap;

    #[test]
    fn enforce_sets_then_check_confirms_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f").to_string_lossy().into_owned();
        std::fs::write(&path, b"x").unwrap();
        let subject = ResourceRef::Inline { res_type: ResourceType::File, path: path.clone() };
        let mut args = BTreeMap::new();
        args.insert("mode".to_string(), "640".to_string());
        let handler = PermissionsHandler;
        let ctx = HandlerCtx { subject: &subject, condition: "permissions", args: &args };
        assert!(!handler.check(&ctx).success);
        assert!(handler.enforce(&ctx).success);
        assert!(handler.check(&ctx).success);
    }

    #[test]
    fn missing_mode_argument_is_reported() {
        let subject = ResourceRef::Inline { res_type: ResourceType::File, path: "x".to_string() };
        let args = BTreeMap::new();
        let handler = PermissionsHandler;
        let ctx = HandlerCtx { subject: &subject, condition: "permissions", args: &args };
        let r = handler.check(&ctx);
        assert!(matches!(r.error, Some(HandlerError::MissingArgument(_))));
    }
}
