//! `exists`/`readable`/`writable` on `file`/`directory` subjects. Backed by
//! `std::fs`; no third-party crate needed for plain existence/permission-bit
//! checks.

use std::fs;
use std::path::Path;

use crate::error::HandlerError;

use super::{subject_path, Handler, HandlerCtx, HandlerResult};

pub struct FilesystemHandler;

impl Handler for FilesystemHandler {
    fn name(&self) -> &'static str {
        "fs.native"
    }

    fn check(&self, ctx: &HandlerCtx) -> HandlerResult {
        let path = match subject_path(ctx.subject) {
            Ok(p) => p,
            Err(e) => return HandlerResult::failed(e),
        };
        match ctx.condition {
            "exists" => bool_result(Path::new(path).exists(), "exists", path),
            "readable" => match fs::metadata(path) {
                Ok(meta) => bool_result(!meta.permissions().readonly() || meta.is_dir(), "readable", path),
                Err(_) => HandlerResult::failed(HandlerError::Other(format!("could not stat {path}"))),
            },
            "writable" => match fs::metadata(path) {
                Ok(meta) => bool_result(!meta.permissions().readonly(), "writable", path),
                Err(_) => HandlerResult::failed(HandlerError::Other(format!("could not stat {path}"))),
            },
            other => HandlerResult::failed(HandlerError::UnknownCondition(other.to_string())),
        }
    }

    fn enforce(&self, ctx: &HandlerCtx) -> HandlerResult {
        let path = match subject_path(ctx.subject) {
            Ok(p) => p,
            Err(e) => return HandlerResult::failed(e),
        };
        let result = match ctx.condition {
            "exists" => create_missing(path, ctx),
            "readable" | "writable" => set_writable(path, true),
            other => return HandlerResult::failed(HandlerError::UnknownCondition(other.to_string())),
        };
        match result {
            Ok(()) => HandlerResult::ok(format!("{} repaired at {path}", ctx.condition)),
            Err(e) => HandlerResult::failed(HandlerError::Other(e.to_string())),
        }
    }
}

fn bool_result(ok: bool, condition: &str, path: &str) -> HandlerResult {
    if ok {
        HandlerResult::ok(format!("{condition} satisfied for {path}"))
    } else {
        HandlerResult::failed(HandlerError::Other(format!("{condition} not satisfied for {path}")))
    }
}

fn create_missing(path: &str, ctx: &HandlerCtx) -> std::io::Result<()> {
    let p = Path::new(path);
    if p.exists() {
        return Ok(());
    }
    match ctx.subject {
        crate::ast::ResourceRef::Inline {
            res_type: crate::ast::ResourceType::Directory,
            ..
        } => fs::create_dir_all(p),
        _ => {
            if let Some(parent) = p.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(p, [])
        }
    }
}

fn set_writable(path: &str, writable: bool) -> std::io::Result<()> {
    let meta = fs::metadata(path)?;
    let mut perms = meta.permissions();
    perms.set_readonly(!writable);
    fs::set_permissions(path, perms)
}
