//! `scheduled` on `cron` subjects. Reads and writes the invoking user's
//! crontab via `crontab -l`/`crontab -`, using a marker line
//! `# EnsuraScript: <jobname>` immediately preceding the schedule/command
//! line so re-installation is idempotent: the marked pair is replaced,
//! everything else in the crontab is left untouched.

use std::io::Write as _;
use std::process::{Command, Stdio};

use crate::error::HandlerError;

use super::{subject_path, Handler, HandlerCtx, HandlerResult};

pub struct CronHandler;

impl Handler for CronHandler {
    fn name(&self) -> &'static str {
        "cron.native"
    }

    fn check(&self, ctx: &HandlerCtx) -> HandlerResult {
        let job = match subject_path(ctx.subject) {
            Ok(p) => p,
            Err(e) => return HandlerResult::failed(e),
        };
        let Some(schedule) = ctx.args.get("schedule") else {
            return HandlerResult::failed(HandlerError::MissingArgument("schedule".to_string()));
        };
        let Some(command) = ctx.args.get("command") else {
            return HandlerResult::failed(HandlerError::MissingArgument("command".to_string()));
        };
        match read_crontab() {
            Ok(body) => {
                let marker = marker_line(job);
                let wanted = schedule_line(schedule, command);
                if has_entry(&body, &marker, &wanted) {
                    HandlerResult::ok(format!("cron job `{job}` already scheduled"))
                } else {
                    HandlerResult::failed(HandlerError::Other(format!("cron job `{job}` is not installed as specified")))
                }
            }
            Err(e) => HandlerResult::failed(e),
        }
    }

    fn enforce(&self, ctx: &HandlerCtx) -> HandlerResult {
        let job = match subject_path(ctx.subject) {
            Ok(p) => p,
            Err(e) => return HandlerResult::failed(e),
        };
        let Some(schedule) = ctx.args.get("schedule") else {
            return HandlerResult::failed(HandlerError::MissingArgument("schedule".to_string()));
        };
        let Some(command) = ctx.args.get("command") else {
            return HandlerResult::failed(HandlerError::MissingArgument("command".to_string()));
        };
        let body = match read_crontab() {
            Ok(b) => b,
            Err(e) => return HandlerResult::failed(e),
        };
        let updated = replace_entry(&body, &marker_line(job), &schedule_line(schedule, command));
        match write_crontab(&updated) {
            Ok(()) => HandlerResult::ok(format!("cron job `{job}` installed")),
            Err(e) => HandlerResult::failed(e),
        }
    }
}

fn marker_line(job: &str) -> String {
    format!("# EnsuraScript: {job}")
}

fn schedule_line(schedule: &str, command: &str) -> String {
    format!("{schedule} {command}")
}

fn has_entry(body: &str, marker: &str, wanted: &str) -> bool {
    let lines: Vec<&str> = body.lines().collect();
    lines
        .iter()
        .position(|l| *l == marker)
        .and_then(|i| lines.get(i + 1))
        .is_some_and(|l| *l == wanted)
}

/// Strips the existing marker/schedule pair for this job (if any) and
/// appends the new pair at the end, leaving every other line untouched.
fn replace_entry(body: &str, marker: &str, wanted: &str) -> String {
    let mut out = Vec::new();
    let lines: Vec<&str> = body.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        if lines[i] == marker {
            i += 2; // skip marker + its schedule line
            continue;
        }
        out.push(lines[i]);
        i += 1;
    }
    out.push(marker);
    out.push(wanted);
    out.join("\n") + "\n"
}

fn read_crontab() -> Result<String, HandlerError> {
    let output = Command::new("crontab")
        .arg("-l")
        .output()
        .map_err(|e| HandlerError::Other(format!("could not invoke crontab: {e}")))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        // An empty/nonexistent crontab exits non-zero with "no crontab for <user>".
        Ok(String::new())
    }
}

fn write_crontab(body: &str) -> Result<(), HandlerError> {
    let mut child = Command::new("crontab")
        .arg("-")
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|e| HandlerError::Other(format!("could not invoke crontab: {e}")))?;
    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(body.as_bytes())
        .map_err(|e| HandlerError::Other(e.to_string()))?;
    let status = child
        .wait()
        .map_err(|e| HandlerError::Other(format!("crontab install failed: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(HandlerError::Other("crontab exited with a non-zero status".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_entry_swaps_only_the_marked_pair() {
        let body = "0 0 * * * /usr/bin/true\n# EnsuraScript: backup\n0 3 * * * /bin/backup.sh\n";
        let updated = replace_entry(body, "# EnsuraScript: backup", "0 4 * * * /bin/backup.sh");
        assert!(updated.contains("0 0 * * * /usr/bin/true"));
        assert!(updated.contains("0 4 * * * /bin/backup.sh"));
        assert!(!updated.contains("0 3 * * *"));
        assert_eq!(updated.matches("# EnsuraScript: backup").count(), 1);
    }

    #[test]
    fn has_entry_detects_installed_marker_pair() {
        let body = "# EnsuraScript: backup\n0 3 * * * /bin/backup.sh\n";
        assert!(has_entry(body, "# EnsuraScript: backup", "0 3 * * * /bin/backup.sh"));
        assert!(!has_entry(body, "# EnsuraScript: backup", "0 4 * * * /bin/backup.sh"));
    }
}
