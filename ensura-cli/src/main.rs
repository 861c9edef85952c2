//! `ensura`: the command-line driver for the EnsuraScript compiler and
//! enforcement runtime. A thin wrapper — all real logic lives in
//! `ensura-core`; this binary parses arguments, wires the pipeline
//! together, and prints human or `--json` output with the right exit code.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ensura_core::compile::{compile, CompileError};
use ensura_core::config::RuntimeConfig;
use ensura_core::handlers::HandlerRegistry;
use ensura_core::runtime::{CancelToken, RunResult, Runtime};
use ensura_core::Plan;

#[derive(Parser)]
#[command(name = "ensura", about = "EnsuraScript compiler and enforcement runtime")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Compile a `.ens` source file to a Plan and print it
    Compile {
        file: PathBuf,
        #[arg(long)]
        json: bool,
        #[arg(long, help = "emit the dependency graph as Graphviz DOT instead of a plan")]
        graph: bool,
    },
    /// Compile and print a human-readable explanation of each planned step
    Explain {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Compile and print the ordered plan
    Plan {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Compile and continuously enforce the plan until cancelled
    Run {
        file: PathBuf,
        #[arg(long, default_value = "30s", help = "pass interval, e.g. `30s`, `5m`")]
        interval: String,
        #[arg(long, default_value_t = 3)]
        retries: u32,
    },
    /// Compile and run a single dry pass; nonzero exit if anything is violated
    Check {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print version information
    Version,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit = match cli.cmd {
        Cmd::Compile { file, json, graph } => cmd_compile(&file, json, graph),
        Cmd::Explain { file, json } => cmd_explain(&file, json),
        Cmd::Plan { file, json } => cmd_plan(&file, json),
        Cmd::Run { file, interval, retries } => cmd_run(&file, &interval, retries),
        Cmd::Check { file, json } => cmd_check(&file, json),
        Cmd::Version => {
            println!("ensura {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    };

    match exit {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn read_source(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("reading source file {}", file.display()))
}

fn compile_or_report(file: &Path) -> Result<Plan, u8> {
    let src = match read_source(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Err(1);
        }
    };
    let filename = file.display().to_string();
    match compile(&src, &filename) {
        Ok(plan) => Ok(plan),
        Err(err) => {
            print_compile_error(&err);
            Err(1)
        }
    }
}

fn print_compile_error(err: &CompileError) {
    match err {
        CompileError::Lex(errs) => errs.iter().for_each(|e| eprintln!("error: {e}")),
        CompileError::Parse(errs) => errs.iter().for_each(|e| eprintln!("error: {e}")),
        CompileError::Bind(errs) => errs.iter().for_each(|e| eprintln!("error: {e}")),
        CompileError::Imply(errs) => errs.iter().for_each(|e| eprintln!("error: {e}")),
        CompileError::Graph(errs) => errs.iter().for_each(|e| eprintln!("error: {e}")),
        CompileError::Plan(e) => eprintln!("error: {e}"),
    }
}

fn cmd_compile(file: &Path, json: bool, graph: bool) -> Result<u8> {
    if graph {
        return cmd_compile_graph(file);
    }
    match compile_or_report(file) {
        Ok(plan) => {
            print_plan(&plan, json);
            Ok(0)
        }
        Err(code) => Ok(code),
    }
}

/// `compile --graph`: emit the dependency DAG as Graphviz DOT. Recompiles
/// through the graph stage directly (rather than reusing the Plan) since the
/// Plan no longer carries edge information once topologically sorted.
fn cmd_compile_graph(file: &Path) -> Result<u8> {
    let src = match read_source(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Ok(1);
        }
    };
    let filename = file.display().to_string();
    let mut parser = ensura_core::parser::Parser::new(&src, &filename);
    let program = parser.parse_program();
    if !parser.lex_errors.is_empty() || !parser.errors.is_empty() {
        parser.lex_errors.iter().for_each(|e| eprintln!("error: {e}"));
        parser.errors.iter().for_each(|e| eprintln!("error: {e}"));
        return Ok(1);
    }
    let bound = ensura_core::binder::bind(program);
    if !bound.errors.is_empty() {
        bound.errors.iter().for_each(|e| eprintln!("error: {e}"));
        return Ok(1);
    }
    let (expanded, imply_errors) = ensura_core::imply::expand(bound.program);
    if !imply_errors.is_empty() {
        imply_errors.iter().for_each(|e| eprintln!("error: {e}"));
        return Ok(1);
    }
    let (graph, graph_errors) = ensura_core::graph::build(&expanded);
    if !graph_errors.is_empty() {
        graph_errors.iter().for_each(|e| eprintln!("error: {e}"));
        return Ok(1);
    }
    println!("{}", render_dot(&graph));
    Ok(0)
}

fn render_dot(graph: &ensura_core::graph::Graph) -> String {
    let mut out = String::from("digraph ensura {\n");
    for node in &graph.nodes {
        out.push_str(&format!(
            "  \"{}\" [label=\"{}:{}\"];\n",
            node.id, node.stmt.condition, node.subject_key
        ));
    }
    for edge in &graph.edges {
        out.push_str(&format!(
            "  \"{}\" -> \"{}\" [label=\"{:?}\"];\n",
            edge.from, edge.to, edge.kind
        ));
    }
    out.push_str("}\n");
    out
}

fn cmd_explain(file: &Path, json: bool) -> Result<u8> {
    match compile_or_report(file) {
        Ok(plan) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                for (i, step) in plan.steps.iter().enumerate() {
                    println!(
                        "{:>3}. {} [{}]{} via `{}`{}",
                        i + 1,
                        step.description,
                        step.id,
                        if step.is_invariant { " (invariant)" } else { "" },
                        step.handler,
                        if step.args.is_empty() {
                            String::new()
                        } else {
                            format!(" args={:?}", step.args)
                        }
                    );
                }
            }
            Ok(0)
        }
        Err(code) => Ok(code),
    }
}

fn cmd_plan(file: &Path, json: bool) -> Result<u8> {
    match compile_or_report(file) {
        Ok(plan) => {
            print_plan(&plan, json);
            Ok(0)
        }
        Err(code) => Ok(code),
    }
}

fn print_plan(plan: &Plan, json: bool) {
    if json {
        match serde_json::to_string_pretty(plan) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("error: failed to serialize plan: {e}"),
        }
        return;
    }
    for (i, step) in plan.steps.iter().enumerate() {
        println!(
            "{:>3}. {:<10} {} via {}",
            i + 1,
            step.condition,
            step.subject_key,
            step.handler
        );
    }
}

fn cmd_check(file: &Path, json: bool) -> Result<u8> {
    let plan = match compile_or_report(file) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };
    let config = RuntimeConfig {
        check_only: true,
        ..RuntimeConfig::default()
    };
    let registry = Arc::new(HandlerRegistry::with_defaults());
    let runtime = Runtime::new(registry, config);
    let result = runtime.check_only(&plan);
    print_run_result(&result, json);
    Ok(if result.all_satisfied() { 0 } else { 1 })
}

fn cmd_run(file: &Path, interval: &str, retries: u32) -> Result<u8> {
    let plan = match compile_or_report(file) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };
    let interval_seconds = parse_duration_seconds(interval)
        .with_context(|| format!("invalid --interval value `{interval}`"))?;
    let config = RuntimeConfig {
        interval_seconds,
        max_retries: retries,
        ..RuntimeConfig::default()
    };
    let registry = Arc::new(HandlerRegistry::with_defaults());
    let runtime = Runtime::new(registry, config);
    // No SIGINT trap here: the corpus carries no signal-handling crate to
    // ground one on, so ctrl-c terminates the process directly, same as any
    // other signal-naive CLI in this stack. `CancelToken` exists for an
    // embedder (a future LSP/service wrapper) to stop a run cleanly between
    // steps without killing the process.
    let cancel = CancelToken::new();

    let mut last_clean = true;
    runtime.run_continuous(&plan, &cancel, |result| {
        print_run_result(result, false);
        last_clean = !result.any_failed();
    });
    Ok(if last_clean { 0 } else { 1 })
}

fn parse_duration_seconds(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, suffix) = s
        .find(|c: char| !c.is_ascii_digit())
        .map(|idx| s.split_at(idx))
        .unwrap_or((s, ""));
    let n: u64 = digits.parse().with_context(|| format!("`{s}` has no numeric prefix"))?;
    let multiplier = match suffix {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => anyhow::bail!("unknown duration suffix `{other}`"),
    };
    Ok(n * multiplier)
}

fn print_run_result(result: &RunResult, json: bool) {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("error: failed to serialize run result: {e}"),
        }
        return;
    }
    for step in &result.steps {
        println!("{:?}\t{}\t{}", step.status, step.step_id, step.message);
    }
    let satisfied = result.steps.iter().filter(|s| matches!(s.status, ensura_core::runtime::StepStatus::Satisfied)).count();
    let repaired = result.steps.iter().filter(|s| matches!(s.status, ensura_core::runtime::StepStatus::Repaired)).count();
    let failed = result.steps.iter().filter(|s| matches!(s.status, ensura_core::runtime::StepStatus::Failed)).count();
    println!("-- {satisfied} satisfied, {repaired} repaired, {failed} failed --");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parsing_accepts_bare_seconds_and_suffixes() {
        assert_eq!(parse_duration_seconds("30").unwrap(), 30);
        assert_eq!(parse_duration_seconds("30s").unwrap(), 30);
        assert_eq!(parse_duration_seconds("5m").unwrap(), 300);
        assert_eq!(parse_duration_seconds("2h").unwrap(), 7200);
        assert!(parse_duration_seconds("5x").is_err());
    }

    #[test]
    fn dot_rendering_includes_every_node_and_edge() {
        let src = r#"on file "s.db" { ensure encrypted with AES:256 key "env:K" }"#;
        let mut parser = ensura_core::parser::Parser::new(src, "t.ens");
        let program = parser.parse_program();
        let bound = ensura_core::binder::bind(program);
        let (expanded, _) = ensura_core::imply::expand(bound.program);
        let (graph, _) = ensura_core::graph::build(&expanded);
        let dot = render_dot(&graph);
        assert!(dot.starts_with("digraph ensura {"));
        assert_eq!(dot.matches("->").count(), graph.edges.len());
    }

    #[test]
    fn check_on_an_already_satisfied_target_exits_zero_without_touching_it() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("s.ens");
        let target_path = dir.path().join("out.txt");
        std::fs::write(&target_path, b"already here").unwrap();
        std::fs::write(
            &script_path,
            format!(r#"on file "{}" {{ ensure exists }}"#, target_path.display()),
        )
        .unwrap();
        let code = cmd_check(&script_path, true).unwrap();
        assert_eq!(code, 0);
        assert_eq!(std::fs::read(&target_path).unwrap(), b"already here");
    }

    #[test]
    fn check_on_a_missing_target_exits_nonzero_without_creating_it() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("s.ens");
        let target_path = dir.path().join("out.txt");
        std::fs::write(
            &script_path,
            format!(r#"on file "{}" {{ ensure exists }}"#, target_path.display()),
        )
        .unwrap();
        let code = cmd_check(&script_path, true).unwrap();
        assert_eq!(code, 1, "check is a dry pass, so a violation must not be repaired");
        assert!(!target_path.exists());
    }
}
