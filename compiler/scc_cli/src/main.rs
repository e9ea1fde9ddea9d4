//! scc command-line interface
//!
//! Reads C-family sources and emits either System-V x86-64 assembly text
//! or a WebAssembly binary module.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use scc_cli::{compile_sources, CompileResult, Target};
use scc_common::SourceMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

/// The scc compiler driver
#[derive(Parser)]
#[command(name = "scc")]
#[command(about = "A C-subset compiler targeting x86-64 assembly and WebAssembly")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Input files; '-' or no argument reads from standard input
    inputs: Vec<String>,

    /// Output file (defaults to a.s for native, a.wasm for wasm)
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// Symbols to export (wasm target only); comma-separated or repeated
    #[arg(short = 'e', value_delimiter = ',')]
    exports: Vec<String>,

    /// Emission target
    #[arg(long, value_enum, default_value_t = TargetArg::X86_64)]
    target: TargetArg,

    /// Emit progress diagnostics to standard error
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TargetArg {
    #[value(name = "x86_64")]
    X86_64,
    Wasm,
}

impl From<TargetArg> for Target {
    fn from(value: TargetArg) -> Self {
        match value {
            TargetArg::X86_64 => Target::X86_64,
            TargetArg::Wasm => Target::Wasm,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("scc: error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let target = Target::from(cli.target);

    match target {
        Target::Wasm if cli.exports.is_empty() => {
            bail!("the wasm target requires at least one exported symbol (-e<name>)")
        }
        Target::X86_64 if !cli.exports.is_empty() => {
            bail!("-e is only meaningful for the wasm target")
        }
        _ => {}
    }

    let mut sources = SourceMap::new();
    if cli.inputs.is_empty() {
        sources.add("<stdin>", read_stdin()?);
    } else {
        for input in &cli.inputs {
            if input == "-" {
                sources.add("<stdin>", read_stdin()?);
            } else {
                let text = std::fs::read_to_string(input)
                    .with_context(|| format!("cannot read '{}'", input))?;
                sources.add(input.as_str(), text);
            }
        }
    }

    let result = compile_sources(&sources, target, &cli.exports);
    report(&result, &sources);

    if !result.succeeded() {
        return Ok(ExitCode::FAILURE);
    }

    let output = cli
        .output
        .unwrap_or_else(|| PathBuf::from(target.default_output()));
    let Some(bytes) = result.output else {
        bail!("compilation produced no output");
    };
    std::fs::write(&output, bytes)
        .with_context(|| format!("cannot write '{}'", output.display()))?;
    Ok(ExitCode::SUCCESS)
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("cannot read standard input")?;
    Ok(text)
}

/// Render diagnostics one per line as `file:line:column: severity:
/// message`, then the aggregate count.
fn report(result: &CompileResult, sources: &SourceMap) {
    for diagnostic in &result.diagnostics.messages {
        eprintln!("{}", diagnostic.render(sources));
    }
    let errors = result.diagnostics.error_count();
    if errors > 0 {
        eprintln!("{} error{} generated", errors, if errors == 1 { "" } else { "s" });
    }
}
