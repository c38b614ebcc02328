use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use simple_logger::SimpleLogger;

use rdl_core::{
    CollectingPrinter, CompileError, ComponentKind, Design, Diagnostic, Node, ParseUnit,
    RdlCompiler, Value,
};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Register-description elaborator.
#[derive(Parser)]
#[command(name = "rdlc", version, about = "Register-description elaborator")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ElabArgs {
    /// Parse-tree JSON files, compiled in order
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Top-level addrmap to elaborate (default: the last one defined)
    #[arg(long)]
    top: Option<String>,
    /// Instance name of the top node (default: the type name)
    #[arg(long)]
    inst_name: Option<String>,
    /// Top-level parameter override, NAME=VALUE
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Elaborate and print the address map
    Elaborate(ElabArgs),
    /// Elaborate and report diagnostics only
    Check(ElabArgs),
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    // a second logger cannot be installed; nothing else to do then
    let _ = SimpleLogger::new().with_level(level).init();

    match cli.command {
        Commands::Elaborate(args) => cmd_elaborate(&args, true, cli.output, cli.quiet),
        Commands::Check(args) => cmd_elaborate(&args, false, cli.output, cli.quiet),
    }
}

fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let value = match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => parse_int(raw).map_or_else(|| Value::Str(raw.to_owned()), Value::Int),
    };
    Ok((name.to_owned(), value))
}

fn parse_int(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn load_unit(path: &Path) -> Result<ParseUnit, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let mut unit: ParseUnit = serde_json::from_str(&text)
        .map_err(|e| format!("{}: invalid parse tree: {}", path.display(), e))?;
    if unit.file.is_empty() {
        unit.file = path.display().to_string();
    }
    Ok(unit)
}

fn cmd_elaborate(args: &ElabArgs, listing: bool, output: OutputFormat, quiet: bool) {
    let printer = CollectingPrinter::new();
    let mut compiler = RdlCompiler::with_printer(Box::new(printer.clone()));

    let result = run(&mut compiler, args);
    let diagnostics = printer.collected();

    match result {
        Ok(design) => {
            report_diagnostics(&diagnostics, output, quiet);
            if listing {
                print_design(&design, output);
            }
        }
        Err(Failure::Compile(e)) => {
            match output {
                OutputFormat::Json => {
                    let err_json = serde_json::to_string_pretty(&e.to_json_value())
                        .unwrap_or_else(|_| format!("{{\"error\": \"{:?}\"}}", e));
                    eprintln!("{}", err_json);
                }
                OutputFormat::Text => {
                    if !quiet {
                        for d in &diagnostics {
                            eprintln!("{}", d);
                        }
                        eprintln!("error: {}", e);
                    }
                }
            }
            process::exit(1);
        }
        Err(Failure::Input(msg)) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

enum Failure {
    Input(String),
    Compile(CompileError),
}

fn run(compiler: &mut RdlCompiler, args: &ElabArgs) -> Result<Design, Failure> {
    for path in &args.files {
        let unit = load_unit(path).map_err(Failure::Input)?;
        compiler.compile_unit(&unit).map_err(Failure::Compile)?;
    }
    let params: BTreeMap<String, Value> = args.params.iter().cloned().collect();
    compiler
        .elaborate(args.top.as_deref(), args.inst_name.as_deref(), &params)
        .map_err(Failure::Compile)
}

fn report_diagnostics(diagnostics: &[Diagnostic], output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    for d in diagnostics {
        match output {
            OutputFormat::Text => eprintln!("{}", d),
            OutputFormat::Json => eprintln!("{}", d.to_json_value()),
        }
    }
}

fn print_design(design: &Design, output: OutputFormat) {
    match output {
        OutputFormat::Text => {
            let top = design.top();
            print_node(&top, 0);
        }
        OutputFormat::Json => {
            let nodes: Vec<serde_json::Value> = design.nodes().map(|n| node_json(&n)).collect();
            let pretty = serde_json::to_string_pretty(&serde_json::Value::Array(nodes))
                .unwrap_or_else(|e| format!("serialization error: {}", e));
            println!("{}", pretty);
        }
    }
}

fn print_node(node: &Node<'_>, depth: usize) {
    let indent = "  ".repeat(depth);
    match node.kind() {
        ComponentKind::Field => {
            if let (Some(msb), Some(lsb)) = (node.msb(), node.lsb()) {
                println!("{}[{}:{}] {}", indent, msb, lsb, node.name());
            }
        }
        ComponentKind::Signal => println!("{}signal {}", indent, node.name()),
        kind => {
            let address = node.absolute_address().unwrap_or(0);
            let mut label = node.name().to_owned();
            if let Some(dims) = node.array_dimensions() {
                for d in dims {
                    label.push_str(&format!("[{}]", d));
                }
            }
            println!(
                "{}{:#010x} {} ({}, {} bytes)",
                indent,
                address,
                label,
                kind,
                node.total_size()
            );
        }
    }
    for child in node.children() {
        print_node(&child, depth + 1);
    }
}

fn node_json(node: &Node<'_>) -> serde_json::Value {
    serde_json::json!({
        "absolute_address": node.absolute_address(),
        "kind":             node.kind(),
        "lsb":              node.lsb(),
        "msb":              node.msb(),
        "path":             node.path(),
        "size":             node.total_size(),
        "stride":           node.array_stride(),
    })
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_parse_integers_booleans_and_strings() {
        assert_eq!(parse_param("N=4").unwrap(), ("N".into(), Value::Int(4)));
        assert_eq!(parse_param("BASE=0x100").unwrap().1, Value::Int(0x100));
        assert_eq!(parse_param("EN=true").unwrap().1, Value::Bool(true));
        assert_eq!(parse_param("TAG=abc").unwrap().1, Value::Str("abc".into()));
        assert!(parse_param("missing").is_err());
    }
}
