//! `flowlog`: parse a Datalog program, compile it through the RAM/LVM
//! pipeline, evaluate it to a fixpoint, and print the resulting relations.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use flowlog::execution::QueryTimeout;
use flowlog::lvm::{evaluate, IoDirective, IoDirectiveSet, Status};
use flowlog::{compile_program, parser, Config, RecordPool, SymbolTable};

#[derive(Parser, Debug)]
#[command(name = "flowlog", about = "Datalog compiler and bytecode evaluator")]
struct Cli {
    /// Path to a Datalog source file.
    program: PathBuf,

    /// Path to a TOML config file layered under the built-in defaults
    /// (see `Config::load`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only print these relations (comma-separated); default prints every
    /// relation the program declares.
    #[arg(long, value_delimiter = ',')]
    relation: Vec<String>,

    /// Load a relation's initial facts from a CSV/Parquet file:
    /// `name=path/to/file.csv`. May be repeated.
    #[arg(long = "load", value_name = "NAME=PATH")]
    loads: Vec<String>,

    /// Write a relation's final contents to a CSV/Parquet file:
    /// `name=path/to/file.csv`. May be repeated.
    #[arg(long = "store", value_name = "NAME=PATH")]
    stores: Vec<String>,

    /// Query timeout in milliseconds; 0 disables the timeout.
    #[arg(long, default_value_t = 0)]
    timeout_ms: u64,
}

fn parse_io_directive(spec: &str) -> Result<(String, String), String> {
    spec.split_once('=')
        .map(|(name, path)| (name.to_string(), path.to_string()))
        .ok_or_else(|| format!("expected NAME=PATH, got `{spec}`"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(&path.to_string_lossy())?,
        None => Config::load()?,
    };
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_default();
    if config.logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let source = std::fs::read_to_string(&cli.program)?;
    let program = parser::parse_program(&source).map_err(anyhow::Error::msg)?;

    let symtab = SymbolTable::new();
    let compiled = compile_program(&program, &symtab, config.ram.max_transform_iterations)?;

    let mut io = IoDirectiveSet::default();
    for spec in &cli.loads {
        let (name, path) = parse_io_directive(spec).map_err(anyhow::Error::msg)?;
        io.load.insert(symtab.intern(&name).0, IoDirective { path });
    }
    for spec in &cli.stores {
        let (name, path) = parse_io_directive(spec).map_err(anyhow::Error::msg)?;
        io.store.insert(symtab.intern(&name).0, IoDirective { path });
    }

    let timeout = if cli.timeout_ms == 0 {
        QueryTimeout::infinite()
    } else {
        QueryTimeout::new(Some(Duration::from_millis(cli.timeout_ms)))
    };
    let cancel = timeout.cancel_handle();

    let pool = RecordPool::default();
    let outcome = evaluate(&compiled, &pool, &symtab, &io, &cancel)?;

    match outcome.status {
        Status::Completed => {}
        Status::Cancelled | Status::TimedOut => {
            eprintln!("query cancelled (timeout exceeded)");
            std::process::exit(1);
        }
    }

    let wanted: Vec<&str> = program
        .idbs()
        .iter()
        .map(String::as_str)
        .filter(|name| cli.relation.is_empty() || cli.relation.iter().any(|r| r == name))
        .collect();

    for name in wanted {
        let Some(sym) = symtab.lookup(name) else {
            continue;
        };
        let Some(relation) = outcome.relations.get(sym) else {
            continue;
        };
        for tuple in relation.scan() {
            let cols: Vec<String> = tuple.as_slice().iter().map(|v| format!("{v:?}")).collect();
            println!("{name}({})", cols.join(", "));
        }
    }

    Ok(())
}
