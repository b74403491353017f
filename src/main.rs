use anyhow::Context;
use clap::Parser;
use denial_constraints::{discover, discover_unique, reduce, Table};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Discover denial constraints and unique keys in a typed CSV table.
///
/// The table's header must tag each column with its type, either as
/// `name(Type)` or `name Type`, where `Type` is one of `String`, `str`,
/// `Integer`, `Int`, `int`, `Double`, `Float` or `float`.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to the CSV table.
    table: PathBuf,

    /// How many rows to sample from the top of the table.
    #[arg(long, default_value_t = 2048)]
    rows: usize,

    /// Maximum number of predicates per constraint.
    #[arg(long, default_value_t = 4)]
    depth: usize,

    /// Report only all-equality constraints (composite unique keys).
    #[arg(long)]
    unique: bool,

    /// Drop constraints implied by another reported constraint.
    #[arg(long)]
    reduce: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let table = Table::from_csv_path(&args.table, args.rows)
        .with_context(|| format!("failed to load {}", args.table.display()))?;

    let mut constraints = if args.unique {
        discover_unique(&table, args.depth)?
    } else {
        discover(&table, args.depth)?
    };
    if args.reduce {
        constraints = reduce(&constraints);
    }

    let mut lines: Vec<String> = constraints
        .iter()
        .map(|constraint| constraint.canonical(&table))
        .collect();
    lines.sort();
    for line in &lines {
        println!("{}", line);
    }
    Ok(())
}
