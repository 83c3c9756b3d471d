//! qail-synth: the query synthesis CLI
//!
//! # Usage
//!
//! ```bash
//! # Expand a clause-kind config into concrete specifications
//! qail-synth expand --tables tables.json --db farm --spec-config config.json -n 200 -o specs.json
//!
//! # Generate queries for every specification
//! qail-synth generate --tables tables.json --db farm --specs specs.json -o queries.json
//!
//! # Inspect the FK join graph
//! qail-synth joins --tables tables.json --db farm
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use qail_synth::config::SynthConfig;
use qail_synth::output;
use qail_synth::prelude::*;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qail-synth")]
#[command(version)]
#[command(about = "Shape-driven SQL query synthesis", long_about = None)]
#[command(after_help = "EXAMPLES:
    qail-synth expand --tables tables.json --db farm --spec-config config.json -n 200 -o specs.json
    qail-synth generate --tables tables.json --db farm --specs specs.json --seed 7
    qail-synth hash spec.json")]
struct Cli {
    /// Configuration file (defaults to ./qail-synth.toml)
    #[arg(short, long, global = true, env = "QAIL_SYNTH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate queries from a specification file
    Generate {
        /// Spider-format table definitions
        #[arg(long)]
        tables: Option<PathBuf>,
        /// Database id inside the table definitions
        #[arg(long)]
        db: String,
        /// Specification file ({db_id: {hash: spec}})
        #[arg(long)]
        specs: Option<PathBuf>,
        /// Seed of the random generator
        #[arg(long)]
        seed: Option<u64>,
        /// Draw a single query per specification
        #[arg(long)]
        random: bool,
        /// Output file (prints to stdout when absent)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Expand a clause-kind config into a specification file
    Expand {
        #[arg(long)]
        tables: Option<PathBuf>,
        #[arg(long)]
        db: String,
        /// Expander input (JSON)
        #[arg(long)]
        spec_config: PathBuf,
        /// Number of specifications to draw
        #[arg(short = 'n', long)]
        count: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the join graph of a database
    Joins {
        #[arg(long)]
        tables: Option<PathBuf>,
        #[arg(long)]
        db: String,
    },
    /// Print the content hash of a specification
    Hash {
        /// JSON file holding one specification
        spec: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match SynthConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };
    init_tracing(&config, cli.verbose);

    if let Err(e) = run(cli.command, &config) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(config: &SynthConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("qail_synth=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("qail_synth={}", config.run.log_level)))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands, config: &SynthConfig) -> Result<()> {
    match command {
        Commands::Generate {
            tables,
            db,
            specs,
            seed,
            random,
            output,
        } => {
            let catalog = load_catalog(tables.as_deref(), config)?;
            let schema = catalog.get(&db)?;
            let specs_path = specs
                .or_else(|| config.files.specs.clone())
                .context("no specification file; pass --specs or set files.specs")?;
            let specs = SpecSet::from_file(&specs_path, &db)?;
            let seed = seed.unwrap_or(config.run.seed);
            let random = random || config.run.random_choice;

            let synthesis = qail_synth::synthesize(schema, &specs, seed, random);
            let rows = &synthesis.rows;
            let total: usize = rows.iter().map(|r| r.queries.lines().count()).sum();
            match output.or_else(|| config.files.output.clone()) {
                Some(path) => {
                    output::write(&path, rows)?;
                    println!(
                        "{} {} queries from {} specifications → {}",
                        "✓".green(),
                        total,
                        rows.len(),
                        path.display().to_string().cyan()
                    );
                }
                None => println!("{}", output::to_json(rows)?),
            }
            for (key, message) in &synthesis.failed {
                eprintln!("{} {} {}", "✗".red(), key.as_str().yellow(), message);
            }
            if !synthesis.failed.is_empty() {
                anyhow::bail!("{} specifications failed", synthesis.failed.len());
            }
        }
        Commands::Expand {
            tables,
            db,
            spec_config,
            count,
            seed,
            output,
        } => {
            let catalog = load_catalog(tables.as_deref(), config)?;
            let schema = catalog.get(&db)?;
            let spec_config = SpecConfig::from_file(&spec_config)?;
            let graph = JoinGraph::from_schema(schema);
            let mut rng = seeded(seed.unwrap_or(config.run.seed));
            let count = count.unwrap_or(config.expand.spec_count);
            let set = SpecExpander::new(&graph).expand(&db, &spec_config, count, &mut rng)?;
            let json = set.to_json()?;
            match output.or_else(|| config.files.specs.clone()) {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    println!(
                        "{} {} specifications → {}",
                        "✓".green(),
                        set.len(),
                        path.display().to_string().cyan()
                    );
                }
                None => println!("{}", json),
            }
        }
        Commands::Joins { tables, db } => {
            let catalog = load_catalog(tables.as_deref(), config)?;
            let schema = catalog.get(&db)?;
            show_joins(schema);
        }
        Commands::Hash { spec } => {
            let content = std::fs::read_to_string(&spec)
                .with_context(|| format!("cannot read {}", spec.display()))?;
            let spec: QuerySpec = serde_json::from_str(&content)?;
            println!("{}", spec.content_hash());
        }
    }
    Ok(())
}

fn load_catalog(tables: Option<&Path>, config: &SynthConfig) -> Result<SchemaCatalog> {
    let path = tables
        .map(Path::to_path_buf)
        .or_else(|| config.files.tables.clone())
        .context("no table definitions; pass --tables or set files.tables")?;
    Ok(SchemaCatalog::from_tables_json_file(&path)?)
}

fn show_joins(schema: &SchemaContext) {
    let graph = JoinGraph::from_schema(schema);
    println!("{} {}", "Database:".cyan().bold(), schema.db_id());
    println!();
    if graph.edges().is_empty() {
        println!("{}", "(no foreign keys)".dimmed());
        return;
    }
    for edge in graph.edges() {
        println!("  {} {}", "•".yellow(), edge.condition());
    }
    println!();
    for (i, component) in graph.components().iter().enumerate() {
        println!("  {} {}", format!("group {}:", i + 1).dimmed(), component.join(", "));
    }
    println!();
    println!("{} {}", "Max joins:".green(), max_join_arity(&graph));
}
