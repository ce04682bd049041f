//! bayesgen CLI - build, analyze and inspect generators in a host database
//!
//! Usage:
//!   bayesgen [--db <file>] [--config <file>] generators
//!   bayesgen create <name> --table <table> --schema "<column> <stattype>, ..."
//!   bayesgen init <generator> [--models <n>]
//!   bayesgen analyze <generator> [--iterations <n>] [--checkpoint-every <n>] [--max-seconds <s>]
//!   bayesgen dependence <generator>
//!   bayesgen simulate <generator> --columns <a,b> [-n <count>]
//!
//! Examples:
//!   bayesgen --db people.db create people_gen --table people --schema "age numerical, city categorical"
//!   bayesgen --db people.db init people_gen --models 16
//!   bayesgen --db people.db analyze people_gen --iterations 200 --checkpoint-every 20

use bayesgen::{AnalyzeOptions, MixtureMetamodel, Result, Session, Settings};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bayesgen")]
#[command(about = "bayesgen - generative models over SQLite tables")]
#[command(version)]
struct Cli {
    /// Host database file (required unless database.path is set)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Settings file (defaults to $BAYESGEN_CONFIG or bayesgen.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List generators
    Generators,

    /// Create a mixture generator over a table
    Create {
        /// Generator name
        name: String,

        /// Base table
        #[arg(short, long)]
        table: String,

        /// Column schema, e.g. "age numerical, city categorical"
        #[arg(short, long)]
        schema: String,
    },

    /// Initialize models for a generator
    Init {
        generator: String,

        /// Number of models (defaults to models.count in the settings)
        #[arg(short, long)]
        models: Option<u32>,
    },

    /// Run analysis on a generator's models
    Analyze {
        generator: String,

        #[arg(short, long)]
        iterations: Option<usize>,

        #[arg(long)]
        checkpoint_every: Option<usize>,

        #[arg(long)]
        max_seconds: Option<u64>,
    },

    /// Print pairwise column dependence probabilities
    Dependence { generator: String },

    /// Draw joint samples of columns
    Simulate {
        generator: String,

        /// Comma-separated column names
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,

        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let session = match open_session(&cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error opening session: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Generators => cmd_generators(&session),
        Commands::Create {
            name,
            table,
            schema,
        } => cmd_create(&session, &name, &table, &schema),
        Commands::Init { generator, models } => cmd_init(&session, &generator, models),
        Commands::Analyze {
            generator,
            iterations,
            checkpoint_every,
            max_seconds,
        } => cmd_analyze(&session, &generator, iterations, checkpoint_every, max_seconds),
        Commands::Dependence { generator } => cmd_dependence(&session, &generator),
        Commands::Simulate {
            generator,
            columns,
            count,
        } => cmd_simulate(&session, &generator, &columns, count),
    };

    let closed = session.close();

    match result.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn open_session(cli: &Cli) -> Result<Session> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };
    if let Some(db) = &cli.db {
        settings.database.path = Some(db.display().to_string());
    }
    // Every command is its own process; an in-memory database would
    // discard its work.
    settings.database.required_path()?;

    let mut session = Session::from_settings(settings)?;
    session.register_metamodel(Arc::new(MixtureMetamodel::new()))?;
    Ok(session)
}

fn cmd_generators(session: &Session) -> Result<()> {
    let generators = session.host().generators()?;
    if generators.is_empty() {
        println!("No generators defined.");
        return Ok(());
    }

    println!("Generators:");
    for generator in &generators {
        println!(
            "  - {} (table: {}, metamodel: {})",
            generator.name, generator.table, generator.metamodel
        );
        for column in session.generator_columns(generator.id)? {
            println!("      {} {} {}", column.colno, column.name, column.stattype);
        }
    }
    Ok(())
}

fn cmd_create(session: &Session, name: &str, table: &str, schema: &str) -> Result<()> {
    let generator_id = session.create_generator_from_spec(name, table, MixtureMetamodel::NAME, schema)?;
    println!("Created generator {} (id {})", name, generator_id);
    Ok(())
}

fn cmd_init(session: &Session, generator: &str, models: Option<u32>) -> Result<()> {
    let generator_id = session.generator_id(generator)?;
    match models {
        Some(count) => {
            let modelnos: Vec<u32> = (0..count).collect();
            let config = session.settings().models.config.clone();
            session.initialize_models(generator_id, &modelnos, &config)?;
            println!("Initialized {} models for {}", count, generator);
        }
        None => {
            session.initialize_default_models(generator_id)?;
            println!(
                "Initialized {} models for {}",
                session.settings().models.count,
                generator
            );
        }
    }
    Ok(())
}

fn cmd_analyze(
    session: &Session,
    generator: &str,
    iterations: Option<usize>,
    checkpoint_every: Option<usize>,
    max_seconds: Option<u64>,
) -> Result<()> {
    let generator_id = session.generator_id(generator)?;

    let mut options: AnalyzeOptions = session.default_analyze_options();
    if let Some(n) = iterations {
        options = options.with_iterations(n);
    }
    if let Some(n) = checkpoint_every {
        options = options.with_checkpoint_every(n);
    }
    if let Some(s) = max_seconds {
        options = options.with_max_seconds(s);
    }

    let report = session.analyze_models(generator_id, &options)?;
    println!(
        "Analyzed {}: {} iterations, {} committed in {} checkpoints ({:?})",
        generator, report.iterations, report.committed_iterations, report.checkpoints, report.stop
    );
    Ok(())
}

fn cmd_dependence(session: &Session, generator: &str) -> Result<()> {
    let generator_id = session.generator_id(generator)?;
    let columns = session.generator_columns(generator_id)?;

    for (i, a) in columns.iter().enumerate() {
        for b in &columns[i + 1..] {
            let p = session.column_dependence_probability(generator_id, a.colno, b.colno)?;
            println!("{:>8.3}  {} ~ {}", p, a.name, b.name);
        }
    }
    Ok(())
}

fn cmd_simulate(session: &Session, generator: &str, names: &[String], count: usize) -> Result<()> {
    let generator_id = session.generator_id(generator)?;
    let columns = session.generator_columns(generator_id)?;

    let mut colnos = Vec::with_capacity(names.len());
    for name in names {
        let column = columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| bayesgen::Error::invalid(format!("no modelled column {}", name)))?;
        colnos.push(column.colno);
    }

    println!("{}", names.join("\t"));
    for row in session.simulate(generator_id, &[], &colnos, count)? {
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        println!("{}", cells.join("\t"));
    }
    Ok(())
}
