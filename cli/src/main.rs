//! vernier-query: run queries over annotation streams

mod args;

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use vernier_analytics::{read_stream, MetadataDb, QueryProcessor};

#[derive(Parser, Debug)]
#[clap(name = "vernier-query")]
#[clap(about = "Query, aggregate and reformat annotation streams", version)]
pub struct Cli {
    /// Input files or directories; reads stdin when empty or "-"
    pub inputs: Vec<PathBuf>,

    /// Query expression (CalQL)
    #[clap(long, short = 'q')]
    pub query: Option<String>,

    /// Filter clause [-]attribute[(=<>)value]; repeatable
    #[clap(long)]
    pub select: Vec<String>,

    /// Aggregation functions, e.g. "sum(time),count()"
    #[clap(long, short = 'a')]
    pub aggregate: Option<String>,

    /// Comma-separated aggregation key attributes
    #[clap(long)]
    pub aggregate_key: Option<String>,

    /// Comma-separated attributes to print
    #[clap(long)]
    pub attributes: Option<String>,

    /// Comma-separated sort attributes
    #[clap(long)]
    pub sort_by: Option<String>,

    /// User-defined format string
    #[clap(long, short = 'f')]
    pub format: Option<String>,

    /// Title line for formatted output
    #[clap(long)]
    pub title: Option<String>,

    /// Print a human-readable table
    #[clap(long, short = 't')]
    pub table: bool,

    /// Print a region hierarchy tree
    #[clap(long, short = 'T')]
    pub tree: bool,

    /// Print JSON records
    #[clap(long, short = 'j')]
    pub json: bool,

    /// Attributes forming the tree hierarchy
    #[clap(long)]
    pub path_attributes: Option<String>,

    /// Output file (stdout when absent)
    #[clap(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Increase verbosity; repeatable
    #[clap(long, short = 'v', action = ArgAction::Count)]
    pub verbose: u8,
}

fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("reading directory {}", path.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map(|e| e == "cali").unwrap_or(false))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn process_input(
    db: &mut MetadataDb,
    pipeline: &mut QueryProcessor,
    input: impl BufRead,
    out: &mut dyn Write,
) -> Result<()> {
    let mut pipeline_error: Option<vernier_context::Error> = None;
    read_stream(db, input, |db, rec| {
        if pipeline_error.is_none() {
            if let Err(e) = pipeline.process_record(db, rec, out) {
                pipeline_error = Some(e);
            }
        }
    })?;
    match pipeline_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn run(cli: &Cli, spec: vernier_analytics::QuerySpec) -> Result<()> {
    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };

    if let (Some(title), None) = (&cli.title, &cli.format) {
        writeln!(out, "{title}")?;
    }

    let mut db = MetadataDb::new();
    let mut pipeline = QueryProcessor::new(&spec)?;

    let stdin_only = cli.inputs.is_empty()
        || (cli.inputs.len() == 1 && cli.inputs[0] == Path::new("-"));
    if stdin_only {
        process_input(&mut db, &mut pipeline, std::io::stdin().lock(), &mut out)?;
    } else {
        for path in collect_inputs(&cli.inputs)? {
            log::info!("reading {}", path.display());
            let file =
                File::open(&path).with_context(|| format!("opening {}", path.display()))?;
            process_input(&mut db, &mut pipeline, BufReader::new(file), &mut out)
                .with_context(|| format!("processing {}", path.display()))?;
        }
    }

    pipeline.flush(&db, &mut out)?;
    out.flush()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .parse_default_env()
        .init();

    let spec = match args::build_spec(&cli) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("vernier-query: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&cli, spec) {
        eprintln!("vernier-query: {e:#}");
        std::process::exit(1);
    }
}
