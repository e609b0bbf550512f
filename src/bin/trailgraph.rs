//! Trailgraph CLI: build entity graphs from telemetry files.
//!
//! Usage:
//!   trailgraph build --input events.jsonl [--family edr] [--output graph.json]
//!   trailgraph build --input report.json --report
//!   trailgraph kinds --family provenance

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use trailgraph::{
    Datasource, Family, JsonLinesSource, Pipeline, PipelineConfig, ReportSource, RunSummary,
};

#[derive(Parser)]
#[command(
    name = "trailgraph",
    version,
    about = "Turn security telemetry into an entity/relation graph"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform an event file and write the graph as JSON
    Build {
        /// Event file: JSON lines, or a JSON report with --report
        #[arg(long, short)]
        input: PathBuf,
        /// Transformer family (generic, edr, provenance)
        #[arg(long)]
        family: Option<Family>,
        /// Treat the input as a single JSON report with metadata and root process
        #[arg(long)]
        report: bool,
        /// Emit one edge per (source, kind, target) with all occurrences
        #[arg(long)]
        consolidate_edges: bool,
        /// Output file (stdout when omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Config file (defaults to the user config dir)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List the event kinds a family dispatches
    Kinds {
        #[arg(long, default_value = "generic")]
        family: Family,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, String> {
    let config = match path {
        Some(path) => PipelineConfig::load(path),
        None => PipelineConfig::load_default(),
    };
    config.map_err(|e| e.to_string())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// A report may declare its own family; an explicit flag still wins
fn open_source(
    input: &Path,
    report: bool,
    flag: Option<Family>,
    configured: Family,
) -> Result<Box<dyn Datasource>, String> {
    if report {
        let source = ReportSource::open(input).map_err(|e| e.to_string())?;
        let source = match flag {
            Some(family) => source.with_family(family),
            None => source,
        };
        Ok(Box::new(source))
    } else {
        Ok(Box::new(JsonLinesSource::new(input, flag.unwrap_or(configured))))
    }
}

fn print_summary(summary: &RunSummary) {
    let totals = &summary.totals;
    eprintln!(
        "{}: {} events, {} tuples, {} new nodes, {} merged, {} skipped ({} incomplete, {} unknown, {} faulty)",
        summary.source,
        totals.events_seen,
        totals.tuples_emitted,
        summary.emitted.nodes_created,
        summary.emitted.nodes_merged,
        totals.skipped(),
        totals.skipped_incomplete,
        totals.skipped_unknown,
        totals.faulty_records,
    );
}

struct BuildArgs {
    input: PathBuf,
    family: Option<Family>,
    report: bool,
    consolidate_edges: bool,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn cmd_build(args: BuildArgs) -> i32 {
    let mut config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    config.consolidate_edges |= args.consolidate_edges;
    init_tracing(&config.log_level);

    let source = match open_source(&args.input, args.report, args.family, config.family) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let mut pipeline = Pipeline::new(source.family());
    if let Some(root) = config.root_process() {
        pipeline = pipeline.with_root_process(root);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };
    let (graph, summary) = match rt.block_on(pipeline.build_graph(source.as_ref())) {
        Ok(built) => built,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    print_summary(&summary);

    let json = match graph.to_json(config.edge_mode()) {
        Ok(j) => j,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let written = match &args.output {
        Some(path) => std::fs::write(path, json).map_err(|e| format!("{}: {}", path.display(), e)),
        None => {
            println!("{}", json);
            Ok(())
        }
    };
    match written {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_kinds(family: Family) -> i32 {
    let dispatcher = trailgraph::Dispatcher::for_family(family);
    for kind in dispatcher.kinds() {
        println!("{}", kind);
    }
    0
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Build {
            input,
            family,
            report,
            consolidate_edges,
            output,
            config,
        } => cmd_build(BuildArgs {
            input,
            family,
            report,
            consolidate_edges,
            output,
            config,
        }),
        Commands::Kinds { family } => cmd_kinds(family),
    };
    std::process::exit(code);
}
