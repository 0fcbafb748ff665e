//! Ridgeline model runner CLI
//!
//! Run a reference landscape model from a JSON parameter file.

use clap::Parser;
use ridgeline_sim::{ModelId, ModelRunner, RunResult, SimEnvironment};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Ridgeline model runner CLI
#[derive(Parser, Debug)]
#[command(name = "ridgeline-sim")]
#[command(about = "Run a ridgeline landscape evolution model", long_about = None)]
struct Args {
    /// JSON parameter file
    #[arg(short, long)]
    input: String,

    /// Model to run (basic, basic_st)
    #[arg(short, long, default_value = "basic")]
    model: String,

    /// Overrides random_seed from the input file
    #[arg(short, long)]
    seed: Option<u64>,

    /// Simulate a batch job with this many minutes of wall time
    #[arg(long)]
    simulated_walltime: Option<u64>,

    /// Virtual minutes charged per output under --simulated-walltime
    #[arg(long, default_value = "1")]
    minutes_per_output: f64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for scripting
    #[arg(long)]
    json: bool,

    /// Export a run summary to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn summary_json(result: &RunResult) -> serde_json::Value {
    serde_json::json!({
        "model": result.model.name(),
        "stochastic": result.model.is_stochastic(),
        "seed": result.seed,
        "completed": result.completed(),
        "final_time": result.final_time,
        "outputs": result.outputs,
        "mean_elevation_change": result.mean_elevation_change,
        "max_elevation": result.max_elevation,
        "rain_events": result.rain_events,
    })
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Ridgeline model runner v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let model: ModelId = args.model.parse().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("Available models:");
        for model in ModelId::all() {
            eprintln!("  {:<10} {}", model.name(), model.description());
        }
        std::process::exit(2);
    });

    let mut runner = match ModelRunner::from_file(&args.input) {
        Ok(runner) => runner,
        Err(e) => {
            error!("✗ {}", e);
            std::process::exit(1);
        }
    };
    if let Some(seed) = args.seed {
        runner = runner.with_seed(seed);
    }
    if let Some(minutes) = args.simulated_walltime {
        runner = runner
            .with_environment(SimEnvironment::new().with_walltime(minutes))
            .with_minutes_per_output(args.minutes_per_output);
    }
    if let Some(path) = &args.export {
        runner = runner.with_export(path);
    }

    let result = match runner.run(model) {
        Ok(result) => result,
        Err(e) => {
            error!("✗ {} failed: {}", model.name(), e);
            std::process::exit(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&summary_json(&result)) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else if result.completed() {
        info!(
            "✓ {} (seed={}) finished at t={} after {} outputs",
            model.name(),
            result.seed,
            result.final_time,
            result.outputs
        );
    } else {
        info!(
            "✓ {} (seed={}) checkpointed at t={}; rerun with load_from_checkpoint to resume",
            model.name(),
            result.seed,
            result.final_time
        );
    }
}
