//! Cardiac - S1–S2 excitability sweeps on bidomain and EMI tissue.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info cardiac --config run.json --output-dir out
//! cardiac --config run.json --restart
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use cardiac_core::{
    error::Result,
    output::FileOutputs,
    run_sweep,
    solver::{SolverKind, StepObserver},
    Formulation, GrayPathmanathan, IntegratorKind, SimulatorConfig,
};

/// Cardiac tissue S1–S2 simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Resume the first sweep value from the checkpoint directory
    #[arg(long)]
    restart: bool,

    /// Directory for sample traces and potential dumps
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Tissue formulation (bidomain or emi)
    #[arg(short, long, value_parser = parse_formulation)]
    formulation: Option<Formulation>,

    /// Gate integrator (forward-euler or rush-larsen)
    #[arg(short, long, value_parser = parse_integrator)]
    integrator: Option<IntegratorKind>,

    /// Diffusion solver (direct or iterative)
    #[arg(short, long, value_parser = parse_solver)]
    solver: Option<SolverKind>,

    /// Final simulation time in ms
    #[arg(short = 't', long)]
    final_time: Option<f64>,

    /// Threads for the reaction phase
    #[arg(short = 'j', long)]
    threads: Option<usize>,
}

fn parse_formulation(s: &str) -> std::result::Result<Formulation, String> {
    Formulation::from_str(s).ok_or_else(|| format!("unknown formulation '{s}'"))
}

fn parse_integrator(s: &str) -> std::result::Result<IntegratorKind, String> {
    IntegratorKind::from_str(s).ok_or_else(|| format!("unknown integrator '{s}'"))
}

fn parse_solver(s: &str) -> std::result::Result<SolverKind, String> {
    SolverKind::from_str(s).ok_or_else(|| format!("unknown solver '{s}'"))
}

fn load_config(args: &Args) -> Result<SimulatorConfig> {
    let mut config = match &args.config {
        Some(path) => SimulatorConfig::load(path)?,
        None => SimulatorConfig::new(),
    };

    if let Some(formulation) = args.formulation {
        config = config.with_formulation(formulation);
    }
    if let Some(integrator) = args.integrator {
        config = config.with_integrator(integrator);
    }
    if let Some(solver) = args.solver {
        config.solver.kind = solver;
    }
    if let Some(final_time) = args.final_time {
        config.time.final_time = final_time;
    }
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir);
    }
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    if args.restart {
        config = config.with_restart(true);
    }

    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<usize> {
    let config = load_config(args)?;

    let outcomes = run_sweep(
        &config,
        || GrayPathmanathan,
        |sim, resumed| {
            let outputs =
                FileOutputs::for_run(&config, sim.s2_magnitude(), sim.potential_sites(), resumed)?;
            Ok(Box::new(outputs) as Box<dyn StepObserver>)
        },
    )?;

    for outcome in &outcomes {
        match &outcome.result {
            Ok(summary) => println!(
                "S2 = {:>8.3}  t0 = {:>9.3} ms  steps = {:>8}  peak V = {:>8.3} mV",
                outcome.s2_magnitude, outcome.start_time, summary.steps, summary.peak_potential
            ),
            Err(e) => println!("S2 = {:>8.3}  failed: {}", outcome.s2_magnitude, e),
        }
    }

    Ok(outcomes.iter().filter(|o| !o.is_ok()).count())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            log::warn!("{} sweep value(s) failed", failed);
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
