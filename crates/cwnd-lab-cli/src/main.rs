use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cwnd_lab_abstract::{CongestionVariant, ScenarioDescriptor};
use cwnd_lab_harness::{
    Completion, ExperimentFile, ExperimentOrchestrator, ExperimentReport, GnuplotScript,
    OrchestratorConfig, PlotSink, RunResult, plot,
};
use cwnd_lab_simulator::P2pEngineFactory;

#[derive(Parser, Debug)]
#[command(author, version, about = "Congestion-window experiment runner")]
struct Args {
    /// Experiment file (TOML) listing the scenarios to run.
    experiment: PathBuf,

    /// Directory receiving one `<scenario>.cwnd` trace per run.
    #[arg(long, default_value = "traces")]
    trace_dir: PathBuf,

    /// Write the JSON report here.
    #[arg(long)]
    report_out: Option<PathBuf>,

    /// Write gnuplot scripts (window traces, latency vs throughput) here.
    #[arg(long)]
    plot_dir: Option<PathBuf>,

    /// Keep going after a run halts before its stop time.
    #[arg(long, default_value_t = false)]
    tolerate_incomplete: bool,

    /// Override the seed of every scenario.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the congestion control of every scenario.
    #[arg(long)]
    variant: Option<CongestionVariant>,

    /// Stop each run after this many window samples.
    #[arg(long)]
    max_samples: Option<usize>,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging();
    info!("cwnd-lab starting…");

    let scenarios = load_scenarios(&args)?;
    let mut orchestrator = ExperimentOrchestrator::new(
        P2pEngineFactory,
        OrchestratorConfig {
            trace_dir: args.trace_dir.clone(),
            tolerate_incomplete: args.tolerate_incomplete,
            sample_limit: args.max_samples,
        },
    );
    let report = orchestrator.run(&scenarios);

    print_report(&report);
    if let Some(path) = &args.report_out {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!("Report written to {}", path.display());
    }
    if let Some(dir) = &args.plot_dir {
        write_plots(dir, &report)?;
    }

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn load_scenarios(args: &Args) -> Result<Vec<ScenarioDescriptor>> {
    let file = ExperimentFile::load(&args.experiment)
        .with_context(|| format!("Failed to load experiment {}", args.experiment.display()))?;
    if let Some(name) = &file.name {
        info!("Experiment: {}", name);
    }
    let mut scenarios = file.scenarios().context("Invalid experiment")?;
    for descriptor in &mut scenarios {
        if let Some(seed) = args.seed {
            descriptor.seed = seed;
        }
        if let Some(variant) = args.variant {
            descriptor.variant = variant;
        }
    }
    Ok(scenarios)
}

fn print_report(report: &ExperimentReport) {
    for result in &report.results {
        print_result(result);
    }
    for failure in &report.failures {
        println!("FAILED {} ({:?}): {}", failure.scenario, failure.kind, failure.message);
    }
    for skipped in &report.skipped {
        println!("SKIPPED {}", skipped);
    }
}

fn print_result(result: &RunResult) {
    let status = match result.completion() {
        Completion::Complete => String::new(),
        Completion::Incomplete { reached } => format!(" [incomplete, stopped at {reached}]"),
    };
    println!("== {}{}", result.scenario(), status);
    println!("  Congestion control: {}", result.variant());
    println!("  Window reductions:  {}", result.reduction_count());
    println!("  Average throughput: {:.3} Mbps", result.throughput_mbps());
    println!("  Trace:              {}", result.trace_path().display());
    for flow in result.flows().values() {
        println!(
            "  Flow {}  tx {} bytes  rx {} bytes  lost {} packets",
            flow.five_tuple, flow.tx_bytes, flow.rx_bytes, flow.lost_packets
        );
    }
}

fn write_plots(dir: &Path, report: &ExperimentReport) -> Result<()> {
    let mut sink = GnuplotScript::new(dir);
    for result in &report.results {
        if result.samples().is_empty() {
            continue;
        }
        let (spec, series) = plot::window_chart(result, dir);
        sink.plot(&spec, &series)
            .with_context(|| format!("Failed to export window chart for {}", result.scenario()))?;
    }
    if report.results.len() > 1 {
        let (spec, series) = plot::latency_throughput_chart(report, dir);
        sink.plot(&spec, &series)
            .context("Failed to export latency/throughput chart")?;
    }
    if sink.written().is_empty() {
        warn!("Nothing to plot");
    }
    for path in sink.written() {
        info!("Plot script written to {}", path.display());
    }
    Ok(())
}
