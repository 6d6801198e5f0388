//! kiln CLI - assemble, link and inspect firmware images

mod cli;
mod commands;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let metrics_handle = if cli.metrics {
        kiln::metrics::CliRecorder::new().install()
    } else {
        None
    };
    kiln::metrics::init();

    let filter = match cli.log_level.directive().parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let jobs = if cli.jobs == 0 {
        num_cpus::get()
    } else {
        cli.jobs
    };
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build_global()
    {
        warn!(error = %e, "thread pool already initialized");
    }

    let exit_code = commands::run_command(&cli);

    if let Some(handle) = metrics_handle {
        handle.print_summary();
    }

    std::process::exit(exit_code);
}
