#![allow(clippy::cognitive_complexity)]
use std::{
    io::{self, Write},
    process,
    sync::Arc,
};

use anyhow::Result;

use bench_core::{
    BenchReport,
    tokio::{self, runtime::Builder, signal},
    trace,
    tracing::*,
};
use config::{
    BenchConfig,
    cli::{Cli, Parser},
};

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// exit status for a bad configuration
const EXIT_CONFIG: i32 = 2;
/// exit status for a run that failed
const EXIT_RUN: i32 = 1;

fn main() {
    // load .env first so its values can feed the env-backed options
    let dotenv = dotenv::dotenv();
    // parses from cli or environment var
    let cli = Cli::parse();
    let verbose = cli.command.args().verbose;
    let trace_config = match trace::Config::parse(&cli.log, &cli.log_format, verbose) {
        Ok(trace_config) => trace_config,
        Err(err) => {
            eprintln!("failed to set up logging: {err:#}");
            process::exit(EXIT_CONFIG);
        }
    };
    debug!(?trace_config);
    if let Err(err) = dotenv {
        debug!(?err, ".env file not loaded");
    }

    let output_json = cli.json;
    let threads = cli.threads;
    let thread_name = cli.thread_name.clone();
    let config = match BenchConfig::try_from(cli) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            process::exit(EXIT_CONFIG);
        }
    };

    let report = match build_runtime(threads, &thread_name)
        .and_then(|rt| rt.block_on(bench_core::run(config, shutdown_signal())))
    {
        Ok(report) => report,
        Err(err) => {
            eprintln!("run failed: {err:#}");
            process::exit(EXIT_RUN);
        }
    };

    let code = write_report(&report, output_json, io::stdout().lock());
    if code != 0 {
        process::exit(code);
    }
}

fn build_runtime(threads: Option<usize>, thread_name: &str) -> Result<tokio::runtime::Runtime> {
    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(thread_name).enable_all();
    // default num threads will be num logical CPUs
    if let Some(num) = threads {
        builder.worker_threads(num);
    }
    Ok(builder.build()?)
}

/// Write the final report and return the process exit status
fn write_report(report: &BenchReport, json: bool, mut out: impl Write) -> i32 {
    let written = if json {
        serde_json::to_writer_pretty(&mut out, report)
            .map_err(anyhow::Error::from)
            .and_then(|()| Ok(writeln!(out)?))
    } else {
        writeln!(out, "{}", report.human_summary()).map_err(anyhow::Error::from)
    };
    match written.and_then(|()| Ok(out.flush()?)) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("failed to write report: {err:#}");
            EXIT_RUN
        }
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed the run is only
/// ended by its own stop condition.
async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
