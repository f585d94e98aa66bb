//! # engine
//!
//! Wires one run together: opens a context per worker on a single transport,
//! dials the shared connection, spawns the workers and hands control to the
//! [`Driver`] until the run ends.
use std::{future::Future, pin::Pin, sync::Arc};

use anyhow::{Context as _, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use config::BenchConfig;

use crate::{
    counters::Counters,
    driver::{Driver, DriverExit, WorkerSet},
    lifecycle::ConnectionHandler,
    message::ConnectMessage,
    report::{BenchReport, RunOutcome, Totals},
    transport::{LoopbackTransport, MqttTransport, Transport},
    worker::Worker,
};

/// Run a benchmark against the configured broker, or against the loopback
/// transport for `--dry-run`. Returns once the budget is spent, a worker
/// fails or `shutdown` resolves.
pub async fn run<F>(config: Arc<BenchConfig>, shutdown: F) -> Result<BenchReport>
where
    F: Future<Output = ()>,
{
    if config.dry_run {
        info!("dry run: using in-process loopback transport");
        let transport = LoopbackTransport::new(config.channel_size);
        return run_with_transport(config, transport, shutdown).await;
    }

    let connect = ConnectMessage::from_config(&config);
    let transport = MqttTransport::new(
        &connect,
        &config.broker,
        config.tls.as_ref(),
        config.channel_size,
    )
    .context("failed to set up MQTT connection")?;
    run_with_transport(config, transport, shutdown).await
}

/// Run a benchmark on an already constructed transport
pub async fn run_with_transport<T, F>(
    config: Arc<BenchConfig>,
    mut transport: T,
    shutdown: F,
) -> Result<BenchReport>
where
    T: Transport,
    F: Future<Output = ()>,
{
    config
        .validate()
        .context("invalid benchmark configuration")?;

    let counters = Arc::new(Counters::new(config.msg_count));
    let mut workers = Vec::with_capacity(config.parallel);
    for index in 0..config.parallel {
        let ctx = transport
            .open_context()
            .with_context(|| format!("failed to open context for worker {index}"))?;
        workers.push(Worker::new(index, ctx, &config, Arc::clone(&counters))?);
    }

    let handler = Arc::new(ConnectionHandler::new(&config));
    transport
        .dial(handler.clone())
        .context("failed to start connecting")?;

    info!(
        role = %config.role,
        broker = %config.broker,
        parallel = config.parallel,
        msg_count = config.msg_count,
        interval_ms = config.effective_interval().as_millis() as u64,
        "starting benchmark"
    );

    let cancel = CancellationToken::new();
    let mut driver = Driver::new(
        config.role,
        config.parallel,
        Arc::clone(&counters),
        config.sample_interval,
    );
    let mut tasks = WorkerSet::new();
    for worker in workers {
        let span = info_span!("worker", index = worker.index());
        tasks.spawn(worker.run(cancel.child_token()).instrument(span));
    }

    tokio::pin!(shutdown);
    let outcome = match driver.run(&mut tasks, shutdown.as_mut()).await {
        DriverExit::Stopped => drain(&mut tasks, shutdown.as_mut()).await,
        DriverExit::Interrupted => Ok(RunOutcome::Interrupted),
        DriverExit::WorkerFailed(err) => Err(anyhow::Error::new(err).context("benchmark aborted")),
        DriverExit::WorkerPanicked(err) => Err(anyhow!("worker task failed: {err}")),
    };
    let elapsed = driver.elapsed();

    cancel.cancel();
    transport.shutdown().await;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(exit)) => debug!(?exit, "worker stopped"),
            Ok(Err(err)) => debug!(error = %err, "worker failed during shutdown"),
            Err(err) => error!(?err, "worker task failed"),
        }
    }
    debug!(connects = handler.connects(), "benchmark finished");

    let totals = Totals {
        sent: counters.sent_total(),
        received: counters.recv_total(),
    };
    Ok(BenchReport::new(&config, outcome?, totals, elapsed))
}

/// Wait for the remaining workers once the stop flag is set. Bounded publish
/// workers each exit on their next failed claim, so every claimed message
/// is sent before the run is reported.
async fn drain<F>(tasks: &mut WorkerSet, mut shutdown: Pin<&mut F>) -> Result<RunOutcome>
where
    F: Future<Output = ()>,
{
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return Ok(RunOutcome::Interrupted),
            joined = tasks.join_next() => match joined {
                None => return Ok(RunOutcome::Completed),
                Some(Ok(Ok(exit))) => debug!(?exit, remaining = tasks.len(), "worker exited"),
                Some(Ok(Err(err))) => {
                    return Err(anyhow::Error::new(err).context("benchmark aborted"));
                }
                Some(Err(err)) => return Err(anyhow!("worker task failed: {err}")),
            },
        }
    }
}
