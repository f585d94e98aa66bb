//! # driver
//!
//! The single control loop of a run: samples the counters on a fixed period,
//! prints progress lines on stdout and decides when the run is over.
use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    task::{JoinError, JoinSet},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use config::Role;

use crate::{
    counters::Counters,
    worker::{WorkerError, WorkerExit},
};

pub type WorkerSet = JoinSet<Result<WorkerExit, WorkerError>>;

/// Why the driver loop returned
#[derive(Debug)]
pub enum DriverExit {
    /// the stop flag was set
    Stopped,
    /// the shutdown future resolved
    Interrupted,
    WorkerFailed(WorkerError),
    WorkerPanicked(JoinError),
}

pub struct Driver {
    role: Role,
    parallel: usize,
    counters: Arc<Counters>,
    sample_interval: Duration,
    started: Instant,
    last_recv: u64,
}

impl Driver {
    pub fn new(
        role: Role,
        parallel: usize,
        counters: Arc<Counters>,
        sample_interval: Duration,
    ) -> Self {
        Self {
            role,
            parallel,
            counters,
            sample_interval,
            started: Instant::now(),
            last_recv: 0,
        }
    }

    /// time since the driver was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Sample until the stop flag is set, `shutdown` resolves or a worker
    /// fails. Workers that exit cleanly are reaped and the loop continues.
    pub async fn run<F>(&mut self, workers: &mut WorkerSet, shutdown: F) -> DriverExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = time::interval_at(Instant::now() + self.sample_interval, self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    return DriverExit::Interrupted;
                }
                _ = self.counters.stopped() => {
                    debug!("stop flag set");
                    return DriverExit::Stopped;
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => match joined {
                    Ok(Ok(exit)) => debug!(?exit, remaining = workers.len(), "worker exited"),
                    Ok(Err(err)) => return DriverExit::WorkerFailed(err),
                    Err(err) => return DriverExit::WorkerPanicked(err),
                },
                _ = ticker.tick() => {
                    if let Some(line) = self.sample() {
                        println!("{line}");
                    }
                }
            }
        }
    }

    /// Progress line for the current counter values, if there is one to
    /// print
    pub fn sample(&mut self) -> Option<String> {
        let elapsed_ms = self.elapsed().as_millis();
        if elapsed_ms == 0 {
            return None;
        }
        match self.role {
            Role::Publish => Some(publish_line(
                self.counters.publish_progress(self.parallel),
                elapsed_ms,
            )),
            Role::Subscribe => {
                let total = self.counters.recv_total();
                if total == self.last_recv {
                    return None;
                }
                let delta = total - self.last_recv;
                self.last_recv = total;
                Some(subscribe_line(
                    total,
                    delta,
                    self.sample_interval.as_millis(),
                    elapsed_ms,
                ))
            }
            Role::ConnectOnly => None,
        }
    }
}

/// `total` messages issued after `elapsed_ms`; rate averaged over the run
pub fn publish_line(total: u64, elapsed_ms: u128) -> String {
    let rate = total as f64 * 1000.0 / elapsed_ms as f64;
    format!("sent total: {total}, rate: {rate:.6}(msg/sec), time: {elapsed_ms}ms")
}

/// `delta` messages arrived during the last `sample_ms`
pub fn subscribe_line(total: u64, delta: u64, sample_ms: u128, elapsed_ms: u128) -> String {
    let rate = u128::from(delta) * 1000 / sample_ms.max(1);
    format!("recv total: {total}, rate: {rate}(msg/sec), time: {elapsed_ms}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_line_formats() {
        assert_eq!(
            publish_line(10, 2_000),
            "sent total: 10, rate: 5.000000(msg/sec), time: 2000ms"
        );
        assert_eq!(
            subscribe_line(250, 100, 1_000, 3_004),
            "recv total: 250, rate: 100(msg/sec), time: 3004"
        );
        assert_eq!(
            subscribe_line(50, 50, 500, 500),
            "recv total: 50, rate: 100(msg/sec), time: 500"
        );
    }

    #[tokio::test]
    async fn subscribe_samples_only_on_change() {
        let counters = Arc::new(Counters::new(0));
        let mut driver = Driver::new(
            Role::Subscribe,
            1,
            counters.clone(),
            Duration::from_millis(1_000),
        );
        tokio::time::sleep(Duration::from_millis(2)).await;

        assert_eq!(driver.sample(), None);
        counters.record_recv();
        counters.record_recv();
        let line = driver.sample().expect("line after new messages");
        assert!(line.starts_with("recv total: 2, rate: 2(msg/sec)"));
        assert_eq!(driver.sample(), None);
    }

    #[tokio::test]
    async fn connect_only_prints_nothing() {
        let counters = Arc::new(Counters::new(0));
        let mut driver = Driver::new(Role::ConnectOnly, 4, counters, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(driver.sample(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn exits_on_stop_flag() {
        let counters = Arc::new(Counters::new(5));
        let mut driver = Driver::new(
            Role::Publish,
            1,
            counters.clone(),
            Duration::from_millis(100),
        );
        let mut workers = WorkerSet::new();
        {
            let counters = counters.clone();
            workers.spawn(async move {
                time::sleep(Duration::from_millis(350)).await;
                counters.request_stop();
                Ok(WorkerExit::BudgetExhausted)
            });
        }

        let exit = driver.run(&mut workers, std::future::pending()).await;
        assert!(matches!(exit, DriverExit::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn exits_on_shutdown() {
        let counters = Arc::new(Counters::new(0));
        let mut driver = Driver::new(Role::Subscribe, 1, counters, Duration::from_millis(100));
        let mut workers = WorkerSet::new();
        workers.spawn(std::future::pending());

        let exit = driver
            .run(&mut workers, time::sleep(Duration::from_millis(250)))
            .await;
        assert!(matches!(exit, DriverExit::Interrupted));
        workers.abort_all();
    }
}
