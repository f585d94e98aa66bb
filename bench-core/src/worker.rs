//! # worker
//!
//! One worker per context. A worker is an explicit state value advanced one
//! transition at a time by [`Worker::step`]; [`Worker::run`] drives it until
//! it exits or the run is cancelled.
//!
//! ```text
//! Init ─┬─> Send ──> SendWait ─┬─> Send
//!       │                      └─> exit (budget exhausted)
//!       └─> Recv ──> RecvWait ───> Recv
//! ```
use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use config::{BenchConfig, ConfigError, Role};

use crate::{
    counters::Counters,
    message::{PublishMessage, ReceivedMessage},
    retry::RetryPolicy,
    transport::{Context, TransportError},
};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {index}: send failed after {attempts} attempt(s)")]
    Send {
        index: usize,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("worker {index}: receive failed after {attempts} attempt(s)")]
    Recv {
        index: usize,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Where a worker is in its cycle. Publish workers carry their message so a
/// resend reuses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Send(PublishMessage),
    SendWait(PublishMessage),
    Recv,
    RecvWait(ReceivedMessage),
}

/// Why a worker left its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// a claim on the shared budget failed
    BudgetExhausted,
    /// bounded run without interval: one publish, then stop
    Finished,
    Cancelled,
}

#[derive(Debug)]
pub enum Transition {
    Next(WorkerState),
    Exit(WorkerExit),
}

#[derive(Debug, Clone)]
enum Plan {
    Publish(PublishMessage),
    Receive,
}

pub struct Worker<C> {
    index: usize,
    ctx: C,
    plan: Plan,
    counters: Arc<Counters>,
    retry: RetryPolicy,
    interval: Duration,
}

impl<C: Context> Worker<C> {
    pub fn new(
        index: usize,
        ctx: C,
        config: &BenchConfig,
        counters: Arc<Counters>,
    ) -> Result<Self, WorkerError> {
        let plan = match config.role {
            Role::Publish => Plan::Publish(PublishMessage::from_config(config)?),
            Role::Subscribe | Role::ConnectOnly => Plan::Receive,
        };
        Ok(Self {
            index,
            ctx,
            plan,
            counters,
            retry: config.retry.into(),
            interval: config.effective_interval(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Run from `Init` until the worker exits on its own or `cancel` fires.
    /// Every await inside a transition is raced against `cancel`.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<WorkerExit, WorkerError> {
        let index = self.index;
        let mut state = WorkerState::Init;
        loop {
            let transition = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(index, "worker cancelled");
                    return Ok(WorkerExit::Cancelled);
                }
                transition = self.step(state) => transition?,
            };
            match transition {
                Transition::Next(next) => state = next,
                Transition::Exit(exit) => {
                    debug!(index, ?exit, "worker finished");
                    return Ok(exit);
                }
            }
        }
    }

    /// Perform one transition out of `state`
    pub async fn step(&mut self, state: WorkerState) -> Result<Transition, WorkerError> {
        match state {
            WorkerState::Init => match &self.plan {
                Plan::Publish(msg) => {
                    if !self.counters.try_claim() {
                        debug!(index = self.index, "budget exhausted before first publish");
                        return Ok(Transition::Exit(WorkerExit::BudgetExhausted));
                    }
                    Ok(Transition::Next(WorkerState::Send(msg.clone())))
                }
                Plan::Receive => Ok(Transition::Next(WorkerState::Recv)),
            },
            WorkerState::Send(msg) => {
                self.send(&msg).await?;
                let total = self.counters.record_sent();
                trace!(index = self.index, total, "publish accepted");
                if self.interval.is_zero() {
                    // publishing flat out must not starve other tasks
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(self.interval).await;
                }
                Ok(Transition::Next(WorkerState::SendWait(msg)))
            }
            WorkerState::SendWait(msg) => {
                if self.counters.is_bounded() {
                    if !self.counters.try_claim() {
                        debug!(index = self.index, "budget exhausted, requesting stop");
                        self.counters.request_stop();
                        return Ok(Transition::Exit(WorkerExit::BudgetExhausted));
                    }
                    if self.interval.is_zero() {
                        self.counters.request_stop();
                        return Ok(Transition::Exit(WorkerExit::Finished));
                    }
                }
                Ok(Transition::Next(WorkerState::Send(msg)))
            }
            WorkerState::Recv => {
                let msg = self.recv().await?;
                Ok(Transition::Next(WorkerState::RecvWait(msg)))
            }
            WorkerState::RecvWait(mut msg) => {
                let total = self.counters.record_recv();
                trace!(index = self.index, total, topic = %msg.topic, len = msg.payload.len(), "message received");
                msg.clear();
                Ok(Transition::Next(WorkerState::Recv))
            }
        }
    }

    async fn send(&mut self, msg: &PublishMessage) -> Result<(), WorkerError> {
        let mut attempt = 0;
        loop {
            let err = match self.ctx.send(msg.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            let Some(delay) = self.retry.next_delay(&err, attempt) else {
                error!(index = self.index, error = %err, "send failed");
                return Err(WorkerError::Send {
                    index: self.index,
                    attempts: attempt + 1,
                    source: err,
                });
            };
            warn!(index = self.index, attempt, delay_ms = delay.as_millis() as u64, error = %err, "send failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn recv(&mut self) -> Result<ReceivedMessage, WorkerError> {
        let mut attempt = 0;
        loop {
            let err = match self.ctx.recv().await {
                Ok(msg) => return Ok(msg),
                Err(err) => err,
            };
            let Some(delay) = self.retry.next_delay(&err, attempt) else {
                error!(index = self.index, error = %err, "receive failed");
                return Err(WorkerError::Recv {
                    index: self.index,
                    attempts: attempt + 1,
                    source: err,
                });
            };
            warn!(index = self.index, attempt, delay_ms = delay.as_millis() as u64, error = %err, "receive failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
