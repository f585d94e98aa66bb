use std::time::Duration;

use serde::{Deserialize, Serialize};

use config::{BenchConfig, QoS, Role};

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// the message budget was spent
    Completed,
    /// stopped from outside (Ctrl-C)
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub role: Role,
    pub broker: String,
    pub client_id: String,
    pub parallel: usize,
    pub msg_count: u64,
    pub interval_ms: u128,
    pub qos: QoS,
    pub payload_len: usize,
    pub topics: usize,
    pub dry_run: bool,
}

impl From<&BenchConfig> for RunConfigSnapshot {
    fn from(config: &BenchConfig) -> Self {
        Self {
            role: config.role,
            broker: config.broker.to_string(),
            client_id: config.client_id.clone(),
            parallel: config.parallel,
            msg_count: config.msg_count,
            interval_ms: config.effective_interval().as_millis(),
            qos: config.qos,
            payload_len: config.payload.len(),
            topics: config.topics.len(),
            dry_run: config.dry_run,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub sent: u64,
    pub received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub duration_ms: u128,
    /// average over the whole run, sent for publish runs and received
    /// otherwise
    pub throughput_per_sec: f64,
}

impl RuntimeStats {
    pub fn new(role: Role, totals: Totals, duration: Duration) -> Self {
        let count = match role {
            Role::Publish => totals.sent,
            Role::Subscribe | Role::ConnectOnly => totals.received,
        };
        let secs = duration.as_secs_f64();
        let throughput_per_sec = if secs > 0.0 { count as f64 / secs } else { 0.0 };
        Self {
            duration_ms: duration.as_millis(),
            throughput_per_sec,
        }
    }
}

/// Summary of one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchReport {
    pub config: RunConfigSnapshot,
    pub outcome: RunOutcome,
    pub totals: Totals,
    pub stats: RuntimeStats,
}

impl BenchReport {
    pub fn new(config: &BenchConfig, outcome: RunOutcome, totals: Totals, duration: Duration) -> Self {
        Self {
            config: RunConfigSnapshot::from(config),
            outcome,
            totals,
            stats: RuntimeStats::new(config.role, totals, duration),
        }
    }

    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        output.push_str("MQTT benchmark report\n");
        output.push_str(&format!(
            "outcome: {}\n",
            match self.outcome {
                RunOutcome::Completed => "completed",
                RunOutcome::Interrupted => "interrupted",
            }
        ));
        output.push_str(&format!(
            "mode: role={}, broker={}, parallel={}, qos={}\n",
            self.config.role, self.config.broker, self.config.parallel, self.config.qos
        ));
        if self.config.role == Role::Publish {
            let count = match self.config.msg_count {
                0 => "unbounded".to_string(),
                n => n.to_string(),
            };
            output.push_str(&format!(
                "publish: count={}, interval={}ms, payload={}B\n",
                count, self.config.interval_ms, self.config.payload_len
            ));
        }
        output.push_str(&format!(
            "totals: sent={}, received={}\n",
            self.totals.sent, self.totals.received
        ));
        output.push_str(&format!(
            "timing: duration={}ms throughput={:.2}/s\n",
            self.stats.duration_ms, self.stats.throughput_per_sec
        ));
        output
    }
}
