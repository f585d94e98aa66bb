//! tracing configuration
use anyhow::Result;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        self,
        format::{Format, PrettyFields},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// level used when `--verbose` is given without an explicit `--log`
static VERBOSE_LOG: &str = "debug";

/// Installed log configuration
#[derive(Debug)]
pub struct Config {
    /// formatting applied to logs: "json", "pretty" or "standard"
    pub log_frmt: String,
    pub filter: String,
}

impl Config {
    /// Install the global subscriber. Logs always go to stderr so progress
    /// lines on stdout stay machine readable.
    pub fn parse(bench_log: &str, log_frmt: &str, verbose: bool) -> Result<Self> {
        let directives = if verbose && bench_log == config::cli::DEFAULT_LOG {
            VERBOSE_LOG
        } else {
            bench_log
        };
        let filter = EnvFilter::try_new(directives)
            .or_else(|_| EnvFilter::try_new(config::cli::DEFAULT_LOG))?
            .add_directive("rumqttc=warn".parse()?);
        let filter_str = filter.to_string();

        match log_frmt {
            "json" => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .try_init()?;
            }
            "pretty" => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .event_format(Format::default().pretty().with_source_location(false))
                            .fmt_fields(PrettyFields::new())
                            .with_writer(std::io::stderr),
                    )
                    .try_init()?;
            }
            _ => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .try_init()?;
            }
        }

        Ok(Self {
            log_frmt: log_frmt.to_owned(),
            filter: filter_str,
        })
    }
}
