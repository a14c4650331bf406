use std::env::var;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

use crate::{
    application::handlers::{campaign_scheduler::SchedulerConfig, message_dispatcher::DispatchConfig},
    infrastructure::messaging::jetstream::JetstreamConfig,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} env param is not set")]
    Missing(&'static str),
    #[error("failed to parse {name} env param: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    All,
    Worker,
    Scheduler,
}

impl RunMode {
    pub fn runs_worker(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Worker)
    }

    pub fn runs_scheduler(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Scheduler)
    }
}

impl FromStr for RunMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "all" => Ok(RunMode::All),
            "worker" => Ok(RunMode::Worker),
            "scheduler" => Ok(RunMode::Scheduler),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SenderConfig {
    Simulated { success_rate: f64 },
    Http { endpoint: String, api_token: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    pub stream: String,
    pub subject: String,
    pub consumer: String,
    pub scheduler_interval: Duration,
    pub scheduler_page_size: i64,
    pub max_retries: i32,
    pub requeue_delay: Duration,
    /// How long an in-flight delivery may finish after shutdown is signalled.
    pub shutdown_grace: Duration,
    pub sender: SenderConfig,
    pub run_mode: RunMode,
    pub production: bool,
}

impl Config {
    pub fn try_parse() -> Result<Config, ConfigError> {
        let _ = dotenv();
        Self::from_lookup(|name| var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let sender = match env.or("SENDER", "simulated").as_str() {
            "simulated" => SenderConfig::Simulated {
                success_rate: env.parse_where("SIMULATED_SUCCESS_RATE", 0.95, |rate: &f64| {
                    (0.0..=1.0).contains(rate)
                })?,
            },
            "http" => SenderConfig::Http {
                endpoint: env.required("SMS_PROVIDER_URL")?,
                api_token: env.required("SMS_PROVIDER_TOKEN")?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "SENDER",
                    value: other.to_string(),
                });
            }
        };

        Ok(Config {
            database_url: env.required("DATABASE_URL")?,
            nats_url: env.or("NATS_URL", "nats://localhost:4222"),
            stream: env.or("DISPATCH_STREAM", "CAMPAIGN_SENDS"),
            subject: env.or("DISPATCH_SUBJECT", "campaign.sends"),
            consumer: env.or("DISPATCH_CONSUMER", "campaign-dispatch-worker"),
            scheduler_interval: Duration::from_secs(
                env.parse_where("SCHEDULER_INTERVAL_SECS", 10, |secs: &u64| *secs > 0)?,
            ),
            scheduler_page_size: env.parse_where("SCHEDULER_PAGE_SIZE", 1000, |size: &i64| *size > 0)?,
            max_retries: env.parse_where("MAX_RETRIES", 3, |max: &i32| *max > 0)?,
            requeue_delay: Duration::from_millis(env.parse_or("REQUEUE_DELAY_MS", 1000)?),
            shutdown_grace: Duration::from_secs(env.parse_or("WORKER_SHUTDOWN_GRACE_SECS", 10)?),
            sender,
            run_mode: env.parse_or("RUN_MODE", RunMode::All)?,
            production: env.or("APP_ENV", "development") == "production",
        })
    }
}

impl Config {
    pub fn jetstream(&self) -> JetstreamConfig {
        JetstreamConfig {
            url: self.nats_url.clone(),
            stream: self.stream.clone(),
            subject: self.subject.clone(),
            durable: self.consumer.clone(),
            ..Default::default()
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.scheduler_interval,
            page_size: self.scheduler_page_size,
        }
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            max_retries: self.max_retries,
            requeue_delay: self.requeue_delay,
        }
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }

    /// Like `parse_or`, but a parsed value failing `valid` is an error too.
    fn parse_where<T, P>(&self, name: &'static str, default: T, valid: P) -> Result<T, ConfigError>
    where
        T: FromStr,
        P: Fn(&T) -> bool,
    {
        let parsed = self.parse_or(name, default)?;
        if valid(&parsed) {
            Ok(parsed)
        } else {
            Err(ConfigError::Invalid {
                name,
                value: self.get(name).unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_is_set() {
        let config = parse(&[("DATABASE_URL", "postgres://localhost/dispatch")]).unwrap();
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.scheduler_interval, Duration::from_secs(10));
        assert_eq!(config.scheduler_page_size, 1000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.requeue_delay, Duration::from_secs(1));
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        assert_eq!(config.sender, SenderConfig::Simulated { success_rate: 0.95 });
        assert_eq!(config.run_mode, RunMode::All);
        assert!(!config.production);
        assert_eq!(config.jetstream().durable, "campaign-dispatch-worker");
        assert_eq!(config.dispatch().max_retries, 3);
        assert_eq!(config.scheduler().page_size, 1000);
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(parse(&[]), Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn http_sender_needs_provider_settings() {
        let err = parse(&[("DATABASE_URL", "postgres://db"), ("SENDER", "http")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SMS_PROVIDER_URL")));

        let config = parse(&[
            ("DATABASE_URL", "postgres://db"),
            ("SENDER", "http"),
            ("SMS_PROVIDER_URL", "https://sms.example.com/v1/messages"),
            ("SMS_PROVIDER_TOKEN", "secret"),
            ("RUN_MODE", "worker"),
        ])
        .unwrap();
        assert!(matches!(config.sender, SenderConfig::Http { .. }));
        assert!(config.run_mode.runs_worker());
        assert!(!config.run_mode.runs_scheduler());
    }

    #[test]
    fn rejects_unparseable_values() {
        let err = parse(&[
            ("DATABASE_URL", "postgres://db"),
            ("SCHEDULER_INTERVAL_SECS", "soon"),
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to parse SCHEDULER_INTERVAL_SECS env param: \"soon\""
        );
    }

    #[test]
    fn rejects_values_that_would_stall_dispatch() {
        for (name, value) in [
            ("SCHEDULER_PAGE_SIZE", "0"),
            ("SCHEDULER_PAGE_SIZE", "-5"),
            ("MAX_RETRIES", "0"),
            ("SCHEDULER_INTERVAL_SECS", "0"),
            ("SIMULATED_SUCCESS_RATE", "NaN"),
            ("SIMULATED_SUCCESS_RATE", "inf"),
            ("SIMULATED_SUCCESS_RATE", "1.5"),
        ] {
            let err = parse(&[("DATABASE_URL", "postgres://db"), (name, value)]).unwrap_err();
            match err {
                ConfigError::Invalid { name: got, value: raw } => {
                    assert_eq!(got, name);
                    assert_eq!(raw, value);
                }
                other => panic!("{name}={value}: unexpected error {other}"),
            }
        }
    }

    #[test]
    fn accepts_boundary_values() {
        let config = parse(&[
            ("DATABASE_URL", "postgres://db"),
            ("SCHEDULER_PAGE_SIZE", "1"),
            ("MAX_RETRIES", "1"),
            ("SCHEDULER_INTERVAL_SECS", "1"),
            ("SIMULATED_SUCCESS_RATE", "0"),
        ])
        .unwrap();
        assert_eq!(config.scheduler_page_size, 1);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.sender, SenderConfig::Simulated { success_rate: 0.0 });
    }
}
