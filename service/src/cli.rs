use clap::Parser;
use derive_more::From;
use starter_readiness::{PoolConfig, SafeUrl};
use std::fmt;
use std::time::Duration;

fn default_workers() -> usize {
    // use at least 2; auto-detect otherwise
    num_cpus::get().max(2)
}

/// Datastore connection string; `Debug` never shows the password.
#[derive(Clone, From)]
pub struct DatabaseUrl(String);

impl fmt::Debug for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", SafeUrl::redact(&self.0))
    }
}

#[derive(Debug, Parser, Clone)]
#[command(name = "starter-service", about = "Starter web service with liveness and readiness probes")]
pub struct Cli {
    /// Bind address (e.g., 0.0.0.0:8080)
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Number of worker threads
    #[arg(long, env = "WORKERS", default_value_t = default_workers())]
    pub workers: usize,

    /// Name used in the root greeting
    #[arg(long, env = "SERVICE_NAME", default_value = "starter-service")]
    pub service_name: String,

    /// Datastore connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: DatabaseUrl,

    #[arg(
        long,
        env = "DB_MAX_CONNECTIONS",
        default_value_t = 10u32,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub db_max_connections: u32,

    #[arg(long, env = "DB_MIN_CONNECTIONS", default_value_t = 0u32)]
    pub db_min_connections: u32,

    /// How long a request waits for a pooled connection (ms); must be below the readiness timeout
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_MS", default_value_t = 1_000u64)]
    pub db_acquire_timeout_ms: u64,

    /// Idle connections older than this are closed (s)
    #[arg(long, env = "DB_IDLE_TIMEOUT_SECS", default_value_t = 600u64)]
    pub db_idle_timeout_secs: u64,

    /// Connections older than this are recycled (s)
    #[arg(long, env = "DB_MAX_LIFETIME_SECS", default_value_t = 1_800u64)]
    pub db_max_lifetime_secs: u64,

    /// Deadline for one readiness check (ms)
    #[arg(long, env = "READINESS_TIMEOUT_MS", default_value_t = 2_000u64)]
    pub readiness_timeout_ms: u64,

    /// Request timeout (ms); must exceed the readiness timeout
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 10_000u64)]
    pub request_timeout_ms: u64,

    /// OTLP gRPC collector; traces and logs are exported only when set
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("request timeout {request:?} must exceed the readiness timeout {readiness:?}")]
    RequestTimeoutTooShort {
        request: Duration,
        readiness: Duration,
    },
    #[error("datastore acquire timeout {acquire:?} must be below the readiness timeout {readiness:?}")]
    AcquireTimeoutTooLong {
        acquire: Duration,
        readiness: Duration,
    },
}

impl Cli {
    /// Rejects timeouts that would let an outer deadline mask an inner one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let readiness = self.readiness_timeout();
        if self.request_timeout() <= readiness {
            return Err(ConfigError::RequestTimeoutTooShort {
                request: self.request_timeout(),
                readiness,
            });
        }
        let acquire = Duration::from_millis(self.db_acquire_timeout_ms);
        if acquire >= readiness {
            return Err(ConfigError::AcquireTimeoutTooLong { acquire, readiness });
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            url: self.database_url.0.clone(),
            max_connections: self.db_max_connections,
            min_connections: self.db_min_connections,
            acquire_timeout: Duration::from_millis(self.db_acquire_timeout_ms),
            idle_timeout: Some(Duration::from_secs(self.db_idle_timeout_secs)),
            max_lifetime: Some(Duration::from_secs(self.db_max_lifetime_secs)),
        }
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, ConfigError};
    use anyhow::{Result, bail, ensure};
    use clap::error::ErrorKind;
    use clap::{CommandFactory, Parser};
    use std::time::Duration;

    fn parse(args: &[&str]) -> Result<Cli> {
        let argv = ["starter-service", "--database-url", "postgres://app@db/app"];
        Ok(Cli::try_parse_from(argv.iter().chain(args).copied())?)
    }

    #[test]
    fn database_url_is_required() -> Result<()> {
        // Detached from DATABASE_URL so a configured environment cannot satisfy it.
        let err = Cli::command()
            .mut_arg("database_url", |arg| arg.env(None::<&'static str>))
            .try_get_matches_from(["starter-service"])
            .expect_err("parsed without a database url");
        ensure!(err.kind() == ErrorKind::MissingRequiredArgument, "{err}");
        Ok(())
    }

    #[test]
    fn zero_max_connections_is_a_usage_error() -> Result<()> {
        match parse(&["--db-max-connections", "0"]) {
            Err(err) => {
                let err = err.downcast::<clap::Error>()?;
                ensure!(err.kind() == ErrorKind::ValueValidation, "{err}");
                Ok(())
            }
            Ok(_) => bail!("zero max connections accepted"),
        }
    }

    #[test]
    fn default_timeouts_are_consistent() -> Result<()> {
        parse(&[])?.validate()?;
        Ok(())
    }

    #[test]
    fn request_timeout_must_exceed_readiness_timeout() -> Result<()> {
        for request in ["500", "2000"] {
            let cli = parse(&["--readiness-timeout-ms", "2000", "--request-timeout-ms", request])?;
            match cli.validate() {
                Err(ConfigError::RequestTimeoutTooShort { .. }) => {}
                other => bail!("request timeout {request}: {other:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn acquire_timeout_must_fit_inside_readiness_timeout() -> Result<()> {
        for acquire in ["2000", "3000"] {
            let cli = parse(&[
                "--readiness-timeout-ms",
                "2000",
                "--db-acquire-timeout-ms",
                acquire,
            ])?;
            match cli.validate() {
                Err(ConfigError::AcquireTimeoutTooLong { .. }) => {}
                other => bail!("acquire timeout {acquire}: {other:?}"),
            }
        }
        let cli = parse(&["--readiness-timeout-ms", "2000", "--db-acquire-timeout-ms", "1999"])?;
        cli.validate()?;
        Ok(())
    }

    #[test]
    fn flags_build_the_pool_config() -> Result<()> {
        let cli = Cli::try_parse_from([
            "starter-service",
            "--database-url",
            "postgres://app:s3cret@db/app",
            "--db-max-connections",
            "4",
            "--db-acquire-timeout-ms",
            "250",
            "--readiness-timeout-ms",
            "750",
        ])?;
        let pool = cli.pool_config();
        ensure!(pool.url == "postgres://app:s3cret@db/app");
        ensure!(pool.max_connections == 4);
        ensure!(pool.acquire_timeout == Duration::from_millis(250));
        ensure!(cli.readiness_timeout() == Duration::from_millis(750));
        Ok(())
    }

    #[test]
    fn debug_output_redacts_the_database_url() -> Result<()> {
        let cli = Cli::try_parse_from([
            "starter-service",
            "--database-url",
            "postgres://app:s3cret@db/app",
        ])?;
        let debug = format!("{cli:?}");
        ensure!(!debug.contains("s3cret"), "{debug}");
        Ok(())
    }
}
