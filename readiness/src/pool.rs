use crate::{Probe, ProbeFailure};
use async_trait::async_trait;
use sqlx::AnyPool;
use sqlx::any::{AnyConnectOptions, AnyPoolOptions, install_default_drivers};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Validates connectivity without touching any schema or data.
const PING_STATEMENT: &str = "SELECT 1";

/// Schemes with a driver linked into this build.
fn supported_schemes() -> &'static [&'static str] {
    if cfg!(any(test, feature = "sqlite")) {
        &["postgres", "postgresql", "sqlite"]
    } else {
        &["postgres", "postgresql"]
    }
}

/// A connection string with removed secret
#[derive(Clone, PartialEq, Eq)]
pub struct SafeUrl(String);

impl SafeUrl {
    /// Masks the password in the userinfo part and in a `password=` query parameter.
    pub fn redact(url: &str) -> Self {
        let Some((scheme, rest)) = url.split_once("://") else {
            return Self(url.to_owned());
        };
        let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_end);

        let authority = match authority.rsplit_once('@') {
            Some((userinfo, host)) => match userinfo.split_once(':') {
                Some((user, _)) => format!("{user}:***@{host}"),
                None => format!("{userinfo}@{host}"),
            },
            None => authority.to_owned(),
        };

        let tail = match tail.split_once('?') {
            Some((path, query)) => {
                let query = query
                    .split('&')
                    .map(|pair| match pair.split_once('=') {
                        Some((key, _)) if key.eq_ignore_ascii_case("password") => {
                            format!("{key}=***")
                        }
                        _ => pair.to_owned(),
                    })
                    .collect::<Vec<_>>()
                    .join("&");
                format!("{path}?{query}")
            }
            None => tail.to_owned(),
        };

        Self(format!("{scheme}://{authority}{tail}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SafeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SafeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("malformed connection string {url}")]
    Malformed { url: SafeUrl, source: sqlx::Error },
    #[error("no datastore driver for scheme `{scheme}` in {url} (supported: {supported:?})")]
    UnsupportedScheme {
        scheme: String,
        url: SafeUrl,
        supported: &'static [&'static str],
    },
    #[error("invalid pool size: min_connections {min} with max_connections {max}")]
    InvalidSize { min: u32, max: u32 },
}

#[derive(Clone)]
pub struct PoolConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound for waiting on a free connection, including opening a new one.
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(1),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("url", &SafeUrl::redact(&self.url))
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .finish()
    }
}

/// The process-wide pool of datastore connections.
///
/// Connections are opened on demand, so building the pool never touches the network.
/// Idle connections are pinged before they are handed out; dead ones are replaced.
#[derive(Clone, Debug)]
pub struct DatastorePool {
    pool: AnyPool,
    url: SafeUrl,
}

impl DatastorePool {
    /// Must be called from within a tokio runtime: the pool spawns its maintenance task here.
    pub fn connect_lazy(config: &PoolConfig) -> Result<Self, PoolError> {
        install_default_drivers();

        if config.max_connections == 0 || config.min_connections > config.max_connections {
            return Err(PoolError::InvalidSize {
                min: config.min_connections,
                max: config.max_connections,
            });
        }

        let url = SafeUrl::redact(&config.url);
        let options = AnyConnectOptions::from_str(&config.url).map_err(|source| {
            PoolError::Malformed {
                url: url.clone(),
                source,
            }
        })?;

        let scheme = config
            .url
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default();
        let supported = supported_schemes();
        if !supported.contains(&scheme.as_str()) {
            return Err(PoolError::UnsupportedScheme {
                scheme,
                url,
                supported,
            });
        }

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .test_before_acquire(true)
            .connect_lazy_with(options);

        tracing::info!(%url, max_connections = config.max_connections, "datastore pool configured");

        Ok(Self { pool, url })
    }

    pub fn url(&self) -> &SafeUrl {
        &self.url
    }

    /// Number of open connections, idle or borrowed.
    pub fn size(&self) -> u32 {
        self.pool.size()
    }

    pub fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    /// Waits for borrowed connections to come back, then closes every connection.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!(url = %self.url, "datastore pool closed");
    }
}

#[async_trait]
impl Probe for DatastorePool {
    fn name(&self) -> &'static str {
        "datastore"
    }

    async fn ping(&self) -> Result<(), ProbeFailure> {
        // Dropping `conn` on any path hands it back to the pool.
        let mut conn = self.pool.acquire().await.map_err(ProbeFailure::Acquire)?;
        sqlx::query(PING_STATEMENT)
            .execute(&mut *conn)
            .await
            .map_err(ProbeFailure::Query)?;
        Ok(())
    }
}
