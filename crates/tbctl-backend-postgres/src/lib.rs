// # PostgreSQL Backend Binding
//
// Binds the ThingsBoard service to a PostgreSQL database supplied by a
// backend relation.
//
// ## Relation Fields
//
// | Field      | Required | Context key |
// |------------|----------|-------------|
// | `host`     | yes      | `host`      |
// | `port`     | yes      | `db_port`   |
// | `database` | yes      | `database`  |
// | `username` | yes      | `username`  |
// | `password` | yes      | `password`  |
//
// The relation's `port` is the database port. It is stored as `db_port` so
// it never collides with the service port at render time.
//
// ## Schema Probe
//
// One query per binding, issued before the first start:
//
// ```sql
// SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public'
// ```
//
// Any table in `public` means ThingsBoard already created its schema and a
// plain restart is enough. The binding never retries and never caches the
// answer; both belong to the reconciler.
//
// ## Security
//
// The password never appears in logs or error messages.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::time::Duration;
use tbctl_core::backend::{BackendContext, BackendKind, RelationData, keys};
use tbctl_core::config::BackendConfig;
use tbctl_core::render::POSTGRESQL_TEMPLATE;
use tbctl_core::traits::{BackendBinding, BackendBindingFactory};
use tbctl_core::{ConnectivityFailureKind, Error, Result};

/// Default timeout for the probe connection (10 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Query counting service-owned tables
const SCHEMA_QUERY: &str =
    "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public'";

/// Fields the relation must supply
const REQUIRED_FIELDS: [&str; 5] = [
    keys::HOST,
    keys::PORT,
    keys::DATABASE,
    keys::USERNAME,
    keys::PASSWORD,
];

/// PostgreSQL backend binding
#[derive(Debug, Clone)]
pub struct PostgresBinding {
    /// Timeout for connecting to the database during the schema probe
    connect_timeout: Duration,
}

impl PostgresBinding {
    /// Create a binding with the given probe timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn connect_options(&self, context: &BackendContext) -> Result<PgConnectOptions> {
        let field = |key: &str| {
            context.get(key).ok_or_else(|| {
                Error::connectivity(
                    BackendKind::Postgresql,
                    ConnectivityFailureKind::FieldsMissing,
                    format!("context has no {}", key),
                )
            })
        };

        let port_text = field(keys::DB_PORT)?;
        let port: u16 = port_text.parse().map_err(|_| {
            Error::connectivity(
                BackendKind::Postgresql,
                ConnectivityFailureKind::FieldsMissing,
                format!("invalid port: {}", port_text),
            )
        })?;

        Ok(PgConnectOptions::new()
            .host(field(keys::HOST)?)
            .port(port)
            .database(field(keys::DATABASE)?)
            .username(field(keys::USERNAME)?)
            .password(field(keys::PASSWORD)?))
    }
}

impl Default for PostgresBinding {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl BackendBinding for PostgresBinding {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgresql
    }

    fn template_id(&self) -> &str {
        POSTGRESQL_TEMPLATE
    }

    fn bind(&self, raw: &RelationData, _unit: &str) -> Result<BackendContext> {
        raw.require(BackendKind::Postgresql, &REQUIRED_FIELDS)?;

        let mut context = BackendContext::new(BackendKind::Postgresql);
        for key in REQUIRED_FIELDS {
            let target = if key == keys::PORT { keys::DB_PORT } else { key };
            if let Some(value) = raw.get(key) {
                context = context.with(target, value);
            }
        }
        Ok(context)
    }

    async fn schema_present(&self, context: &BackendContext) -> Result<bool> {
        let options = self.connect_options(context)?;

        tracing::debug!(
            "Probing PostgreSQL schema at {}:{}",
            context.get(keys::HOST).unwrap_or_default(),
            context.get(keys::DB_PORT).unwrap_or_default()
        );

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::connectivity(
                    BackendKind::Postgresql,
                    ConnectivityFailureKind::ConnectFailed,
                    e.to_string(),
                )
            })?;

        let tables: std::result::Result<i64, sqlx::Error> =
            sqlx::query_scalar(SCHEMA_QUERY).fetch_one(&pool).await;
        pool.close().await;

        let tables = tables.map_err(|e| {
            Error::connectivity(
                BackendKind::Postgresql,
                ConnectivityFailureKind::QueryFailed,
                e.to_string(),
            )
        })?;

        tracing::info!("PostgreSQL schema probe found {} tables", tables);
        Ok(tables > 0)
    }
}

/// Factory for creating PostgreSQL bindings
pub struct PostgresBindingFactory;

impl BackendBindingFactory for PostgresBindingFactory {
    fn create(&self, config: &BackendConfig) -> Result<Box<dyn BackendBinding>> {
        match config {
            BackendConfig::Postgresql {
                connect_timeout_secs,
            } => {
                if *connect_timeout_secs == 0 {
                    return Err(Error::config("PostgreSQL connect timeout must be > 0"));
                }
                Ok(Box::new(PostgresBinding::new(Duration::from_secs(
                    *connect_timeout_secs,
                ))))
            }
            _ => Err(Error::config("Invalid config for PostgreSQL binding")),
        }
    }
}

/// Register the PostgreSQL binding with a registry
///
/// # Example
///
/// ```rust
/// use tbctl_core::BackendRegistry;
///
/// let registry = BackendRegistry::new();
/// tbctl_backend_postgres::register(&registry);
/// assert!(registry.has_binding("postgresql"));
/// ```
pub fn register(registry: &tbctl_core::BackendRegistry) {
    registry.register_binding(BackendKind::Postgresql.tag(), Box::new(PostgresBindingFactory));
}
