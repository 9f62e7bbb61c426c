// # Backend Binding Trait
//
// Defines the interface between the reconciler and one database family.
//
// ## Implementations
//
// - PostgreSQL: `tbctl-backend-postgres` crate
// - Cassandra: `tbctl-backend-cassandra` crate
//
// ## Usage
//
// ```rust,ignore
// use tbctl_core::BackendBinding;
//
// let binding = /* BackendBinding implementation */;
//
// // Pure: derive the context from raw relation fields
// let context = binding.bind(&relation_data, "thingsboard/0")?;
//
// // One query per binding: does the backend already hold our schema?
// let present = binding.schema_present(&context).await?;
// ```

use async_trait::async_trait;

use crate::backend::{BackendContext, BackendKind, RelationData, database_name_for_unit};

/// Trait for backend binding implementations
///
/// A binding turns raw relation data into a [`BackendContext`] and answers
/// one question about the bound database: does it already contain the
/// service's schema?
///
/// # Contract
///
/// - [`bind`](Self::bind) is pure. Missing fields yield
///   `Error::BindingUnavailable`; the reconciler stays blocked and retries on
///   the next pass.
/// - [`schema_present`](Self::schema_present) is the only network call. It
///   reports failures as `Error::Connectivity` with a kind that separates
///   malformed fields, failed connects and failed queries.
/// - Bindings never retry, never cache the probe result, and never touch the
///   context store. Those decisions belong to the reconciler.
#[async_trait]
pub trait BackendBinding: Send + Sync {
    /// Backend family handled by this binding
    fn kind(&self) -> BackendKind;

    /// Template used to render the service configuration for this backend
    fn template_id(&self) -> &str;

    /// Logical database / keyspace name requested for a unit
    ///
    /// Must be deterministic so that repeated requests are idempotent.
    fn database_name(&self, unit: &str) -> String {
        database_name_for_unit(unit)
    }

    /// Derive the connection context from raw relation data
    ///
    /// # Parameters
    ///
    /// - `raw`: Fields supplied by the backend relation
    /// - `unit`: Unit identity, for names the relation does not supply
    ///
    /// # Returns
    ///
    /// - `Ok(BackendContext)`: All required fields present
    /// - `Err(Error::BindingUnavailable)`: Required fields missing
    fn bind(&self, raw: &RelationData, unit: &str) -> Result<BackendContext, crate::Error>;

    /// Check whether the bound backend already contains service-owned schema
    ///
    /// Issued once per binding, before the first start against it.
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: Schema present, a plain restart is enough
    /// - `Ok(false)`: Empty backend, first-run bootstrap required
    /// - `Err(Error::Connectivity)`: The check could not be completed
    async fn schema_present(&self, context: &BackendContext) -> Result<bool, crate::Error>;
}

/// Helper trait for constructing backend bindings from configuration
pub trait BackendBindingFactory: Send + Sync {
    /// Create a BackendBinding instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this binding
    ///
    /// # Returns
    ///
    /// A boxed BackendBinding trait object
    fn create(
        &self,
        config: &crate::config::BackendConfig,
    ) -> Result<Box<dyn BackendBinding>, crate::Error>;
}
