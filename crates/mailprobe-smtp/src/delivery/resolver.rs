//! Mail exchanger lookup.

use std::future::Future;
use std::time::Duration;

use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverOpts;
use hickory_resolver::name_server::TokioConnectionProvider;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};

/// One MX record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MxRecord {
    /// Preference; lower is tried first.
    pub preference: u16,
    /// Exchange host name, without the trailing root dot.
    pub exchange: String,
}

impl MxRecord {
    /// Creates a record, normalizing the exchange name.
    #[must_use]
    pub fn new(preference: u16, exchange: impl AsRef<str>) -> Self {
        Self {
            preference,
            exchange: exchange.as_ref().trim_end_matches('.').to_string(),
        }
    }

    /// Returns true for the null MX (`.`): the domain accepts no mail.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.exchange.is_empty()
    }
}

/// Source of MX records.
pub trait MxResolver {
    /// Looks up the MX records of `domain`, in answer order.
    ///
    /// A domain without MX records yields an empty list, not an error.
    fn lookup_mx(&self, domain: &str) -> impl Future<Output = Result<Vec<MxRecord>>> + Send;
}

/// Orders exchanges for delivery: ascending preference, ties kept in
/// answer order, null MX removed.
#[must_use]
pub fn order_candidates(mut records: Vec<MxRecord>) -> Vec<MxRecord> {
    records.retain(|mx| !mx.is_null());
    records.sort_by_key(|mx| mx.preference);
    records
}

/// [`MxResolver`] backed by the system resolver configuration.
///
/// The configuration is read on the first lookup, so a run against an
/// explicit server never touches it. If it cannot be read, every lookup
/// fails with [`Error::Dns`].
#[derive(Clone)]
pub struct HickoryResolver {
    timeout: Duration,
    resolver: OnceCell<TokioResolver>,
}

impl HickoryResolver {
    /// Creates a resolver that will use the system configuration.
    #[must_use]
    pub fn from_system(timeout: Duration) -> Self {
        Self {
            timeout,
            resolver: OnceCell::new(),
        }
    }

    async fn resolver(&self) -> Result<&TokioResolver> {
        self.resolver
            .get_or_try_init(|| async {
                let mut opts = ResolverOpts::default();
                opts.timeout = self.timeout;
                let resolver = TokioResolver::builder(TokioConnectionProvider::default())
                    .map_err(|e| Error::Dns(format!("system resolver configuration: {e}")))?
                    .with_options(opts)
                    .build();
                Ok(resolver)
            })
            .await
    }
}

impl std::fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryResolver")
            .field("timeout", &self.timeout)
            .field("loaded", &self.resolver.initialized())
            .finish_non_exhaustive()
    }
}

impl MxResolver for HickoryResolver {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>> {
        match self.resolver().await?.mx_lookup(domain).await {
            Ok(lookup) => {
                let records: Vec<MxRecord> = lookup
                    .iter()
                    .map(|mx| MxRecord::new(mx.preference(), mx.exchange().to_utf8()))
                    .collect();
                debug!(domain, count = records.len(), "MX lookup");
                Ok(records)
            }
            Err(err) if err.is_no_records_found() => {
                debug!(domain, "no MX records");
                Ok(Vec::new())
            }
            Err(err) => Err(Error::Dns(err.to_string())),
        }
    }
}
