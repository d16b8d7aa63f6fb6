//! Find-or-create for uniquely named control-plane resources.
//!
//! Name uniqueness checks on the control plane lag behind creation and
//! deletion, so a create can come back without an id, be refused because a
//! deleted item still holds the name, or lose a race against another caller.
//! All three are absorbed here; any other failure propagates unchanged.

use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::model::{ManagedResource, ResourceKind, ResourceRecord};
use crate::retry::{poll_until, with_retry, RetryConfig};

/// Lists resources of one kind within the current scope.
#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    /// Every resource of `kind` visible to the caller.
    async fn list(&self, kind: ResourceKind) -> Result<Vec<ResourceRecord>>;
}

/// Wait policies used while creating a resource.
#[derive(Debug, Clone)]
pub struct CreatorConfig {
    /// Backoff while the display name is still reserved by a deleted item.
    pub name_propagation: RetryConfig,
    /// Lookups until an accepted item becomes queryable.
    pub id_lookup: RetryConfig,
}

impl Default for CreatorConfig {
    fn default() -> Self {
        Self {
            name_propagation: RetryConfig::for_name_propagation(),
            id_lookup: RetryConfig::for_id_lookup(),
        }
    }
}

/// Find-or-create over a [`ResourceDirectory`].
pub struct ResourceCreator<'a, D: ?Sized> {
    directory: &'a D,
    config: CreatorConfig,
}

impl<'a, D> ResourceCreator<'a, D>
where
    D: ResourceDirectory + ?Sized,
{
    /// Creates a creator over `directory`.
    pub fn new(directory: &'a D, config: CreatorConfig) -> Self {
        Self { directory, config }
    }

    /// Looks up a resource by exact display name.
    ///
    /// # Errors
    ///
    /// Propagates listing errors.
    pub async fn find(&self, kind: ResourceKind, display_name: &str) -> Result<Option<ResourceRecord>> {
        let records = self.directory.list(kind).await?;
        Ok(records
            .into_iter()
            .find(|r| r.display_name.as_deref() == Some(display_name)))
    }

    /// Returns the resource named `display_name`, creating it with `create_fn`
    /// when absent.
    ///
    /// `reused` is false only for the caller whose create actually produced
    /// the resource.
    ///
    /// # Errors
    ///
    /// [`Error::RetriesExhausted`] when the name stays unavailable,
    /// [`Error::Timeout`] when an accepted or conflicting resource never
    /// becomes visible, and any non-retriable error from `create_fn` unchanged.
    #[instrument(skip(self, create_fn))]
    pub async fn ensure<F, Fut>(
        &self,
        kind: ResourceKind,
        display_name: &str,
        mut create_fn: F,
    ) -> Result<ManagedResource>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ResourceRecord>>,
    {
        if let Some(existing) = self.find(kind, display_name).await? {
            info!("Reusing existing {} '{}'", kind, display_name);
            let id = match existing.id {
                Some(id) => id,
                None => self.await_id(kind, display_name).await?,
            };
            return Ok(managed(kind, id, display_name, true));
        }

        let operation = format!("create {kind} '{display_name}'");
        let created = with_retry(
            &self.config.name_propagation,
            &operation,
            |e| matches!(e, Error::NameNotYetAvailable { .. }),
            |_| create_fn(),
        )
        .await;

        match created {
            Ok(record) => {
                let id = match record.id {
                    Some(id) => id,
                    None => {
                        debug!("{} '{}' accepted without id; resolving by name", kind, display_name);
                        self.await_id(kind, display_name).await?
                    }
                };
                info!("Created {} '{}' ({})", kind, display_name, id);
                Ok(managed(kind, id, display_name, false))
            }
            Err(Error::Conflict { .. }) => {
                info!(
                    "{} '{}' was created concurrently; adopting it",
                    kind, display_name
                );
                let id = self.await_id(kind, display_name).await?;
                Ok(managed(kind, id, display_name, true))
            }
            Err(Error::RetriesExhausted {
                operation,
                attempts,
                source,
            }) => Err(Error::RetriesExhausted {
                operation,
                attempts,
                source: Box::new(name_unavailable(*source, display_name)),
            }),
            Err(e) => Err(e),
        }
    }

    /// Polls the directory until `display_name` shows up with an id.
    async fn await_id(&self, kind: ResourceKind, display_name: &str) -> Result<String> {
        let operation = format!("resolve id of {kind} '{display_name}'");
        let this = self;
        poll_until(&self.config.id_lookup, &operation, move || async move {
            Ok(this
                .find(kind, display_name)
                .await?
                .and_then(|record| record.id))
        })
        .await
    }
}

fn managed(kind: ResourceKind, id: String, display_name: &str, reused: bool) -> ManagedResource {
    ManagedResource {
        id,
        display_name: display_name.to_string(),
        kind,
        reused,
    }
}

fn name_unavailable(err: Error, display_name: &str) -> Error {
    match err {
        Error::NameNotYetAvailable { body, .. } => Error::NameNotYetAvailable {
            display_name: display_name.to_string(),
            body,
        },
        other => other,
    }
}

#[cfg(test)]
#[path = "creator_tests.rs"]
mod tests;
