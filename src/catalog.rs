//! Remote-backed partition catalog.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::partition::PartitionId;
use crate::remote::RemoteClient;
use crate::traits::PartitionCatalog;

/// Lists `<prefix>YYYY.MM.DD-HH` indices from the remote store.
///
/// Indices that do not carry the prefix (system indices, other tenants) or
/// whose stamp is not zero-padded are skipped, since string ordering would
/// not be chronological for them.
pub struct RemoteCatalog {
    client: RemoteClient,
    prefix: String,
}

impl RemoteCatalog {
    pub fn new(client: RemoteClient, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl PartitionCatalog for RemoteCatalog {
    async fn list(&self) -> Result<Vec<PartitionId>> {
        let names = self.client.list_indices().await?;
        Ok(select_partitions(&self.prefix, names))
    }
}

/// Keep the names that parse as partitions, sorted and de-duplicated.
pub fn select_partitions<I>(prefix: &str, names: I) -> Vec<PartitionId>
where
    I: IntoIterator<Item = String>,
{
    let mut partitions: Vec<PartitionId> = names
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .filter_map(|name| match PartitionId::parse(prefix, &name) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!(index = %name, error = %e, "skipping index with non-conforming name");
                None
            }
        })
        .collect();
    partitions.sort();
    partitions.dedup();
    partitions
}
