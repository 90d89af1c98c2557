//! Fetch-and-convert with a per-table, single-flight cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use snafu::prelude::*;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use floe_core::emit;
use floe_core::metrics::events::SchemaResolved;

use super::descriptor::TableSchema;
use crate::error::{SchemaError, SchemaUnavailableSnafu};
use crate::stream::WriteTransportRef;
use crate::table::TableRef;

type Slot = Arc<OnceCell<Arc<TableSchema>>>;

/// Resolves table schemas once per table for the lifetime of the resolver.
///
/// Concurrent first callers for the same table share one fetch. A failed
/// fetch leaves the slot empty, so the next caller tries again.
pub struct SchemaResolver {
    transport: WriteTransportRef,
    slots: Mutex<HashMap<TableRef, Slot>>,
}

impl SchemaResolver {
    pub fn new(transport: WriteTransportRef) -> Self {
        Self {
            transport,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `table`, fetching it on first use.
    pub async fn resolve(&self, table: &TableRef) -> Result<Arc<TableSchema>, SchemaError> {
        let slot = self.slot(table);
        let schema = slot
            .get_or_try_init(|| async {
                let schema = self.fetch(table).await?;
                Ok::<_, SchemaError>(Arc::new(schema))
            })
            .await?;

        Ok(Arc::clone(schema))
    }

    /// Fetch and convert `table` without consulting the cache.
    pub async fn fetch(&self, table: &TableRef) -> Result<TableSchema, SchemaError> {
        debug!(table = %table, "Fetching table schema");

        let remote = self
            .transport
            .fetch_schema(table)
            .await
            .context(SchemaUnavailableSnafu {
                table: table.to_string(),
            })?;
        let schema = TableSchema::from_remote(table.clone(), &remote)?;

        info!(
            table = %table,
            fields = schema.root().fields.len(),
            "Resolved table schema"
        );
        emit!(SchemaResolved {
            fields: schema.root().fields.len(),
            target: table.label(),
        });

        Ok(schema)
    }

    /// Whether `table` has a resolved schema cached.
    pub fn is_cached(&self, table: &TableRef) -> bool {
        self.lock_slots()
            .get(table)
            .is_some_and(|slot| slot.initialized())
    }

    fn slot(&self, table: &TableRef) -> Slot {
        let mut slots = self.lock_slots();
        Arc::clone(slots.entry(table.clone()).or_default())
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<TableRef, Slot>> {
        // The map holds no invariants a panicking holder could break.
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RemoteField, RemoteTableSchema};
    use crate::stream::MemoryStore;
    use std::time::Duration;

    fn events_table() -> TableRef {
        TableRef::new("p", "d", "events")
    }

    fn store_with_table() -> MemoryStore {
        let store = MemoryStore::new();
        store.register_table(
            events_table(),
            RemoteTableSchema {
                fields: vec![
                    RemoteField::new("id", "INT64", "REQUIRED"),
                    RemoteField::new("name", "STRING", "NULLABLE"),
                ],
            },
        );
        store
    }

    #[tokio::test]
    async fn test_resolve_caches_by_table() {
        let store = store_with_table();
        let resolver = SchemaResolver::new(Arc::new(store.clone()));

        assert!(!resolver.is_cached(&events_table()));
        let first = resolver.resolve(&events_table()).await.unwrap();
        let second = resolver.resolve(&events_table()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(resolver.is_cached(&events_table()));
        assert_eq!(store.schema_fetches(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_access_fetches_once() {
        let store = store_with_table();
        store.set_fetch_delay(Duration::from_millis(30));
        let resolver = Arc::new(SchemaResolver::new(Arc::new(store.clone())));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { resolver.resolve(&events_table()).await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.schema_fetches(), 1);
    }

    #[tokio::test]
    async fn test_missing_table_is_unavailable_and_not_cached() {
        let store = MemoryStore::new();
        let resolver = SchemaResolver::new(Arc::new(store.clone()));
        let missing = TableRef::new("p", "d", "missing");

        let err = resolver.resolve(&missing).await.unwrap_err();
        assert!(matches!(err, SchemaError::SchemaUnavailable { .. }));
        assert!(err.to_string().contains("projects/p/datasets/d/tables/missing"));
        assert!(!resolver.is_cached(&missing));

        // A later registration is picked up because failures are not cached.
        store.register_table(
            missing.clone(),
            RemoteTableSchema {
                fields: vec![RemoteField::new("id", "INT64", "REQUIRED")],
            },
        );
        assert!(resolver.resolve(&missing).await.is_ok());
    }
}
