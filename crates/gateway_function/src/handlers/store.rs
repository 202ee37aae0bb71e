//! Partitioned store operations: single upsert, scoped read, batch write.

use gateway_core::contract::{BatchItem, BatchOperation, BatchOutcome, BatchResult};
use gateway_core::record_id::stamp_identity;
use gateway_core::GatewayError;
use serde_json::{Map, Value};

use super::Gateway;
use crate::adapters::document_store::{QueryScope, StoreCredential};

impl Gateway {
    /// Idempotent upsert into the caller's partition, keyed by the record's
    /// derived identity. Returns the stored document.
    pub fn insert_record(
        &self,
        logical_table: &str,
        mut record: Map<String, Value>,
        principal: &str,
    ) -> Result<Value, GatewayError> {
        let container = self.registry.table(logical_table)?;
        let id = stamp_identity(&mut record)?;
        let credential = self.table_credential(principal, container)?;

        let stored = self
            .backends
            .documents
            .upsert(container, &record, principal, &credential)?;
        tracing::info!(component = "store", event = "record_upserted", table = logical_table, id = %id);
        Ok(stored)
    }

    /// Shared tables are read across all partitions with this service's own
    /// identity; every other table only within the caller's partition.
    pub fn read_records(
        &self,
        logical_table: &str,
        query: &str,
        principal: &str,
    ) -> Result<Vec<Value>, GatewayError> {
        let container = self.registry.table(logical_table)?;
        let (scope, credential) = if self.registry.is_shared_table(logical_table) {
            (QueryScope::CrossPartition, StoreCredential::ServiceIdentity)
        } else {
            (
                QueryScope::Partition(principal.to_string()),
                self.table_credential(principal, container)?,
            )
        };

        let records = self
            .backends
            .documents
            .query(container, query, &scope, &credential)?;
        tracing::info!(
            component = "store",
            event = "records_read",
            table = logical_table,
            shared = matches!(scope, QueryScope::CrossPartition),
            count = records.len(),
        );
        Ok(records)
    }

    /// Decodes and applies each item on its own, in order. One item's failure,
    /// including an undecodable item, is recorded in its slot and never stops
    /// the rest; nothing is rolled back.
    pub fn write_batch(&self, items: Vec<Value>, principal: &str) -> BatchResult {
        let outcomes = items
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                match BatchItem::decode(index, raw)
                    .and_then(|item| self.apply_batch_item(item, principal))
                {
                    Ok((operation, item_id)) => BatchOutcome::applied(operation, item_id),
                    Err(error) => {
                        tracing::warn!(
                            component = "store",
                            event = "batch_item_failed",
                            index,
                            error = %error,
                        );
                        BatchOutcome::failed(&error)
                    }
                }
            })
            .collect::<Vec<_>>();

        let result = BatchResult(outcomes);
        tracing::info!(
            component = "store",
            event = "batch_written",
            items = result.len(),
            failures = result.failures(),
        );
        result
    }

    fn apply_batch_item(
        &self,
        item: BatchItem,
        principal: &str,
    ) -> Result<(BatchOperation, String), GatewayError> {
        let operation = item.operation();
        let container = self.registry.table(item.table_name())?;
        let credential = self.table_credential(principal, container)?;

        match item {
            BatchItem::Put { mut item, .. } => {
                let id = stamp_identity(&mut item)?;
                self.backends
                    .documents
                    .upsert(container, &item, principal, &credential)?;
                Ok((operation, id))
            }
            BatchItem::Delete { key, .. } => {
                self.backends
                    .documents
                    .delete(container, &key.id, principal, &credential)?;
                Ok((operation, key.id))
            }
        }
    }

    fn table_credential(
        &self,
        principal: &str,
        container: &str,
    ) -> Result<StoreCredential, GatewayError> {
        self.backends
            .broker
            .scoped_token(principal, container)
            .map(StoreCredential::ResourceToken)
    }
}
