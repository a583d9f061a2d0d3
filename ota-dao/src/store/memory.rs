use super::{row_version, Row, RowKey, StoreClient, StoreError, Table};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;

type PartitionKey = (Table, String);

/// In-process store used by tests and by the `memory` backend.
///
/// Each partition is one map entry; holding the entry guard makes the
/// existence or version check and the write that follows a single step.
#[derive(Default)]
pub struct MemoryStore {
    partitions: DashMap<PartitionKey, BTreeMap<String, Row>>,
    failing_tables: DashSet<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `table` fail with a backend error until cleared.
    pub fn fail_writes_to(&self, table: Table) {
        self.failing_tables.insert(table);
    }

    pub fn clear_failures(&self) {
        self.failing_tables.clear();
    }

    /// Number of rows currently stored in `table`.
    pub fn row_count(&self, table: Table) -> usize {
        self.partitions
            .iter()
            .filter(|entry| entry.key().0 == table)
            .map(|entry| entry.value().len())
            .sum()
    }

    fn check_writable(&self, table: Table, key: &RowKey) -> Result<(), StoreError> {
        if self.failing_tables.contains(&table) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "injected write failure on {} for {}",
                table,
                key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn get(&self, table: Table, key: &RowKey) -> Result<Option<Row>, StoreError> {
        Ok(self
            .partitions
            .get(&(table, key.partition.clone()))
            .and_then(|partition| partition.get(key.clustering_or_empty()).cloned()))
    }

    async fn get_partition(&self, table: Table, partition: &str) -> Result<Vec<Row>, StoreError> {
        Ok(self
            .partitions
            .get(&(table, partition.to_string()))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put(&self, table: Table, key: &RowKey, row: Row) -> Result<(), StoreError> {
        self.check_writable(table, key)?;
        self.partitions
            .entry((table, key.partition.clone()))
            .or_default()
            .insert(key.clustering_or_empty().to_string(), row);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        table: Table,
        key: &RowKey,
        row: Row,
    ) -> Result<bool, StoreError> {
        self.check_writable(table, key)?;
        let mut partition = self
            .partitions
            .entry((table, key.partition.clone()))
            .or_default();
        let clustering = key.clustering_or_empty();
        if partition.contains_key(clustering) {
            return Ok(false);
        }
        partition.insert(clustering.to_string(), row);
        Ok(true)
    }

    async fn put_if_version(
        &self,
        table: Table,
        key: &RowKey,
        row: Row,
        expected: u64,
    ) -> Result<bool, StoreError> {
        self.check_writable(table, key)?;
        let Some(mut partition) = self.partitions.get_mut(&(table, key.partition.clone())) else {
            return Ok(false);
        };
        match partition.get_mut(key.clustering_or_empty()) {
            Some(current) if row_version(current) == expected => {
                *current = row;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, table: Table, key: &RowKey) -> Result<(), StoreError> {
        self.check_writable(table, key)?;
        let partition_key = (table, key.partition.clone());
        if let Some(mut partition) = self.partitions.get_mut(&partition_key) {
            partition.remove(key.clustering_or_empty());
        }
        self.partitions
            .remove_if(&partition_key, |_, rows| rows.is_empty());
        Ok(())
    }

    async fn delete_if_version(
        &self,
        table: Table,
        key: &RowKey,
        expected: u64,
    ) -> Result<bool, StoreError> {
        self.check_writable(table, key)?;
        let partition_key = (table, key.partition.clone());
        let deleted = match self.partitions.get_mut(&partition_key) {
            Some(mut partition) => {
                let clustering = key.clustering_or_empty();
                let matches = partition
                    .get(clustering)
                    .is_some_and(|current| row_version(current) == expected);
                if matches {
                    partition.remove(clustering);
                }
                matches
            }
            None => false,
        };
        self.partitions
            .remove_if(&partition_key, |_, rows| rows.is_empty());
        Ok(deleted)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
