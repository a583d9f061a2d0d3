use super::{Row, RowKey, StoreClient, StoreError, Table, VERSION_COLUMN};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use mongodb::{
    bson::{self, doc, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions, ReplaceOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};

const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed store: one collection per table, one document per row.
///
/// The document `_id` is derived from the row key, so a plain `insert_one`
/// is the conditional write and the server's unique `_id` index closes the
/// race between concurrent reservations. Versioned writes filter on
/// `columns.version` and report a miss through the matched or deleted count.
///
/// Column contents are keyed by emails and tokens, so `%`, `.` and `$` in
/// field names are percent-encoded on the way in and decoded on the way out.
#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            StoreError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), StoreError> {
        tracing::info!("Creating MongoDB indexes for ota-dao tables");

        for table in Table::ALL {
            let partition_index = IndexModel::builder()
                .keys(doc! { "partition": 1, "clustering": 1 })
                .options(
                    IndexOptions::builder()
                        .name(format!("{}_partition_idx", table.name()))
                        .build(),
                )
                .build();

            self.collection(table)
                .create_index(partition_index, None)
                .await
                .map_err(|e| {
                    tracing::error!(table = %table, "Failed to create partition index: {}", e);
                    StoreError::from(e)
                })?;
        }

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    /// Drop the whole database. Used to isolate test runs.
    pub async fn drop_database(&self) -> Result<(), StoreError> {
        self.db.drop(None).await.map_err(StoreError::from)
    }

    fn collection(&self, table: Table) -> Collection<Document> {
        self.db.collection(table.name())
    }

    fn document_id(key: &RowKey) -> String {
        match &key.clustering {
            Some(clustering) => format!("{}\u{1f}{}", key.partition, clustering),
            None => key.partition.clone(),
        }
    }

    /// Filter matching the row at `key` while it still has version `expected`.
    /// Rows written without a version column count as version 0.
    fn version_filter(key: &RowKey, expected: u64) -> Result<Document, StoreError> {
        let field = format!("columns.{}", VERSION_COLUMN);
        let version = i64::try_from(expected)
            .map_err(|e| StoreError::Serialization(anyhow::Error::new(e)))?;
        let id = Self::document_id(key);
        if version == 0 {
            Ok(doc! {
                "_id": id,
                "$or": [ { field.as_str(): 0_i64 }, { field.as_str(): { "$exists": false } } ],
            })
        } else {
            Ok(doc! { "_id": id, field.as_str(): version })
        }
    }

    fn to_document(key: &RowKey, row: &Row) -> Result<Document, StoreError> {
        let columns = bson::to_document(&map_row_fields(row.clone(), escape_field))
            .map_err(|e| StoreError::Serialization(anyhow::Error::new(e)))?;
        Ok(doc! {
            "_id": Self::document_id(key),
            "partition": key.partition.as_str(),
            "clustering": key.clustering_or_empty(),
            "columns": columns,
        })
    }

    fn to_row(document: Document) -> Result<Row, StoreError> {
        let columns = document
            .get_document("columns")
            .map_err(|e| StoreError::Serialization(anyhow::Error::new(e)))?
            .clone();
        let row: Row = bson::from_document(columns)
            .map_err(|e| StoreError::Serialization(anyhow::Error::new(e)))?;
        Ok(map_row_fields(row, unescape_field))
    }
}

fn escape_field(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '.' => escaped.push_str("%2E"),
            '$' => escaped.push_str("%24"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn unescape_field(field: &str) -> String {
    let mut unescaped = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('%') {
        unescaped.push_str(&rest[..pos]);
        let decoded = match rest.get(pos + 1..pos + 3) {
            Some("25") => '%',
            Some("2E") => '.',
            Some("24") => '$',
            _ => {
                unescaped.push('%');
                rest = &rest[pos + 1..];
                continue;
            }
        };
        unescaped.push(decoded);
        rest = &rest[pos + 3..];
    }
    unescaped.push_str(rest);
    unescaped
}

/// Rewrite every object key in `row`, at any depth, with `rename`.
fn map_row_fields(row: Row, rename: fn(&str) -> String) -> Row {
    row.into_iter()
        .map(|(field, value)| (rename(&field), map_value_fields(value, rename)))
        .collect()
}

fn map_value_fields(value: Value, rename: fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(map_row_fields(map, rename)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| map_value_fields(item, rename))
                .collect(),
        ),
        other => other,
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

#[async_trait]
impl StoreClient for MongoStore {
    async fn get(&self, table: Table, key: &RowKey) -> Result<Option<Row>, StoreError> {
        let document = self
            .collection(table)
            .find_one(doc! { "_id": Self::document_id(key) }, None)
            .await
            .map_err(|e| {
                tracing::error!(table = %table, key = %key, "Failed to read row: {}", e);
                StoreError::from(e)
            })?;
        document.map(Self::to_row).transpose()
    }

    async fn get_partition(&self, table: Table, partition: &str) -> Result<Vec<Row>, StoreError> {
        let find_options = FindOptions::builder()
            .sort(doc! { "clustering": 1 })
            .build();

        let cursor = self
            .collection(table)
            .find(doc! { "partition": partition }, find_options)
            .await
            .map_err(|e| {
                tracing::error!(
                    table = %table,
                    partition = %partition,
                    "Failed to read partition: {}",
                    e
                );
                StoreError::from(e)
            })?;

        let documents: Vec<Document> = cursor.try_collect().await.map_err(|e| {
            tracing::error!(
                table = %table,
                partition = %partition,
                "Failed to collect partition: {}",
                e
            );
            StoreError::from(e)
        })?;

        documents.into_iter().map(Self::to_row).collect()
    }

    async fn put(&self, table: Table, key: &RowKey, row: Row) -> Result<(), StoreError> {
        let document = Self::to_document(key, &row)?;
        let options = ReplaceOptions::builder().upsert(true).build();

        self.collection(table)
            .replace_one(doc! { "_id": Self::document_id(key) }, document, options)
            .await
            .map_err(|e| {
                tracing::error!(table = %table, key = %key, "Failed to write row: {}", e);
                StoreError::from(e)
            })?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        table: Table,
        key: &RowKey,
        row: Row,
    ) -> Result<bool, StoreError> {
        let document = Self::to_document(key, &row)?;

        match self.collection(table).insert_one(document, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => {
                tracing::error!(table = %table, key = %key, "Failed conditional write: {}", e);
                Err(StoreError::from(e))
            }
        }
    }

    async fn put_if_version(
        &self,
        table: Table,
        key: &RowKey,
        row: Row,
        expected: u64,
    ) -> Result<bool, StoreError> {
        let document = Self::to_document(key, &row)?;
        let filter = Self::version_filter(key, expected)?;

        let result = self
            .collection(table)
            .replace_one(filter, document, None)
            .await
            .map_err(|e| {
                tracing::error!(table = %table, key = %key, "Failed versioned write: {}", e);
                StoreError::from(e)
            })?;
        Ok(result.matched_count == 1)
    }

    async fn delete(&self, table: Table, key: &RowKey) -> Result<(), StoreError> {
        self.collection(table)
            .delete_one(doc! { "_id": Self::document_id(key) }, None)
            .await
            .map_err(|e| {
                tracing::error!(table = %table, key = %key, "Failed to delete row: {}", e);
                StoreError::from(e)
            })?;
        Ok(())
    }

    async fn delete_if_version(
        &self,
        table: Table,
        key: &RowKey,
        expected: u64,
    ) -> Result<bool, StoreError> {
        let filter = Self::version_filter(key, expected)?;

        let result = self
            .collection(table)
            .delete_one(filter, None)
            .await
            .map_err(|e| {
                tracing::error!(table = %table, key = %key, "Failed versioned delete: {}", e);
                StoreError::from(e)
            })?;
        Ok(result.deleted_count == 1)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                StoreError::from(e)
            })?;
        Ok(())
    }
}
