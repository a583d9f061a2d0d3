//! Entity codec: domain records to flat rows and back.
//!
//! Mapping-valued fields (access keys, collaborators, deployments) become a
//! single map-valued column keyed by the business key. Optional inner fields
//! are always written as explicit `null` cells, so decoded records compare
//! equal to fully populated expectations. Nothing here touches the store.

mod app;
mod deployment;
mod user;

pub use app::{AppRow, DeploymentSlot};
pub use deployment::DeploymentRow;

use crate::services::DaoError;
use crate::store::{Row, RowKey, Table};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub trait RowCodec: Sized {
    const TABLE: Table;

    fn row_key(&self) -> RowKey;

    fn encode(&self) -> Result<Row, DaoError>;

    fn decode(row: &Row) -> Result<Self, DaoError>;
}

pub(crate) fn cell<T: Serialize>(value: &T) -> Result<Value, DaoError> {
    Ok(serde_json::to_value(value)?)
}

/// Required text column.
pub(crate) fn text(row: &Row, column: &str) -> Result<String, DaoError> {
    match row.get(column) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(DaoError::Codec(format!(
            "column {} holds {} instead of text",
            column, other
        ))),
        None => Err(DaoError::Codec(format!("missing column {}", column))),
    }
}

/// Column whose null or missing cell decodes to `T::default()`.
pub(crate) fn column_or_default<T>(row: &Row, column: &str) -> Result<T, DaoError>
where
    T: DeserializeOwned + Default,
{
    match row.get(column) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| DaoError::Codec(format!("column {}: {}", column, e))),
    }
}
