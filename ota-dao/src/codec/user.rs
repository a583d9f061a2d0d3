use super::{cell, column_or_default, text, RowCodec};
use crate::models::User;
use crate::services::DaoError;
use crate::store::{Row, RowKey, Table};
use serde_json::Value;

impl RowCodec for User {
    const TABLE: Table = Table::Users;

    fn row_key(&self) -> RowKey {
        RowKey::partition(&self.id)
    }

    fn encode(&self) -> Result<Row, DaoError> {
        let mut row = Row::new();
        row.insert("id".into(), Value::String(self.id.clone()));
        row.insert("email".into(), Value::String(self.email.clone()));
        row.insert("name".into(), Value::String(self.name.clone()));
        row.insert("linked_providers".into(), cell(&self.linked_providers)?);
        row.insert("access_keys".into(), cell(&self.access_keys)?);
        Ok(row)
    }

    fn decode(row: &Row) -> Result<Self, DaoError> {
        Ok(User {
            id: text(row, "id")?,
            email: text(row, "email")?,
            name: column_or_default(row, "name")?,
            linked_providers: column_or_default(row, "linked_providers")?,
            access_keys: column_or_default(row, "access_keys")?,
        })
    }
}
