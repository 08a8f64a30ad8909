//! Wire payload for change batches.
//!
//! A batch becomes a JSON array with one entry per change item:
//!
//! ```json
//! [{ "op": "Write", "type": "Order", "spaceId": "Id",
//!    "payload": [{ "columnName": "Id", "value": 7, "columnType": "Int64" }] }]
//! ```
//!
//! Entries follow batch order and columns follow schema order.

use crate::change::{ChangeBatch, ChangeItem};
use crate::error::{Error, Result};
use crate::schema::{EntitySchema, SchemaProvider};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireColumn {
    #[serde(rename = "columnName")]
    pub column_name: String,
    pub value: Value,
    #[serde(rename = "columnType")]
    pub column_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEntry {
    pub op: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "spaceId")]
    pub space_id: String,
    pub payload: Vec<WireColumn>,
}

/// Parse a payload produced by [`ChangeBatchSerializer::serialize`].
pub fn decode_payload(payload: &[u8]) -> Result<Vec<WireEntry>> {
    Ok(serde_json::from_slice(payload)?)
}

#[derive(Clone)]
pub struct ChangeBatchSerializer {
    schemas: Arc<dyn SchemaProvider>,
}

impl ChangeBatchSerializer {
    pub fn new(schemas: Arc<dyn SchemaProvider>) -> Self {
        Self { schemas }
    }

    /// Pure and deterministic: the same batch always yields the same bytes.
    /// Fails on the first item that does not match its schema.
    pub fn serialize(&self, batch: &ChangeBatch) -> Result<Bytes> {
        let entries = self.to_entries(batch)?;
        let bytes = serde_json::to_vec(&entries).map_err(|e| Error::Serialization {
            entity_type: "batch".to_string(),
            reason: e.to_string(),
        })?;
        trace!(items = batch.len(), bytes = bytes.len(), "serialized change batch");
        Ok(Bytes::from(bytes))
    }

    pub fn to_entries(&self, batch: &ChangeBatch) -> Result<Vec<WireEntry>> {
        // one schema lookup per distinct entity type
        let mut schemas: HashMap<&str, Arc<EntitySchema>> = HashMap::new();
        let mut entries = Vec::with_capacity(batch.len());

        for item in batch.items() {
            let schema = match schemas.get(item.entity_type()) {
                Some(schema) => schema.clone(),
                None => {
                    let schema = self.schemas.describe(item.entity_type())?;
                    schemas.insert(item.entity_type(), schema.clone());
                    schema
                }
            };
            entries.push(Self::entry(item, &schema)?);
        }
        Ok(entries)
    }

    fn entry(item: &ChangeItem, schema: &EntitySchema) -> Result<WireEntry> {
        let mismatch = |reason: String| Error::Serialization {
            entity_type: item.entity_type().to_string(),
            reason,
        };

        // every item field must map to exactly one schema column
        let mut seen = HashSet::with_capacity(item.fields().len());
        for field in item.fields() {
            if !seen.insert(field.name.as_str()) {
                return Err(mismatch(format!("duplicate field {}", field.name)));
            }
            if !schema.fields.iter().any(|d| d.name == field.name) {
                return Err(mismatch(format!("field {} is not in the schema", field.name)));
            }
        }

        let mut payload = Vec::with_capacity(schema.fields.len());
        for descriptor in &schema.fields {
            let field = item
                .field(&descriptor.name)
                .ok_or_else(|| mismatch(format!("missing field {}", descriptor.name)))?;

            if !field.declared_type.is_empty()
                && field.declared_type != descriptor.column_type()
                && field.declared_type != descriptor.declared_type_name()
            {
                return Err(mismatch(format!(
                    "field {} declared as {}, schema says {}",
                    descriptor.name,
                    field.declared_type,
                    descriptor.declared_type_name()
                )));
            }

            payload.push(WireColumn {
                column_name: descriptor.name.clone(),
                value: field.value.clone(),
                column_type: descriptor.column_type().to_string(),
            });
        }

        Ok(WireEntry {
            op: item.operation().to_string(),
            type_name: item.short_type_name().to_string(),
            space_id: schema.id_field.clone(),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Operation;
    use crate::schema::{FieldDescriptor, SchemaRegistry};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::from_schemas([EntitySchema::new("Acme.Order", "Id")
                .field(FieldDescriptor::new("Id", "Int64"))
                .field(FieldDescriptor::nullable("Discount", "Decimal"))
                .field(FieldDescriptor::new("Customer", "String"))])
            .unwrap(),
        )
    }

    fn order(id: i64, discount: Value) -> ChangeItem {
        // fields deliberately out of schema order
        ChangeItem::new(Operation::Write, "Acme.Order")
            .with_field("Customer", "String", "ada")
            .with_field("Discount", "Nullable<Decimal>", discount)
            .with_field("Id", "Int64", id)
    }

    #[test]
    fn test_schema_order_and_shape() {
        let serializer = ChangeBatchSerializer::new(registry());
        let batch = ChangeBatch::new(vec![order(1, json!(2.5))]);
        let payload = serializer.serialize(&batch).unwrap();

        let json: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(
            json,
            json!([{
                "op": "Write",
                "type": "Order",
                "spaceId": "Id",
                "payload": [
                    { "columnName": "Id", "value": 1, "columnType": "Int64" },
                    { "columnName": "Discount", "value": 2.5, "columnType": "Decimal" },
                    { "columnName": "Customer", "value": "ada", "columnType": "String" }
                ]
            }])
        );
    }

    #[test]
    fn test_null_nullable_keeps_underlying_type() {
        let serializer = ChangeBatchSerializer::new(registry());
        let entries = serializer
            .to_entries(&ChangeBatch::new(vec![order(1, Value::Null)]))
            .unwrap();
        let discount = &entries[0].payload[1];
        assert_eq!(discount.column_type, "Decimal");
        assert_eq!(discount.value, Value::Null);
    }

    #[test]
    fn test_missing_field() {
        let serializer = ChangeBatchSerializer::new(registry());
        let item = ChangeItem::new(Operation::Remove, "Acme.Order").with_field("Id", "Int64", 1);
        let err = serializer
            .serialize(&ChangeBatch::new(vec![item]))
            .unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_undeclared_field_rejected() {
        let serializer = ChangeBatchSerializer::new(registry());
        let item = order(1, Value::Null).with_field("Total", "Decimal", 99.5);
        let err = serializer
            .serialize(&ChangeBatch::new(vec![item]))
            .unwrap_err();
        assert!(matches!(err, Error::Serialization { ref reason, .. } if reason.contains("Total")));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let serializer = ChangeBatchSerializer::new(registry());
        let item = order(1, Value::Null).with_field("Id", "Int64", 2);
        let err = serializer
            .serialize(&ChangeBatch::new(vec![item]))
            .unwrap_err();
        assert!(matches!(err, Error::Serialization { ref reason, .. } if reason.contains("duplicate")));
    }

    #[test]
    fn test_declared_type_mismatch() {
        let serializer = ChangeBatchSerializer::new(registry());
        let item = ChangeItem::new(Operation::Update, "Acme.Order")
            .with_field("Id", "String", "1")
            .with_field("Discount", "Decimal", Value::Null)
            .with_field("Customer", "String", "ada");
        assert!(serializer.serialize(&ChangeBatch::new(vec![item])).is_err());
    }

    #[test]
    fn test_unknown_entity_type() {
        let serializer = ChangeBatchSerializer::new(registry());
        let item = ChangeItem::new(Operation::Write, "Acme.Invoice");
        assert!(matches!(
            serializer.serialize(&ChangeBatch::new(vec![item])),
            Err(Error::UnknownEntityType { .. })
        ));
    }

    struct CountingProvider {
        inner: Arc<SchemaRegistry>,
        lookups: AtomicUsize,
    }

    impl SchemaProvider for CountingProvider {
        fn describe(&self, entity_type: &str) -> Result<Arc<EntitySchema>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.describe(entity_type)
        }
    }

    #[test]
    fn test_one_lookup_per_entity_type() {
        let provider = Arc::new(CountingProvider {
            inner: registry(),
            lookups: AtomicUsize::new(0),
        });
        let serializer = ChangeBatchSerializer::new(provider.clone());
        let batch: ChangeBatch = (1..=5).map(|id| order(id, Value::Null)).collect();

        serializer.serialize(&batch).unwrap();
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_decode_roundtrip_preserves_batch_order() {
        let serializer = ChangeBatchSerializer::new(registry());
        let batch: ChangeBatch = [3, 1, 2].into_iter().map(|id| order(id, Value::Null)).collect();
        let entries = decode_payload(&serializer.serialize(&batch).unwrap()).unwrap();
        let ids: Vec<i64> = entries
            .iter()
            .map(|e| e.payload[0].value.as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }
}
