//! Static entity schemas.
//!
//! Field order is part of the contract: the serializer emits columns in the
//! order an [`EntitySchema`] declares them.

use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    /// For nullable value types this is the underlying type, e.g. `Int32`
    /// for a `Nullable<Int32>` field.
    pub declared_type: String,
    #[serde(default)]
    pub is_nullable_value_type: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            is_nullable_value_type: false,
        }
    }

    pub fn nullable(name: impl Into<String>, underlying_type: impl Into<String>) -> Self {
        Self {
            is_nullable_value_type: true,
            ..Self::new(name, underlying_type)
        }
    }

    /// The type as declared on the entity.
    pub fn declared_type_name(&self) -> String {
        if self.is_nullable_value_type {
            format!("Nullable<{}>", self.declared_type)
        } else {
            self.declared_type.clone()
        }
    }

    /// The type written to the wire. Nullable value types are unwrapped.
    pub fn column_type(&self) -> &str {
        &self.declared_type
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    pub entity_type: String,
    pub id_field: String,
    pub fields: Vec<FieldDescriptor>,
}

impl EntitySchema {
    pub fn new(entity_type: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id_field: id_field.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, descriptor: FieldDescriptor) -> Self {
        self.fields.push(descriptor);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.entity_type.trim().is_empty() {
            return Err(Error::Config("entity type must be non-empty".to_string()));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(Error::Config(format!(
                    "{}: duplicate field {}",
                    self.entity_type, field.name
                )));
            }
        }
        if !seen.contains(self.id_field.as_str()) {
            return Err(Error::Config(format!(
                "{}: identifier field {} is not a declared field",
                self.entity_type, self.id_field
            )));
        }
        Ok(())
    }
}

/// Describes entity types to the serializer.
pub trait SchemaProvider: Send + Sync {
    fn describe(&self, entity_type: &str) -> Result<Arc<EntitySchema>>;

    fn describe_fields(&self, entity_type: &str) -> Result<Vec<FieldDescriptor>> {
        Ok(self.describe(entity_type)?.fields.clone())
    }

    fn identifier_field_name(&self, entity_type: &str) -> Result<String> {
        Ok(self.describe(entity_type)?.id_field.clone())
    }
}

/// Schemas registered up front, looked up by full entity type name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_schemas(schemas: impl IntoIterator<Item = EntitySchema>) -> Result<Self> {
        let registry = Self::new();
        for schema in schemas {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    /// Load a JSON array of schemas.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let schemas: Vec<EntitySchema> = serde_json::from_str(&content)?;
        Self::from_schemas(schemas)
    }

    pub fn register(&self, schema: EntitySchema) -> Result<()> {
        schema.validate()?;
        match self.schemas.entry(schema.entity_type.clone()) {
            Entry::Occupied(existing) if **existing.get() != schema => Err(Error::Config(
                format!("conflicting schema for {}", schema.entity_type),
            )),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(schema));
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaProvider for SchemaRegistry {
    fn describe(&self, entity_type: &str) -> Result<Arc<EntitySchema>> {
        self.schemas
            .get(entity_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownEntityType {
                entity_type: entity_type.to_string(),
            })
    }
}
