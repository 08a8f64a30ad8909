use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Write,
    Update,
    Remove,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Write => "Write",
            Operation::Update => "Update",
            Operation::Remove => "Remove",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    pub name: String,
    pub declared_type: String,
    pub value: Value,
}

/// A single data mutation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeItem {
    operation: Operation,
    entity_type: String,
    fields: Vec<FieldValue>,
}

impl ChangeItem {
    pub fn new(operation: Operation, entity_type: impl Into<String>) -> Self {
        Self {
            operation,
            entity_type: entity_type.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(
        mut self,
        name: impl Into<String>,
        declared_type: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.fields.push(FieldValue {
            name: name.into(),
            declared_type: declared_type.into(),
            value: value.into(),
        });
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Full entity type name, as registered with the schema provider.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Last segment of the entity type, e.g. `Order` for `Acme.Sales.Order`.
    pub fn short_type_name(&self) -> &str {
        self.entity_type
            .rsplit(|c: char| c == '.' || c == ':')
            .next()
            .unwrap_or(&self.entity_type)
    }

    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Ordered group of changes published as one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeBatch {
    items: Vec<ChangeItem>,
}

impl ChangeBatch {
    pub fn new(items: Vec<ChangeItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[ChangeItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<ChangeItem> for ChangeBatch {
    fn from_iter<I: IntoIterator<Item = ChangeItem>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
