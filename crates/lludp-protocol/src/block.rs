use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SubfieldError;
use crate::subfield::{Subfield, SubfieldRegistry, SubfieldSerializer};
use crate::value::Value;

/// One instance of a message block: named fields in insertion order.
///
/// Field access is a hash lookup. Iteration follows the order fields were
/// first set, which for decoded blocks is template order.
#[derive(Debug, Clone)]
pub struct Block {
    name: String,
    message_name: Option<String>,
    fields: HashMap<String, Value>,
    order: Vec<String>,
    fill_missing: bool,
    subfield_cache: HashMap<String, Subfield>,
}

impl Block {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_name: None,
            fields: HashMap::new(),
            order: Vec::new(),
            fill_missing: false,
            subfield_cache: HashMap::new(),
        }
    }

    /// Sets a field, builder style.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Lets the serializer substitute zero values for fields this block
    /// doesn't set.
    pub fn fill_missing(mut self) -> Self {
        self.fill_missing = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The message this block was added to, if any.
    pub fn message_name(&self) -> Option<&str> {
        self.message_name.as_deref()
    }

    pub(crate) fn attach(&mut self, message_name: &str) {
        self.message_name = Some(message_name.to_string());
    }

    pub fn is_fill_missing(&self) -> bool {
        self.fill_missing
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Sets a field and forgets any cached subfield view of it.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        self.subfield_cache.remove(&field);
        if !self.fields.contains_key(&field) {
            self.order.push(field.clone());
        }
        self.fields.insert(field, value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.subfield_cache.remove(field);
        self.order.retain(|f| f != field);
        self.fields.remove(field)
    }

    /// Fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.order
            .iter()
            .filter_map(|f| self.fields.get(f).map(|v| (f.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decodes `field` through its registered subfield serializer.
    ///
    /// The result is cached until the field is set again.
    pub fn deserialize_var(
        &mut self,
        registry: &SubfieldRegistry,
        field: &str,
    ) -> Result<&Subfield, SubfieldError> {
        if !self.subfield_cache.contains_key(field) {
            let serializer = self.serializer(registry, field)?;
            let value = self
                .fields
                .get(field)
                .ok_or_else(|| SubfieldError::MissingField(field.to_string()))?;
            let subfield = serializer.deserialize(value)?;
            self.subfield_cache.insert(field.to_string(), subfield);
        }
        self.subfield_cache
            .get(field)
            .ok_or_else(|| SubfieldError::MissingField(field.to_string()))
    }

    /// Encodes `subfield` through the registered serializer and stores
    /// the result in `field`.
    pub fn serialize_var(
        &mut self,
        registry: &SubfieldRegistry,
        field: &str,
        subfield: Subfield,
    ) -> Result<(), SubfieldError> {
        let serializer = self.serializer(registry, field)?;
        let value = serializer.serialize(&subfield)?;
        self.set(field, value);
        self.subfield_cache.insert(field.to_string(), subfield);
        Ok(())
    }

    fn serializer(
        &self,
        registry: &SubfieldRegistry,
        field: &str,
    ) -> Result<Arc<dyn SubfieldSerializer>, SubfieldError> {
        let message = self
            .message_name
            .as_deref()
            .ok_or_else(|| SubfieldError::Detached(self.name.clone()))?;
        registry
            .get(message, &self.name, field)
            .cloned()
            .ok_or_else(|| SubfieldError::NoSerializer {
                message: message.to_string(),
                block: self.name.clone(),
                field: field.to_string(),
            })
    }

    #[cfg(feature = "json")]
    pub fn to_dict(&self) -> serde_json::Value {
        let fields = self
            .iter()
            .map(|(name, value)| {
                let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
                (name.to_string(), json)
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(fields)
    }
}
