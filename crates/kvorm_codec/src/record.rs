//! Flat JSON entity records.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved field holding the qualified type name.
pub const TYPE_FIELD: &str = "_type";
/// Reserved field holding the entity id.
pub const ID_FIELD: &str = "_id";
/// Reserved field holding the current owner (timestamped types).
pub const OWNER_FIELD: &str = "_owner";
/// Reserved field holding the creating caller (timestamped types).
pub const CREATOR_FIELD: &str = "_creator";
/// Reserved field holding the last updating caller (timestamped types).
pub const UPDATER_FIELD: &str = "_updater";
/// Reserved field holding the creation time in ms (timestamped types).
pub const CREATED_FIELD: &str = "_timestamp_created";
/// Reserved field holding the last update time in ms (timestamped types).
pub const UPDATED_FIELD: &str = "_timestamp_updated";

/// A serialized entity: one flat JSON object.
///
/// Every record carries `_type` and `_id`, optionally the timestamped system
/// fields, then one entry per declared property and relationship field.
/// Keys are kept sorted so identical records encode to identical text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates a record with only the reserved `_type` and `_id` fields.
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(TYPE_FIELD.to_string(), Value::String(type_name.into()));
        fields.insert(ID_FIELD.to_string(), Value::String(id.into()));
        Self { fields }
    }

    /// Returns the `_type` field, if present.
    pub fn type_name(&self) -> Option<&str> {
        self.fields.get(TYPE_FIELD).and_then(Value::as_str)
    }

    /// Returns the `_id` field, if present.
    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Returns the value of a field, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Returns true if the field is present.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Iterates over `(field, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over fields that are not reserved (`_`-prefixed).
    pub fn user_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.iter().filter(|(k, _)| !k.starts_with('_'))
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encodes the record as compact JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NonFiniteFloat`] if a field holds NaN or an
    /// infinite float.
    pub fn encode(&self) -> CodecResult<String> {
        self.check_finite()?;
        serde_json::to_string(&self.fields)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    /// Encodes the record as a `serde_json::Value` object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Decodes a record from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object of supported values.
    pub fn decode(text: &str) -> CodecResult<Self> {
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| CodecError::decoding_failed(e.to_string()))?;
        Self::from_json(&json)
    }

    /// Builds a record from a `serde_json::Value` object.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidStructure`] if the value is not an object.
    pub fn from_json(json: &serde_json::Value) -> CodecResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| CodecError::invalid_structure("record must be a JSON object"))?;
        let fields = object
            .iter()
            .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
            .collect::<CodecResult<BTreeMap<_, _>>>()?;
        Ok(Self { fields })
    }

    fn check_finite(&self) -> CodecResult<()> {
        match self.fields.iter().find(|(_, v)| !v.is_finite()) {
            Some((field, _)) => Err(CodecError::NonFiniteFloat {
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
