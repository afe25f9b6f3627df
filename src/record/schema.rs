use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};
use super::value::{Field, FieldType};

/// Field definition: name plus type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldDef {
    /// Create a new field definition
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// Get the size of this field in bytes
    pub fn size(&self) -> usize {
        self.field_type.size()
    }
}

/// Immutable record layout shared by every record of a storage file.
///
/// Two schemas are equal when their type sequences are equal; field names do
/// not take part in the comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<FieldDef>", into = "Vec<FieldDef>")]
pub struct Schema {
    fields: Vec<FieldDef>,
    record_size: usize,
}

impl Schema {
    /// Create a new schema
    pub fn new(fields: Vec<FieldDef>) -> Self {
        let record_size = fields.iter().map(|f| f.size()).sum();
        Self {
            fields,
            record_size,
        }
    }

    /// Schema of unnamed fields with the given types
    pub fn from_types(types: &[FieldType]) -> Self {
        Self::new(
            types
                .iter()
                .enumerate()
                .map(|(i, ty)| FieldDef::new(format!("field{}", i), *ty))
                .collect(),
        )
    }

    /// Get all fields
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Get field count
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Get a specific field
    pub fn field(&self, idx: usize) -> Option<&FieldDef> {
        self.fields.get(idx)
    }

    /// Find field index by name
    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Get total record size in bytes
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Get the byte offset of a field within a record
    pub fn field_offset(&self, idx: usize) -> usize {
        self.fields[..idx].iter().map(|f| f.size()).sum()
    }

    /// Validate field values against this schema
    pub fn validate(&self, values: &[Field]) -> RecordResult<()> {
        if values.len() != self.fields.len() {
            return Err(RecordError::SchemaMismatch(format!(
                "Expected {} fields, got {}",
                self.fields.len(),
                values.len()
            )));
        }

        for (value, def) in values.iter().zip(&self.fields) {
            if !value.matches(&def.field_type) {
                return Err(RecordError::SchemaMismatch(format!(
                    "Field '{}' expects {}, got {:?}",
                    def.name, def.field_type, value
                )));
            }
        }

        Ok(())
    }

    /// Require that field `idx` exists and is an integer (usable as an index key)
    pub fn require_int_field(&self, idx: usize) -> RecordResult<()> {
        match self.fields.get(idx) {
            Some(def) if def.field_type == FieldType::Int => Ok(()),
            Some(def) => Err(RecordError::SchemaMismatch(format!(
                "Key field '{}' must be INT, found {}",
                def.name, def.field_type
            ))),
            None => Err(RecordError::SchemaMismatch(format!(
                "Key field index {} out of range for {} fields",
                idx,
                self.fields.len()
            ))),
        }
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for Schema {}

impl From<Vec<FieldDef>> for Schema {
    fn from(fields: Vec<FieldDef>) -> Self {
        Self::new(fields)
    }
}

impl From<Schema> for Vec<FieldDef> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_schema() -> Schema {
        Schema::new(vec![
            FieldDef::new("id", FieldType::Int),
            FieldDef::new("name", FieldType::Str(20)),
            FieldDef::new("score", FieldType::Int),
        ])
    }

    #[test]
    fn test_schema_creation() {
        let schema = create_test_schema();
        assert_eq!(schema.field_count(), 3);
        assert_eq!(schema.record_size(), 4 + 20 + 4);
    }

    #[test]
    fn test_field_offset() {
        let schema = create_test_schema();
        assert_eq!(schema.field_offset(0), 0);
        assert_eq!(schema.field_offset(1), 4);
        assert_eq!(schema.field_offset(2), 24);
    }

    #[test]
    fn test_find_field() {
        let schema = create_test_schema();
        assert_eq!(schema.find_field("id"), Some(0));
        assert_eq!(schema.find_field("score"), Some(2));
        assert_eq!(schema.find_field("nonexistent"), None);
    }

    #[test]
    fn test_equality_ignores_names() {
        let renamed = Schema::new(vec![
            FieldDef::new("a", FieldType::Int),
            FieldDef::new("b", FieldType::Str(20)),
            FieldDef::new("c", FieldType::Int),
        ]);
        assert_eq!(create_test_schema(), renamed);

        let different = Schema::from_types(&[FieldType::Int, FieldType::Str(21), FieldType::Int]);
        assert_ne!(create_test_schema(), different);
    }

    #[test]
    fn test_validate_success() {
        let schema = create_test_schema();
        let values = vec![Field::Int(1), Field::from("Alice"), Field::Int(95)];
        assert!(schema.validate(&values).is_ok());
    }

    #[test]
    fn test_validate_type_mismatch() {
        let schema = create_test_schema();
        let values = vec![Field::from("not_an_int"), Field::from("Alice"), Field::Int(95)];
        assert!(matches!(
            schema.validate(&values),
            Err(RecordError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_validate_field_count_mismatch() {
        let schema = create_test_schema();
        let values = vec![Field::Int(1), Field::from("Alice")];
        assert!(schema.validate(&values).is_err());
    }

    #[test]
    fn test_require_int_field() {
        let schema = create_test_schema();
        assert!(schema.require_int_field(0).is_ok());
        assert!(schema.require_int_field(1).is_err());
        assert!(schema.require_int_field(7).is_err());
    }

    #[test]
    fn test_json_round_trip_keeps_names() {
        let schema = create_test_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let restored: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.fields(), schema.fields());
        assert_eq!(restored.record_size(), schema.record_size());
    }
}
