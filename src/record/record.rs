use super::error::{RecordError, RecordResult};
use super::schema::Schema;
use super::value::Field;
use crate::file::PageId;

/// Slot identifier within a page
pub type SlotId = usize;

/// Physical identifier for a record (page + slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page: PageId,
    pub slot: SlotId,
}

impl RecordId {
    pub fn new(page: PageId, slot: SlotId) -> Self {
        Self { page, slot }
    }
}

/// A single record (row) with typed values.
///
/// Records read from a storage file remember where they were found; that
/// address does not take part in equality.
#[derive(Debug, Clone)]
pub struct Record {
    fields: Vec<Field>,
    rid: Option<RecordId>,
}

impl Record {
    /// Create a new record
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields, rid: None }
    }

    /// Get the number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if record is empty
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get a field by index
    pub fn get(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    /// Get an integer field by index
    pub fn get_int(&self, idx: usize) -> Option<i32> {
        self.fields.get(idx).and_then(Field::as_int)
    }

    /// Get all fields
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Where this record was read from, if anywhere
    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn with_rid(mut self, rid: RecordId) -> Self {
        self.rid = Some(rid);
        self
    }

    /// Serialize record to bytes according to schema
    /// Format: [field0 data] [field1 data] ...
    pub fn serialize(&self, schema: &Schema) -> RecordResult<Vec<u8>> {
        schema.validate(&self.fields)?;

        let mut result = vec![0u8; schema.record_size()];
        let mut offset = 0;
        for (value, def) in self.fields.iter().zip(schema.fields()) {
            let size = def.size();
            value.write_to(&def.field_type, &mut result[offset..offset + size])?;
            offset += size;
        }

        Ok(result)
    }

    /// Deserialize record from bytes according to schema
    pub fn deserialize(data: &[u8], schema: &Schema) -> RecordResult<Self> {
        if data.len() != schema.record_size() {
            return Err(RecordError::Deserialization(format!(
                "Expected {} bytes, got {}",
                schema.record_size(),
                data.len()
            )));
        }

        let mut offset = 0;
        let mut fields = Vec::with_capacity(schema.field_count());
        for def in schema.fields() {
            let size = def.size();
            fields.push(Field::read_from(&data[offset..offset + size], &def.field_type)?);
            offset += size;
        }

        Ok(Record { fields, rid: None })
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Record {}

impl From<Vec<Field>> for Record {
    fn from(fields: Vec<Field>) -> Self {
        Self::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileId;
    use crate::record::{FieldDef, FieldType};
    use std::path::Path;

    fn create_test_schema() -> Schema {
        Schema::new(vec![
            FieldDef::new("id", FieldType::Int),
            FieldDef::new("name", FieldType::Str(10)),
            FieldDef::new("score", FieldType::Int),
        ])
    }

    #[test]
    fn test_record_creation() {
        let record = Record::new(vec![Field::Int(1), Field::from("Alice"), Field::Int(95)]);
        assert_eq!(record.len(), 3);
        assert_eq!(record.get(0), Some(&Field::Int(1)));
        assert_eq!(record.get_int(2), Some(95));
        assert_eq!(record.get_int(1), None);
        assert!(record.rid().is_none());
    }

    #[test]
    fn test_record_serialization_layout() {
        let schema = create_test_schema();
        let record = Record::new(vec![Field::Int(42), Field::from("test"), Field::Int(-1)]);

        let bytes = record.serialize(&schema).unwrap();
        assert_eq!(bytes.len(), schema.record_size());
        assert_eq!(&bytes[..4], &42i32.to_le_bytes());
        assert_eq!(&bytes[4..8], b"test");
        assert_eq!(&bytes[14..], &(-1i32).to_le_bytes());

        let deserialized = Record::deserialize(&bytes, &schema).unwrap();
        assert_eq!(record, deserialized);
    }

    #[test]
    fn test_equality_ignores_rid() {
        let page = PageId::new(FileId::from_path(Path::new("/tmp/a")), 3);
        let a = Record::new(vec![Field::Int(1)]);
        let b = Record::new(vec![Field::Int(1)]).with_rid(RecordId::new(page, 7));
        assert_eq!(a, b);
        assert_eq!(b.rid().map(|r| r.slot), Some(7));
    }

    #[test]
    fn test_serialize_rejects_schema_mismatch() {
        let schema = create_test_schema();
        let record = Record::new(vec![Field::from("x"), Field::from("test"), Field::Int(1)]);
        assert!(matches!(
            record.serialize(&schema),
            Err(RecordError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_deserialize_wrong_length() {
        let schema = create_test_schema();
        assert!(Record::deserialize(&[0u8; 5], &schema).is_err());
    }
}
