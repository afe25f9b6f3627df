use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};

/// Represents a field data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Int,        // 4 bytes
    Str(usize), // n bytes (fixed length, zero padded)
}

impl FieldType {
    /// Get the size in bytes for this data type
    pub fn size(&self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Str(n) => *n,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "INT"),
            FieldType::Str(n) => write!(f, "STRING({})", n),
        }
    }
}

/// A single typed field value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    /// Whether this value can be stored in a field of type `field_type`
    pub fn matches(&self, field_type: &FieldType) -> bool {
        match (self, field_type) {
            (Field::Int(_), FieldType::Int) => true,
            (Field::Str(s), FieldType::Str(max_len)) => s.len() <= *max_len && !s.contains('\0'),
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Field::Int(i) => Some(*i),
            Field::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Str(s) => Some(s),
            Field::Int(_) => None,
        }
    }

    /// Serialize the value into `out`, which must be exactly `field_type.size()` bytes
    pub fn write_to(&self, field_type: &FieldType, out: &mut [u8]) -> RecordResult<()> {
        match (self, field_type) {
            (Field::Int(i), FieldType::Int) => {
                out.copy_from_slice(&i.to_le_bytes());
                Ok(())
            }
            (Field::Str(s), FieldType::Str(max_len)) => {
                // Stored strings end at the first zero byte
                if s.contains('\0') {
                    return Err(RecordError::SchemaMismatch(format!(
                        "String {:?} contains a NUL byte",
                        s
                    )));
                }
                let bytes = s.as_bytes();
                if bytes.len() > *max_len {
                    return Err(RecordError::Serialization(format!(
                        "String length {} exceeds max length {}",
                        bytes.len(),
                        max_len
                    )));
                }
                out[..bytes.len()].copy_from_slice(bytes);
                out[bytes.len()..].fill(0);
                Ok(())
            }
            _ => Err(RecordError::TypeMismatch {
                expected: field_type.to_string(),
                actual: format!("{:?}", self),
            }),
        }
    }

    /// Deserialize value from bytes
    pub fn read_from(bytes: &[u8], field_type: &FieldType) -> RecordResult<Self> {
        if bytes.len() != field_type.size() {
            return Err(RecordError::Deserialization(format!(
                "Expected {} bytes for {}, got {}",
                field_type.size(),
                field_type,
                bytes.len()
            )));
        }

        match field_type {
            FieldType::Int => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(bytes);
                Ok(Field::Int(i32::from_le_bytes(buf)))
            }
            FieldType::Str(_) => {
                // Find the first null byte (string terminator)
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let s = String::from_utf8(bytes[..end].to_vec())
                    .map_err(|e| RecordError::Deserialization(format!("Invalid UTF-8: {}", e)))?;
                Ok(Field::Str(s))
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(i) => write!(f, "{}", i),
            Field::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Field {
    fn from(value: i32) -> Self {
        Field::Int(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Str(value.to_string())
    }
}
