mod error;
mod record;
mod schema;
mod value;

pub use error::{RecordError, RecordResult};
pub use record::{Record, RecordId, SlotId};
pub use schema::{FieldDef, Schema};
pub use value::{Field, FieldType};
