//! Field schemas and field-value records.
//!
//! Every measurement carries a schema assigning each field a one-byte id
//! and a value type. The schema is stored twice on disk, depending on the
//! engine:
//!
//! * b1 keeps one binary `MeasurementFields` record per measurement in
//!   the `fields` bucket;
//! * bz1 keeps a single snappy-compressed JSON document for the whole
//!   shard under `meta`/`fields`.
//!
//! Point values are then stored as concatenated `[id][payload]` records;
//! [`decode_values`] walks such a record back into typed values.

use crate::{encoding, BadFieldTypeSnafu, Error, SchemaRecordSnafu, TruncatedSnafu};
use migrate_types::FieldValue;
use prost::Message;
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::collections::BTreeMap;

/// The value types the 0.9.x engines can store, with their on-disk tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum FieldType {
    Float,
    Integer,
    Boolean,
    String,
}

/// Error for a schema type tag outside the known range.
#[derive(Debug, Snafu, PartialEq)]
#[snafu(display("unknown field type tag {tag}"))]
pub struct UnknownFieldType {
    tag: i32,
}

impl TryFrom<i32> for FieldType {
    type Error = UnknownFieldType;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::Float),
            2 => Ok(Self::Integer),
            3 => Ok(Self::Boolean),
            4 => Ok(Self::String),
            tag => UnknownFieldTypeSnafu { tag }.fail(),
        }
    }
}

impl From<FieldType> for i32 {
    fn from(typ: FieldType) -> Self {
        match typ {
            FieldType::Float => 1,
            FieldType::Integer => 2,
            FieldType::Boolean => 3,
            FieldType::String => 4,
        }
    }
}

/// One field of a measurement schema.
///
/// Ids are unique within a measurement and start at 1; id 0 is the
/// "not found" sentinel and never appears on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: u8,
    pub name: String,
    #[serde(rename = "type")]
    pub typ: FieldType,
}

/// The field schema of one measurement: field name to field record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSet {
    pub fields: BTreeMap<String, Field>,
}

impl FieldSet {
    /// Looks a field up by its on-disk id.
    pub fn by_id(&self, id: u8) -> Option<&Field> {
        self.fields.values().find(|f| f.id == id)
    }

    /// Decodes the b1 binary schema record for `measurement`.
    pub fn from_binary(measurement: &str, buf: &[u8]) -> Result<Self, Error> {
        let pb = pb::MeasurementFields::decode(buf).context(SchemaRecordSnafu { measurement })?;

        let mut fields = BTreeMap::new();
        for field in pb.fields {
            let tag = field.typ.unwrap_or_default();
            let typ = FieldType::try_from(tag).ok().context(BadFieldTypeSnafu {
                measurement,
                type_tag: tag,
            })?;
            let name = field.name.unwrap_or_default();
            fields.insert(
                name.clone(),
                Field {
                    id: field.id.unwrap_or_default() as u8,
                    name,
                    typ,
                },
            );
        }
        Ok(Self { fields })
    }
}

/// Decodes a concatenated field-value record against `set`.
///
/// Stops without error at the first unknown field id: the tail of a
/// record may have been written by a schema newer than the snapshot we
/// loaded, and the legacy reader treats it as end-of-record.
pub fn decode_values(
    measurement: &str,
    set: &FieldSet,
    mut buf: &[u8],
) -> Result<BTreeMap<String, FieldValue>, Error> {
    let mut values = BTreeMap::new();

    while !buf.is_empty() {
        let id = buf[0];
        let Some(field) = set.by_id(id) else {
            break;
        };

        let (value, consumed) = match field.typ {
            FieldType::Float => {
                ensure_record(measurement, id, 9, buf.len())?;
                let bits = encoding::u64_be(&buf[1..])?;
                (FieldValue::Float(f64::from_bits(bits)), 9)
            }
            FieldType::Integer => {
                ensure_record(measurement, id, 9, buf.len())?;
                // two's complement reinterpret of the stored bits
                (FieldValue::Integer(encoding::u64_be(&buf[1..])? as i64), 9)
            }
            FieldType::Boolean => {
                ensure_record(measurement, id, 2, buf.len())?;
                (FieldValue::Boolean(buf[1] == 1), 2)
            }
            FieldType::String => {
                ensure_record(measurement, id, 3, buf.len())?;
                let len = encoding::u16_be(&buf[1..])? as usize;
                ensure_record(measurement, id, 3 + len, buf.len())?;
                (FieldValue::String(buf[3..3 + len].to_vec()), 3 + len)
            }
        };

        values.insert(field.name.clone(), value);
        buf = &buf[consumed..];
    }

    Ok(values)
}

fn ensure_record(measurement: &str, field_id: u8, want: usize, have: usize) -> Result<(), Error> {
    ensure!(
        want <= have,
        TruncatedSnafu {
            measurement,
            field_id,
            want,
            have
        }
    );
    Ok(())
}

/// Hand-declared mirror of the legacy `MeasurementFields` protobuf
/// schema (`Field { ID = 1, Name = 2, Type = 3 }`).
pub(crate) mod pb {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub(crate) struct MeasurementFields {
        #[prost(message, repeated, tag = "1")]
        pub(crate) fields: Vec<Field>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub(crate) struct Field {
        #[prost(int32, optional, tag = "1")]
        pub(crate) id: Option<i32>,
        #[prost(string, optional, tag = "2")]
        pub(crate) name: Option<String>,
        #[prost(int32, optional, tag = "3")]
        pub(crate) typ: Option<i32>,
    }
}
