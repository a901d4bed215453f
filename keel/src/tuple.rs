//! Field values, schemas and tuples as they are laid out inside a page slot.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::page_id::RecordAddress;

/// Fixed number of content bytes reserved for every string field.
pub const STRING_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Str,
}

impl FieldType {
    /// Width of a serialized field of this type, in bytes.
    pub fn byte_len(self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Str => 4 + STRING_LEN,
        }
    }

    /// Reads one field of this type. `buf` must hold at least `byte_len()`
    /// bytes; returns `None` if the stored bytes are not a valid value.
    pub(crate) fn parse(self, buf: &mut impl Buf) -> Option<Field> {
        match self {
            FieldType::Int => Some(Field::Int(buf.get_i32())),
            FieldType::Str => {
                let len = buf.get_u32() as usize;
                let mut content = [0u8; STRING_LEN];
                buf.copy_to_slice(&mut content);
                if len > STRING_LEN {
                    return None;
                }
                String::from_utf8(content[..len].to_vec())
                    .ok()
                    .map(Field::Str)
            }
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => f.write_str("int"),
            FieldType::Str => f.write_str("string"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    /// Builds a string field, truncating on a character boundary so the
    /// content fits in `STRING_LEN` bytes.
    pub fn string(value: impl Into<String>) -> Self {
        let mut value = value.into();
        value.truncate(stored_len(&value));
        Field::Str(value)
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(_) => FieldType::Str,
        }
    }

    pub(crate) fn serialize(&self, buf: &mut impl BufMut) {
        match self {
            Field::Int(v) => buf.put_i32(*v),
            Field::Str(s) => {
                let content = &s.as_bytes()[..stored_len(s)];
                buf.put_u32(content.len() as u32);
                buf.put_slice(content);
                buf.put_bytes(0, STRING_LEN - content.len());
            }
        }
    }
}

/// Length of the longest prefix of `s` that is at most `STRING_LEN` bytes
/// and ends on a character boundary.
fn stored_len(s: &str) -> usize {
    if s.len() <= STRING_LEN {
        return s.len();
    }
    let mut end = STRING_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::Str(s) => f.write_str(s),
        }
    }
}

/// Ordered field types and names of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<(FieldType, String)>,
}

impl Schema {
    pub fn new(fields: Vec<(FieldType, String)>) -> Self {
        Self { fields }
    }

    /// A schema with generated field names, handy for tests and tooling.
    pub fn from_types(types: &[FieldType]) -> Self {
        Self::new(
            types
                .iter()
                .enumerate()
                .map(|(i, ty)| (*ty, format!("f{i}")))
                .collect(),
        )
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_type(&self, i: usize) -> Option<FieldType> {
        self.fields.get(i).map(|(ty, _)| *ty)
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.fields.get(i).map(|(_, name)| name.as_str())
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(_, n)| n == name)
    }

    pub fn types(&self) -> impl Iterator<Item = FieldType> + '_ {
        self.fields.iter().map(|(ty, _)| *ty)
    }

    /// Bytes occupied by one tuple slot.
    pub fn tuple_size(&self) -> usize {
        self.types().map(FieldType::byte_len).sum()
    }

    /// Schemas are compatible when their field types agree position by
    /// position; names are ignored.
    pub fn is_compatible(&self, other: &Schema) -> bool {
        self.num_fields() == other.num_fields() && self.types().eq(other.types())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self
            .fields
            .iter()
            .map(|(ty, name)| format!("{name} {ty}"))
            .collect();
        write!(f, "({})", cols.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    schema: Arc<Schema>,
    fields: Vec<Field>,
    record_address: Option<RecordAddress>,
}

impl Tuple {
    /// Builds a tuple, or returns `None` when the values do not fit the schema.
    /// Over-long strings are truncated as [`Field::string`] does.
    pub fn new(schema: Arc<Schema>, fields: Vec<Field>) -> Option<Self> {
        let fields: Vec<Field> = fields
            .into_iter()
            .map(|f| match f {
                Field::Str(s) => Field::string(s),
                other => other,
            })
            .collect();
        let fits = fields.len() == schema.num_fields()
            && fields
                .iter()
                .zip(schema.types())
                .all(|(f, ty)| f.field_type() == ty);
        fits.then_some(Self {
            schema,
            fields,
            record_address: None,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn record_address(&self) -> Option<RecordAddress> {
        self.record_address
    }

    pub fn set_record_address(&mut self, rid: Option<RecordAddress>) {
        self.record_address = rid;
    }

    pub(crate) fn serialize(&self, buf: &mut impl BufMut) {
        for field in &self.fields {
            field.serialize(buf);
        }
    }

    /// Reads a tuple laid out in `schema` order.
    pub(crate) fn parse(schema: &Arc<Schema>, buf: &mut impl Buf) -> Option<Self> {
        let fields = schema
            .types()
            .map(|ty| ty.parse(buf))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            schema: Arc::clone(schema),
            fields,
            record_address: None,
        })
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.fields.iter().map(Field::to_string).collect();
        f.write_str(&values.join("\t"))
    }
}
