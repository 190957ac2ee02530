use std::fmt;

use crate::error::{DbError, DbResult};
use crate::field::{Field, Type};
use crate::page_id::PageId;

/// One field's type plus a display name. Two `FieldDesc`s with the same type
/// but different names are still "the same field" for schema-equality
/// purposes: names are documentation, not identity.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    pub field_type: Type,
    pub name: String,
}

/// Ordered, immutable-after-construction schema for a `Tuple`.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    fields: Vec<FieldDesc>,
}

impl TupleDesc {
    pub fn new(fields: Vec<(Type, impl Into<String>)>) -> Self {
        assert!(!fields.is_empty(), "TupleDesc must have at least one field");
        TupleDesc {
            fields: fields
                .into_iter()
                .map(|(field_type, name)| FieldDesc {
                    field_type,
                    name: name.into(),
                })
                .collect(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_type(&self, i: usize) -> Type {
        self.fields[i].field_type
    }

    pub fn field_name(&self, i: usize) -> &str {
        &self.fields[i].name
    }

    pub fn field_index(&self, name: &str) -> DbResult<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| DbError::NotFound(format!("field {}", name)))
    }

    /// Sum of per-field byte widths: the fixed width of one tuple slot.
    pub fn size(&self) -> usize {
        self.fields.iter().map(|f| f.field_type.len()).sum()
    }

    pub fn merge(a: &TupleDesc, b: &TupleDesc) -> TupleDesc {
        let mut fields = a.fields.clone();
        fields.extend(b.fields.clone());
        TupleDesc { fields }
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|fd| format!("{}({})", fd.name, fd.field_type))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// `(page_id, slot_index)` — uniquely locates a tuple within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_index: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot_index: usize) -> Self {
        RecordId { page_id, slot_index }
    }
}

/// A row: a schema, an ordered array of field values matching that schema,
/// and an optional pointer back to the slot it was read from.
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: TupleDesc,
    fields: Vec<Field>,
    pub record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: TupleDesc, fields: Vec<Field>) -> Self {
        assert_eq!(desc.num_fields(), fields.len());
        Tuple {
            desc,
            fields,
            record_id: None,
        }
    }

    /// A tuple whose fields are all zero-valued, matching an unused slot's
    /// on-disk image.
    pub fn zeroed(desc: TupleDesc) -> Self {
        let fields = (0..desc.num_fields())
            .map(|i| Field::zero(desc.field_type(i)))
            .collect();
        Tuple {
            desc,
            fields,
            record_id: None,
        }
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn get_field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn set_field(&mut self, i: usize, v: Field) {
        self.fields[i] = v;
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.desc.size());
        for (i, field) in self.fields.iter().enumerate() {
            field.serialize(&mut out, self.desc.field_type(i));
        }
        out
    }

    pub fn parse(desc: TupleDesc, bytes: &[u8]) -> DbResult<Tuple> {
        let mut fields = Vec::with_capacity(desc.num_fields());
        let mut offset = 0;
        for i in 0..desc.num_fields() {
            let ty = desc.field_type(i);
            let width = ty.len();
            fields.push(Field::parse(&bytes[offset..offset + width], ty)?);
            offset += width;
        }
        Ok(Tuple {
            desc,
            fields,
            record_id: None,
        })
    }

    /// Equal as plain field-value vectors; ignores `record_id` and doc'd
    /// field names, matching how spec.md §8 compares scan output.
    pub fn equal_fields(&self, other: &Tuple) -> bool {
        self.fields == other.fields
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self.fields.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}
