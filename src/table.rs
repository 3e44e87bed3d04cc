//! Attribute table: fixed-width columnar document store.
//!
//! Companion store for per-document attributes, addressed by docid. Each
//! record is a fixed-length byte row laid out from the schema's field
//! offsets; rows live in segments of 500 000 records. A mandatory `_id`
//! field carries the external key (numeric or string) and feeds the
//! `key → docid` map. Deleting a key marks the docid in the shared
//! tombstone bitmap; the search engine filters against the same bitmap.
//!
//! String values are stored as arena handles inside the fixed row; the
//! arena itself is in-memory here, block storage is a concern of the
//! layer below.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::store::DocidBitmap;

/// Records per segment.
const SEGMENT_SIZE: usize = 500_000;

/// Field value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Long,
    Float,
    Double,
    Str,
}

impl FieldType {
    fn size(self) -> usize {
        match self {
            FieldType::Int | FieldType::Float => 4,
            FieldType::Long | FieldType::Double => 8,
            // Arena handle.
            FieldType::Str => 4,
        }
    }
}

/// Schema entry.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub data_type: FieldType,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, data_type: FieldType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

/// External document key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Number(i64),
    Str(String),
}

/// Key discipline of a table, fixed by the `_id` field's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    Number,
    Str,
}

/// A materialized document.
#[derive(Debug, Clone)]
pub struct Doc {
    pub docid: i64,
    pub fields: Vec<(String, Value)>,
}

#[derive(Debug, Default)]
struct Segment {
    data: Vec<u8>,
}

/// Fixed-width columnar record store.
pub struct Table {
    name: String,
    fields: Vec<FieldInfo>,
    offsets: Vec<usize>,
    item_length: usize,
    key_idx: usize,
    id_type: IdType,
    segments: Vec<Segment>,
    doc_num: usize,
    key_to_docid: HashMap<Key, i64>,
    strings: Vec<String>,
    bitmap: Arc<DocidBitmap>,
}

impl Table {
    /// Create a table from a schema. The schema must contain an `_id`
    /// field; its type decides whether keys are numeric or strings.
    pub fn create(
        name: impl Into<String>,
        fields: Vec<FieldInfo>,
        bitmap: Arc<DocidBitmap>,
    ) -> Result<Self> {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut item_length = 0;
        let mut key_idx = None;
        let mut seen = std::collections::HashSet::new();
        for (i, field) in fields.iter().enumerate() {
            if !seen.insert(field.name.clone()) {
                return Err(EngineError::InvalidParameter(format!(
                    "duplicate field {}",
                    field.name
                )));
            }
            if field.name == "_id" {
                key_idx = Some(i);
            }
            offsets.push(item_length);
            item_length += field.data_type.size();
        }
        let key_idx = key_idx
            .ok_or_else(|| EngineError::InvalidParameter("schema has no _id field".into()))?;
        let id_type = match fields[key_idx].data_type {
            FieldType::Str => IdType::Str,
            _ => IdType::Number,
        };

        Ok(Self {
            name: name.into(),
            fields,
            offsets,
            item_length,
            key_idx,
            id_type,
            segments: Vec::new(),
            doc_num: 0,
            key_to_docid: HashMap::new(),
            strings: Vec::new(),
            bitmap,
        })
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key discipline.
    #[must_use]
    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    /// Number of records ever added.
    #[must_use]
    pub fn doc_num(&self) -> usize {
        self.doc_num
    }

    /// Append a record, returning its docid.
    pub fn add(&mut self, key: Key, values: &[(&str, Value)]) -> Result<i64> {
        self.check_key_type(&key)?;
        if self.key_to_docid.contains_key(&key) {
            return Err(EngineError::InvalidParameter(format!(
                "duplicate key in table {}",
                self.name
            )));
        }

        let docid = self.doc_num as i64;
        if self.doc_num % SEGMENT_SIZE == 0 {
            self.segments.push(Segment::default());
        }
        let item_length = self.item_length;
        self.segments
            .last_mut()
            .expect("segment allocated above")
            .data
            .resize((self.doc_num % SEGMENT_SIZE + 1) * item_length, 0);
        self.doc_num += 1;

        let key_value = match &key {
            Key::Number(n) => Value::Long(*n),
            Key::Str(s) => Value::Str(s.clone()),
        };
        self.write_field(docid, self.key_idx, &key_value)?;
        for (name, value) in values {
            let idx = self.field_index(name)?;
            self.write_field(docid, idx, value)?;
        }

        self.key_to_docid.insert(key, docid);
        Ok(docid)
    }

    /// Overwrite fields of an existing record.
    pub fn update(&mut self, docid: i64, values: &[(&str, Value)]) -> Result<()> {
        if docid < 0 || docid as usize >= self.doc_num {
            return Err(EngineError::InvalidParameter(format!(
                "unknown docid {docid}"
            )));
        }
        for (name, value) in values {
            let idx = self.field_index(name)?;
            if idx == self.key_idx {
                return Err(EngineError::InvalidParameter(
                    "_id field cannot be updated".into(),
                ));
            }
            self.write_field(docid, idx, value)?;
        }
        Ok(())
    }

    /// Delete by key: marks the docid in the tombstone bitmap.
    pub fn delete(&mut self, key: &Key) -> Result<i64> {
        let docid = self.key_to_docid.remove(key).ok_or_else(|| {
            EngineError::InvalidParameter(format!("unknown key in table {}", self.name))
        })?;
        self.bitmap.set(docid);
        Ok(docid)
    }

    /// Resolve a key to its docid.
    #[must_use]
    pub fn get_doc_id_by_key(&self, key: &Key) -> Option<i64> {
        self.key_to_docid.get(key).copied()
    }

    /// Read a record; `field_names` empty means every field.
    pub fn get_doc_info(&self, docid: i64, field_names: &[&str]) -> Result<Doc> {
        if docid < 0 || docid as usize >= self.doc_num {
            return Err(EngineError::InvalidParameter(format!(
                "unknown docid {docid}"
            )));
        }
        let indices: Vec<usize> = if field_names.is_empty() {
            (0..self.fields.len()).collect()
        } else {
            field_names
                .iter()
                .map(|name| self.field_index(name))
                .collect::<Result<_>>()?
        };

        let fields = indices
            .into_iter()
            .map(|idx| {
                (
                    self.fields[idx].name.clone(),
                    self.read_field(docid, idx),
                )
            })
            .collect();
        Ok(Doc { docid, fields })
    }

    fn check_key_type(&self, key: &Key) -> Result<()> {
        let matches = matches!(
            (key, self.id_type),
            (Key::Number(_), IdType::Number) | (Key::Str(_), IdType::Str)
        );
        if matches {
            Ok(())
        } else {
            Err(EngineError::InvalidParameter(format!(
                "key type does not match table id_type {:?}",
                self.id_type
            )))
        }
    }

    fn field_index(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| EngineError::InvalidParameter(format!("unknown field {name}")))
    }

    fn row_mut(&mut self, docid: i64) -> &mut [u8] {
        let docid = docid as usize;
        let seg = &mut self.segments[docid / SEGMENT_SIZE];
        let start = (docid % SEGMENT_SIZE) * self.item_length;
        &mut seg.data[start..start + self.item_length]
    }

    fn row(&self, docid: i64) -> &[u8] {
        let docid = docid as usize;
        let seg = &self.segments[docid / SEGMENT_SIZE];
        let start = (docid % SEGMENT_SIZE) * self.item_length;
        &seg.data[start..start + self.item_length]
    }

    fn write_field(&mut self, docid: i64, idx: usize, value: &Value) -> Result<()> {
        let expected = self.fields[idx].data_type;
        let offset = self.offsets[idx];
        let bytes: [u8; 8];
        let (src, len): (&[u8], usize) = match (value, expected) {
            (Value::Int(v), FieldType::Int) => {
                bytes = extend(v.to_le_bytes());
                (&bytes[..4], 4)
            }
            (Value::Long(v), FieldType::Long) => {
                bytes = v.to_le_bytes();
                (&bytes[..8], 8)
            }
            (Value::Float(v), FieldType::Float) => {
                bytes = extend(v.to_le_bytes());
                (&bytes[..4], 4)
            }
            (Value::Double(v), FieldType::Double) => {
                bytes = v.to_le_bytes();
                (&bytes[..8], 8)
            }
            (Value::Str(s), FieldType::Str) => {
                let handle = self.strings.len() as u32;
                self.strings.push(s.clone());
                bytes = extend(handle.to_le_bytes());
                (&bytes[..4], 4)
            }
            _ => {
                return Err(EngineError::InvalidParameter(format!(
                    "value type mismatch for field {}",
                    self.fields[idx].name
                )))
            }
        };
        let row = self.row_mut(docid);
        row[offset..offset + len].copy_from_slice(src);
        Ok(())
    }

    fn read_field(&self, docid: i64, idx: usize) -> Value {
        let offset = self.offsets[idx];
        let row = self.row(docid);
        match self.fields[idx].data_type {
            FieldType::Int => Value::Int(i32::from_le_bytes(
                row[offset..offset + 4].try_into().expect("fixed width"),
            )),
            FieldType::Long => Value::Long(i64::from_le_bytes(
                row[offset..offset + 8].try_into().expect("fixed width"),
            )),
            FieldType::Float => Value::Float(f32::from_le_bytes(
                row[offset..offset + 4].try_into().expect("fixed width"),
            )),
            FieldType::Double => Value::Double(f64::from_le_bytes(
                row[offset..offset + 8].try_into().expect("fixed width"),
            )),
            FieldType::Str => {
                let handle = u32::from_le_bytes(
                    row[offset..offset + 4].try_into().expect("fixed width"),
                ) as usize;
                Value::Str(self.strings.get(handle).cloned().unwrap_or_default())
            }
        }
    }
}

fn extend<const N: usize>(src: [u8; N]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..N].copy_from_slice(&src);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<FieldInfo> {
        vec![
            FieldInfo::new("_id", FieldType::Long),
            FieldInfo::new("price", FieldType::Float),
            FieldInfo::new("brand", FieldType::Str),
        ]
    }

    #[test]
    fn add_and_read_back() {
        let bitmap = Arc::new(DocidBitmap::new());
        let mut table = Table::create("items", schema(), bitmap).unwrap();
        assert_eq!(table.id_type(), IdType::Number);

        let docid = table
            .add(
                Key::Number(1001),
                &[
                    ("price", Value::Float(9.5)),
                    ("brand", Value::Str("acme".into())),
                ],
            )
            .unwrap();
        assert_eq!(docid, 0);
        assert_eq!(table.get_doc_id_by_key(&Key::Number(1001)), Some(0));

        let doc = table.get_doc_info(docid, &[]).unwrap();
        assert_eq!(doc.fields[0], ("_id".into(), Value::Long(1001)));
        assert_eq!(doc.fields[1], ("price".into(), Value::Float(9.5)));
        assert_eq!(doc.fields[2], ("brand".into(), Value::Str("acme".into())));

        let doc = table.get_doc_info(docid, &["brand"]).unwrap();
        assert_eq!(doc.fields.len(), 1);
    }

    #[test]
    fn update_rewrites_fields() {
        let bitmap = Arc::new(DocidBitmap::new());
        let mut table = Table::create("items", schema(), bitmap).unwrap();
        let docid = table
            .add(Key::Number(1), &[("price", Value::Float(1.0))])
            .unwrap();

        table
            .update(docid, &[("price", Value::Float(2.5))])
            .unwrap();
        let doc = table.get_doc_info(docid, &["price"]).unwrap();
        assert_eq!(doc.fields[0].1, Value::Float(2.5));

        assert!(table.update(docid, &[("_id", Value::Long(9))]).is_err());
        assert!(table.update(7, &[("price", Value::Float(0.0))]).is_err());
    }

    #[test]
    fn delete_marks_bitmap() {
        let bitmap = Arc::new(DocidBitmap::new());
        let mut table = Table::create("items", schema(), Arc::clone(&bitmap)).unwrap();
        let docid = table.add(Key::Number(5), &[]).unwrap();

        assert!(!bitmap.test(docid));
        assert_eq!(table.delete(&Key::Number(5)).unwrap(), docid);
        assert!(bitmap.test(docid));
        assert_eq!(table.get_doc_id_by_key(&Key::Number(5)), None);
        assert!(table.delete(&Key::Number(5)).is_err());
    }

    #[test]
    fn string_keys_follow_id_type() {
        let bitmap = Arc::new(DocidBitmap::new());
        let fields = vec![FieldInfo::new("_id", FieldType::Str)];
        let mut table = Table::create("named", fields, bitmap).unwrap();
        assert_eq!(table.id_type(), IdType::Str);

        table.add(Key::Str("alpha".into()), &[]).unwrap();
        assert_eq!(table.get_doc_id_by_key(&Key::Str("alpha".into())), Some(0));
        assert!(table.add(Key::Number(3), &[]).is_err());

        let doc = table.get_doc_info(0, &[]).unwrap();
        assert_eq!(doc.fields[0].1, Value::Str("alpha".into()));
    }

    #[test]
    fn rejects_duplicate_keys_and_unknown_fields() {
        let bitmap = Arc::new(DocidBitmap::new());
        let mut table = Table::create("items", schema(), bitmap).unwrap();
        table.add(Key::Number(1), &[]).unwrap();
        assert!(table.add(Key::Number(1), &[]).is_err());
        assert!(table
            .add(Key::Number(2), &[("missing", Value::Int(0))])
            .is_err());
    }
}
