//! Schema-driven datum encoding and schema resolution.
//!
//! [`DatumWriter`] serializes a value under one schema. [`DatumReader`]
//! decodes data written under a writer schema into the shape of a possibly
//! different reader schema: numeric promotion, skipping fields the reader
//! lacks, filling reader-only fields from defaults.

use crate::binary::{BinaryDecoder, BinaryEncoder};
use crate::config::ReaderConfig;
use crate::error::{CodecError, IoError};
use avrorpc_schema::{
    json_to_value, is_valid_datum, AvroSchema, Field, Name, NamedSchema, Schema, Schemata, Value,
};
use std::collections::BTreeMap;
use tracing::trace;

/// Whether data written with `writer` can be read as `reader`.
///
/// A union on either side always matches here; branch selection happens
/// while reading.
pub fn schemas_match(
    writer: &Schema,
    writer_names: &Schemata,
    reader: &Schema,
    reader_names: &Schemata,
) -> bool {
    match (writer, reader) {
        (Schema::Union(_), _) | (_, Schema::Union(_)) => true,
        (Schema::Null, Schema::Null)
        | (Schema::Boolean, Schema::Boolean)
        | (Schema::Int, Schema::Int)
        | (Schema::Long, Schema::Long)
        | (Schema::Float, Schema::Float)
        | (Schema::Double, Schema::Double)
        | (Schema::Bytes, Schema::Bytes)
        | (Schema::String, Schema::String) => true,
        (Schema::Int, Schema::Long | Schema::Float | Schema::Double) => true,
        (Schema::Long, Schema::Float | Schema::Double) => true,
        (Schema::Float, Schema::Double) => true,
        (Schema::Array(w), Schema::Array(r)) | (Schema::Map(w), Schema::Map(r)) => {
            schemas_match(w, writer_names, r, reader_names)
        }
        (Schema::Request(_), Schema::Request(_)) => true,
        (Schema::Ref(w), Schema::Ref(r)) => {
            match (writer_names.lookup(w), reader_names.lookup(r)) {
                (Some(NamedSchema::Record(_)), Some(NamedSchema::Record(_)))
                | (Some(NamedSchema::Enum(_)), Some(NamedSchema::Enum(_))) => {
                    w.fullname() == r.fullname()
                }
                (Some(NamedSchema::Fixed(wf)), Some(NamedSchema::Fixed(rf))) => {
                    w.fullname() == r.fullname() && wf.size == rf.size
                }
                _ => false,
            }
        }
        _ => false,
    }
}

/// Serializes values under a schema.
#[derive(Debug, Clone)]
pub struct DatumWriter {
    schema: AvroSchema,
}

impl DatumWriter {
    pub fn new(schema: AvroSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &AvroSchema {
        &self.schema
    }

    /// Validates `datum` and writes it.
    pub fn write(&self, datum: &Value, encoder: &mut BinaryEncoder<'_>) -> Result<(), CodecError> {
        let root = self.schema.root();
        if !is_valid_datum(root, self.schema.names(), datum) {
            return Err(CodecError::type_error(root, datum));
        }
        write_data(root, self.schema.names(), datum, encoder)
    }
}

fn write_data(
    schema: &Schema,
    names: &Schemata,
    datum: &Value,
    enc: &mut BinaryEncoder<'_>,
) -> Result<(), CodecError> {
    let mismatch = || CodecError::type_error(schema, datum);

    match schema {
        Schema::Null => enc.write_null(),
        Schema::Boolean => match datum {
            Value::Boolean(b) => enc.write_boolean(*b),
            _ => Err(mismatch()),
        },
        Schema::Int => {
            let n = datum
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(mismatch)?;
            enc.write_int(n)
        }
        Schema::Long => enc.write_long(datum.as_i64().ok_or_else(mismatch)?),
        Schema::Float => enc.write_float(datum.as_f64().ok_or_else(mismatch)? as f32),
        Schema::Double => enc.write_double(datum.as_f64().ok_or_else(mismatch)?),
        Schema::String => enc.write_string(datum.as_str().ok_or_else(mismatch)?),
        Schema::Bytes => enc.write_bytes(datum.as_bytes().ok_or_else(mismatch)?),
        Schema::Array(items) => {
            let Value::Array(elements) = datum else {
                return Err(mismatch());
            };
            if !elements.is_empty() {
                enc.write_long(elements.len() as i64)?;
                for element in elements {
                    write_data(items, names, element, enc)?;
                }
            }
            enc.write_long(0)
        }
        Schema::Map(values) => {
            let Value::Map(entries) = datum else {
                return Err(mismatch());
            };
            if !entries.is_empty() {
                enc.write_long(entries.len() as i64)?;
                for (key, value) in entries {
                    enc.write_string(key)?;
                    write_data(values, names, value, enc)?;
                }
            }
            enc.write_long(0)
        }
        Schema::Union(union) => {
            let (index, branch) = union
                .branches()
                .iter()
                .enumerate()
                .find(|(_, branch)| is_valid_datum(branch, names, datum))
                .ok_or_else(mismatch)?;
            enc.write_long(index as i64)?;
            write_data(branch, names, datum, enc)
        }
        Schema::Request(fields) => write_fields(fields, names, datum, enc),
        Schema::Ref(name) => match names.lookup(name) {
            Some(NamedSchema::Record(record)) => write_fields(&record.fields, names, datum, enc),
            Some(NamedSchema::Enum(enum_schema)) => {
                let index = datum
                    .as_str()
                    .and_then(|s| enum_schema.symbol_index(s))
                    .ok_or_else(mismatch)?;
                enc.write_int(index as i32)
            }
            Some(NamedSchema::Fixed(fixed)) => {
                let bytes = datum
                    .as_bytes()
                    .filter(|b| b.len() == fixed.size)
                    .ok_or_else(mismatch)?;
                enc.write_raw(bytes)
            }
            None => Err(mismatch()),
        },
    }
}

fn write_fields(
    fields: &[Field],
    names: &Schemata,
    datum: &Value,
    enc: &mut BinaryEncoder<'_>,
) -> Result<(), CodecError> {
    for field in fields {
        match datum.field(&field.name) {
            Some(value) => write_data(&field.schema, names, value, enc)?,
            None => {
                let literal = field.default.as_ref().ok_or_else(|| CodecError::MissingDefault {
                    field: field.name.clone(),
                })?;
                let value = json_to_value(&field.schema, names, literal)?;
                write_data(&field.schema, names, &value, enc)?;
            }
        }
    }
    Ok(())
}

/// Decodes values written under a writer schema into a reader schema.
#[derive(Debug, Clone)]
pub struct DatumReader {
    writer: AvroSchema,
    reader: AvroSchema,
    config: ReaderConfig,
}

impl DatumReader {
    /// Reader whose reader schema is the writer schema.
    pub fn new(writer: AvroSchema) -> Self {
        Self {
            reader: writer.clone(),
            writer,
            config: ReaderConfig::default(),
        }
    }

    pub fn with_schemas(writer: AvroSchema, reader: AvroSchema) -> Self {
        Self {
            writer,
            reader,
            config: ReaderConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn writer_schema(&self) -> &AvroSchema {
        &self.writer
    }

    pub fn reader_schema(&self) -> &AvroSchema {
        &self.reader
    }

    pub fn read(&self, decoder: &mut BinaryDecoder<'_>) -> Result<Value, CodecError> {
        Resolver {
            writer_names: self.writer.names(),
            reader_names: self.reader.names(),
            config: &self.config,
        }
        .read_data(self.writer.root(), self.reader.root(), decoder)
    }

    /// Consumes one datum of the writer schema without decoding it.
    pub fn skip(&self, decoder: &mut BinaryDecoder<'_>) -> Result<(), CodecError> {
        skip_data(self.writer.root(), self.writer.names(), decoder)
    }
}

struct Resolver<'a> {
    writer_names: &'a Schemata,
    reader_names: &'a Schemata,
    config: &'a ReaderConfig,
}

impl Resolver<'_> {
    fn matches(&self, writer: &Schema, reader: &Schema) -> bool {
        schemas_match(writer, self.writer_names, reader, self.reader_names)
    }

    fn read_data(
        &self,
        writer: &Schema,
        reader: &Schema,
        dec: &mut BinaryDecoder<'_>,
    ) -> Result<Value, CodecError> {
        if let (Schema::Union(branches), false) = (reader, matches!(writer, Schema::Union(_))) {
            let branch = branches
                .branches()
                .iter()
                .find(|branch| self.matches(writer, branch))
                .ok_or_else(|| CodecError::schema_match(writer, reader))?;
            return self.read_data(writer, branch, dec);
        }

        if !self.matches(writer, reader) {
            return Err(CodecError::schema_match(writer, reader));
        }

        match writer {
            Schema::Null => dec.read_null().map(|_| Value::Null),
            Schema::Boolean => dec.read_boolean().map(Value::Boolean),
            Schema::Int => {
                let n = dec.read_int()?;
                Ok(match reader {
                    Schema::Long => Value::Long(i64::from(n)),
                    Schema::Float => Value::Float(n as f32),
                    Schema::Double => Value::Double(f64::from(n)),
                    _ => Value::Int(n),
                })
            }
            Schema::Long => {
                let n = dec.read_long()?;
                Ok(match reader {
                    Schema::Float => Value::Float(n as f32),
                    Schema::Double => Value::Double(n as f64),
                    _ => Value::Long(n),
                })
            }
            Schema::Float => {
                let x = dec.read_float()?;
                Ok(match reader {
                    Schema::Double => Value::Double(f64::from(x)),
                    _ => Value::Float(x),
                })
            }
            Schema::Double => dec.read_double().map(Value::Double),
            Schema::Bytes => dec.read_bytes().map(Value::Bytes),
            Schema::String => dec.read_string().map(Value::String),
            Schema::Array(writer_items) => {
                let Schema::Array(reader_items) = reader else {
                    return Err(CodecError::schema_match(writer, reader));
                };
                let zero_width = is_zero_width(writer_items, self.writer_names);
                let mut items = Vec::new();
                while let Some(count) = read_block_count(dec, zero_width)? {
                    for _ in 0..count {
                        items.push(self.read_data(writer_items, reader_items, dec)?);
                    }
                }
                Ok(Value::Array(items))
            }
            Schema::Map(writer_values) => {
                let Schema::Map(reader_values) = reader else {
                    return Err(CodecError::schema_match(writer, reader));
                };
                let mut entries = BTreeMap::new();
                while let Some(count) = read_block_count(dec, false)? {
                    for _ in 0..count {
                        let key = dec.read_string()?;
                        let value = self.read_data(writer_values, reader_values, dec)?;
                        entries.insert(key, value);
                    }
                }
                Ok(Value::Map(entries))
            }
            Schema::Union(union) => {
                let index = dec.read_long()?;
                let branch = usize::try_from(index)
                    .ok()
                    .and_then(|i| union.branch(i))
                    .ok_or_else(|| {
                        CodecError::InvalidData(format!(
                            "union branch {} out of range for {}",
                            index, writer
                        ))
                    })?;
                self.read_data(branch, reader, dec)
            }
            Schema::Request(writer_fields) => {
                let Schema::Request(reader_fields) = reader else {
                    return Err(CodecError::schema_match(writer, reader));
                };
                let fields = self.read_fields(writer_fields, reader_fields, dec)?;
                Ok(Value::Map(fields))
            }
            Schema::Ref(writer_name) => {
                let Schema::Ref(reader_name) = reader else {
                    return Err(CodecError::schema_match(writer, reader));
                };
                self.read_named(writer_name, reader_name, dec)
            }
        }
    }

    fn read_named(
        &self,
        writer_name: &Name,
        reader_name: &Name,
        dec: &mut BinaryDecoder<'_>,
    ) -> Result<Value, CodecError> {
        let unresolved = || CodecError::SchemaMatch {
            writer: writer_name.to_string(),
            reader: reader_name.to_string(),
        };
        let writer = self.writer_names.lookup(writer_name).ok_or_else(unresolved)?;
        let reader = self.reader_names.lookup(reader_name).ok_or_else(unresolved)?;

        match (writer, reader) {
            (NamedSchema::Record(w), NamedSchema::Record(r)) => {
                let fields = self.read_fields(&w.fields, &r.fields, dec)?;
                Ok(self.config.instantiator().instantiate(&r.name, fields))
            }
            (NamedSchema::Enum(w), NamedSchema::Enum(r)) => {
                let index = dec.read_int()?;
                let symbol = usize::try_from(index)
                    .ok()
                    .and_then(|i| w.symbols.get(i))
                    .ok_or_else(|| {
                        CodecError::InvalidData(format!(
                            "enum index {} out of range for {}",
                            index, w.name
                        ))
                    })?;
                if r.symbol_index(symbol).is_none() {
                    return Err(CodecError::UnknownSymbol {
                        symbol: symbol.clone(),
                        schema: r.name.to_string(),
                    });
                }
                Ok(Value::Enum(symbol.clone()))
            }
            (NamedSchema::Fixed(w), NamedSchema::Fixed(_)) => dec.read_fixed(w.size).map(Value::Fixed),
            _ => Err(unresolved()),
        }
    }

    fn read_fields(
        &self,
        writer_fields: &[Field],
        reader_fields: &[Field],
        dec: &mut BinaryDecoder<'_>,
    ) -> Result<BTreeMap<String, Value>, CodecError> {
        let mut values = BTreeMap::new();
        for wf in writer_fields {
            match reader_fields.iter().find(|rf| rf.name == wf.name) {
                Some(rf) => {
                    let value = self.read_data(&wf.schema, &rf.schema, dec)?;
                    values.insert(wf.name.clone(), value);
                }
                None => {
                    trace!(field = %wf.name, "skipping writer field absent from reader");
                    skip_data(&wf.schema, self.writer_names, dec)?;
                }
            }
        }

        for rf in reader_fields {
            if values.contains_key(&rf.name) {
                continue;
            }
            let literal = rf.default.as_ref().ok_or_else(|| CodecError::MissingDefault {
                field: rf.name.clone(),
            })?;
            let value = json_to_value(&rf.schema, self.reader_names, literal)?;
            values.insert(rf.name.clone(), value);
        }
        Ok(values)
    }
}

/// Most items accepted in one block whose items may encode to no bytes.
const MAX_ZERO_WIDTH_ITEMS: u64 = 1 << 20;

/// Reads the next block header of an array or map.
///
/// Returns `None` on the terminating zero block. Negative counts carry a
/// byte size, which is read and ignored.
fn read_block_count(dec: &mut BinaryDecoder<'_>, zero_width: bool) -> Result<Option<u64>, CodecError> {
    let count = dec.read_long()?;
    if count == 0 {
        return Ok(None);
    }
    if count < 0 {
        let _size = dec.read_long()?;
    }
    let count = count.unsigned_abs();
    check_block_count(dec, count, zero_width)?;
    Ok(Some(count))
}

/// Rejects block counts the remaining input cannot hold.
///
/// Items of at least one byte each are bounded by the bytes left; items
/// that may encode to nothing are bounded by [`MAX_ZERO_WIDTH_ITEMS`].
fn check_block_count(dec: &mut BinaryDecoder<'_>, count: u64, zero_width: bool) -> Result<(), CodecError> {
    if zero_width {
        if count > MAX_ZERO_WIDTH_ITEMS {
            return Err(CodecError::InvalidData(format!(
                "block of {} zero-width items exceeds {}",
                count, MAX_ZERO_WIDTH_ITEMS
            )));
        }
        return Ok(());
    }
    let available = dec.remaining()?;
    if count > available {
        return Err(CodecError::Io(IoError::ShortRead {
            wanted: usize::try_from(count).unwrap_or(usize::MAX),
            got: usize::try_from(available).unwrap_or(usize::MAX),
        }));
    }
    Ok(())
}

/// Whether a datum of `schema` can encode to zero bytes.
fn is_zero_width(schema: &Schema, names: &Schemata) -> bool {
    fn visit(schema: &Schema, names: &Schemata, depth: usize) -> bool {
        if depth > 32 {
            return false;
        }
        let fields_zero = |fields: &[Field]| fields.iter().all(|f| visit(&f.schema, names, depth + 1));
        match schema {
            Schema::Null => true,
            Schema::Request(fields) => fields_zero(fields),
            Schema::Ref(name) => match names.lookup(name) {
                Some(NamedSchema::Record(record)) => fields_zero(&record.fields),
                Some(NamedSchema::Fixed(fixed)) => fixed.size == 0,
                _ => false,
            },
            _ => false,
        }
    }
    visit(schema, names, 0)
}

/// Consumes one datum of `schema` from the decoder.
pub fn skip_data(
    schema: &Schema,
    names: &Schemata,
    dec: &mut BinaryDecoder<'_>,
) -> Result<(), CodecError> {
    match schema {
        Schema::Null => dec.skip_null(),
        Schema::Boolean => dec.skip_boolean(),
        Schema::Int => dec.skip_int(),
        Schema::Long => dec.skip_long(),
        Schema::Float => dec.skip_float(),
        Schema::Double => dec.skip_double(),
        Schema::Bytes => dec.skip_bytes(),
        Schema::String => dec.skip_string(),
        Schema::Array(items) => skip_blocks(dec, is_zero_width(items, names), |dec| {
            skip_data(items, names, dec)
        }),
        Schema::Map(values) => skip_blocks(dec, false, |dec| {
            dec.skip_string()?;
            skip_data(values, names, dec)
        }),
        Schema::Union(union) => {
            let index = dec.read_long()?;
            let branch = usize::try_from(index)
                .ok()
                .and_then(|i| union.branch(i))
                .ok_or_else(|| CodecError::InvalidData(format!("union branch {} out of range", index)))?;
            skip_data(branch, names, dec)
        }
        Schema::Request(fields) => skip_fields(fields, names, dec),
        Schema::Ref(name) => match names.lookup(name) {
            Some(NamedSchema::Record(record)) => skip_fields(&record.fields, names, dec),
            Some(NamedSchema::Enum(_)) => dec.skip_int(),
            Some(NamedSchema::Fixed(fixed)) => dec.skip_fixed(fixed.size),
            None => Err(CodecError::Schema(avrorpc_schema::SchemaError::UnknownType(
                name.fullname().to_string(),
            ))),
        },
    }
}

fn skip_fields(fields: &[Field], names: &Schemata, dec: &mut BinaryDecoder<'_>) -> Result<(), CodecError> {
    for field in fields {
        skip_data(&field.schema, names, dec)?;
    }
    Ok(())
}

fn skip_blocks<F>(dec: &mut BinaryDecoder<'_>, zero_width: bool, mut skip_item: F) -> Result<(), CodecError>
where
    F: FnMut(&mut BinaryDecoder<'_>) -> Result<(), CodecError>,
{
    loop {
        let count = dec.read_long()?;
        if count == 0 {
            return Ok(());
        }
        if count < 0 {
            let size = dec.read_long()?;
            let size = u64::try_from(size)
                .map_err(|_| CodecError::InvalidData(format!("negative block size: {}", size)))?;
            dec.skip(size)?;
        } else {
            check_block_count(dec, count as u64, zero_width)?;
            for _ in 0..count {
                skip_item(dec)?;
            }
        }
    }
}
