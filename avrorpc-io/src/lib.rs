//! # avrorpc-io
//!
//! Avro binary encoding for avrorpc.
//!
//! - [`AvroIo`] byte channels over memory or any seekable stream
//! - [`BinaryEncoder`] / [`BinaryDecoder`] for primitive values
//! - [`DatumWriter`] / [`DatumReader`] for schema-driven values with
//!   writer/reader schema resolution
//! - [`ContainerWriter`] / [`ContainerReader`] for object container files

pub mod binary;
pub mod config;
pub mod container;
pub mod datum;
pub mod error;
pub mod io;
pub mod limb;

pub use binary::{decode_long, encode_long, zigzag_decode, zigzag_encode, BinaryDecoder, BinaryEncoder};
pub use config::{ReaderConfig, RecordFactory, RecordInstantiator};
pub use container::{ContainerReader, ContainerWriter};
pub use datum::{schemas_match, skip_data, DatumReader, DatumWriter};
pub use error::{CodecError, IoError};
pub use io::{AvroIo, MemoryIo, StreamIo};
pub use limb::{decode_long_limbs, encode_long_limbs, Limbs};

use avrorpc_schema::{AvroSchema, Value};

/// Encodes `datum` under `schema` into a fresh buffer.
pub fn to_bytes(schema: &AvroSchema, datum: &Value) -> Result<Vec<u8>, CodecError> {
    let mut io = MemoryIo::new();
    DatumWriter::new(schema.clone()).write(datum, &mut BinaryEncoder::new(&mut io))?;
    Ok(io.into_inner())
}

/// Decodes one datum written under `writer`, resolved into `reader`.
pub fn from_bytes(writer: &AvroSchema, reader: &AvroSchema, bytes: &[u8]) -> Result<Value, CodecError> {
    let mut io = MemoryIo::from_bytes(bytes.to_vec());
    DatumReader::with_schemas(writer.clone(), reader.clone()).read(&mut BinaryDecoder::new(&mut io))
}
