//! Avro object container files.
//!
//! Layout: magic `Obj\x01`, a `map<bytes>` of metadata holding the writer
//! schema and codec, a 16-byte sync marker, then blocks of
//! `(count, byte size, data, sync)`. Only the `null` codec is supported.

use crate::binary::{BinaryDecoder, BinaryEncoder};
use crate::config::ReaderConfig;
use crate::datum::{DatumReader, DatumWriter};
use crate::error::CodecError;
use crate::io::{AvroIo, MemoryIo};
use avrorpc_schema::{AvroSchema, Value};
use std::collections::BTreeMap;
use tracing::debug;

pub const MAGIC: [u8; 4] = *b"Obj\x01";
pub const SYNC_SIZE: usize = 16;
/// Buffered block size at which a block is flushed.
pub const SYNC_INTERVAL: usize = 1000 * SYNC_SIZE;

pub const SCHEMA_KEY: &str = "avro.schema";
pub const CODEC_KEY: &str = "avro.codec";
pub const NULL_CODEC: &str = "null";

fn check_codec(codec: &str) -> Result<(), CodecError> {
    if codec == NULL_CODEC {
        Ok(())
    } else {
        Err(CodecError::UnsupportedCodec(codec.to_string()))
    }
}

/// Appends datums to a container file.
pub struct ContainerWriter<'a> {
    io: &'a mut dyn AvroIo,
    writer: DatumWriter,
    sync: [u8; SYNC_SIZE],
    block: MemoryIo,
    block_count: i64,
}

impl<'a> ContainerWriter<'a> {
    /// Writes the file header and returns a writer positioned for blocks.
    pub fn new(io: &'a mut dyn AvroIo, schema: AvroSchema) -> Result<Self, CodecError> {
        Self::with_metadata(io, schema, NULL_CODEC, BTreeMap::new())
    }

    /// Like [`ContainerWriter::new`], with a codec name and extra metadata.
    ///
    /// Keys in the reserved `avro.` namespace are overwritten.
    pub fn with_metadata(
        io: &'a mut dyn AvroIo,
        schema: AvroSchema,
        codec: &str,
        mut metadata: BTreeMap<String, Vec<u8>>,
    ) -> Result<Self, CodecError> {
        check_codec(codec)?;
        let sync = uuid::Uuid::new_v4().into_bytes();

        metadata.insert(SCHEMA_KEY.to_string(), schema.to_string().into_bytes());
        metadata.insert(CODEC_KEY.to_string(), codec.as_bytes().to_vec());

        let mut enc = BinaryEncoder::new(&mut *io);
        enc.write_raw(&MAGIC)?;
        if !metadata.is_empty() {
            enc.write_long(metadata.len() as i64)?;
            for (key, value) in &metadata {
                enc.write_string(key)?;
                enc.write_bytes(value)?;
            }
        }
        enc.write_long(0)?;
        enc.write_raw(&sync)?;

        debug!(codec, "wrote container header");
        Ok(Self {
            io,
            writer: DatumWriter::new(schema),
            sync,
            block: MemoryIo::new(),
            block_count: 0,
        })
    }

    pub fn sync_marker(&self) -> &[u8; SYNC_SIZE] {
        &self.sync
    }

    pub fn append(&mut self, datum: &Value) -> Result<(), CodecError> {
        self.writer.write(datum, &mut BinaryEncoder::new(&mut self.block))?;
        self.block_count += 1;
        if self.block.len() >= SYNC_INTERVAL {
            self.write_block()?;
        }
        Ok(())
    }

    /// Writes any buffered datums as a block and flushes the channel.
    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.write_block()?;
        self.io.flush()?;
        Ok(())
    }

    /// Flushes and closes the channel.
    pub fn close(mut self) -> Result<(), CodecError> {
        self.flush()?;
        self.io.close()?;
        Ok(())
    }

    fn write_block(&mut self) -> Result<(), CodecError> {
        if self.block_count == 0 {
            return Ok(());
        }
        let mut enc = BinaryEncoder::new(&mut *self.io);
        enc.write_long(self.block_count)?;
        enc.write_bytes(self.block.as_bytes())?;
        enc.write_raw(&self.sync)?;

        debug!(count = self.block_count, size = self.block.len(), "wrote container block");
        self.block.truncate();
        self.block_count = 0;
        Ok(())
    }
}

/// Reads datums back from a container file.
pub struct ContainerReader<'a> {
    io: &'a mut dyn AvroIo,
    reader: DatumReader,
    metadata: BTreeMap<String, Vec<u8>>,
    sync: [u8; SYNC_SIZE],
    remaining: u64,
}

impl<'a> ContainerReader<'a> {
    /// Opens a file, reading datums with the embedded writer schema.
    pub fn new(io: &'a mut dyn AvroIo) -> Result<Self, CodecError> {
        Self::with_reader_schema(io, None, ReaderConfig::default())
    }

    /// Opens a file, resolving datums into `reader_schema` when given.
    pub fn with_reader_schema(
        io: &'a mut dyn AvroIo,
        reader_schema: Option<AvroSchema>,
        config: ReaderConfig,
    ) -> Result<Self, CodecError> {
        let mut dec = BinaryDecoder::new(&mut *io);
        let magic = dec.read_fixed(MAGIC.len())?;
        if magic != MAGIC {
            return Err(CodecError::InvalidData("not an Avro container file".into()));
        }

        let mut metadata = BTreeMap::new();
        loop {
            let mut count = dec.read_long()?;
            if count == 0 {
                break;
            }
            if count < 0 {
                count = count.checked_neg().ok_or_else(|| {
                    CodecError::InvalidData("invalid metadata block count".into())
                })?;
                dec.read_long()?;
            }
            for _ in 0..count {
                let key = dec.read_string()?;
                let value = dec.read_bytes()?;
                metadata.insert(key, value);
            }
        }

        let mut sync = [0u8; SYNC_SIZE];
        sync.copy_from_slice(&dec.read_fixed(SYNC_SIZE)?);

        let codec = metadata
            .get(CODEC_KEY)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .unwrap_or_else(|| NULL_CODEC.to_string());
        check_codec(&codec)?;

        let schema_json = metadata
            .get(SCHEMA_KEY)
            .ok_or_else(|| CodecError::InvalidData(format!("missing {} metadata", SCHEMA_KEY)))?;
        let schema_text = std::str::from_utf8(schema_json)
            .map_err(|e| CodecError::InvalidData(format!("schema is not UTF-8: {}", e)))?;
        let writer_schema = AvroSchema::parse(schema_text)?;

        let reader = match reader_schema {
            Some(reader_schema) => DatumReader::with_schemas(writer_schema, reader_schema),
            None => DatumReader::new(writer_schema),
        }
        .with_config(config);

        Ok(Self {
            io,
            reader,
            metadata,
            sync,
            remaining: 0,
        })
    }

    pub fn metadata(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.metadata
    }

    pub fn writer_schema(&self) -> &AvroSchema {
        self.reader.writer_schema()
    }

    /// Reads the next datum, or `None` at end of file.
    pub fn next_value(&mut self) -> Result<Option<Value>, CodecError> {
        while self.remaining == 0 {
            if self.io.is_eof()? {
                return Ok(None);
            }
            let mut dec = BinaryDecoder::new(&mut *self.io);
            let count = dec.read_long()?;
            let _size = dec.read_long()?;
            self.remaining = u64::try_from(count)
                .map_err(|_| CodecError::InvalidData(format!("invalid block count: {}", count)))?;
            if self.remaining == 0 {
                self.check_sync()?;
            }
        }

        let value = self.reader.read(&mut BinaryDecoder::new(&mut *self.io))?;
        self.remaining -= 1;
        if self.remaining == 0 {
            self.check_sync()?;
        }
        Ok(Some(value))
    }

    fn check_sync(&mut self) -> Result<(), CodecError> {
        let marker = self.io.read(SYNC_SIZE)?;
        if marker != self.sync {
            return Err(CodecError::InvalidData("sync marker mismatch".into()));
        }
        Ok(())
    }
}

impl Iterator for ContainerReader<'_> {
    type Item = Result<Value, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_value().transpose()
    }
}
