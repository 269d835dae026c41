//! Schema driven conversion of parameter data between its native form and the wire.
//!
//! The native form is what the parameter dictionary stores: integers little endian, a uid as a
//! little endian manufacturer id followed by a little endian device id and ascii text as a fixed
//! [RDM_ASCII_MAX_LENGTH] byte buffer padded with zeros. On the wire every integer is big endian
//! and ascii text only takes the bytes up to its first zero.
//!
//! A [Schema] lists the [FieldKind]s of one repetition. Schemas ending in a variable length field
//! ([FieldKind::Ascii], [FieldKind::OptionalUid], [FieldKind::Bytes]) are singletons and always
//! convert exactly one repetition. All other schemas convert as many repetitions as fit into both
//! the source and the destination, which is how list parameters like SUPPORTED_PARAMETERS work.

use crate::consts::{RDM_ASCII_MAX_LENGTH, RDM_MAX_PARAMETER_DATA_LENGTH};
use crate::types::DataPack;

const UID_SIZE: usize = 6;
const LITERAL_MAX_LENGTH: usize = 8;

/// One field of a parameter.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FieldKind {
    Byte,
    Word,
    DWord,
    Uid,
    /// A uid that is left out on the wire when it is all zeros. Only valid as the last field.
    OptionalUid,
    /// Up to 32 characters. Only valid as the last field.
    Ascii,
    /// All remaining bytes, copied as they are. Only valid as the last field.
    Bytes,
    /// Constant bytes, written as they are in both directions.
    Literal(&'static [u8]),
}

impl FieldKind {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::OptionalUid | Self::Ascii | Self::Bytes)
    }

    /// Size in the native form. [FieldKind::Bytes] has no fixed size and counts as 0.
    pub fn native_size(&self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::DWord => 4,
            Self::Uid | Self::OptionalUid => UID_SIZE,
            Self::Ascii => RDM_ASCII_MAX_LENGTH,
            Self::Bytes => 0,
            Self::Literal(bytes) => bytes.len(),
        }
    }

    /// Largest size on the wire. [FieldKind::Bytes] has no fixed size and counts as 0.
    pub fn wire_size(&self) -> usize {
        self.native_size()
    }
}

/// The schema is structurally invalid.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchemaError {
    /// A variable length field is followed by another field.
    TerminalFieldNotLast,
    /// A literal is longer than 8 bytes.
    LiteralTooLong,
    /// One repetition is larger than the maximum parameter data length.
    TooLarge,
}

impl core::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SchemaError::TerminalFieldNotLast => {
                write!(f, "variable length field is not the last field")
            },
            SchemaError::LiteralTooLong => write!(f, "literal is longer than 8 bytes"),
            SchemaError::TooLarge => write!(f, "schema exceeds the parameter data length"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SchemaError {}

/// Conversion failed. The destination may have been partially written.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// The source ended in the middle of a field.
    SourceTooShort,
    /// The destination can't hold the field.
    DestinationTooSmall,
}

impl core::fmt::Display for CodecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CodecError::SourceTooShort => write!(f, "source ended in the middle of a field"),
            CodecError::DestinationTooSmall => write!(f, "destination too small for the field"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CodecError {}

/// The fields of one repetition of a parameter. Validated on construction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Schema {
    fields: &'static [FieldKind],
    singleton: bool,
}

impl Schema {
    pub fn new(fields: &'static [FieldKind]) -> Result<Self, SchemaError> {
        let mut size = 0usize;

        for (index, field) in fields.iter().enumerate() {
            if field.is_terminal() && index + 1 != fields.len() {
                return Err(SchemaError::TerminalFieldNotLast);
            }

            if let FieldKind::Literal(bytes) = field {
                if bytes.len() > LITERAL_MAX_LENGTH {
                    return Err(SchemaError::LiteralTooLong);
                }
            }

            size += field.native_size();
            if size > RDM_MAX_PARAMETER_DATA_LENGTH {
                return Err(SchemaError::TooLarge);
            }
        }

        Ok(Self {
            fields,
            singleton: fields.last().is_some_and(FieldKind::is_terminal),
        })
    }

    /// A schema without fields. Used for parameters without data.
    pub fn empty() -> Self {
        Self {
            fields: &[],
            singleton: false,
        }
    }

    pub fn fields(&self) -> &'static [FieldKind] {
        self.fields
    }

    /// True if the last field has a variable length. Such a schema never repeats.
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// Size of one repetition in the native form.
    pub fn native_size(&self) -> usize {
        self.fields.iter().map(FieldKind::native_size).sum()
    }

    /// Largest size of one repetition on the wire.
    pub fn wire_size(&self) -> usize {
        self.fields.iter().map(FieldKind::wire_size).sum()
    }

    fn repetitions(&self, source_len: usize, source_size: usize, destination_len: usize) -> usize {
        if self.singleton {
            return 1;
        }

        // both sizes are equal for schemas without variable length fields
        match source_size {
            0 => 0,
            size => (source_len / size).min(destination_len / size),
        }
    }
}

/// Gets called for every field of every repetition of a schema.
pub trait FieldVisitor {
    fn visit(&mut self, field: FieldKind) -> Result<(), CodecError>;
}

/// Calls the visitor for the fields of `repetitions` repetitions of the schema.
pub fn walk<V: FieldVisitor>(
    schema: &Schema,
    repetitions: usize,
    visitor: &mut V,
) -> Result<(), CodecError> {
    for _ in 0..repetitions {
        for &field in schema.fields() {
            visitor.visit(field)?;
        }
    }

    Ok(())
}

/// Reads from one buffer and writes to another one, keeping track of both positions.
struct Cursor<'a> {
    source: &'a [u8],
    source_position: usize,
    destination: &'a mut [u8],
    destination_position: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a [u8], destination: &'a mut [u8]) -> Self {
        Self {
            source,
            source_position: 0,
            destination,
            destination_position: 0,
        }
    }

    fn remaining(&self) -> &[u8] {
        &self.source[self.source_position..]
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self.source_position + N;
        let bytes = self
            .source
            .get(self.source_position..end)
            .ok_or(CodecError::SourceTooShort)?;
        self.source_position = end;

        let mut value = [0u8; N];
        value.copy_from_slice(bytes);
        Ok(value)
    }

    fn skip(&mut self, count: usize) -> Result<(), CodecError> {
        if self.remaining().len() < count {
            return Err(CodecError::SourceTooShort);
        }

        self.source_position += count;
        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let end = self.destination_position + bytes.len();
        self.destination
            .get_mut(self.destination_position..end)
            .ok_or(CodecError::DestinationTooSmall)?
            .copy_from_slice(bytes);
        self.destination_position = end;

        Ok(())
    }
}

fn ascii_length(text: &[u8]) -> usize {
    let text = &text[..text.len().min(RDM_ASCII_MAX_LENGTH)];
    text.iter().position(|&byte| byte == 0).unwrap_or(text.len())
}

/// Native form to wire.
struct Encoder<'a>(Cursor<'a>);

impl FieldVisitor for Encoder<'_> {
    fn visit(&mut self, field: FieldKind) -> Result<(), CodecError> {
        let cursor = &mut self.0;

        match field {
            FieldKind::Byte => {
                let value = cursor.take::<1>()?;
                cursor.put(&value)
            },
            FieldKind::Word => {
                let value = u16::from_le_bytes(cursor.take()?);
                cursor.put(&value.to_be_bytes())
            },
            FieldKind::DWord => {
                let value = u32::from_le_bytes(cursor.take()?);
                cursor.put(&value.to_be_bytes())
            },
            FieldKind::Uid | FieldKind::OptionalUid => {
                let manufacturer_uid = u16::from_le_bytes(cursor.take()?);
                let device_uid = u32::from_le_bytes(cursor.take()?);

                if field == FieldKind::OptionalUid && manufacturer_uid == 0 && device_uid == 0 {
                    return Ok(());
                }

                cursor.put(&manufacturer_uid.to_be_bytes())?;
                cursor.put(&device_uid.to_be_bytes())
            },
            FieldKind::Ascii => {
                let text = cursor.take::<RDM_ASCII_MAX_LENGTH>()?;
                cursor.put(&text[..ascii_length(&text)])
            },
            FieldKind::Bytes => {
                let count = cursor.remaining().len();
                let start = cursor.source_position;
                cursor.skip(count)?;
                let source = cursor.source;
                cursor.put(&source[start..start + count])
            },
            FieldKind::Literal(bytes) => {
                cursor.skip(bytes.len())?;
                cursor.put(bytes)
            },
        }
    }
}

/// Wire to native form.
struct Decoder<'a>(Cursor<'a>);

impl FieldVisitor for Decoder<'_> {
    fn visit(&mut self, field: FieldKind) -> Result<(), CodecError> {
        let cursor = &mut self.0;

        match field {
            FieldKind::Byte => {
                let value = cursor.take::<1>()?;
                cursor.put(&value)
            },
            FieldKind::Word => {
                let value = u16::from_be_bytes(cursor.take()?);
                cursor.put(&value.to_le_bytes())
            },
            FieldKind::DWord => {
                let value = u32::from_be_bytes(cursor.take()?);
                cursor.put(&value.to_le_bytes())
            },
            FieldKind::OptionalUid if cursor.remaining().len() < UID_SIZE => {
                cursor.put(&[0; UID_SIZE])
            },
            FieldKind::Uid | FieldKind::OptionalUid => {
                let manufacturer_uid = u16::from_be_bytes(cursor.take()?);
                let device_uid = u32::from_be_bytes(cursor.take()?);

                cursor.put(&manufacturer_uid.to_le_bytes())?;
                cursor.put(&device_uid.to_le_bytes())
            },
            FieldKind::Ascii => {
                let count = cursor.remaining().len().min(RDM_ASCII_MAX_LENGTH);
                let length = ascii_length(cursor.remaining());

                let mut text = [0u8; RDM_ASCII_MAX_LENGTH];
                text[..length].copy_from_slice(&cursor.remaining()[..length]);
                cursor.skip(count)?;
                cursor.put(&text)
            },
            FieldKind::Bytes => {
                let count = cursor.remaining().len();
                let start = cursor.source_position;
                cursor.skip(count)?;
                let source = cursor.source;
                cursor.put(&source[start..start + count])
            },
            FieldKind::Literal(bytes) => {
                cursor.skip(bytes.len())?;
                cursor.put(bytes)
            },
        }
    }
}

/// Converts native parameter data to its wire form. Returns the amount of bytes written.
pub fn serialize(schema: &Schema, native: &[u8], wire: &mut [u8]) -> Result<usize, CodecError> {
    let repetitions = schema.repetitions(native.len(), schema.native_size(), wire.len());

    let mut encoder = Encoder(Cursor::new(native, wire));
    walk(schema, repetitions, &mut encoder)?;

    Ok(encoder.0.destination_position)
}

/// Converts parameter data from the wire to its native form. Returns the amount of bytes
/// written.
pub fn deserialize(schema: &Schema, wire: &[u8], native: &mut [u8]) -> Result<usize, CodecError> {
    let repetitions = schema.repetitions(wire.len(), schema.wire_size(), native.len());

    let mut decoder = Decoder(Cursor::new(wire, native));
    walk(schema, repetitions, &mut decoder)?;

    Ok(decoder.0.destination_position)
}

/// Serializes into a [DataPack], so it can be used as the parameter data of a response.
pub fn serialize_pack(schema: &Schema, native: &[u8]) -> Result<DataPack, CodecError> {
    let mut buffer = [0u8; RDM_MAX_PARAMETER_DATA_LENGTH];
    let written = serialize(schema, native, &mut buffer)?;

    DataPack::from_slice(&buffer[..written]).map_err(|_| CodecError::DestinationTooSmall)
}
