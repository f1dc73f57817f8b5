/// Errors raised while encoding a [`crate::instance::MessageInstance`]
/// against a schema (spec §4.1 "Encoding").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A required field has no explicit value and no default.
    SchemaViolation { field: String, reason: String },
    /// A value exceeds its declared maximum length.
    ValueTooLong { field: String, len: usize, max: usize },
    /// A numeric field contains non-digit bytes.
    NonDigit { value: String },
    /// A BCD byte contained a nibble outside 0-9.
    InvalidBcdNibble { byte: u8 },
    /// A packed-decimal sign nibble was neither 0xC nor 0xD.
    InvalidSignNibble { nibble: u8 },
    /// A hex-encoded string had invalid digits or odd length.
    InvalidHex { value: String },
    /// Decode-time failure with positional context (spec §4.1 "Decoding").
    ParseError { offset: usize, field: String, reason: String },
    /// Frame exceeded `MessageSchema::max_frame_len`.
    FrameTooLarge { len: usize, max: usize },
    /// An encoding was requested that this codec doesn't implement.
    UnknownEncoding { field: String },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::SchemaViolation { field, reason } => {
                write!(f, "schema violation on field {field}: {reason}")
            }
            CodecError::ValueTooLong { field, len, max } => {
                write!(f, "field {field} value length {len} exceeds maximum {max}")
            }
            CodecError::NonDigit { value } => write!(f, "non-digit characters in numeric value {value:?}"),
            CodecError::InvalidBcdNibble { byte } => write!(f, "invalid BCD nibble in byte 0x{byte:02X}"),
            CodecError::InvalidSignNibble { nibble } => write!(f, "invalid packed-decimal sign nibble 0x{nibble:X}"),
            CodecError::InvalidHex { value } => write!(f, "invalid hex string {value:?}"),
            CodecError::ParseError { offset, field, reason } => {
                write!(f, "parse error at offset {offset} in field {field}: {reason}")
            }
            CodecError::FrameTooLarge { len, max } => {
                write!(f, "frame length {len} exceeds maximum {max}")
            }
            CodecError::UnknownEncoding { field } => write!(f, "unknown encoding for field {field}"),
        }
    }
}

impl std::error::Error for CodecError {}
