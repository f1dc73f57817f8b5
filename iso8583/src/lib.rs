//! Schema-driven ISO 8583 codec (spec §4.1, C1).
//!
//! Two operations, [`codec::encode`] and [`codec::decode`], walk a
//! declarative [`schema::MessageSchema`] — nothing in this crate hard-codes
//! a field number or encoding beyond the MTI and bitmap byte widths (spec
//! §9 "schema plurality").

pub mod codec;
pub mod encoding;
pub mod error;
pub mod field;
pub mod instance;
pub mod mask;
pub mod mti;
pub mod response_code;
pub mod schema;
pub mod standard;
pub mod value;

pub use codec::{decode, encode};
pub use error::CodecError;
pub use field::{DataClass, Encoding, FieldDescriptor, HeaderDescriptor, LengthKind, PadSide, Padding};
pub use instance::MessageInstance;
pub use schema::MessageSchema;
pub use value::Value;
