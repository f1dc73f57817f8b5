//! The two codec operations: `encode` and `decode` (spec §4.1).

use std::collections::HashMap;

use crate::encoding::{
    ascii_to_ebcdic, decode_bcd, decode_packed_decimal, ebcdic_to_ascii, encode_bcd,
    encode_packed_decimal, hex_decode, hex_encode,
};
use crate::error::CodecError;
use crate::field::{DataClass, Encoding, FieldDescriptor, LengthKind, PadSide};
use crate::instance::MessageInstance;
use crate::schema::MessageSchema;
use crate::value::Value;

/// Encode a message instance against a schema, producing wire bytes.
///
/// Round-trip property (spec §8.1): `decode(encode(m), schema) == m` for
/// every `m` that satisfies the schema.
pub fn encode(instance: &MessageInstance, schema: &MessageSchema) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    let mut controlled: HashMap<String, bool> = HashMap::new();
    for field in &schema.fields {
        encode_field(field, instance, &mut body, &mut controlled)?;
    }

    let framed = match &schema.header {
        None => body,
        Some(header) => {
            let mut out = Vec::with_capacity(body.len() + header.prefix_width);
            let covered_len = if header.prefix_includes_header {
                body.len() + header.prefix_width
            } else {
                body.len()
            };
            out.extend(encode_length_prefix_bytes(covered_len, header.prefix_width, header.prefix_encoding)?);
            out.extend(body);
            out
        }
    };

    if framed.len() > schema.max_frame_len {
        return Err(CodecError::FrameTooLarge { len: framed.len(), max: schema.max_frame_len });
    }
    Ok(framed)
}

/// Decode wire bytes against a schema, producing a message instance.
pub fn decode(bytes: &[u8], schema: &MessageSchema) -> Result<MessageInstance, CodecError> {
    if bytes.len() > schema.max_frame_len {
        return Err(CodecError::FrameTooLarge { len: bytes.len(), max: schema.max_frame_len });
    }

    let mut offset = 0usize;
    if let Some(header) = &schema.header {
        // The prefix has already been validated/stripped by the transport
        // layer in the common case; here we still accept it inline if
        // present, so the codec is usable standalone.
        if bytes.len() >= header.prefix_width {
            offset = header.prefix_width;
        }
    }

    let mut instance = MessageInstance::new();
    let mut controlled: HashMap<String, bool> = HashMap::new();
    for field in &schema.fields {
        decode_field(field, bytes, &mut offset, &mut controlled, &mut instance)?;
    }
    Ok(instance)
}

fn resolve_value<'a>(field: &FieldDescriptor, instance: &'a MessageInstance) -> Result<Option<&'a Value>, CodecError> {
    if let Some(v) = instance.get(&field.id) {
        return Ok(Some(v));
    }
    if field.required {
        return Err(CodecError::SchemaViolation {
            field: field.id.clone(),
            reason: "required field missing and has no default".to_string(),
        });
    }
    Ok(None)
}

fn encode_field(
    field: &FieldDescriptor,
    instance: &MessageInstance,
    out: &mut Vec<u8>,
    controlled: &mut HashMap<String, bool>,
) -> Result<(), CodecError> {
    if let Some(&present) = controlled.get(&field.id) {
        if !present {
            return Ok(());
        }
    }

    match field.class {
        DataClass::Bitmap => {
            let mut present_map = HashMap::new();
            for id in &field.controls {
                present_map.insert(id.clone(), instance.contains(id));
            }
            let (primary, secondary) = build_bitmap(&field.controls, &present_map);
            out.extend_from_slice(&primary);
            if let Some(sec) = secondary {
                out.extend_from_slice(&sec);
            }
            controlled.extend(present_map);
            Ok(())
        }
        DataClass::Composite => {
            let value = resolve_value(field, instance)?;
            let Some(value) = value else { return Ok(()) };
            let nested = value.as_composite().ok_or_else(|| CodecError::SchemaViolation {
                field: field.id.clone(),
                reason: "expected a composite value".to_string(),
            })?;
            let mut nested_body = Vec::new();
            let mut nested_controlled = HashMap::new();
            for child in &field.children {
                encode_field(child, nested, &mut nested_body, &mut nested_controlled)?;
            }
            if field.is_variable() {
                let digits = field.length_kind.prefix_digits().unwrap();
                out.extend(encode_length_field(nested_body.len(), digits, field.length_encoding)?);
            }
            out.extend(nested_body);
            Ok(())
        }
        _ => {
            let value = resolve_value(field, instance)?;
            let value = match value {
                Some(v) => v.clone(),
                None => match &field.default {
                    Some(d) => Value::Str(d.clone()),
                    None => return Ok(()),
                },
            };
            let body_bytes = encode_body(field, &value)?;
            if field.is_variable() {
                let digits = field.length_kind.prefix_digits().unwrap();
                let declared_len = value.encoded_len_hint();
                if declared_len > field.max_len {
                    return Err(CodecError::ValueTooLong {
                        field: field.id.clone(),
                        len: declared_len,
                        max: field.max_len,
                    });
                }
                out.extend(encode_length_field(declared_len, digits, field.length_encoding)?);
            } else if body_bytes.len() > field.max_len && field.body_encoding == Encoding::Ascii {
                return Err(CodecError::ValueTooLong {
                    field: field.id.clone(),
                    len: body_bytes.len(),
                    max: field.max_len,
                });
            }
            out.extend(body_bytes);
            Ok(())
        }
    }
}

fn decode_field(
    field: &FieldDescriptor,
    bytes: &[u8],
    offset: &mut usize,
    controlled: &mut HashMap<String, bool>,
    instance: &mut MessageInstance,
) -> Result<(), CodecError> {
    if let Some(&present) = controlled.get(&field.id) {
        if !present {
            return Ok(());
        }
    }

    match field.class {
        DataClass::Bitmap => {
            let primary_len = 8;
            require_len(bytes, *offset, primary_len, &field.id, *offset)?;
            let primary = &bytes[*offset..*offset + primary_len];
            *offset += primary_len;

            let secondary_present = get_bit(primary, 1);
            let secondary = if secondary_present {
                require_len(bytes, *offset, 8, &field.id, *offset)?;
                let s = &bytes[*offset..*offset + 8];
                *offset += 8;
                Some(s.to_vec())
            } else {
                None
            };

            for (idx, id) in field.controls.iter().enumerate() {
                let present = if idx < 63 {
                    get_bit(primary, idx + 2)
                } else {
                    match &secondary {
                        Some(sec) => get_bit(sec, idx - 63 + 1),
                        None => false,
                    }
                };
                controlled.insert(id.clone(), present);
            }

            // Any bit beyond the schema's declared controls has no field to
            // decode it into; treat it as a hard error rather than silently
            // dropping it (spec §9(a) "strict interpretation").
            let declared = field.controls.len();
            for bit in (declared.min(63) + 2)..=64 {
                if get_bit(primary, bit) {
                    return Err(CodecError::SchemaViolation {
                        field: field.id.clone(),
                        reason: format!("bit {bit} of the primary bitmap is set but no field is declared for it"),
                    });
                }
            }
            if let Some(sec) = &secondary {
                let declared_secondary = declared.saturating_sub(63);
                for bit in (declared_secondary + 1)..=64 {
                    if get_bit(sec, bit) {
                        return Err(CodecError::SchemaViolation {
                            field: field.id.clone(),
                            reason: format!("bit {bit} of the secondary bitmap is set but no field is declared for it"),
                        });
                    }
                }
            }
            Ok(())
        }
        DataClass::Composite => {
            let body_len = if field.is_variable() {
                let digits = field.length_kind.prefix_digits().unwrap();
                let len = decode_length_field(bytes, offset, digits, field.length_encoding, &field.id)?;
                if len > field.max_len {
                    return Err(CodecError::ParseError {
                        offset: *offset,
                        field: field.id.clone(),
                        reason: format!("declared length {len} exceeds schema maximum {}", field.max_len),
                    });
                }
                len
            } else {
                field.max_len
            };
            require_len(bytes, *offset, body_len, &field.id, *offset)?;
            let nested_bytes = &bytes[*offset..*offset + body_len];
            *offset += body_len;

            let mut nested_offset = 0usize;
            let mut nested_controlled = HashMap::new();
            let mut nested_instance = MessageInstance::new();
            for child in &field.children {
                decode_field(child, nested_bytes, &mut nested_offset, &mut nested_controlled, &mut nested_instance)?;
            }
            instance.set(field.id.clone(), Value::Composite(nested_instance));
            Ok(())
        }
        _ => {
            let body_len = if field.is_variable() {
                let digits = field.length_kind.prefix_digits().unwrap();
                let len = decode_length_field(bytes, offset, digits, field.length_encoding, &field.id)?;
                if len > field.max_len {
                    return Err(CodecError::ParseError {
                        offset: *offset,
                        field: field.id.clone(),
                        reason: format!("declared length {len} exceeds schema maximum {}", field.max_len),
                    });
                }
                len
            } else {
                byte_len_for_fixed(field)
            };
            require_len(bytes, *offset, body_len, &field.id, *offset)?;
            let raw = &bytes[*offset..*offset + body_len];
            let start_offset = *offset;
            *offset += body_len;

            let value = decode_body(field, raw, start_offset)?;
            if field.class == DataClass::Numeric {
                if let Value::Str(ref s) = value {
                    if !s.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(CodecError::ParseError {
                            offset: start_offset,
                            field: field.id.clone(),
                            reason: "numeric field contains non-digit characters".to_string(),
                        });
                    }
                }
            }
            instance.set(field.id.clone(), value);
            Ok(())
        }
    }
}

/// For fixed-width fields, the number of *bytes* the body occupies, which
/// differs from `max_len` (a character/digit count) for BCD/packed-decimal
/// encodings that pack two digits per byte.
fn byte_len_for_fixed(field: &FieldDescriptor) -> usize {
    match field.body_encoding {
        Encoding::Bcd => field.max_len.div_ceil(2),
        Encoding::PackedDecimal => (field.max_len + 1).div_ceil(2),
        Encoding::Hex => field.max_len.div_ceil(2),
        _ => field.max_len,
    }
}

fn encode_body(field: &FieldDescriptor, value: &Value) -> Result<Vec<u8>, CodecError> {
    match field.body_encoding {
        Encoding::Ascii => {
            let s = value.as_str().ok_or_else(|| CodecError::SchemaViolation {
                field: field.id.clone(),
                reason: "expected a string value for ASCII encoding".to_string(),
            })?;
            let padded = pad_if_fixed(field, s);
            Ok(padded.into_bytes())
        }
        Encoding::Ebcdic => {
            let s = value.as_str().ok_or_else(|| CodecError::SchemaViolation {
                field: field.id.clone(),
                reason: "expected a string value for EBCDIC encoding".to_string(),
            })?;
            let padded = pad_if_fixed(field, s);
            Ok(ascii_to_ebcdic(&padded))
        }
        Encoding::Bcd => {
            let s = value.as_str().ok_or_else(|| CodecError::SchemaViolation {
                field: field.id.clone(),
                reason: "expected a digit string for BCD encoding".to_string(),
            })?;
            let digits = if field.is_variable() { s.to_string() } else { pad_numeric(field, s) };
            encode_bcd(&digits)
        }
        Encoding::PackedDecimal => {
            let s = value.as_str().ok_or_else(|| CodecError::SchemaViolation {
                field: field.id.clone(),
                reason: "expected a digit string for packed-decimal encoding".to_string(),
            })?;
            let (negative, digits) = split_sign(s);
            encode_packed_decimal(&digits, negative)
        }
        Encoding::Hex => match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Str(s) => hex_decode(s),
            Value::Composite(_) => Err(CodecError::SchemaViolation {
                field: field.id.clone(),
                reason: "composite value cannot use HEX body encoding".to_string(),
            }),
        },
        Encoding::Binary => match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Str(s) => hex_decode(s),
            Value::Composite(_) => Err(CodecError::SchemaViolation {
                field: field.id.clone(),
                reason: "composite value cannot use BINARY body encoding".to_string(),
            }),
        },
    }
}

fn decode_body(field: &FieldDescriptor, raw: &[u8], offset: usize) -> Result<Value, CodecError> {
    match field.body_encoding {
        Encoding::Ascii => {
            let s = std::str::from_utf8(raw)
                .map_err(|_| CodecError::ParseError { offset, field: field.id.clone(), reason: "invalid ASCII/UTF-8 bytes".to_string() })?;
            Ok(Value::Str(unpad(field, s)))
        }
        Encoding::Ebcdic => {
            let s = ebcdic_to_ascii(raw);
            Ok(Value::Str(unpad(field, &s)))
        }
        Encoding::Bcd => {
            let digit_count = if field.is_variable() { raw.len() * 2 } else { field.max_len };
            let digits = decode_bcd(raw, digit_count)
                .map_err(|e| CodecError::ParseError { offset, field: field.id.clone(), reason: e.to_string() })?;
            Ok(Value::Str(digits))
        }
        Encoding::PackedDecimal => {
            let (digits, negative) = decode_packed_decimal(raw)
                .map_err(|e| CodecError::ParseError { offset, field: field.id.clone(), reason: e.to_string() })?;
            let signed = if negative { format!("-{digits}") } else { digits };
            Ok(Value::Str(signed))
        }
        Encoding::Hex => Ok(Value::Str(hex_encode(raw))),
        Encoding::Binary => Ok(Value::Bytes(raw.to_vec())),
    }
}

fn pad_if_fixed(field: &FieldDescriptor, s: &str) -> String {
    if field.is_variable() || s.chars().count() >= field.max_len {
        return s.to_string();
    }
    let pad_count = field.max_len - s.chars().count();
    let pad: String = std::iter::repeat_n(field.padding.ch, pad_count).collect();
    match field.padding.side {
        PadSide::Left => format!("{pad}{s}"),
        PadSide::Right => format!("{s}{pad}"),
    }
}

fn pad_numeric(field: &FieldDescriptor, s: &str) -> String {
    if s.len() >= field.max_len {
        return s.to_string();
    }
    format!("{:0>width$}", s, width = field.max_len)
}

fn unpad(field: &FieldDescriptor, s: &str) -> String {
    if field.is_variable() {
        return s.to_string();
    }
    match field.padding.side {
        PadSide::Left => s.trim_start_matches(field.padding.ch).to_string(),
        PadSide::Right => s.trim_end_matches(field.padding.ch).to_string(),
    }
}

fn split_sign(s: &str) -> (bool, String) {
    if let Some(stripped) = s.strip_prefix('-') {
        (true, stripped.to_string())
    } else {
        (false, s.to_string())
    }
}

fn require_len(bytes: &[u8], offset: usize, need: usize, field: &str, err_offset: usize) -> Result<(), CodecError> {
    if offset + need > bytes.len() {
        return Err(CodecError::ParseError {
            offset: err_offset,
            field: field.to_string(),
            reason: format!("length underflow: need {need} bytes, {} remaining", bytes.len().saturating_sub(offset)),
        });
    }
    Ok(())
}

/// Decode a standalone length-prefix value from exactly `bytes.len()`
/// bytes, used by transports that must learn a frame's length before
/// they can read the rest of it to hand to [`decode`].
pub fn decode_length_prefix(bytes: &[u8], encoding: Encoding) -> Result<usize, CodecError> {
    let digits = bytes.len() * if encoding == Encoding::Bcd { 2 } else { 1 };
    let mut offset = 0usize;
    decode_length_field(bytes, &mut offset, digits, encoding, "length-prefix")
}

/// Encode a standalone length-prefix value into exactly `width` bytes,
/// the counterpart to [`decode_length_prefix`].
pub fn encode_length_prefix_bytes(len: usize, width: usize, encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    let digits = width * if encoding == Encoding::Bcd { 2 } else { 1 };
    encode_length_field(len, digits, encoding)
}

fn encode_length_field(len: usize, digits: usize, encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    let s = format!("{len:0width$}", width = digits);
    match encoding {
        Encoding::Ascii => Ok(s.into_bytes()),
        Encoding::Ebcdic => Ok(ascii_to_ebcdic(&s)),
        Encoding::Bcd => encode_bcd(&s),
        Encoding::Binary => Ok((len as u32).to_be_bytes()[4 - digits.min(4)..].to_vec()),
        Encoding::Hex | Encoding::PackedDecimal => Err(CodecError::UnknownEncoding { field: "length-prefix".to_string() }),
    }
}

fn decode_length_field(bytes: &[u8], offset: &mut usize, digits: usize, encoding: Encoding, field: &str) -> Result<usize, CodecError> {
    match encoding {
        Encoding::Ascii => {
            require_len(bytes, *offset, digits, field, *offset)?;
            let s = std::str::from_utf8(&bytes[*offset..*offset + digits])
                .map_err(|_| CodecError::ParseError { offset: *offset, field: field.to_string(), reason: "invalid ASCII length prefix".to_string() })?;
            let len = s.parse::<usize>().map_err(|_| CodecError::ParseError { offset: *offset, field: field.to_string(), reason: "non-numeric length prefix".to_string() })?;
            *offset += digits;
            Ok(len)
        }
        Encoding::Ebcdic => {
            require_len(bytes, *offset, digits, field, *offset)?;
            let s = ebcdic_to_ascii(&bytes[*offset..*offset + digits]);
            let len = s.parse::<usize>().map_err(|_| CodecError::ParseError { offset: *offset, field: field.to_string(), reason: "non-numeric length prefix".to_string() })?;
            *offset += digits;
            Ok(len)
        }
        Encoding::Bcd => {
            let byte_len = digits.div_ceil(2);
            require_len(bytes, *offset, byte_len, field, *offset)?;
            let s = decode_bcd(&bytes[*offset..*offset + byte_len], digits)
                .map_err(|e| CodecError::ParseError { offset: *offset, field: field.to_string(), reason: e.to_string() })?;
            let len = s.parse::<usize>().map_err(|_| CodecError::ParseError { offset: *offset, field: field.to_string(), reason: "non-numeric BCD length prefix".to_string() })?;
            *offset += byte_len;
            Ok(len)
        }
        Encoding::Binary => {
            let byte_len = digits.min(4);
            require_len(bytes, *offset, byte_len, field, *offset)?;
            let mut buf = [0u8; 4];
            buf[4 - byte_len..].copy_from_slice(&bytes[*offset..*offset + byte_len]);
            *offset += byte_len;
            Ok(u32::from_be_bytes(buf) as usize)
        }
        Encoding::Hex | Encoding::PackedDecimal => Err(CodecError::UnknownEncoding { field: field.to_string() }),
    }
}

fn get_bit(bytes: &[u8], pos_1_based: usize) -> bool {
    let idx = pos_1_based - 1;
    let byte = idx / 8;
    let bit = 7 - (idx % 8);
    if byte >= bytes.len() {
        return false;
    }
    (bytes[byte] >> bit) & 1 == 1
}

fn set_bit(bytes: &mut [u8], pos_1_based: usize) {
    let idx = pos_1_based - 1;
    let byte = idx / 8;
    let bit = 7 - (idx % 8);
    bytes[byte] |= 1 << bit;
}

/// Build primary (and, if needed, secondary) bitmap bytes from an ordered
/// list of controlled field ids. Index 0 maps to bit 2 of the primary
/// bitmap (bit 1 is reserved to flag a following secondary bitmap);
/// indices 63.. map to bits 1.. of the secondary bitmap (spec §4.1,
/// §9(a) strict interpretation).
fn build_bitmap(controls: &[String], present: &HashMap<String, bool>) -> ([u8; 8], Option<[u8; 8]>) {
    let mut primary = [0u8; 8];
    let mut secondary = [0u8; 8];
    let mut secondary_used = false;
    for (idx, id) in controls.iter().enumerate() {
        if !*present.get(id).unwrap_or(&false) {
            continue;
        }
        if idx < 63 {
            set_bit(&mut primary, idx + 2);
        } else {
            secondary_used = true;
            set_bit(&mut secondary, idx - 63 + 1);
        }
    }
    if secondary_used {
        set_bit(&mut primary, 1);
        (primary, Some(secondary))
    } else {
        (primary, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{DataClass, FieldDescriptor, LengthKind, Padding, PadSide};

    fn simple_schema() -> MessageSchema {
        let controls = vec!["2".to_string(), "3".to_string(), "4".to_string(), "11".to_string()];
        let fields = vec![
            FieldDescriptor::fixed("mti", "MTI", DataClass::Numeric, 4).required(),
            FieldDescriptor::bitmap("bitmap", "Bitmap", controls),
            FieldDescriptor::variable("2", "PAN", DataClass::Numeric, LengthKind::Llvar, 19),
            FieldDescriptor::fixed("3", "Processing code", DataClass::Numeric, 6),
            FieldDescriptor::fixed("4", "Amount", DataClass::Numeric, 12),
            FieldDescriptor::fixed("11", "STAN", DataClass::Numeric, 6),
        ];
        MessageSchema::new("test", 1, fields)
    }

    #[test]
    fn round_trip_with_bitmap_and_llvar() {
        let schema = simple_schema();
        let mut instance = MessageInstance::new();
        instance.set("mti", "0200");
        instance.set("2", "4111111111111111");
        instance.set("3", "011000");
        instance.set("4", "000000010000");
        instance.set("11", "000001");

        let bytes = encode(&instance, &schema).unwrap();
        let decoded = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded, instance);
    }

    #[test]
    fn optional_field_omitted_is_absent_in_bitmap() {
        let schema = simple_schema();
        let mut instance = MessageInstance::new();
        instance.set("mti", "0200");
        instance.set("3", "011000");
        instance.set("4", "000000010000");
        instance.set("11", "000001");

        let bytes = encode(&instance, &schema).unwrap();
        let decoded = decode(&bytes, &schema).unwrap();
        assert!(!decoded.contains("2"));
        assert_eq!(decoded.get_str("3"), Some("011000"));
    }

    #[test]
    fn missing_required_field_is_schema_violation() {
        let schema = simple_schema();
        let instance = MessageInstance::new();
        let err = encode(&instance, &schema).unwrap_err();
        assert!(matches!(err, CodecError::SchemaViolation { .. }));
    }

    #[test]
    fn llvar_value_exceeding_max_is_rejected() {
        let schema = simple_schema();
        let mut instance = MessageInstance::new();
        instance.set("mti", "0200");
        instance.set("2", "1".repeat(20));
        instance.set("3", "011000");
        instance.set("4", "000000010000");
        instance.set("11", "000001");
        let err = encode(&instance, &schema).unwrap_err();
        assert!(matches!(err, CodecError::ValueTooLong { .. }));
    }

    #[test]
    fn secondary_bitmap_round_trip() {
        let mut controls: Vec<String> = (2..=70).map(|n| n.to_string()).collect();
        controls.retain(|_| true);
        let mut fields = vec![
            FieldDescriptor::fixed("mti", "MTI", DataClass::Numeric, 4).required(),
            FieldDescriptor::bitmap("bitmap", "Bitmap", controls.clone()),
        ];
        for id in &controls {
            fields.push(FieldDescriptor::fixed(id.clone(), format!("field {id}"), DataClass::Numeric, 2));
        }
        let schema = MessageSchema::new("secondary", 1, fields);

        let mut instance = MessageInstance::new();
        instance.set("mti", "0200");
        instance.set("2", "11");
        instance.set("70", "22"); // forces the secondary bitmap to be used

        let bytes = encode(&instance, &schema).unwrap();
        let decoded = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded.get_str("2"), Some("11"));
        assert_eq!(decoded.get_str("70"), Some("22"));
        assert!(!decoded.contains("3"));
    }

    #[test]
    fn bcd_fixed_field_round_trip() {
        let fields = vec![
            FieldDescriptor::fixed("mti", "MTI", DataClass::Numeric, 4).required().with_encoding(Encoding::Bcd, Encoding::Ascii),
            FieldDescriptor::fixed("4", "Amount", DataClass::Numeric, 12).with_encoding(Encoding::Bcd, Encoding::Ascii),
        ];
        let schema = MessageSchema::new("bcd", 1, fields);
        let mut instance = MessageInstance::new();
        instance.set("mti", "0200");
        instance.set("4", "000000010000");
        let bytes = encode(&instance, &schema).unwrap();
        assert_eq!(bytes.len(), 2 + 6); // 4 BCD digits -> 2 bytes, 12 BCD digits -> 6 bytes
        let decoded = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded, instance);
    }

    #[test]
    fn padding_alphanum_field() {
        let fields = vec![
            FieldDescriptor::fixed("41", "Terminal id", DataClass::Alphanum, 8)
                .with_padding(Padding { ch: ' ', side: PadSide::Right }),
        ];
        let schema = MessageSchema::new("pad", 1, fields);
        let mut instance = MessageInstance::new();
        instance.set("41", "ATM1");
        let bytes = encode(&instance, &schema).unwrap();
        assert_eq!(bytes, b"ATM1    ");
        let decoded = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded.get_str("41"), Some("ATM1"));
    }

    #[test]
    fn unknown_fields_are_never_produced_by_decode() {
        // Decoding only ever walks the schema's declared fields, so an
        // undeclared field can never appear in the resulting instance
        // (spec §4.1 "Edge policies").
        let schema = simple_schema();
        let mut instance = MessageInstance::new();
        instance.set("mti", "0200");
        instance.set("3", "011000");
        instance.set("4", "000000010000");
        instance.set("11", "000001");
        let bytes = encode(&instance, &schema).unwrap();
        let decoded = decode(&bytes, &schema).unwrap();
        assert!(!decoded.contains("99"));
    }

    #[test]
    fn set_bit_for_undeclared_field_is_a_hard_decode_error() {
        // spec §9(a) "strict interpretation": a bitmap bit with no matching
        // schema field must fail decode rather than being silently ignored.
        let schema = simple_schema();
        let mut instance = MessageInstance::new();
        instance.set("mti", "0200");
        instance.set("3", "011000");
        instance.set("4", "000000010000");
        instance.set("11", "000001");
        let mut bytes = encode(&instance, &schema).unwrap();

        // Bit 6 of the primary bitmap: simple_schema's controls only cover
        // bits 2-5, so no field is declared for it.
        let bitmap_offset = 4; // past the 4-byte "mti" field
        set_bit(&mut bytes[bitmap_offset..bitmap_offset + 8], 6);

        let err = decode(&bytes, &schema).unwrap_err();
        assert!(matches!(err, CodecError::SchemaViolation { .. }));
    }

    #[test]
    fn length_prefix_bcd_round_trip() {
        let prefix = encode_length_prefix_bytes(42, 2, Encoding::Bcd).unwrap();
        assert_eq!(prefix.len(), 2);
        assert_eq!(decode_length_prefix(&prefix, Encoding::Bcd).unwrap(), 42);
    }

    #[test]
    fn header_prefix_round_trip_with_default_schema() {
        let schema = crate::standard::default_schema();
        let mut instance = MessageInstance::new();
        instance.set("mti", "0800");
        let bytes = encode(&instance, &schema).unwrap();
        let prefix = &bytes[..2];
        let declared_len = decode_length_prefix(prefix, Encoding::Bcd).unwrap();
        assert_eq!(declared_len, bytes.len() - 2);
    }
}
