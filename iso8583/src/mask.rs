//! Masking of sensitive field values in diagnostic output (spec §4.1
//! "Security": "encoders and decoders never log raw bodies of sensitive
//! fields").

use crate::instance::MessageInstance;
use crate::schema::MessageSchema;
use crate::value::Value;

/// Wraps a value so that `Display`/`Debug` never reveal its content.
/// Channel and codec code should route sensitive values through this
/// wrapper before they reach a `tracing` event.
pub struct Masked<'a>(pub &'a Value);

impl std::fmt::Debug for Masked<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "****")
    }
}

impl std::fmt::Display for Masked<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "****")
    }
}

/// Render a message instance as `field=value` pairs suitable for a
/// tracing event, masking any field the schema marks `sensitive`.
pub fn render_masked(instance: &MessageInstance, schema: &MessageSchema) -> String {
    let mut parts = Vec::new();
    for (id, value) in instance.iter() {
        let sensitive = schema.field(id).is_some_and(|f| f.sensitive);
        if sensitive {
            parts.push(format!("{id}=****"));
        } else {
            parts.push(format!("{id}={}", display_value(value)));
        }
    }
    parts.join(" ")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        Value::Bytes(b) => crate::encoding::hex_encode(b),
        Value::Composite(_) => "<composite>".to_string(),
    }
}
