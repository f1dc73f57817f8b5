use crate::field::{FieldDescriptor, HeaderDescriptor};

/// A named, versioned message schema: an ordered sequence of field
/// descriptors plus an optional header descriptor (spec §3 "Message schema").
#[derive(Debug, Clone)]
pub struct MessageSchema {
    pub name: String,
    pub version: u32,
    pub header: Option<HeaderDescriptor>,
    /// Fields in wire order, including the MTI and bitmap fields.
    pub fields: Vec<FieldDescriptor>,
    /// Maximum whole-frame length (spec §4.1 "Edge policies"); frames
    /// exceeding this fail fast during decode.
    pub max_frame_len: usize,
}

impl MessageSchema {
    pub fn new(name: impl Into<String>, version: u32, fields: Vec<FieldDescriptor>) -> Self {
        MessageSchema {
            name: name.into(),
            version,
            header: None,
            fields,
            max_frame_len: 65_535,
        }
    }

    pub fn with_header(mut self, header: HeaderDescriptor) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    pub fn field(&self, id: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }
}
