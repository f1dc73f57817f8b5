//! Field and message schema descriptors.
//!
//! A [`FieldDescriptor`] is the declarative unit the codec works from: it
//! never hard-codes a field number or encoding, it only walks whatever
//! schema it is given (spec §9 "schema plurality").

/// Broad data class of a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataClass {
    Numeric,
    Alphanum,
    Binary,
    Composite,
    Bitmap,
}

/// How a field's body length is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthKind {
    Fixed,
    Llvar,
    Lllvar,
    Llllvar,
}

impl LengthKind {
    /// Number of digits/bytes in the length prefix, or `None` for fixed fields.
    pub fn prefix_digits(self) -> Option<usize> {
        match self {
            LengthKind::Fixed => None,
            LengthKind::Llvar => Some(2),
            LengthKind::Lllvar => Some(3),
            LengthKind::Llllvar => Some(4),
        }
    }
}

/// Byte-level encoding used for a field body or a length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Bcd,
    Ebcdic,
    Hex,
    Binary,
    PackedDecimal,
}

/// Padding side for fixed-width fields whose value is shorter than the
/// declared maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub ch: char,
    pub side: PadSide,
}

impl Padding {
    pub const fn none() -> Self {
        Padding { ch: ' ', side: PadSide::Left }
    }
}

/// A field descriptor: the unit of declarative schema the codec walks.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Stable identifier — usually the ISO 8583 field number as a string
    /// ("2", "3", ...) but schemas are free to use any stable string.
    pub id: String,
    pub name: String,
    pub class: DataClass,
    pub length_kind: LengthKind,
    pub max_len: usize,
    pub body_encoding: Encoding,
    pub length_encoding: Encoding,
    pub padding: Padding,
    pub required: bool,
    /// Masked in any diagnostic rendering (spec §4.1 "Security").
    pub sensitive: bool,
    pub default: Option<String>,
    /// Present only for `DataClass::Composite`: the ordered child fields.
    pub children: Vec<FieldDescriptor>,
    /// Present only for `DataClass::Bitmap`: ids of the fields this bitmap
    /// controls, in the order bits are assigned.
    pub controls: Vec<String>,
}

impl FieldDescriptor {
    /// Build a plain fixed-width field with sane defaults; use the setter
    /// methods below to adjust encoding/padding/flags.
    pub fn fixed(id: impl Into<String>, name: impl Into<String>, class: DataClass, len: usize) -> Self {
        FieldDescriptor {
            id: id.into(),
            name: name.into(),
            class,
            length_kind: LengthKind::Fixed,
            max_len: len,
            body_encoding: Encoding::Ascii,
            length_encoding: Encoding::Ascii,
            padding: Padding::none(),
            required: false,
            sensitive: false,
            default: None,
            children: Vec::new(),
            controls: Vec::new(),
        }
    }

    pub fn variable(
        id: impl Into<String>,
        name: impl Into<String>,
        class: DataClass,
        length_kind: LengthKind,
        max_len: usize,
    ) -> Self {
        let mut f = Self::fixed(id, name, class, max_len);
        f.length_kind = length_kind;
        f
    }

    pub fn bitmap(id: impl Into<String>, name: impl Into<String>, controls: Vec<String>) -> Self {
        let mut f = Self::fixed(id, name, DataClass::Bitmap, 8);
        f.controls = controls;
        f
    }

    pub fn composite(id: impl Into<String>, name: impl Into<String>, children: Vec<FieldDescriptor>) -> Self {
        let mut f = Self::fixed(id, name, DataClass::Composite, 0);
        f.children = children;
        f
    }

    pub fn with_encoding(mut self, body: Encoding, length: Encoding) -> Self {
        self.body_encoding = body;
        self.length_encoding = length;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn is_variable(&self) -> bool {
        self.length_kind != LengthKind::Fixed
    }
}

/// Length-prefix configuration for an optional frame header.
#[derive(Debug, Clone)]
pub struct HeaderDescriptor {
    pub prefix_encoding: Encoding,
    pub prefix_width: usize,
    /// Whether the length prefix counts the header's own bytes.
    pub prefix_includes_header: bool,
    pub fields: Vec<FieldDescriptor>,
}
