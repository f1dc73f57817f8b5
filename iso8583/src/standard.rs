//! A concrete ISO 8583:1987-style schema covering the fields of
//! "operational significance" listed in spec §6. Any acquirer/switch
//! profile can supply its own [`MessageSchema`] instead — nothing in the
//! codec or channel layer hard-codes this one (spec §9 "schema
//! plurality") — but this is the schema the pipeline's tests and the
//! server terminator use by default.

use crate::field::{DataClass, Encoding, FieldDescriptor, HeaderDescriptor, LengthKind, PadSide, Padding};
use crate::schema::MessageSchema;

/// Field ids, named after their ISO 8583 field numbers, exactly as spec §6
/// lists them.
pub mod fields {
    pub const MTI: &str = "mti";
    pub const PAN: &str = "2";
    pub const PROCESSING_CODE: &str = "3";
    pub const AMOUNT: &str = "4";
    pub const TRANSMISSION_DATE_TIME: &str = "7";
    pub const STAN: &str = "11";
    pub const LOCAL_TIME: &str = "12";
    pub const LOCAL_DATE: &str = "13";
    pub const ACQUIRING_INSTITUTION: &str = "32";
    pub const RRN: &str = "37";
    pub const AUTH_CODE: &str = "38";
    pub const RESPONSE_CODE: &str = "39";
    pub const TERMINAL_ID: &str = "41";
    pub const MERCHANT_ID: &str = "42";
    pub const CURRENCY_CODE: &str = "49";
    pub const PIN_BLOCK: &str = "52";
    pub const ADDITIONAL_AMOUNTS: &str = "54";
    pub const MAC: &str = "64";
    pub const NETWORK_MANAGEMENT_CODE: &str = "70";
    pub const ORIGINAL_DATA_ELEMENTS: &str = "90";
    pub const SOURCE_ACCOUNT: &str = "102";
    pub const DEST_ACCOUNT: &str = "103";
}

/// Build the default schema: MTI + primary/secondary bitmap + the fields
/// named in spec §6, using a 2-byte BCD length prefix over MTI-through-end
/// (header, not counted) as the wire framing.
pub fn default_schema() -> MessageSchema {
    use fields::*;

    let controls: Vec<String> = [
        PAN,
        PROCESSING_CODE,
        AMOUNT,
        TRANSMISSION_DATE_TIME,
        STAN,
        LOCAL_TIME,
        LOCAL_DATE,
        ACQUIRING_INSTITUTION,
        RRN,
        AUTH_CODE,
        RESPONSE_CODE,
        TERMINAL_ID,
        MERCHANT_ID,
        CURRENCY_CODE,
        PIN_BLOCK,
        ADDITIONAL_AMOUNTS,
        MAC,
        NETWORK_MANAGEMENT_CODE,
        ORIGINAL_DATA_ELEMENTS,
        SOURCE_ACCOUNT,
        DEST_ACCOUNT,
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let data_fields = vec![
        FieldDescriptor::variable(PAN, "PAN", DataClass::Numeric, LengthKind::Llvar, 19).sensitive(),
        FieldDescriptor::fixed(PROCESSING_CODE, "Processing code", DataClass::Numeric, 6),
        FieldDescriptor::fixed(AMOUNT, "Amount, transaction", DataClass::Numeric, 12),
        FieldDescriptor::fixed(TRANSMISSION_DATE_TIME, "Transmission date & time", DataClass::Numeric, 10),
        FieldDescriptor::fixed(STAN, "System trace audit number", DataClass::Numeric, 6),
        FieldDescriptor::fixed(LOCAL_TIME, "Local transaction time", DataClass::Numeric, 6),
        FieldDescriptor::fixed(LOCAL_DATE, "Local transaction date", DataClass::Numeric, 4),
        FieldDescriptor::fixed(ACQUIRING_INSTITUTION, "Acquiring institution id", DataClass::Numeric, 11),
        FieldDescriptor::fixed(RRN, "Retrieval reference number", DataClass::Alphanum, 12),
        FieldDescriptor::fixed(AUTH_CODE, "Authorisation code", DataClass::Alphanum, 6),
        FieldDescriptor::fixed(RESPONSE_CODE, "Response code", DataClass::Numeric, 2),
        FieldDescriptor::fixed(TERMINAL_ID, "Terminal id", DataClass::Alphanum, 8)
            .with_padding(Padding { ch: ' ', side: PadSide::Right }),
        FieldDescriptor::fixed(MERCHANT_ID, "Merchant id", DataClass::Alphanum, 15)
            .with_padding(Padding { ch: ' ', side: PadSide::Right }),
        FieldDescriptor::fixed(CURRENCY_CODE, "Currency code", DataClass::Numeric, 3),
        FieldDescriptor::fixed(PIN_BLOCK, "PIN block", DataClass::Binary, 8)
            .with_encoding(Encoding::Binary, Encoding::Ascii)
            .sensitive(),
        FieldDescriptor::variable(ADDITIONAL_AMOUNTS, "Additional amounts", DataClass::Numeric, LengthKind::Lllvar, 120),
        FieldDescriptor::fixed(MAC, "Message authentication code", DataClass::Binary, 8)
            .with_encoding(Encoding::Binary, Encoding::Ascii),
        FieldDescriptor::fixed(NETWORK_MANAGEMENT_CODE, "Network management information code", DataClass::Numeric, 3),
        FieldDescriptor::variable(ORIGINAL_DATA_ELEMENTS, "Original data elements", DataClass::Alphanum, LengthKind::Llvar, 42),
        FieldDescriptor::variable(SOURCE_ACCOUNT, "Source account", DataClass::Numeric, LengthKind::Llvar, 28),
        FieldDescriptor::variable(DEST_ACCOUNT, "Destination account", DataClass::Numeric, LengthKind::Llvar, 28),
    ];

    let mut top_fields = vec![
        FieldDescriptor::fixed(MTI, "Message type indicator", DataClass::Numeric, 4).required(),
        FieldDescriptor::bitmap("bitmap", "Bitmap", controls),
    ];
    top_fields.extend(data_fields);

    MessageSchema::new("iso8583-default", 1, top_fields)
        .with_header(HeaderDescriptor {
            prefix_encoding: Encoding::Bcd,
            prefix_width: 2,
            prefix_includes_header: false,
            fields: Vec::new(),
        })
        .with_max_frame_len(65_535)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};
    use crate::instance::MessageInstance;
    use crate::mti;

    /// Scenario E1 from spec §8: a successful withdrawal request.
    #[test]
    fn e1_withdrawal_request_round_trips() {
        let schema = default_schema();
        let mut req = MessageInstance::new();
        req.set(fields::MTI, mti::FINANCIAL_REQUEST);
        req.set(fields::PAN, "4111111111111111");
        req.set(fields::PROCESSING_CODE, "011000");
        req.set(fields::AMOUNT, "000000010000");
        req.set(fields::STAN, "000001");
        req.set(fields::RRN, "123456789012");
        req.set(fields::TERMINAL_ID, "ATM00001");
        req.set(fields::CURRENCY_CODE, "901");

        let bytes = encode(&req, &schema).unwrap();
        let decoded = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded.get_str(fields::PAN), Some("4111111111111111"));
        assert_eq!(decoded.get_str(fields::AMOUNT), Some("000000010000"));
        assert_eq!(decoded.get_str(fields::TERMINAL_ID), Some("ATM00001"));
    }
}
