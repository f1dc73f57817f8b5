//! Message Type Indicator helpers (spec GLOSSARY "MTI").

/// The well-known MTIs this pipeline routes on (spec §6).
pub const FINANCIAL_REQUEST: &str = "0200";
pub const FINANCIAL_RESPONSE: &str = "0210";
pub const REVERSAL_REQUEST: &str = "0400";
pub const REVERSAL_RESPONSE: &str = "0410";
pub const NETWORK_MGMT_REQUEST: &str = "0800";
pub const NETWORK_MGMT_RESPONSE: &str = "0810";

/// Returns the response MTI paired with a given request MTI, if known.
pub fn response_for(request_mti: &str) -> Option<&'static str> {
    match request_mti {
        FINANCIAL_REQUEST => Some(FINANCIAL_RESPONSE),
        REVERSAL_REQUEST => Some(REVERSAL_RESPONSE),
        NETWORK_MGMT_REQUEST => Some(NETWORK_MGMT_RESPONSE),
        _ => None,
    }
}

pub fn is_response(mti: &str) -> bool {
    matches!(mti, FINANCIAL_RESPONSE | REVERSAL_RESPONSE | NETWORK_MGMT_RESPONSE)
}

pub fn is_network_management(mti: &str) -> bool {
    matches!(mti, NETWORK_MGMT_REQUEST | NETWORK_MGMT_RESPONSE)
}

/// Network management information code values (field 70) distinguishing
/// sign-on, sign-off and echo within the 0800/0810 class (spec §4.4).
pub mod network_management_code {
    pub const SIGN_ON: &str = "001";
    pub const SIGN_OFF: &str = "002";
    pub const ECHO: &str = "301";
}
