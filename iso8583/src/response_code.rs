//! Standard ISO 8583 response codes used by the pipeline (spec §6).

pub const APPROVED: &str = "00";
pub const INVALID_MERCHANT: &str = "03";
pub const DO_NOT_HONOUR: &str = "05";
pub const INVALID_TRANSACTION: &str = "12";
pub const INVALID_AMOUNT: &str = "13";
pub const INVALID_CARD: &str = "14";
pub const FORMAT_ERROR: &str = "30";
pub const INSUFFICIENT_FUNDS: &str = "51";
pub const EXPIRED_CARD: &str = "54";
pub const INCORRECT_PIN: &str = "55";
pub const TRANSACTION_NOT_PERMITTED: &str = "57";
pub const TERMINAL_NOT_PERMITTED: &str = "58";
pub const EXCEEDS_WITHDRAWAL_LIMIT: &str = "61";
pub const EXCEEDS_FREQUENCY_LIMIT: &str = "65";
pub const RESPONSE_TOO_LATE: &str = "68";
pub const ISSUER_INOPERATIVE: &str = "91";
pub const DUPLICATE_TRANSACTION: &str = "94";
pub const SYSTEM_MALFUNCTION: &str = "96";
pub const TIMEOUT: &str = "98";

pub fn is_approved(code: &str) -> bool {
    code == APPROVED
}
