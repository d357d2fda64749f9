// =============================================================================
// OCC Option Symbol Parser
// =============================================================================
//
// Decodes `O:{UNDERLYING}{YYMMDD}{C|P}{STRIKE×1000, 8 digits}` as delivered
// by the options firehose, e.g. `O:AAPL240621C00250000`.
//
// The `O:` prefix is optional. The underlying is the maximal leading run of
// ASCII letters; the remainder must partition positionally into exactly
// 6 date digits, one right character, and 8 strike digits. The strike is the
// 8-digit integer divided by 1000.
//
// This sits on the firehose hot path: the only allocation is the underlying
// `String` on success.
// =============================================================================

use chrono::NaiveDate;

use crate::types::OptionRight;

/// Decoded OCC option symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct OccSymbol {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub right: OptionRight,
    /// Strike price in dollars (8-digit field / 1000).
    pub strike: f64,
}

/// Why a symbol failed to parse. All variants collapse to `invalid_symbol`
/// at the ingest edge; the detail only shows up in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccError {
    /// No leading letters, or nothing after them.
    MissingUnderlying,
    /// Remainder is not exactly 6 + 1 + 8 characters.
    BadLength,
    /// A digit position held a non-digit.
    BadDigit,
    /// The YYMMDD field is not a real calendar date.
    BadDate,
    /// The right character is not `C` or `P`.
    BadRight,
}

impl std::fmt::Display for OccError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid_symbol")
    }
}

impl std::error::Error for OccError {}

/// Parse an OCC symbol, with or without the `O:` prefix.
pub fn parse(symbol: &str) -> Result<OccSymbol, OccError> {
    let body = symbol.strip_prefix("O:").unwrap_or(symbol);
    let bytes = body.as_bytes();

    let letters = bytes
        .iter()
        .take_while(|b| b.is_ascii_alphabetic())
        .count();
    if letters == 0 {
        return Err(OccError::MissingUnderlying);
    }

    let rest = &bytes[letters..];
    if rest.len() != 6 + 1 + 8 {
        return Err(OccError::BadLength);
    }

    let yy = digits(&rest[0..2])?;
    let mm = digits(&rest[2..4])?;
    let dd = digits(&rest[4..6])?;
    let expiry = NaiveDate::from_ymd_opt(2000 + yy as i32, mm as u32, dd as u32)
        .ok_or(OccError::BadDate)?;

    let right = match rest[6] {
        b'C' => OptionRight::Call,
        b'P' => OptionRight::Put,
        _ => return Err(OccError::BadRight),
    };

    let strike_milli = digits(&rest[7..15])?;
    let strike = strike_milli as f64 / 1000.0;

    Ok(OccSymbol {
        underlying: body[..letters].to_string(),
        expiry,
        right,
        strike,
    })
}

/// Encode the components back into an OCC symbol (without the `O:` prefix).
pub fn encode(underlying: &str, expiry: NaiveDate, right: OptionRight, strike: f64) -> String {
    use chrono::Datelike;
    format!(
        "{}{:02}{:02}{:02}{}{:08}",
        underlying,
        expiry.year() % 100,
        expiry.month(),
        expiry.day(),
        right.as_char(),
        (strike * 1000.0).round() as u64,
    )
}

/// Parse a run of ASCII digits into a u64, rejecting anything else.
fn digits(bytes: &[u8]) -> Result<u64, OccError> {
    let mut value: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return Err(OccError::BadDigit);
        }
        value = value * 10 + (b - b'0') as u64;
    }
    Ok(value)
}
