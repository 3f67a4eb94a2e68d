//! Normalization of subscriber phone numbers into dispatchable contacts.

/// Country calling code prepended to national numbers.
pub const COUNTRY_PREFIX: &str = "55";

/// Shortest national number (area code + subscriber number) accepted.
const MIN_DIGITS: usize = 10;

/// Shortest number that already carries the country prefix.
const MIN_PREFIXED_DIGITS: usize = 12;

/// Turn a raw phone number into a dispatchable contact.
///
/// All non-digit characters are dropped. Fewer than 10 remaining digits
/// yields `None`. A number that already starts with the country prefix and
/// has at least 12 digits is returned as-is; anything else gets the prefix.
pub fn normalize(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    if digits.len() < MIN_DIGITS {
        return None;
    }

    if digits.starts_with(COUNTRY_PREFIX) && digits.len() >= MIN_PREFIXED_DIGITS {
        Some(digits)
    } else {
        Some(format!("{COUNTRY_PREFIX}{digits}"))
    }
}

/// Mask a phone number for logging, keeping only the last four digits.
pub fn mask(phone: &str) -> String {
    let visible = phone.len().saturating_sub(4);
    format!("{}{}", "*".repeat(visible), &phone[visible..])
}
