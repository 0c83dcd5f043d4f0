//! Display formatting for contact numbers and session expiry.

use chrono::{DateTime, Utc};

/// Mask a phone number for list views and pre-disclosure display.
///
/// Kenyan numbers (`2547XXXXXXXX` or `07XXXXXXXX`) render in local form as
/// `0712 XXX 678`; any other number of six or more digits renders as
/// `1234****789`; anything shorter is returned unchanged.
pub fn format_masked_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    let local = if digits.len() == 12 && digits.starts_with("254") {
        Some(format!("0{}", &digits[3..]))
    } else if digits.len() == 10 && digits.starts_with('0') {
        Some(digits.clone())
    } else {
        None
    };

    if let Some(local) = local {
        return format!("{} XXX {}", &local[..4], &local[7..]);
    }

    if digits.len() >= 6 {
        return format!("{}****{}", &digits[..4], &digits[digits.len() - 3..]);
    }

    raw.to_string()
}

/// "Expires in 3h 12m", "Expires in 45m", or "Expired".
pub fn format_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = expires_at - now;
    if remaining <= chrono::Duration::zero() {
        return "Expired".to_string();
    }

    let hours = remaining.num_hours();
    let minutes = remaining.num_minutes() % 60;
    if hours > 0 {
        format!("Expires in {}h {}m", hours, minutes)
    } else {
        format!("Expires in {}m", minutes)
    }
}
