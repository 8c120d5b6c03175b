//! Structural checks for exact-match keys (phone, email)

use once_cell::sync::Lazy;
use regex::Regex;

static PHONE_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9]{6,15}$").expect("static regex"));
static EMAIL_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("static regex")
});

/// Canonical phone number: separators removed, optional leading `+`, 6-15 digits.
///
/// Structural only; no carrier or region validation.
pub fn canonical_phone(raw: &str) -> Result<String, &'static str> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if PHONE_SHAPE.is_match(&compact) {
        Ok(compact)
    } else if compact.trim_start_matches('+').chars().any(|c| !c.is_ascii_digit()) {
        Err("phone number may only contain digits and an optional leading '+'")
    } else {
        Err("phone number must have between 6 and 15 digits")
    }
}

/// Canonical email: trimmed, lowercased, basic `local@domain.tld` shape
pub fn canonical_email(raw: &str) -> Result<String, &'static str> {
    let email = raw.trim().to_lowercase();

    if EMAIL_SHAPE.is_match(&email) {
        Ok(email)
    } else if !email.contains('@') {
        Err("email is missing '@'")
    } else {
        Err("email does not look like local@domain.tld")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_patterns_compile() {
        Lazy::force(&PHONE_SHAPE);
        Lazy::force(&EMAIL_SHAPE);
    }

    #[test]
    fn accepts_local_and_international_numbers() {
        assert_eq!(canonical_phone("+84961234567").unwrap(), "+84961234567");
        assert_eq!(canonical_phone("0961234567").unwrap(), "0961234567");
        assert_eq!(canonical_phone("860000316623").unwrap(), "860000316623");
    }

    #[test]
    fn strips_common_separators() {
        assert_eq!(canonical_phone("111-222-3333").unwrap(), "1112223333");
        assert_eq!(canonical_phone("(090) 312.2290").unwrap(), "0903122290");
    }

    #[test]
    fn rejects_letters_and_misplaced_plus() {
        assert!(canonical_phone("09a1234567").is_err());
        assert!(canonical_phone("84+961234567").is_err());
        assert!(canonical_phone("12345").is_err());
        assert!(canonical_phone("").is_err());
    }

    #[test]
    fn email_is_lowercased() {
        assert_eq!(canonical_email(" Trieu@Example.COM ").unwrap(), "trieu@example.com");
    }

    #[test]
    fn rejects_malformed_emails() {
        assert!(canonical_email("not-an-email").is_err());
        assert!(canonical_email("a@b").is_err());
        assert!(canonical_email("a@@b.com").is_err());
        assert!(canonical_email("a b@c.com").is_err());
        assert!(canonical_email("@example.com").is_err());
    }
}
