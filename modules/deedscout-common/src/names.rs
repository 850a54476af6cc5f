//! Owner-name and phone-number normalization shared by routing gates and the aggregator.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::OwnerType;

static NON_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{M}\p{N}&\s]").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static LLC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bL\.?\s?L\.?\s?C\b\.?").unwrap());

/// Suffix spellings folded onto one canonical token.
const SUFFIX_CANON: &[(&str, &str)] = &[
    ("INCORPORATED", "INC"),
    ("CORPORATION", "CORP"),
    ("COMPANY", "CO"),
    ("LIMITED", "LTD"),
    ("ASSOCIATES", "ASSOC"),
];

const LLC_TOKENS: &[&str] = &["LLC", "LP", "LLP", "PLLC"];

const CORPORATE_TOKENS: &[&str] = &[
    "INC", "CORP", "CO", "LTD", "TRUST", "HOLDINGS", "ASSOC", "PARTNERS", "REALTY",
    "PROPERTIES", "MANAGEMENT", "BANK", "AUTHORITY", "FUND", "GROUP", "ENTERPRISES",
];

/// Uppercase, strip punctuation and collapse whitespace. Letters and digits of every
/// script are kept, so `"José García"` stays `"JOSÉ GARCÍA"`.
pub fn display_owner_name(name: &str) -> String {
    let upper = name.to_uppercase();
    let upper = LLC_RE.replace_all(&upper, "LLC");
    let stripped = NON_NAME_RE.replace_all(&upper, " ");
    SPACES_RE.replace_all(stripped.trim(), " ").into_owned()
}

/// Comparison key for owner names: the display form with entity suffixes canonicalized,
/// so that `"Acme Holdings, L.L.C."` and `"ACME HOLDINGS LLC"` compare equal.
pub fn normalize_owner_name(name: &str) -> String {
    display_owner_name(name)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(|token| {
            SUFFIX_CANON
                .iter()
                .find(|(long, _)| *long == token)
                .map(|(_, short)| *short)
                .unwrap_or(token)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Infer the owner type from entity markers in the name.
pub fn infer_owner_type(name: &str) -> OwnerType {
    let normalized = normalize_owner_name(name);
    if normalized.is_empty() || normalized == "UNKNOWN" {
        return OwnerType::Unknown;
    }
    let tokens: Vec<&str> = normalized.split(' ').collect();
    if tokens.iter().any(|t| LLC_TOKENS.contains(t)) {
        return OwnerType::Llc;
    }
    if tokens.iter().any(|t| CORPORATE_TOKENS.contains(t)) {
        return OwnerType::Corporation;
    }
    OwnerType::Individual
}

/// Reduce a phone number to its ten US digits. Returns `None` for anything that is not
/// a plausible ten-digit number after dropping a leading country code.
pub fn clean_phone(raw: &str) -> Option<String> {
    // Only ASCII digits count; other scripts' digits are dropped with the punctuation.
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let digits = match digits.len() {
        11 if digits.starts_with('1') => digits[1..].to_string(),
        10 => digits,
        _ => return None,
    };
    // Area codes and exchanges never start with 0 or 1.
    if digits.starts_with(['0', '1']) || digits[3..].starts_with(['0', '1']) {
        return None;
    }
    Some(digits)
}

/// Format ten cleaned digits as `(XXX) XXX-XXXX`.
pub fn format_phone(digits: &str) -> String {
    if digits.len() != 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return digits.to_string();
    }
    format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_punctuation_and_suffixes() {
        assert_eq!(normalize_owner_name("Acme Holdings, L.L.C."), "ACME HOLDINGS LLC");
        assert_eq!(normalize_owner_name("  acme   holdings llc "), "ACME HOLDINGS LLC");
        assert_eq!(normalize_owner_name("Widget Corporation"), "WIDGET CORP");
        assert_eq!(normalize_owner_name("Smith & Sons, Incorporated"), "SMITH & SONS INC");
    }

    #[test]
    fn empty_name_normalizes_to_empty() {
        assert_eq!(normalize_owner_name(" ,. "), "");
    }

    #[test]
    fn infers_entity_types() {
        assert_eq!(infer_owner_type("798 Lexington Ave L.L.C."), OwnerType::Llc);
        assert_eq!(infer_owner_type("Lexington Realty Corp"), OwnerType::Corporation);
        assert_eq!(infer_owner_type("Jane Q. Public"), OwnerType::Individual);
        assert_eq!(infer_owner_type(""), OwnerType::Unknown);
        assert_eq!(infer_owner_type("Unknown"), OwnerType::Unknown);
    }

    #[test]
    fn llc_detection_does_not_fire_inside_words() {
        assert_eq!(infer_owner_type("Gallcher Smith"), OwnerType::Individual);
    }

    #[test]
    fn cleans_phone_numbers() {
        assert_eq!(clean_phone("(212) 555-0147").as_deref(), Some("2125550147"));
        assert_eq!(clean_phone("+1 212.555.0147").as_deref(), Some("2125550147"));
        assert_eq!(clean_phone("555-0147"), None);
        assert_eq!(clean_phone("(012) 555-0147"), None);
        assert_eq!(clean_phone("not a phone"), None);
    }

    #[test]
    fn non_ascii_digits_never_count_toward_a_phone() {
        assert_eq!(clean_phone("21٣555014"), None);
        assert_eq!(clean_phone("٢١٢٥٥٥٠١٤٧"), None);
        assert_eq!(clean_phone("２１２-５５５-０１４７"), None);
        assert_eq!(clean_phone("212٣555-0147").as_deref(), Some("2125550147"));
    }

    #[test]
    fn formats_ten_digits() {
        assert_eq!(format_phone("2125550147"), "(212) 555-0147");
        assert_eq!(format_phone("12345"), "12345");
        assert_eq!(format_phone("21٣5550"), "21٣5550");
    }

    #[test]
    fn keeps_letters_from_every_script() {
        assert_eq!(normalize_owner_name("José García"), "JOSÉ GARCÍA");
        assert_eq!(normalize_owner_name("Zoë Müller, L.L.C."), "ZOË MÜLLER LLC");
        assert_eq!(normalize_owner_name("王伟"), "王伟");
        assert_eq!(normalize_owner_name("王 伟。"), "王 伟");
        assert_eq!(infer_owner_type("王伟"), OwnerType::Individual);
        assert_eq!(infer_owner_type("Zoë Müller LLC"), OwnerType::Llc);
    }

    #[test]
    fn display_form_keeps_suffix_spelling() {
        assert_eq!(display_owner_name("Widget Corporation."), "WIDGET CORPORATION");
        assert_eq!(normalize_owner_name("Widget Corporation."), "WIDGET CORP");
    }
}
