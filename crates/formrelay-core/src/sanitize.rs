//! Text and email sanitizers applied to submitted form values and settings.
//!
//! Both follow the cleanup rules of the form host: markup is stripped,
//! whitespace collapsed, and addresses reduced to their valid characters.
//! They clean formats, they do not validate deliverability.

use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*?>.*?</(script|style)>").expect("valid regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>]*>").expect("valid regex"));
static LINE_BREAKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\r\n\t ]+").expect("valid regex"));
static OCTET: Lazy<Regex> = Lazy::new(|| Regex::new(r"%[a-fA-F0-9]{2}").expect("valid regex"));
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" +").expect("valid regex"));
static REPEATED_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").expect("valid regex"));

const MIN_EMAIL_LEN: usize = 6;

/// Cleans a single-line text value.
///
/// Removes script/style blocks and tags, escapes a stray `<`, folds line
/// breaks, tabs and runs of spaces into one space, drops percent-encoded
/// octets and trims the result.
///
/// ```
/// use formrelay_core::sanitize::sanitize_text_field;
///
/// assert_eq!(sanitize_text_field("  Jane\n<b>Doe</b> "), "Jane Doe");
/// assert_eq!(sanitize_text_field("a < b"), "a &lt; b");
/// ```
pub fn sanitize_text_field(input: &str) -> String {
    let mut filtered = input.to_string();

    if filtered.contains('<') {
        filtered = SCRIPT_OR_STYLE.replace_all(&filtered, "").into_owned();
        filtered = TAG.replace_all(&filtered, "").into_owned();
        filtered = filtered.replace('<', "&lt;");
    }

    filtered = LINE_BREAKS.replace_all(&filtered, " ").into_owned();

    let mut stripped_octets = false;
    while OCTET.is_match(&filtered) {
        filtered = OCTET.replace_all(&filtered, "").into_owned();
        stripped_octets = true;
    }
    if stripped_octets {
        filtered = SPACES.replace_all(&filtered, " ").into_owned();
    }

    filtered.trim().to_string()
}

/// Reduces an email address to its allowed characters.
///
/// Returns an empty string when nothing address-shaped survives: fewer than
/// six characters, no `@` after the first character, an empty local part, or
/// a domain with fewer than two labels.
///
/// ```
/// use formrelay_core::sanitize::sanitize_email;
///
/// assert_eq!(sanitize_email(" jane(doe)@Example.com "), "janedoe@Example.com");
/// assert_eq!(sanitize_email("nobody"), "");
/// ```
pub fn sanitize_email(input: &str) -> String {
    let email = input.trim();

    if email.chars().count() < MIN_EMAIL_LEN {
        return String::new();
    }

    // The separator search starts after the first character.
    let Some(at) = email
        .char_indices()
        .skip(1)
        .find_map(|(pos, c)| (c == '@').then_some(pos))
    else {
        return String::new();
    };
    let (local, domain) = (&email[..at], &email[at + 1..]);

    let local: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || "!#$%&'*+/=?^_`{|}~.-".contains(*c))
        .collect();
    if local.is_empty() {
        return String::new();
    }

    let domain = REPEATED_DOTS.replace_all(domain, "");
    let domain = domain.trim_matches(|c: char| c.is_whitespace() || c == '\0' || c == '.');
    if domain.is_empty() {
        return String::new();
    }

    let labels: Vec<String> = domain
        .split('.')
        .map(|label| {
            label
                .trim_matches(|c: char| c.is_whitespace() || c == '\0' || c == '-')
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect::<String>()
        })
        .filter(|label| !label.is_empty())
        .collect();

    if labels.len() < 2 {
        return String::new();
    }

    format!("{}@{}", local, labels.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_passthrough() {
        assert_eq!(sanitize_text_field("Jane Doe"), "Jane Doe");
        assert_eq!(sanitize_text_field("1990-04-12"), "1990-04-12");
        assert_eq!(sanitize_text_field(""), "");
    }

    #[test]
    fn test_text_strips_markup() {
        assert_eq!(
            sanitize_text_field("<script>alert(1)</script>Passport"),
            "Passport"
        );
        assert_eq!(sanitize_text_field("<em>ID</em> card"), "ID card");
    }

    #[test]
    fn test_text_folds_whitespace() {
        assert_eq!(sanitize_text_field("\tJane \r\n  Doe  "), "Jane Doe");
    }

    #[test]
    fn test_text_drops_octets() {
        assert_eq!(sanitize_text_field("Jane%20Doe"), "JaneDoe");
        assert_eq!(sanitize_text_field("a %20%41 b"), "a b");
    }

    #[test]
    fn test_email_keeps_valid_address() {
        assert_eq!(sanitize_email("jane.doe@example.com"), "jane.doe@example.com");
        assert_eq!(
            sanitize_email("first+tag@mail.example.org"),
            "first+tag@mail.example.org"
        );
    }

    #[test]
    fn test_email_strips_invalid_characters() {
        assert_eq!(sanitize_email("ja ne@exa_mple.com"), "jane@example.com");
        assert_eq!(sanitize_email("jane@-example-.com"), "jane@example.com");
    }

    #[test]
    fn test_email_separator_after_first_character() {
        assert_eq!(sanitize_email("@a@example.com"), "a@example.com");
        assert_eq!(sanitize_email("@@example.com"), "");
    }

    #[test]
    fn test_email_rejects_unusable_input() {
        assert_eq!(sanitize_email("a@b.c"), "");
        assert_eq!(sanitize_email("@example.com"), "");
        assert_eq!(sanitize_email("jane.example.com"), "");
        assert_eq!(sanitize_email("jane@localhost"), "");
        assert_eq!(sanitize_email("()<>@example.com"), "");
    }
}
