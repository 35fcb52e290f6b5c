//! Event fingerprinting: a stable identity key derived from a signal's
//! title and subject, used to recognize that two differently-sourced
//! signals describe the same underlying event.
//!
//! The function is total and pure: an empty or punctuation-only title
//! normalizes to the empty string, which is still a valid (if weak) key.

use once_cell::sync::OnceCell;
use regex::Regex;

/// Placeholder subject for signals not attached to a prospect/client.
pub const UNASSIGNED_SUBJECT: &str = "unassigned";

/// Separator between the normalized title and the subject id. Normalization
/// strips colons from the title, so the separator cannot collide.
const SEPARATOR: &str = "::";

/// Lowercase the title, collapse runs of non-alphanumerics to single
/// spaces, trim, then join with the subject id (or the unassigned
/// placeholder).
///
/// Signals with equal fingerprints are treated as the same event
/// regardless of source or description differences.
pub fn fingerprint(title: &str, subject_id: Option<&str>) -> String {
    static RE_NON_ALNUM: OnceCell<Regex> = OnceCell::new();
    let re = RE_NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").unwrap());

    let lowered = title.to_lowercase();
    let normalized = re.replace_all(&lowered, " ");
    let normalized = normalized.trim();

    format!(
        "{}{}{}",
        normalized,
        SEPARATOR,
        subject_id.unwrap_or(UNASSIGNED_SUBJECT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_and_punctuation_insensitive() {
        let a = fingerprint("Acme Corp IPO filing", Some("P1"));
        let b = fingerprint("Acme Corp IPO Filing!!", Some("P1"));
        let c = fingerprint("  ACME   corp -- IPO,filing  ", Some("P1"));
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, "acme corp ipo filing::P1");
    }

    #[test]
    fn subject_distinguishes_same_title() {
        let a = fingerprint("Board seat change", Some("P1"));
        let b = fingerprint("Board seat change", Some("P2"));
        assert_ne!(a, b);
    }

    #[test]
    fn missing_subject_uses_placeholder() {
        assert_eq!(
            fingerprint("Estate sale closed", None),
            "estate sale closed::unassigned"
        );
    }

    #[test]
    fn empty_title_is_still_a_key() {
        assert_eq!(fingerprint("", None), "::unassigned");
        assert_eq!(fingerprint("???", None), "::unassigned");
    }
}
