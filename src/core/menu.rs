/// Choice-menu rewriting: adds the "Feeling chatty" option ahead of the
/// game's own labels.
use once_cell::sync::Lazy;
use regex::Regex;

/// Label of the injected option.
pub const CHATTY_LABEL: &str = "Feeling chatty";

static CHOICE_ONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(<Open Choice Menu>)([\s\S]*?)(<Choice 1 Jump \[[0-9A-F]{4}\]>)")
        .expect("choice menu pattern")
});

/// Insert [`CHATTY_LABEL`] as the first visible option of the menu in `text`.
///
/// Only display labels move; every jump tag is kept byte-for-byte, so the
/// existing options keep their original jump targets. Returns `None` when
/// `text` has no recognizable menu or already carries the label.
pub fn inject_chatty_option(text: &str) -> Option<String> {
    let caps = CHOICE_ONE.captures(text)?;
    let labels = caps.get(2)?;
    if labels.as_str().contains(CHATTY_LABEL) {
        return None;
    }

    let body = labels.as_str();
    let leading = body.len() - body.trim_start().len();
    let insert_at = labels.start() + leading;

    let mut out = String::with_capacity(text.len() + CHATTY_LABEL.len() + 1);
    out.push_str(&text[..insert_at]);
    out.push_str(CHATTY_LABEL);
    if !body.trim().is_empty() {
        out.push('\n');
    }
    out.push_str(&text[insert_at..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec;

    #[test]
    fn inserts_before_first_label() {
        let sample = "<Open Choice Menu> First option <Clear Text><Choice 1 Jump [1234]><Choice 2 Jump [5678]>";
        let result = inject_chatty_option(sample).unwrap();
        assert!(result.starts_with("<Open Choice Menu> Feeling chatty\nFirst option"));
        assert!(result.contains("<Choice 1 Jump [1234]>"));
        assert!(result.contains("<Choice 2 Jump [5678]>"));
    }

    #[test]
    fn label_appears_once() {
        let sample = "<Open Choice Menu>Yes\nNo<Choice 1 Jump [0001]><Choice 2 Jump [0002]>";
        let result = inject_chatty_option(sample).unwrap();
        assert_eq!(result.matches(CHATTY_LABEL).count(), 1);
        assert_eq!(inject_chatty_option(&result), None);
    }

    #[test]
    fn surrounding_text_untouched() {
        let sample = "Well?<Open Choice Menu>Yes<Choice 1 Jump [00AA]> tail";
        let result = inject_chatty_option(sample).unwrap();
        assert_eq!(
            result,
            "Well?<Open Choice Menu>Feeling chatty\nYes<Choice 1 Jump [00AA]> tail"
        );
    }

    #[test]
    fn empty_menu_gets_bare_label() {
        let sample = "<Open Choice Menu><Choice 1 Jump [0010]>";
        assert_eq!(
            inject_chatty_option(sample).unwrap(),
            "<Open Choice Menu>Feeling chatty<Choice 1 Jump [0010]>"
        );
    }

    #[test]
    fn no_menu_no_change() {
        assert_eq!(inject_chatty_option("Just talking."), None);
        assert_eq!(inject_chatty_option("<Open Choice Menu>Yes\nNo"), None);
    }

    #[test]
    fn injected_menu_survives_the_codec() {
        let sample = "<Open Choice Menu> Option A<Choice 1 Jump [1234]><Choice 2 Jump [5678]>";
        let modified = inject_chatty_option(sample).unwrap();
        let round_tripped = codec::canonical(&modified).to_string();
        assert!(round_tripped.contains(CHATTY_LABEL));
        assert!(round_tripped.contains("<Choice 1 Jump [1234]>"));
        assert!(round_tripped.contains("<Choice 2 Jump [5678]>"));
    }
}
