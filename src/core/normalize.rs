/// Canonicalization applied before encoding: tag spelling, typography, and
/// the drawable charset.
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::schema::control;
use crate::schema::glyph::GlyphTable;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));
static CLOSING_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</[^>]+>").expect("closing tag pattern"));
static INNER_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("space pattern"));
static BRACKET_PADDING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*([^\]]*?)\s*\]").expect("bracket pattern"));

/// Alternate phrasings of the same tag, rewritten to the template spelling.
/// Argument values are canonicalized afterwards by the table itself.
static ALIASES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (
            r"^<NPC Expression \[?(?:Cat:)?([0-9A-Fa-f]{1,2})\]? \[?([^\]>]+?)\]?>$",
            "<NPC Expression [Cat:$1] [$2]>",
        ),
        (
            r"^<Player Emotion \[?([0-9A-Fa-f]{1,2})\]? \[?([^\]>]+?)\]?>$",
            "<Player Emotion [$1] [$2]>",
        ),
        (
            r"^<Color \[?([0-9A-Fa-f]{6})\]? for \[?([0-9A-Fa-f]{1,2})\]?(?: chars?)?>$",
            "<Color [$1] for [$2] chars>",
        ),
        (r"^<Color Line \[?([0-9A-Fa-f]{6})\]?>$", "<Color Line [$1]>"),
        (r"^<Color \[?([0-9A-Fa-f]{6})\]?>$", "<Color Line [$1]>"),
        (
            r"^<(Pause|Line Type|Play Sound Effect|Char Size|Line Size|Set Jump|Choice [1-4] Jump) ([^\[\]>]+)>$",
            "<$1 [$2]>",
        ),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("alias pattern"), replacement))
    .collect()
});

const TYPOGRAPHY: &[(char, &str)] = &[
    ('\u{2019}', "'"),
    ('\u{2018}', "'"),
    ('\u{201C}', "\""),
    ('\u{201D}', "\""),
    ('\u{2014}', "-"),
    ('\u{2013}', "-"),
    ('\u{2026}', "..."),
    ('\u{00A0}', " "),
];

/// Full pre-encode pass: tags, then typography, then charset.
pub fn canonicalize(text: &str) -> String {
    sanitize_charset(&normalize_visible(&normalize_tags(text)))
}

/// Rewrite every tag into its canonical spelling where one exists.
///
/// Closing tags are removed, inner whitespace is collapsed, known aliases
/// are unified and arguments of recognized tags are re-rendered upper-case
/// and zero-padded. Unrecognized tags are left for the encoder to drop.
pub fn normalize_tags(text: &str) -> String {
    let text = CLOSING_TAG.replace_all(text, "");
    TAG.replace_all(&text, |caps: &Captures<'_>| canonical_tag(&caps[0]))
        .into_owned()
}

/// Canonical spelling of a single `<...>` tag.
pub fn canonical_tag(tag: &str) -> String {
    let inner = tag.trim_start_matches('<').trim_end_matches('>');
    let collapsed = INNER_SPACE.replace_all(inner.trim(), " ");
    let unpadded = BRACKET_PADDING.replace_all(&collapsed, "[$1]");
    let mut tag = format!("<{unpadded}>");
    for (pattern, replacement) in ALIASES.iter() {
        if pattern.is_match(&tag) {
            tag = pattern.replace(&tag, *replacement).into_owned();
            break;
        }
    }
    match control::lookup_tag(&tag) {
        Some((code, values)) => code.render(&values),
        None => tag,
    }
}

/// Replace typography the font lacks with plain equivalents.
pub fn normalize_visible(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match TYPOGRAPHY.iter().find(|(from, _)| *from == ch) {
            Some((_, to)) => out.push_str(to),
            None => out.push(ch),
        }
    }
    out
}

/// Drop anything the game cannot draw. Glyph literals, newlines and plain
/// ASCII survive; emoji and other symbols outside the table do not.
pub fn sanitize_charset(text: &str) -> String {
    let glyphs = GlyphTable::get();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(ch) = rest.chars().next() {
        if let Some((_, used)) = glyphs.match_prefix(rest) {
            out.push_str(&rest[..used]);
            rest = &rest[used..];
            continue;
        }
        if ch == '\n' || (' '..='~').contains(&ch) {
            out.push(ch);
        }
        rest = &rest[ch.len_utf8()..];
    }
    out
}
