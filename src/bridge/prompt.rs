/// Prompt assembly and cleanup of model output before it reaches the codec.
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::core::codec::LINE_WIDTH;
use crate::schema::gossip::GossipContext;
use crate::schema::persona::VillagerProfile;

pub const BASE_STYLE: &str = "You are roleplaying as a villager from Animal Crossing (GameCube-era tone). \
Stay in-character, cozy, and brief (1-3 short lines). \
Do not mention being an AI. No real-world politics or news. \
Use gentle humor. Avoid breaking the fourth wall unless the player clearly asks.";

pub const DECORATION_RULES: &str = "Decorate minimally with in-engine tags WHEN useful:\n\
- Use <Pause [0A]> sparingly for timing.\n\
- Keep each line under ~30 visible chars; insert '\\n' where natural.\n\
- If multiple beats, end with '<Press A><Clear Text>'.\n";

pub const USER_PROMPT: &str = "Create 1-3 short lines of cozy dialogue, specific to this villager. \
If an image is attached, subtly infer the setting or activity. \
Finish with '<Press A><Clear Text>' if you used multiple beats.";

/// Tags the model may keep. Everything else in angle brackets is removed.
pub const SAFE_TAGS: &[&str] = &[
    "<Press A>",
    "<Clear Text>",
    "<Pause [0A]>",
    "<Pause [05]>",
    "<Pause [14]>",
];

/// Lines longer than this are soft-wrapped before encoding.
const SOFT_WRAP_THRESHOLD: usize = 90;

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z0-9_-]*\n?(.*?)\n?```$").expect("fence pattern"));
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]{1,40}>").expect("tag pattern"));

pub fn persona_blurb(profile: &VillagerProfile) -> String {
    let mut parts = vec![format!(
        "Villager persona: {} ({}, {}).",
        profile.name, profile.species, profile.personality
    )];
    if !profile.catchphrase.is_empty() {
        parts.push(format!(
            "Catchphrase: \"{}\" (use very sparingly).",
            profile.catchphrase
        ));
    }
    if !profile.style.is_empty() {
        parts.push(format!("Speaking style: {}.", profile.style));
    }
    if profile.modded {
        parts.push(
            "This villager may be modded/unknown; keep tone neutral but friendly.".to_string(),
        );
    }
    parts.join(" ")
}

pub fn gossip_snippet(gossip: Option<&GossipContext>) -> String {
    let Some(ctx) = gossip else {
        return String::new();
    };
    let mut bits = Vec::new();
    if !ctx.rumor_topic.is_empty() {
        bits.push(format!("- rumor: {}", ctx.rumor_topic));
    }
    if !ctx.targets.is_empty() {
        let named: Vec<&str> = ctx.targets.iter().take(4).map(String::as_str).collect();
        bits.push(format!("- villagers mentioned: {}", named.join(", ")));
    }
    if !ctx.opinion.is_empty() {
        bits.push(format!("- vibe: {}", ctx.opinion));
    }
    if bits.is_empty() {
        String::new()
    } else {
        format!("\nGossip context:\n{}\n", bits.join("\n"))
    }
}

pub fn system_prompt(profile: &VillagerProfile, gossip: Option<&GossipContext>) -> String {
    [
        BASE_STYLE.to_string(),
        DECORATION_RULES.to_string(),
        persona_blurb(profile),
        gossip_snippet(gossip),
        "Respond as the villager speaking to the player.".to_string(),
    ]
    .join("\n")
}

/// Turn raw model output into tagged text the codec can take.
pub fn postprocess(raw: &str) -> String {
    let text = raw.trim();
    if text.is_empty() {
        return "...<Press A><Clear Text>".to_string();
    }
    let text = match FENCE.captures(text) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).to_string(),
        None => text.to_string(),
    };
    let text = strip_forbidden_tags(&text);
    let mut text = trim_lines(&text);
    if text.trim().is_empty() {
        text = "...".to_string();
    }
    if (text.contains("<Press A>") || text.contains('\n')) && !text.contains("<Clear Text>") {
        text.push_str("<Clear Text>");
    }
    text
}

fn strip_forbidden_tags(text: &str) -> String {
    ANY_TAG
        .replace_all(text, |caps: &Captures<'_>| {
            let tag = &caps[0];
            if SAFE_TAGS.iter().any(|safe| tag.starts_with(&safe[..safe.len() - 1])) {
                tag.to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

/// Trim every line; soft-wrap very long ones at word boundaries.
fn trim_lines(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.chars().count() <= SOFT_WRAP_THRESHOLD {
            out.push(line.to_string());
            continue;
        }
        let mut buf = String::new();
        for word in line.split_whitespace() {
            let needed = buf.chars().count() + usize::from(!buf.is_empty()) + word.chars().count();
            if needed > LINE_WIDTH {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
                buf.push_str(word);
            } else {
                if !buf.is_empty() {
                    buf.push(' ');
                }
                buf.push_str(word);
            }
        }
        if !buf.is_empty() {
            out.push(buf);
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> VillagerProfile {
        VillagerProfile {
            name: "Rosie".to_string(),
            personality: "peppy".to_string(),
            species: "cat".to_string(),
            catchphrase: "silly".to_string(),
            style: String::new(),
            modded: false,
        }
    }

    #[test]
    fn blurb_mentions_persona() {
        let blurb = persona_blurb(&profile());
        assert!(blurb.starts_with("Villager persona: Rosie (cat, peppy)."));
        assert!(blurb.contains("\"silly\""));
        assert!(!blurb.contains("modded"));
        assert!(persona_blurb(&VillagerProfile::modded("Zed")).contains("modded"));
    }

    #[test]
    fn gossip_section() {
        assert_eq!(gossip_snippet(None), "");
        let ctx = GossipContext {
            rumor_topic: "a lost hat".to_string(),
            targets: ["A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect(),
            opinion: "friendly".to_string(),
        };
        let snippet = gossip_snippet(Some(&ctx));
        assert!(snippet.contains("- rumor: a lost hat"));
        assert!(snippet.contains("- villagers mentioned: A, B, C, D\n"));
        assert!(snippet.contains("- vibe: friendly"));
        assert!(system_prompt(&profile(), Some(&ctx)).contains("Gossip context:"));
    }

    #[test]
    fn keeps_only_safe_tags() {
        let out = postprocess("Hi!<Pause [0A]> <Color Line [FF0000]>red<Press A>");
        assert_eq!(out, "Hi!<Pause [0A]> red<Press A><Clear Text>");
    }

    #[test]
    fn strips_code_fence() {
        assert_eq!(postprocess("```\nHello there\n```"), "Hello there");
        assert_eq!(postprocess("```text\nHowdy\n```"), "Howdy");
    }

    #[test]
    fn empty_output() {
        assert_eq!(postprocess("   "), "...<Press A><Clear Text>");
        assert_eq!(postprocess("<Wiggle>"), "...");
    }

    #[test]
    fn multi_line_gets_clear_text() {
        assert_eq!(postprocess("  one  \n two "), "one\ntwo<Clear Text>");
        assert_eq!(
            postprocess("a<Press A><Clear Text>"),
            "a<Press A><Clear Text>"
        );
    }

    #[test]
    fn long_line_is_soft_wrapped() {
        let line = "word ".repeat(25);
        let out = trim_lines(&line);
        assert!(out.lines().count() > 1);
        assert!(out.lines().all(|l| l.chars().count() <= LINE_WIDTH));
        let short = "short line that stays";
        assert_eq!(trim_lines(short), short);
    }
}
