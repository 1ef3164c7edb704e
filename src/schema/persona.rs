/// Villager personas: the per-speaker profile that shapes generated lines.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One villager's profile, as stored in `villagers.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VillagerProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_personality")]
    pub personality: String,
    #[serde(default = "default_species")]
    pub species: String,
    #[serde(default)]
    pub catchphrase: String,
    #[serde(default)]
    pub style: String,
    /// True when the name was not found in the registry.
    #[serde(default)]
    pub modded: bool,
}

fn default_personality() -> String {
    "normal".to_string()
}

fn default_species() -> String {
    "unknown".to_string()
}

impl VillagerProfile {
    /// Neutral profile for a speaker the registry does not know.
    pub fn modded(name: &str) -> Self {
        Self {
            name: name.to_string(),
            personality: default_personality(),
            species: default_species(),
            catchphrase: String::new(),
            style: String::new(),
            modded: true,
        }
    }
}

/// Registry of known villagers keyed by display name.
#[derive(Debug, Clone, Default)]
pub struct PersonaRegistry {
    profiles: HashMap<String, VillagerProfile>,
}

impl PersonaRegistry {
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    pub fn register(&mut self, mut profile: VillagerProfile) {
        profile.modded = false;
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn get(&self, name: &str) -> Option<&VillagerProfile> {
        self.profiles.get(name)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Resolve a raw speaker name to a profile.
    ///
    /// The name is sanitized first, then tried as-is, in title case, and
    /// with only its first letter raised. Misses fall back to
    /// [`VillagerProfile::modded`].
    pub fn resolve(&self, name: Option<&str>) -> VillagerProfile {
        let clean = sanitize_name(name).unwrap_or_else(|| "Unknown".to_string());
        for candidate in [clean.clone(), title_case(&clean), capitalize(&clean)] {
            if let Some(profile) = self.profiles.get(&candidate) {
                return profile.clone();
            }
        }
        VillagerProfile::modded(&clean)
    }

    /// Parse a JSON object of `name -> profile`. Missing `name` fields take
    /// the key.
    pub fn parse_json(source: &str) -> Result<Self, ProfileError> {
        let entries: HashMap<String, VillagerProfile> = serde_json::from_str(source)?;
        let mut registry = Self::new();
        for (key, mut profile) in entries {
            if profile.name.is_empty() {
                profile.name = key.clone();
            }
            profile.modded = false;
            registry.profiles.insert(key, profile);
        }
        Ok(registry)
    }

    /// Load profiles from a `villagers.json` file, merging over existing ones.
    pub fn load_from_json(&mut self, path: &Path) -> Result<(), ProfileError> {
        let contents = std::fs::read_to_string(path)?;
        let loaded = Self::parse_json(&contents)?;
        self.profiles.extend(loaded.profiles);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Strip quotes and whitespace; reject the `xxx...` noise the name buffer
/// holds between conversations.
pub fn sanitize_name(name: Option<&str>) -> Option<String> {
    let trimmed = name?.trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace());
    let noise = trimmed
        .chars()
        .take_while(|c| c.eq_ignore_ascii_case(&'x'))
        .count()
        >= 3;
    if trimmed.is_empty() || noise {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Extract a speaker name from the raw name buffer.
///
/// The buffer is cut at the first NUL or control byte, decoded leniently
/// and trimmed. An all-zero or empty buffer has no speaker.
pub fn parse_speaker(raw: &[u8]) -> Option<String> {
    let end = raw
        .iter()
        .position(|&b| b < 0x20 || b == 0x7F)
        .unwrap_or(raw.len());
    let name = String::from_utf8_lossy(&raw[..end]);
    let name = name.replace('\u{FFFD}', "");
    let name = name.trim_end();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const VILLAGERS: &str = r#"{
        "Bob": {"personality": "lazy", "species": "cat", "catchphrase": "pthhpth"},
        "Rosie": {"name": "Rosie", "personality": "peppy", "species": "cat", "catchphrase": "silly", "style": "sparkly"},
        "Mr. Resetti": {"personality": "cranky", "species": "mole"}
    }"#;

    fn registry() -> PersonaRegistry {
        PersonaRegistry::parse_json(VILLAGERS).unwrap()
    }

    #[test]
    fn parse_fills_name_from_key() {
        let registry = registry();
        assert_eq!(registry.len(), 3);
        let bob = registry.get("Bob").unwrap();
        assert_eq!(bob.name, "Bob");
        assert_eq!(bob.personality, "lazy");
        assert_eq!(bob.style, "");
        assert!(!bob.modded);
    }

    #[test]
    fn resolve_tries_case_variants() {
        let registry = registry();
        assert_eq!(registry.resolve(Some("bob")).name, "Bob");
        assert_eq!(registry.resolve(Some("  \"Rosie\" ")).personality, "peppy");
        assert_eq!(registry.resolve(Some("mr. resetti")).species, "mole");
    }

    #[test]
    fn unknown_speaker_is_modded() {
        let profile = registry().resolve(Some("Zed"));
        assert!(profile.modded);
        assert_eq!(profile.name, "Zed");
        assert_eq!(profile.personality, "normal");
        assert_eq!(profile.species, "unknown");
    }

    #[test]
    fn missing_name_resolves_to_unknown() {
        let profile = registry().resolve(None);
        assert_eq!(profile.name, "Unknown");
        assert!(profile.modded);
    }

    #[test]
    fn sanitize_rejects_noise() {
        assert_eq!(sanitize_name(Some("xxxxxx")), None);
        assert_eq!(sanitize_name(Some("XXX junk")), None);
        assert_eq!(sanitize_name(Some(" '' ")), None);
        assert_eq!(sanitize_name(Some("Xavier")), Some("Xavier".to_string()));
    }

    #[test]
    fn speaker_buffer_parsing() {
        assert_eq!(parse_speaker(b"Bob\0\0\0garbage"), Some("Bob".to_string()));
        assert_eq!(parse_speaker(b"Rosie\x7Fjunk"), Some("Rosie".to_string()));
        assert_eq!(parse_speaker(b"Tom Nook  \x01"), Some("Tom Nook".to_string()));
        assert_eq!(parse_speaker(&[0u8; 32]), None);
        assert_eq!(parse_speaker(b""), None);
    }

    #[test]
    fn load_merges_file() {
        let path = std::env::temp_dir().join(format!("villagers-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"Apollo": {"personality": "cranky", "species": "eagle"}}"#).unwrap();
        let mut registry = registry();
        registry.load_from_json(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.resolve(Some("apollo")).species, "eagle");
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(matches!(
            PersonaRegistry::parse_json("{not json"),
            Err(ProfileError::Json(_))
        ));
    }
}
