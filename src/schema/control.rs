/// Control-code table: opcodes that follow the prefix byte, their fixed
/// argument layouts, and the display templates used for tags.
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

pub const END_CONVERSATION: u8 = 0x00;
pub const OPEN_CHOICE_MENU: u8 = 0x0D;

pub const END_CONVERSATION_TAG: &str = "<End Conversation>";
pub const OPEN_CHOICE_MENU_TAG: &str = "<Open Choice Menu>";

/// A display-only lookup from a numeric argument to a readable name.
#[derive(Debug)]
pub struct SubTable {
    entries: &'static [(u16, &'static str)],
    /// Prefix for values missing from `entries`, followed by fixed-width hex.
    unknown_prefix: &'static str,
}

impl SubTable {
    pub fn name(&self, code: u16) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(value, _)| *value == code)
            .map(|(_, name)| *name)
    }

    pub fn code(&self, name: &str) -> Option<u16> {
        self.entries
            .iter()
            .find(|(_, candidate)| *candidate == name)
            .map(|(value, _)| *value)
    }
}

pub static EXPRESSIONS: SubTable = SubTable {
    entries: &[
        (0x00, "None?"), (0x01, "Glare"), (0x02, "Shocked"), (0x03, "Laugh"),
        (0x04, "Surprised"), (0x05, "Angry"), (0x06, "Excited"), (0x07, "Worried"),
        (0x08, "Scared"), (0x09, "Cry"), (0x0A, "Happy"), (0x0B, "Wondering"),
        (0x0C, "Idea"), (0x0D, "Sad"), (0x0E, "Happy Dance"), (0x0F, "Thinking"),
        (0x10, "Depressed"), (0x11, "Heartbroken"), (0x12, "Sinister"), (0x13, "Tired"),
        (0x14, "Love"), (0x15, "Smile"), (0x16, "Scowl"), (0x17, "Frown"),
        (0x18, "Laughing (Sitting)"), (0x19, "Shocked (Sitting)"), (0x1A, "Idea (Sitting)"),
        (0x1B, "Surprised (Sitting)"), (0x1C, "Angry (Sitting)"), (0x1D, "Smile (Sitting)"),
        (0x1E, "Frown (Sitting)"), (0x1F, "Wondering (Sitting)"), (0x20, "Salute"),
        (0x21, "Angry (Resetti)"), (0x22, "Reset Expressions (Resetti)"),
        (0x23, "Sad (Resetti)"), (0x24, "Excitement (Resetti)"),
        (0x25, "Jaw Drop (Resetti)"), (0x26, "Annoyed (Resetti)"),
        (0x27, "Furious (Resetti)"), (0x28, "Surprised (K.K.)"), (0x29, "Fortune"),
        (0x2A, "Smile (Resetti)"), (0xFD, "Reset Expressions (K.K.)"),
        (0xFE, "Reset Expressions (Sitting)"), (0xFF, "Reset Expressions"),
    ],
    unknown_prefix: "Unknown_",
};

pub static PLAYER_EMOTIONS: SubTable = SubTable {
    entries: &[
        (0x02, "Surprised"), (0xFD, "Purple Mist"), (0xFE, "Scared"), (0xFF, "Reset Emotion"),
    ],
    unknown_prefix: "Unknown_Emotion_",
};

pub static MUSIC: SubTable = SubTable {
    entries: &[
        (0x00, "Silence"), (0x01, "Arriving in Town"), (0x02, "House Selection"),
        (0x03, "House Selected"), (0x04, "House Selected (2)"), (0x05, "Resetti"),
        (0x06, "Current Hourly Music"), (0x07, "Resetti (2)"), (0x08, "Don Resetti"),
    ],
    unknown_prefix: "Unknown_Music_",
};

pub static MUSIC_TRANSITIONS: SubTable = SubTable {
    entries: &[(0x00, "None"), (0x01, "Undetermined"), (0x02, "Fade")],
    unknown_prefix: "Unknown_Transition_",
};

pub static SOUND_EFFECTS: SubTable = SubTable {
    entries: &[
        (0x00, "Bell Transaction"), (0x01, "Happy"), (0x02, "Very Happy"),
        (0x03, "Variable 0"), (0x04, "Variable 1"), (0x05, "Annoyed"),
        (0x06, "Thunder"), (0x07, "None"),
    ],
    unknown_prefix: "Unknown_Sound_",
};

/// One placeholder in a tag template, backed by a fixed number of
/// big-endian argument bytes.
#[derive(Debug, Clone, Copy)]
pub enum Slot {
    /// Rendered as upper-case hex, zero-padded to two digits per byte.
    Hex(u8),
    /// Rendered through a sub-table name, hex fallback for unknown values.
    Named(u8, &'static SubTable),
}

impl Slot {
    pub fn width(&self) -> usize {
        match self {
            Slot::Hex(bytes) | Slot::Named(bytes, _) => *bytes as usize,
        }
    }

    fn render(&self, value: u32) -> String {
        let digits = self.width() * 2;
        match self {
            Slot::Hex(_) => format!("{value:0digits$X}"),
            Slot::Named(_, table) => {
                match u16::try_from(value).ok().and_then(|code| table.name(code)) {
                    Some(name) => name.to_string(),
                    None => format!("{}{value:0digits$X}", table.unknown_prefix),
                }
            }
        }
    }

    /// Parse a slot's text leniently: any hex case, any width up to the slot
    /// width, an optional `0x`. Named slots also accept names and the
    /// unknown-value spelling.
    fn parse(&self, raw: &str) -> Option<u32> {
        if let Slot::Named(_, table) = self {
            if let Some(code) = table.code(raw) {
                return Some(u32::from(code));
            }
            if let Some(hex) = raw.strip_prefix(table.unknown_prefix) {
                return parse_hex(hex, self.width());
            }
        }
        parse_hex(raw, self.width())
    }
}

fn parse_hex(raw: &str, width: usize) -> Option<u32> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    if digits.is_empty()
        || digits.len() > width * 2
        || !digits.chars().all(|ch| ch.is_ascii_hexdigit())
    {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// A control code: opcode, display template with one `{}` per slot, and the
/// slots that fix its argument length.
#[derive(Debug)]
pub struct ControlCode {
    pub opcode: u8,
    pub template: &'static str,
    pub slots: &'static [Slot],
}

impl ControlCode {
    /// Fixed number of argument bytes after the opcode.
    pub fn arg_len(&self) -> usize {
        self.slots.iter().map(Slot::width).sum()
    }

    /// Split argument bytes into one big-endian value per slot. `args` must
    /// hold exactly `arg_len()` bytes.
    pub fn unpack(&self, args: &[u8]) -> Vec<u32> {
        let mut values = Vec::with_capacity(self.slots.len());
        let mut offset = 0;
        for slot in self.slots {
            let width = slot.width();
            let value = args[offset..offset + width]
                .iter()
                .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
            values.push(value);
            offset += width;
        }
        values
    }

    /// Inverse of `unpack`; values wider than their slot keep their low bytes.
    pub fn pack(&self, values: &[u32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.arg_len());
        for (slot, value) in self.slots.iter().zip(values) {
            let be = value.to_be_bytes();
            bytes.extend_from_slice(&be[4 - slot.width()..]);
        }
        bytes
    }

    /// Render the canonical tag for the given slot values.
    pub fn render(&self, values: &[u32]) -> String {
        let mut out = String::with_capacity(self.template.len() + 8);
        let mut pieces = self.template.split("{}");
        if let Some(first) = pieces.next() {
            out.push_str(first);
        }
        for (idx, piece) in pieces.enumerate() {
            if let (Some(slot), Some(value)) = (self.slots.get(idx), values.get(idx)) {
                out.push_str(&slot.render(*value));
            }
            out.push_str(piece);
        }
        out
    }

    /// Match a tag against this code's template and recover slot values.
    pub fn parse(&self, tag: &str) -> Option<Vec<u32>> {
        let pieces: Vec<&str> = self.template.split("{}").collect();
        let mut rest = tag.strip_prefix(pieces[0])?;
        let mut values = Vec::with_capacity(self.slots.len());
        for (slot, next) in self.slots.iter().zip(&pieces[1..]) {
            let end = rest.find(next)?;
            values.push(slot.parse(&rest[..end])?);
            rest = &rest[end + next.len()..];
        }
        rest.is_empty().then_some(values)
    }
}

const fn code(opcode: u8, template: &'static str, slots: &'static [Slot]) -> ControlCode {
    ControlCode {
        opcode,
        template,
        slots,
    }
}

const H1: Slot = Slot::Hex(1);
const H2: Slot = Slot::Hex(2);
const H3: Slot = Slot::Hex(3);

static EMOTION_SLOTS: [Slot; 2] = [H1, Slot::Named(2, &PLAYER_EMOTIONS)];
static EXPRESSION_SLOTS: [Slot; 2] = [H1, Slot::Named(2, &EXPRESSIONS)];
static MUSIC_SLOTS: [Slot; 2] = [Slot::Named(1, &MUSIC), Slot::Named(1, &MUSIC_TRANSITIONS)];
static SOUND_SLOTS: [Slot; 1] = [Slot::Named(1, &SOUND_EFFECTS)];

/// Every template is distinct, so `lookup_tag` always recovers the opcode
/// a tag was decoded from.
static CODES: &[ControlCode] = &[
    code(0x00, "<End Conversation>", &[]),
    code(0x01, "<Continue>", &[]),
    code(0x02, "<Clear Text>", &[]),
    code(0x03, "<Pause [{}]>", &[H1]),
    code(0x04, "<Press A>", &[]),
    code(0x05, "<Color Line [{}]>", &[H3]),
    code(0x06, "<Instant Skip>", &[]),
    code(0x07, "<Unskippable>", &[]),
    code(0x08, "<Player Emotion [{}] [{}]>", &EMOTION_SLOTS),
    code(0x09, "<NPC Expression [Cat:{}] [{}]>", &EXPRESSION_SLOTS),
    code(0x0A, "<Set Demo Order [{}, {}, {}]>", &[H1, H1, H1]),
    code(0x0B, "<Set Demo Order 2 [{}, {}, {}]>", &[H1, H1, H1]),
    code(0x0C, "<Set Demo Order 3 [{}, {}, {}]>", &[H1, H1, H1]),
    code(0x0D, "<Open Choice Menu>", &[]),
    code(0x0E, "<Set Jump [{}]>", &[H2]),
    code(0x0F, "<Choice 1 Jump [{}]>", &[H2]),
    code(0x10, "<Choice 2 Jump [{}]>", &[H2]),
    code(0x11, "<Choice 3 Jump [{}]>", &[H2]),
    code(0x12, "<Choice 4 Jump [{}]>", &[H2]),
    code(0x13, "<Rand Jump 2 [{}, {}]>", &[H2, H2]),
    code(0x14, "<Rand Jump 3 [{}, {}, {}]>", &[H2, H2, H2]),
    code(0x15, "<Rand Jump 4 [{}, {}, {}, {}]>", &[H2, H2, H2, H2]),
    code(0x16, "<Set 2 Choices [{}, {}]>", &[H2, H2]),
    code(0x17, "<Set 3 Choices [{}, {}, {}]>", &[H2, H2, H2]),
    code(0x18, "<Set 4 Choices [{}, {}, {}, {}]>", &[H2, H2, H2, H2]),
    code(0x19, "<Force Dialog Switch>", &[]),
    code(0x1A, "<Player Name>", &[]),
    code(0x1B, "<NPC Name>", &[]),
    code(0x1C, "<Catchphrase>", &[]),
    code(0x1D, "<Year>", &[]),
    code(0x1E, "<Month>", &[]),
    code(0x1F, "<Day of Week>", &[]),
    code(0x20, "<Day>", &[]),
    code(0x21, "<Hour>", &[]),
    code(0x22, "<Minute>", &[]),
    code(0x23, "<Second>", &[]),
    code(0x24, "<String 0>", &[]),
    code(0x25, "<String 1>", &[]),
    code(0x26, "<String 2>", &[]),
    code(0x27, "<String 3>", &[]),
    code(0x28, "<String 4>", &[]),
    code(0x2F, "<Town Name>", &[]),
    code(0x4C, "<Angry Voice>", &[]),
    code(0x50, "<Color [{}] for [{}] chars>", &[H3, H1]),
    code(0x53, "<Line Type [{}]>", &[H1]),
    code(0x54, "<Char Size [{}]>", &[H2]),
    code(0x56, "<Play Music [{}] [{}]>", &MUSIC_SLOTS),
    code(0x57, "<Stop Music [{}] [{}]>", &MUSIC_SLOTS),
    code(0x59, "<Play Sound Effect [{}]>", &SOUND_SLOTS),
    code(0x5A, "<Line Size [{}]>", &[H2]),
    code(0x76, "<AM/PM>", &[]),
];

static BY_OPCODE: Lazy<FxHashMap<u8, &'static ControlCode>> =
    Lazy::new(|| CODES.iter().map(|code| (code.opcode, code)).collect());

/// Look up a control code by opcode.
pub fn by_opcode(opcode: u8) -> Option<&'static ControlCode> {
    BY_OPCODE.get(&opcode).copied()
}

/// Find the control code whose template matches `tag`, with its slot values.
pub fn lookup_tag(tag: &str) -> Option<(&'static ControlCode, Vec<u32>)> {
    CODES
        .iter()
        .find_map(|code| code.parse(tag).map(|values| (code, values)))
}

pub fn all() -> &'static [ControlCode] {
    CODES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_lengths_match_layouts() {
        let expected: &[(u8, usize)] = &[
            (0x03, 1), (0x05, 3), (0x08, 3), (0x09, 3), (0x0A, 3), (0x0E, 2),
            (0x0F, 2), (0x13, 4), (0x14, 6), (0x15, 8), (0x16, 4), (0x17, 6),
            (0x18, 8), (0x50, 4), (0x53, 1), (0x54, 2), (0x56, 2), (0x57, 2),
            (0x59, 1), (0x5A, 2), (0x02, 0), (0x0D, 0),
        ];
        for &(opcode, len) in expected {
            assert_eq!(by_opcode(opcode).unwrap().arg_len(), len, "opcode {opcode:02X}");
        }
    }

    #[test]
    fn templates_have_one_placeholder_per_slot() {
        for code in all() {
            assert_eq!(
                code.template.matches("{}").count(),
                code.slots.len(),
                "opcode {:02X}",
                code.opcode
            );
            assert!(code.arg_len() <= 8);
        }
    }

    #[test]
    fn render_pads_hex() {
        let pause = by_opcode(0x03).unwrap();
        assert_eq!(pause.render(&[0x0A]), "<Pause [0A]>");
        let color = by_opcode(0x50).unwrap();
        assert_eq!(color.render(&[0x00FF00, 5]), "<Color [00FF00] for [05] chars>");
    }

    #[test]
    fn render_named_and_unknown_values() {
        let expr = by_opcode(0x09).unwrap();
        assert_eq!(expr.render(&[1, 0x0A]), "<NPC Expression [Cat:01] [Happy]>");
        assert_eq!(expr.render(&[1, 0x0031]), "<NPC Expression [Cat:01] [Unknown_0031]>");
        let music = by_opcode(0x56).unwrap();
        assert_eq!(music.render(&[0x05, 0x02]), "<Play Music [Resetti] [Fade]>");
    }

    #[test]
    fn parse_inverts_render() {
        for (opcode, values) in [
            (0x09u8, vec![0x01, 0x0031]),
            (0x08, vec![0x00, 0x0002]),
            (0x15, vec![0x1234, 0x0001, 0xBEEF, 0x0000]),
            (0x56, vec![0x09, 0x00]),
            (0x59, vec![0x07]),
        ] {
            let code = by_opcode(opcode).unwrap();
            assert_eq!(code.parse(&code.render(&values)), Some(values));
        }
    }

    #[test]
    fn named_slot_prefers_name_over_hex() {
        // "Fade" is also valid hex; the name wins.
        let music = by_opcode(0x57).unwrap();
        assert_eq!(music.parse("<Stop Music [Silence] [Fade]>"), Some(vec![0, 2]));
    }

    #[test]
    fn lookup_rejects_wrong_widths() {
        assert!(lookup_tag("<Pause [123]>").is_none());
        assert!(lookup_tag("<Choice 1 Jump [12345]>").is_none());
        assert!(lookup_tag("<Pause [0a]>").is_some());
    }

    #[test]
    fn demo_order_variants_keep_their_opcode() {
        let (code, values) = lookup_tag("<Set Demo Order [01, 02, 03]>").unwrap();
        assert_eq!(code.opcode, 0x0A);
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(lookup_tag("<Set Demo Order 2 [01, 02, 03]>").unwrap().0.opcode, 0x0B);
        assert_eq!(lookup_tag("<Set Demo Order 3 [01, 02, 03]>").unwrap().0.opcode, 0x0C);
    }

    #[test]
    fn templates_are_unique() {
        let mut seen = rustc_hash::FxHashSet::default();
        for code in all() {
            assert!(seen.insert(code.template), "{} listed twice", code.template);
        }
    }

    #[test]
    fn pack_unpack_big_endian() {
        let color = by_opcode(0x50).unwrap();
        assert_eq!(color.pack(&[0x123456, 0x07]), vec![0x12, 0x34, 0x56, 0x07]);
        assert_eq!(color.unpack(&[0x12, 0x34, 0x56, 0x07]), vec![0x123456, 0x07]);
    }
}
