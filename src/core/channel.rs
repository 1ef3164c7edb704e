/// Per-address conversation tracking: which lines a villager has said, and
/// whether the choice menu may receive the extra option.
use crate::core::codec::TaggedText;

/// Distinct lines needed before a menu counts as eligible on its own.
const ELIGIBLE_LINES: u32 = 2;

/// Coarse view of the flag combination, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Idle,
    Collecting,
    MenuEligible,
    MenuInjected,
    AwaitingResolution,
}

/// Conversation state for one watched address.
///
/// Only `observe` moves it forward; the orchestrator flips the menu flags
/// when it writes an injected option and clears them after generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub lines_seen: u32,
    pub last_visible_text: Option<String>,
    pub ready_for_chatty: bool,
    pub menu_injected: bool,
    pub awaiting_choice_resolution: bool,
    pub chatty_requested: bool,
    pub menu_skip_logged: bool,
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one decoded snapshot.
    pub fn observe(&mut self, text: &TaggedText) {
        if text.ends_conversation() {
            self.reset();
            return;
        }

        let menu_open = text.has_open_menu();

        if self.awaiting_choice_resolution && !menu_open {
            self.awaiting_choice_resolution = false;
            self.menu_injected = false;
            self.menu_skip_logged = false;
            let visible = text.visible();
            let visible = visible.trim();
            if !visible.is_empty() && self.record_line(visible) {
                self.chatty_requested = true;
            }
            return;
        }

        if menu_open {
            // Menu labels are never counted as a spoken line.
            if !self.ready_for_chatty && self.lines_seen >= 1 {
                self.ready_for_chatty = true;
            }
            return;
        }

        let visible = text.visible();
        let visible = visible.trim();
        if !visible.is_empty() && self.record_line(visible) {
            self.menu_skip_logged = false;
        }
    }

    /// Count `visible` if it differs from the last line. Returns whether it did.
    fn record_line(&mut self, visible: &str) -> bool {
        if self.last_visible_text.as_deref() == Some(visible) {
            return false;
        }
        self.last_visible_text = Some(visible.to_string());
        self.lines_seen = self.lines_seen.saturating_add(1);
        if self.lines_seen >= ELIGIBLE_LINES {
            self.ready_for_chatty = true;
        }
        true
    }

    pub fn is_menu_eligible(&self) -> bool {
        self.ready_for_chatty
    }

    /// The extra option has been written; wait for the player's pick.
    pub fn mark_menu_injected(&mut self) {
        self.menu_injected = true;
        self.awaiting_choice_resolution = true;
    }

    pub fn clear_menu(&mut self) {
        self.menu_injected = false;
        self.awaiting_choice_resolution = false;
    }

    /// Whether a generation should start now.
    pub fn wants_generation(&self) -> bool {
        self.chatty_requested && !self.awaiting_choice_resolution
    }

    pub fn phase(&self) -> ChannelPhase {
        if self.awaiting_choice_resolution {
            ChannelPhase::AwaitingResolution
        } else if self.menu_injected {
            ChannelPhase::MenuInjected
        } else if self.ready_for_chatty {
            ChannelPhase::MenuEligible
        } else if self.lines_seen > 0 {
            ChannelPhase::Collecting
        } else {
            ChannelPhase::Idle
        }
    }
}
