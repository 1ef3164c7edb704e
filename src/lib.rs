//! Dialogue Engine: live dialogue rewriting for Animal Crossing running in an
//! emulator.
//!
//! Polls the game's dialogue buffer, decodes it into tagged text, tracks each
//! conversation, adds a "Feeling chatty" option to choice menus and replaces
//! the following line with generated dialogue, one generation at a time.

pub mod bridge;
pub mod config;
pub mod core;
pub mod schema;
pub mod telemetry;
