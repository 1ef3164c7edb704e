pub mod control;
pub mod glyph;
pub mod gossip;
pub mod persona;
