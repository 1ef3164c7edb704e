pub mod channel;
pub mod codec;
pub mod gate;
pub mod menu;
pub mod normalize;
pub mod orchestrator;
