/// Collaborators at the edge of the engine: emulator memory, screenshots
/// and the text-generation backend.
pub mod capture;
pub mod chat;
pub mod generator;
pub mod prompt;
pub mod transport;
