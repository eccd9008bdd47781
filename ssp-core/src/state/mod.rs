pub mod phase;

pub use phase::ClientPhase;
