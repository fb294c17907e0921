//! Query routing between the generation collaborator and conversation
//! storage.

pub mod generator;
pub mod session_router;

pub use generator::{GenFuture, GenerationError, Generator, OllamaGenerator};
pub use session_router::{QueryOutcome, SessionRouter};
