//! Core of `replgate`: reliable command/response synchronization with
//! interactive child processes behind a pseudo-terminal.
//!
//! The building blocks are layered leaf-first: [`PromptFramer`] decides where
//! one command's output ends inside an unstructured byte stream, a pty-backed
//! child process feeds it raw bytes, [`InteractiveSession`] composes the two
//! into a synchronous-looking `send(command) -> output` operation with
//! timeout and restart semantics, and [`SessionRegistry`] hands out sessions
//! by caller-supplied key.

mod config;
mod error;
mod framer;
mod pty;
mod registry;
mod session;
mod truncate;

pub use config::SessionConfig;
pub use error::SessionError;
pub use framer::Boundary;
pub use framer::PromptFramer;
pub use registry::SessionRegistry;
pub use registry::SharedSession;
pub use session::InteractiveSession;
pub use session::OutputBlock;
pub use session::SessionState;
pub use truncate::MAX_OUTPUT_CHARS;
pub use truncate::TRUNCATION_MARKER;
pub use truncate::truncate_output;
