//! The model-facing layer of `replgate`: conversation history, the
//! instruction-extraction protocol, the bounded step loop, and the text-only
//! tool surface over [`replgate_core`] sessions.

mod controller;
mod conversation;
mod instruction;
mod tools;

pub use controller::CommandExecutor;
pub use controller::Done;
pub use controller::DoneReason;
pub use controller::InstructionSource;
pub use controller::StepController;
pub use controller::StepResult;
pub use conversation::Conversation;
pub use conversation::Message;
pub use conversation::Role;
pub use instruction::FINAL_SENTINEL;
pub use instruction::ParsedReply;
pub use instruction::parse_reply;
pub use tools::BoundSessionTools;
pub use tools::SessionTools;
