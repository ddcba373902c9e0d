pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ConversationStats};
pub use message::{InvalidRole, Message, Role};
