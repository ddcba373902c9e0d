pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use completion::{
    ChatMessage, ChatRole, CompletionClient, CompletionConfig, CompletionError, CompletionStream,
    StreamFailure,
};
pub use config::LedgerchatConfig;
pub use error::LedgerchatError;
pub use models::{Conversation, ConversationStats, Message, Role};
pub use store::{ConversationStore, StoreError};
