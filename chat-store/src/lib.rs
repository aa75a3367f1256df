//! Conversation backend boundary for the chat sync engine.
//!
//! Provides the message model and entry parsing, room keys, the async
//! backend and delivery contracts, and an in-memory realtime store.

pub mod backend;
pub mod entry;
pub mod memory;
pub mod room;

pub use backend::{BackendError, ChangeEvent, ChangeStream, ConversationBackend, DeliveryService};
pub use entry::{
    is_reserved_key, parse_entries, Attachment, ChatMessage, DataType, EntryError, RawEntry,
    ReplyRef,
};
pub use memory::MemoryBackend;
pub use room::RoomKey;
