//! # leadflow-store
//!
//! Conversation persistence for LeadFlow.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  ConversationStore (trait: load / save / list)│
//! ├───────────────────────┬───────────────────────┤
//! │ InMemoryConversation  │ SqliteConversation    │
//! │ Store (RwLock<Map>)   │ Store                 │
//! │                       │  ├ HotCache (moka)    │
//! │                       │  └ Database (rusqlite │
//! │                       │     WAL + migrations) │
//! └───────────────────────┴───────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use leadflow_store::{CacheConfig, ConversationStore, SqliteConversationStore};
//!
//! let store = SqliteConversationStore::open("data/leadflow.db", CacheConfig::default()).await?;
//! let conversation = store.load("c-42").await?;
//! ```

pub mod cache;
pub mod conversation;
pub mod db;
pub mod error;
pub mod migration;
pub mod sqlite;
pub mod store;

pub use cache::{CacheConfig, CacheStats, HotCache};
pub use conversation::{
    Conversation, DEFAULT_HISTORY_LIMIT, SourceMaterial, Turn, TurnRole, WorkflowState,
};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use sqlite::SqliteConversationStore;
pub use store::{ConversationStore, ConversationSummary, InMemoryConversationStore};
