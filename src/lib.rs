//! # procpilot
//!
//! A retrieval and guided-execution engine for tenant-scoped process
//! documents. Documents are chunked, embedded, and ranked by a hybrid
//! multi-tier search; answers are generated strictly from retrieved
//! context (with a streaming variant); and procedural requests turn a
//! document into an interactive, stateful, step-by-step guide.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────┐
//! │ Indexer  │──▶│ Chunk + Embed │──▶│  SQLite   │
//! └──────────┘   └───────────────┘   └────┬─────┘
//!                                         │
//!                ┌────────────────────────┤
//!                ▼                        ▼
//!        ┌───────────────┐        ┌──────────────┐
//!        │ Hybrid search │───────▶│ Answer gen.  │
//!        └───────┬───────┘        │ sync/stream  │
//!                │                └──────┬───────┘
//!                ▼                       │
//!        ┌───────────────┐               ▼
//!        │ Guided engine │◀──── chat ────┘
//!        └───────────────┘
//! ```
//!
//! Session registry and caches are in-process state: they do not survive
//! a restart and are not shared between instances. Running more than one
//! instance requires externalizing sessions and caches to a shared store.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`markup`] | Rich-text to plain-text reduction |
//! | [`chunk`] | Semantic-boundary text chunking |
//! | [`cache`] | TTL/size-bounded caches |
//! | [`embedding`] | Embedding provider abstraction and cached embedder |
//! | [`completion`] | Completion provider abstraction (sync + streaming) |
//! | [`store`] | SQLite document and chat-turn store |
//! | [`indexer`] | Document indexing pipeline |
//! | [`search`] | Tiered and advanced search |
//! | [`answer`] | Grounded answer generation |
//! | [`session`] | Guided-session state machine and registry |
//! | [`guided`] | Intent detection and guided execution |
//! | [`server`] | HTTP API server |

pub mod answer;
pub mod cache;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod guided;
pub mod indexer;
pub mod markup;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod session;
pub mod store;
