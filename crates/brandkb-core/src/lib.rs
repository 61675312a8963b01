//! # Brand KB Core
//!
//! Runtime-agnostic logic for Brand KB: data models, chunking, store
//! traits, the retrieval engine, answer composition, and the token service.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! External collaborators (embedding provider, chat model, URL researcher,
//! persistent store) are consumed through the traits in [`embedding`],
//! [`answer`], and [`store`].
//!
//! ```text
//! content ──▶ chunk ──▶ kb (Embedding Store) ──▶ retrieve ──▶ answer
//!                                   ▲
//!                 tokens ───────────┘  (gateway lives in the app crate)
//! ```

pub mod answer;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod kb;
pub mod models;
pub mod retrieve;
pub mod store;
pub mod tokens;

pub use error::{ErrorKind, KbError, KbResult};
