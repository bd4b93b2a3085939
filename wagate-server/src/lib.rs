//! # wagate-server
//!
//! HTTP shell around the [`wagate`] session engine.
//!
//! The shell owns the routes, the response envelope, the SSE event stream and
//! the optional WebSocket mirror; every session decision is made by the
//! engine. Storage is PostgresSQL when `DATABASE_URL` is set, in-memory
//! otherwise.
//!
//! ```text
//! ┌──────────┐  REST / SSE  ┌───────────────────────────────┐
//! │  Tenant  │ ───────────▶ │  wagate-server (this crate)   │
//! └──────────┘              │   routes · envelope · streams │
//!                           ├───────────────────────────────┤
//!                           │  wagate engine                │
//!                           │   supervisor · locks · creds  │
//!                           └───────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod server;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use server::{build_router, AppState};
