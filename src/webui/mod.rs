//! WebUI-facing persistence: the refresh-token store backing browser
//! sessions (spec §3 `TokenDB`).

pub mod token_db;

pub use token_db::{RefreshToken, SymmetricKey, Token, TokenDb, TokenDbError, TokenManager};
