//! Database models for medsync.
//!
//! These models map directly to the database schema.

pub mod credential;
pub mod oauth;
pub mod records;
pub mod sync_log;
pub mod vault;

pub use credential::*;
pub use oauth::*;
pub use records::*;
pub use sync_log::*;
pub use vault::*;
