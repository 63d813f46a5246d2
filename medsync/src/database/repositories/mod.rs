//! Repository layer for database access.
//!
//! Reads go through the shared read pool, writes through the single-connection
//! write pool.

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
