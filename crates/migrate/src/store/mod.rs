//! Mail-store adapters
//!
//! The transfer engine talks to both ends of a migration through the
//! [`MailStoreClient`] trait. Backends differ in capability: IMAP supports
//! every operation, Gmail is a destination only, and the in-memory store is
//! used to exercise the engine without a network.

mod imap;
mod memory;
mod traits;

pub use self::imap::ImapStore;
pub use memory::InMemoryMailStore;
pub use traits::{MailStoreClient, OutgoingMessage};
