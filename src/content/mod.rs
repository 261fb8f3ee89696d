//! Content-addressed value storage
//!
//! Values are stored once per distinct byte string and referenced from the
//! index by their SHA-256 address.

mod address;
mod store;

pub use address::{ContentAddress, CONTENT_ADDRESS_LEN};
pub use store::{ContentError, ContentResult, ContentStore};
