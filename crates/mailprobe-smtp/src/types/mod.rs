//! Core SMTP types.

mod address;
mod extension;
mod reply;

pub use address::Address;
pub use extension::Extensions;
pub use reply::{Reply, ReplyCode};
