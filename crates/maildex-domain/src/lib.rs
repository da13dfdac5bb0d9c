pub mod company;
pub mod mbox;
pub mod message;

mod rfc2047;

pub use message::{Address, ParsedAttachment, ParsedEmail};
