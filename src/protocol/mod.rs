/// Wire format for request and result messages.
///
/// Field names are fixed for compatibility with existing workers consuming
/// the topic; do not rename them.
mod message;

pub use message::{RequestMessage, ResultMessage};
