//! Runtime collaborators of the chat session.

pub mod probe;
pub mod store;
