//! Event sources feeding the dispatcher.
//!
//! Both adapters produce the same [`Event`](crate::models::Event) stream:
//! `poll` drives itself against getUpdates, `push` decodes one webhook call
//! at a time.

pub mod poll;
pub mod push;
