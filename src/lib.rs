//! Assistant panel core of the asset management dashboard.
//!
//! The surrounding UI calls [`assistant::Dispatcher::submit`] with the user's
//! text and renders the turn list published by
//! [`assistant::Conversation::subscribe`].

pub mod assistant;
pub mod logging;
