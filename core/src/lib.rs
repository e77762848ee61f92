pub mod commands;
pub mod error;
pub mod events;
pub mod session;
pub mod stream;
pub mod workout;
