pub mod chat;
pub mod health;
pub mod profile;
pub mod session;
pub mod workout;
