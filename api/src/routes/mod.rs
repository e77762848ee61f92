pub mod events;
pub mod health;
pub mod profile;
pub mod sessions;
pub mod workouts;
