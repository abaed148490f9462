//! Business logic behind the user and admin handlers.

pub mod admin;
pub mod users;
