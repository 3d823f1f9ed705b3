//! Postgres repositories. Each borrows a connection (or transaction) for its lifetime.

pub mod credits;
pub mod users;

pub use credits::Credits;
pub use users::Users;
