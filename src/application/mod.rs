//! Application services: the data session and the blog operations built on it.

pub mod blog;
pub mod error;
pub mod pagination;
pub mod repos;
pub mod session;
