//! Authentication for the asset proxy and application routes.

pub mod basic;

pub use basic::{Credentials, REALM};
