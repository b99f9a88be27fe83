//! Document storage adapters.

pub mod filesystem;
