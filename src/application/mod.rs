//! Application services built on the cache layer.

pub mod articles;
pub mod error;
pub mod origin;
pub mod saves;
pub mod warmer;
