//! Domain layer: the content families the cache serves.

pub mod families;
