// src/core/renderer/mod.rs
pub mod api;
pub mod backend;
pub mod lifecycle;
pub mod surface;
