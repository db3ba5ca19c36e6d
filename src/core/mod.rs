// src/core/mod.rs
pub mod renderer;
