//! Truth models shipped with the crate.
//!
//! They serve as reference problems for tests, benchmarks and demos.
mod diffusion_reaction;

pub use diffusion_reaction::DiffusionReaction1d;
