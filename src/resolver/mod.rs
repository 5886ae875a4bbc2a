// src/resolver/mod.rs

//! Requirement resolution and run-export propagation
//!
//! This module sequences the requirement sets of a rendered output through
//! the solver and pins run requirements to the versions found at build time.

mod engine;
mod pins;
mod plan;

pub use engine::{PropagationEngine, clean_requirements};
pub use pins::{
    DEFAULT_MAX_PIN, DEFAULT_MIN_PIN, PinExpression, apply_pin_expressions, apply_pins, pin_from_build,
};
pub use plan::{OutputResolution, Phase, PhaseResult};
