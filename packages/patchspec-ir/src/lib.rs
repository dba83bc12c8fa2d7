/*
 * patchspec-ir - Patch-Derived Bug Specification Mining
 *
 * Feature-First Layout:
 * - shared/      : Common models (IR, SEG, errors, matched maps)
 * - features/    : Vertical slices (projection → resolution → slicing →
 *                  condition → enhanced trace → diff → abstraction)
 * - session      : Orchestration and caches (no globals)
 *
 * Pipeline:
 * - C2 lifts the line diff to added/removed/matched IR
 * - C3/C4 slice value flows around the changed nodes
 * - C5/C6 attach condition trees and output orders
 * - C7 classifies before/after traces
 * - C8 emits (input, output, condition, order) spec records as CSV + SMT
 */

#![allow(dead_code)] // Adapter surfaces kept for external collaborators
#![allow(clippy::too_many_arguments)] // Analysis phases thread many indices
#![allow(clippy::type_complexity)]

/// Shared models and utilities
pub mod shared;

/// Feature modules (pipeline components)
pub mod features;

/// Analysis configuration
pub mod config;

/// Session orchestration
pub mod session;

pub use config::AnalysisConfig;
pub use session::{ModuleImage, Session};

pub use features::spec_abstraction::{load_specs, write_specs, PeerTable, SpecSet};
pub use shared::models::{ErrorKind, PatchSpecError, Result};
