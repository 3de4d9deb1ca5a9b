//! Candidate-selection job pipeline
//!
//! The pipeline turns one job submission into at most one cache write:
//! fan-out generation of candidate transformations, fan-in scoring of
//! each against the original, winner selection, and the final cache
//! write that triggers subscriber notification.

pub mod generator;
pub mod orchestrator;
pub mod scorer;

pub use generator::CandidateGenerator;
pub use orchestrator::{Orchestrator, Submission};
pub use scorer::CandidateScorer;

// ============================================================================
// Mock capabilities for testing
// ============================================================================
