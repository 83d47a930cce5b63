//! Integrations that rely on external collaborators.
//!
//! This module groups the narrow contracts for challenge-solving services
//! and browser automation drivers. The orchestration core stays agnostic of
//! vendor-specific details behind these seams.

pub mod browser;
pub mod challenge;

pub use browser::{BrowserAutomation, BrowserError, BrowserHandle, BrowserPage};
pub use challenge::{
    ChallengeDescriptor, ChallengeKind, ChallengeSolver, SolutionToken, SolverConfig, SolverError,
    SolverVerdict, TwoCaptchaSolver,
};
