//! Consensus / ensemble engine
//!
//! Reduces the replies of N member sessions into one decision.
//!
//! ```text
//!   question ──▶ S1 ─┐
//!            ──▶ S2 ─┼─▶ EnsembleResponse ──resolve(quorum)──▶ Resolution
//!            ──▶ S3 ─┘        │
//!                             └─ confident replies as evidence ──▶ round 2 (supersedes)
//! ```
//!
//! Grouping is by exact response text. Members are asked one at a time in
//! registration order.

pub mod coordinator;
pub mod response;
pub mod voting;

pub use coordinator::{evidence_prompt, ConsensusEngine, ConsensusOutcome, EnsembleConfig};
pub use response::{EnsembleResponse, ReplyGroups};
pub use voting::{resolve, Resolution, ResolutionRule};
