//! Core data model: frames, solutions, fix states, correction chunks.

pub mod correction;
pub mod fix;
pub mod frame;
pub mod solution;

pub use correction::{CorrectionChunk, CorrectionStats, RtcmScanner};
pub use fix::{FixAssessment, FixState, FixStateTracker};
pub use frame::{
    FrameScan, MalformedFrame, MalformedReason, NmeaSentence, RawFrame, UbxFrame, UbxRecord,
};
pub use solution::{CarrierSolution, FusionData, FusionSample, GgaFix, NavigationSolution};
