//! Evidence gate: blocks unverified factual claims before they merge.
//!
//! - [`policy`]: `EvidencePolicy`, the category → evidence kind table
//! - [`gate`]: `EvidenceGate::admit`, `AdmitDecision`

pub mod gate;
pub mod policy;

pub use gate::{AdmitDecision, EvidenceGate};
pub use policy::EvidencePolicy;
