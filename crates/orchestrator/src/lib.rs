//! Sequencing around the evidence gate.
//!
//! The gate always runs first. Only a passing verdict reaches the permission
//! authority, and only an allowed write or exec action reaches the safety scan.
//! Collaborators are injected as trait objects and bounded by a timeout; a
//! failing or slow collaborator never turns into an implicit allow.

pub mod audit;
pub mod error;
pub mod git_scan;
pub mod orchestrator;
pub mod ports;

pub use audit::{
    read_records, verify_chain, AuditChain, AuditEvent, AuditRecord, AuditSink, JsonlAuditSink,
    MemoryAuditSink, GENESIS_HASH,
};
pub use error::{OrchestratorError, Result};
pub use git_scan::{GitStatusScanner, DEFAULT_LARGE_FILE_BYTES};
pub use orchestrator::{
    ActionOutcome, AnswerOutcome, Orchestrator, OrchestratorConfig, COLLABORATOR_FAILURE_REF,
};
pub use ports::{AssistService, PermissionAuthority, SafetyScanner};
