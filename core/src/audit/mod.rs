//! Append-only log tamper evidence
//!
//! A publisher signs `{size, root}` tree heads over its log; auditors
//! recompute the RFC 6962 root over their own copy and alert on mismatch.

pub mod auditor;
pub mod log;
pub mod merkle;
pub mod sth;

pub use auditor::{
    AlertSink, AuditAlert, AuditFailure, AuditFetcher, AuditReport, GossipAuditor,
    LogAuditFetcher, TracingAlertSink, LOG_MISMATCH_ALERT,
};
pub use log::{AppendLog, MemoryLog, TreeHeadPublisher};
pub use merkle::{inclusion_proof, verify_inclusion, MerkleRoot};
pub use sth::{SignedTreeHead, TreeHeadSigner, TreeHeadVerifier};
