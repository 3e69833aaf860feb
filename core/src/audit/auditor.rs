//! Gossip auditor
//!
//! Independent tamper-evidence check: recompute the Merkle root over the
//! local copy of `[0, size)` and compare it with the published tree head.
//! Each `audit_once` call is complete on its own. Tamper signals raise exactly
//! one alert; fetch failures are logged and reported but not alerted.

use super::log::AppendLog;
use super::merkle::{self, MerkleRoot};
use super::sth::{SignedTreeHead, TreeHeadVerifier};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Alert kind raised on any tamper signal
pub const LOG_MISMATCH_ALERT: &str = "transparency_log_mismatch";

/// Source of the published tree head and the entries it covers
#[async_trait]
pub trait AuditFetcher: Send + Sync {
    async fn get_sth(&self) -> Result<SignedTreeHead>;

    async fn get_range(&self, from: u64, to: u64) -> Result<Vec<String>>;
}

/// Receiver of audit alerts
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &AuditAlert);
}

/// Alert raised on a tamper signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditAlert {
    pub kind: &'static str,
    pub size: u64,
    pub failure: AuditFailure,
}

/// Alert sink that logs at error level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: &AuditAlert) {
        tracing::error!(
            alert = alert.kind,
            size = alert.size,
            failure = ?alert.failure,
            "Append log audit failed"
        );
    }
}

/// Why an audit did not pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AuditFailure {
    /// Recomputed root differs from the published one
    RootMismatch {
        expected: MerkleRoot,
        computed: MerkleRoot,
    },
    /// Tree head signature did not verify against the publisher key
    BadSignature { detail: String },
    /// Fewer local entries than the tree head covers
    ShortRange { expected: u64, actual: u64 },
    /// Tree head or range could not be fetched
    FetchFailed { detail: String },
    /// Another audit is running
    InProgress,
}

impl AuditFailure {
    /// Whether the failure indicates tampering or divergence of the log
    pub fn is_tamper_signal(&self) -> bool {
        matches!(
            self,
            AuditFailure::RootMismatch { .. }
                | AuditFailure::BadSignature { .. }
                | AuditFailure::ShortRange { .. }
        )
    }
}

/// Result of one audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<AuditFailure>,
}

impl AuditReport {
    fn passed(size: u64) -> Self {
        Self {
            ok: true,
            size: Some(size),
            failure: None,
        }
    }

    fn failed(failure: AuditFailure) -> Self {
        Self {
            ok: false,
            size: None,
            failure: Some(failure),
        }
    }
}

/// Clears the in-progress flag on every exit path
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Compares a local log against published tree heads
pub struct GossipAuditor {
    fetcher: Arc<dyn AuditFetcher>,
    alerts: Arc<dyn AlertSink>,
    publisher_key: Option<TreeHeadVerifier>,
    in_progress: AtomicBool,
}

impl GossipAuditor {
    pub fn new(fetcher: Arc<dyn AuditFetcher>, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            fetcher,
            alerts,
            publisher_key: None,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Require tree heads to be signed by this key
    pub fn with_publisher_key(mut self, key: TreeHeadVerifier) -> Self {
        self.publisher_key = Some(key);
        self
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Run one complete audit
    pub async fn audit_once(&self) -> AuditReport {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Audit already in progress, skipping");
            return AuditReport::failed(AuditFailure::InProgress);
        }
        let _guard = InProgressGuard(&self.in_progress);

        let sth = match self.fetcher.get_sth().await {
            Ok(sth) => sth,
            Err(e) => return self.fetch_failed("tree head", e),
        };

        if let Some(key) = &self.publisher_key {
            if let Err(e) = key.verify(&sth) {
                return self.tamper(
                    sth.size,
                    AuditFailure::BadSignature {
                        detail: e.to_string(),
                    },
                );
            }
        }

        let entries = match self.fetcher.get_range(0, sth.size).await {
            Ok(entries) => entries,
            Err(e) => return self.fetch_failed("log range", e),
        };

        if entries.len() as u64 != sth.size {
            return self.tamper(
                sth.size,
                AuditFailure::ShortRange {
                    expected: sth.size,
                    actual: entries.len() as u64,
                },
            );
        }

        let computed = merkle::root(&entries);
        if computed != sth.root {
            return self.tamper(
                sth.size,
                AuditFailure::RootMismatch {
                    expected: sth.root,
                    computed,
                },
            );
        }

        tracing::debug!(size = sth.size, root = %computed, "Append log audit passed");
        AuditReport::passed(sth.size)
    }

    fn tamper(&self, size: u64, failure: AuditFailure) -> AuditReport {
        self.alerts.alert(&AuditAlert {
            kind: LOG_MISMATCH_ALERT,
            size,
            failure: failure.clone(),
        });
        AuditReport::failed(failure)
    }

    fn fetch_failed(&self, what: &str, error: Error) -> AuditReport {
        tracing::warn!(error = %error, "Audit could not fetch {}", what);
        AuditReport::failed(AuditFailure::FetchFailed {
            detail: error.to_string(),
        })
    }
}

/// Fetcher auditing a local log against the latest tree head received by gossip
pub struct LogAuditFetcher {
    log: Arc<dyn AppendLog>,
    head: RwLock<Option<SignedTreeHead>>,
}

impl LogAuditFetcher {
    pub fn new(log: Arc<dyn AppendLog>) -> Self {
        Self {
            log,
            head: RwLock::new(None),
        }
    }

    /// Record a tree head received from the publisher
    pub fn receive_sth(&self, sth: SignedTreeHead) {
        *self.head.write().unwrap_or_else(PoisonError::into_inner) = Some(sth);
    }
}

#[async_trait]
impl AuditFetcher for LogAuditFetcher {
    async fn get_sth(&self) -> Result<SignedTreeHead> {
        self.head
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Transport("No tree head received yet".to_string()))
    }

    async fn get_range(&self, from: u64, to: u64) -> Result<Vec<String>> {
        self.log.range(from, to)
    }
}
