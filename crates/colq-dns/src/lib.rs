// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::net::SocketAddr;

use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// DnsError
// ---------------------------------------------------------------------------

/// Failures of the rotation pool.
#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    /// Hostname resolution failed or produced no addresses.
    #[error("failed to resolve {hostname}: {detail}")]
    Resolve {
        /// The hostname that was being resolved.
        hostname: String,
        /// Human-readable failure detail.
        detail: String,
    },
    /// Every resolved address has already been used by this query.
    #[error("no unused dns records remain for {hostname}")]
    RecordsExhausted {
        /// The hostname the pool was created for.
        hostname: String,
    },
}

// ---------------------------------------------------------------------------
// DnsPool
// ---------------------------------------------------------------------------

/// One resolved address and whether an attempt has used it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    /// The resolved socket address.
    pub addr: SocketAddr,
    /// Marked once an attempt has been dispatched to this address.
    /// Monotonic within one logical query.
    pub used: bool,
}

/// Rotation pool over the addresses of one hostname.
///
/// Created per logical query and discarded afterwards. Resolution happens
/// lazily on the first [`DnsPool::maybe_update_and_get`] call and the
/// records are cached for the rest of the query.
#[derive(Debug)]
pub struct DnsPool {
    hostname: String,
    port: u16,
    records: Vec<DnsRecord>,
    resolved: bool,
}

impl DnsPool {
    /// Create an unresolved pool for `hostname:port`.
    #[must_use]
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            records: Vec::new(),
            resolved: false,
        }
    }

    /// Create a pool over an already-resolved record set.
    #[must_use]
    pub fn from_records(hostname: impl Into<String>, addrs: Vec<SocketAddr>) -> Self {
        Self {
            hostname: hostname.into(),
            port: 0,
            records: addrs
                .into_iter()
                .map(|addr| DnsRecord { addr, used: false })
                .collect(),
            resolved: true,
        }
    }

    /// The hostname this pool is for.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Resolve the hostname, replacing the record set.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError::Resolve`] when the lookup fails or yields no
    /// addresses; the caller treats this as a retriable connection error.
    pub async fn resolve(&mut self) -> Result<Vec<SocketAddr>, DnsError> {
        let target = (self.hostname.as_str(), self.port);
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(target)
            .await
            .map_err(|e| DnsError::Resolve {
                hostname: self.hostname.clone(),
                detail: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(DnsError::Resolve {
                hostname: self.hostname.clone(),
                detail: "lookup returned no addresses".to_string(),
            });
        }
        debug!(hostname = %self.hostname, count = addrs.len(), "resolved analytics endpoint");
        self.records = addrs
            .iter()
            .map(|addr| DnsRecord {
                addr: *addr,
                used: false,
            })
            .collect();
        self.resolved = true;
        Ok(addrs)
    }

    /// Resolve on first use, then pick an unused address at random.
    ///
    /// # Errors
    ///
    /// Propagates resolution failures and [`DnsError::RecordsExhausted`].
    pub async fn maybe_update_and_get(&mut self) -> Result<SocketAddr, DnsError> {
        if !self.resolved {
            self.resolve().await?;
        }
        self.get_random()
    }

    /// Pick uniformly at random among the unused records.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError::RecordsExhausted`] when no unused record remains.
    pub fn get_random(&self) -> Result<SocketAddr, DnsError> {
        let available = self.available_records();
        if available.is_empty() {
            return Err(DnsError::RecordsExhausted {
                hostname: self.hostname.clone(),
            });
        }
        Ok(available[fastrand::usize(..available.len())])
    }

    /// Mark an address as used. Resolution can return the same address more
    /// than once; one mark consumes one record. Marking an address the pool
    /// does not know is logged and ignored.
    pub fn mark_used(&mut self, addr: SocketAddr) {
        if let Some(record) = self.records.iter_mut().find(|r| r.addr == addr && !r.used) {
            record.used = true;
        } else if !self.records.iter().any(|r| r.addr == addr) {
            warn!(%addr, hostname = %self.hostname, "mark_used on unknown dns record");
        }
    }

    /// All addresses not yet used by this query.
    #[must_use]
    pub fn available_records(&self) -> Vec<SocketAddr> {
        self.records
            .iter()
            .filter(|r| !r.used)
            .map(|r| r.addr)
            .collect()
    }

    /// Whether resolution has happened.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Number of records (used or not) currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the pool holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
