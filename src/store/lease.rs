//! Controller lease.
//!
//! A lease blob in the store keeps two controller processes from driving
//! the same plans and state at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ReconcilerError, Result, StoreError};

use super::blob::{BlobStore, Labels};
use super::keys::lease_key;

/// Lease expiry duration in seconds.
pub const LEASE_EXPIRY_SECS: i64 = 60;

/// Information about a held lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseInfo {
    /// Unique lease identifier.
    pub lease_id: String,
    /// Who holds the lease.
    pub holder: String,
    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lease expires unless renewed.
    pub expires_at: DateTime<Utc>,
}

impl LeaseInfo {
    /// Creates a new lease info.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lease_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LEASE_EXPIRY_SECS),
        }
    }

    /// Checks if the lease has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Pushes the expiry forward.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(LEASE_EXPIRY_SECS);
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// A lease held by this process.
pub struct ControllerLease {
    store: Arc<dyn BlobStore>,
    info: LeaseInfo,
}

impl std::fmt::Debug for ControllerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerLease")
            .field("backend", &self.store.backend_type())
            .field("info", &self.info)
            .finish()
    }
}

impl ControllerLease {
    /// Acquires the lease, taking over an expired one.
    ///
    /// # Errors
    ///
    /// Returns `LeasedByOther` if another holder has a live lease.
    pub async fn acquire(store: Arc<dyn BlobStore>, holder: &str) -> Result<Self> {
        let key = lease_key();

        if let Some(existing) = read_lease(store.as_ref()).await? {
            if !existing.is_expired() && existing.holder != holder {
                return Err(ReconcilerError::Store(StoreError::LeasedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Taking over lease previously held by {}", existing.holder);
        }

        let info = LeaseInfo::new(holder);
        write_lease(store.as_ref(), &info).await?;
        info!(
            "Acquired controller lease {} on {key} (expires in {}s)",
            info.lease_id, LEASE_EXPIRY_SECS
        );

        Ok(Self { store, info })
    }

    /// Gets the lease info.
    #[must_use]
    pub const fn info(&self) -> &LeaseInfo {
        &self.info
    }

    /// Renews the lease.
    ///
    /// # Errors
    ///
    /// Returns `LeasedByOther` if the lease was taken over.
    pub async fn renew(&mut self) -> Result<()> {
        if let Some(current) = read_lease(self.store.as_ref()).await?
            && current.lease_id != self.info.lease_id
        {
            warn!("Controller lease was taken over by {}", current.holder);
            return Err(ReconcilerError::Store(StoreError::LeasedByOther {
                holder: current.holder,
                since: current.acquired_at.to_rfc3339(),
            }));
        }

        self.info.refresh();
        write_lease(self.store.as_ref(), &self.info).await?;
        debug!("Renewed controller lease {}", self.info.lease_id);
        Ok(())
    }

    /// Releases the lease if still held.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    pub async fn release(self) -> Result<()> {
        match read_lease(self.store.as_ref()).await? {
            Some(current) if current.lease_id == self.info.lease_id => {
                self.store.delete(&lease_key()).await?;
                info!("Released controller lease {}", self.info.lease_id);
            }
            _ => debug!("Lease {} no longer held, nothing to release", self.info.lease_id),
        }
        Ok(())
    }
}

async fn read_lease(store: &dyn BlobStore) -> Result<Option<LeaseInfo>> {
    match store.get(&lease_key()).await {
        Ok(blob) => serde_json::from_slice(&blob.data).map(Some).map_err(|e| {
            ReconcilerError::Store(StoreError::corrupted(format!("Failed to parse lease: {e}")))
        }),
        Err(ReconcilerError::Store(StoreError::NotFound { .. })) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn write_lease(store: &dyn BlobStore, info: &LeaseInfo) -> Result<()> {
    let content = serde_json::to_vec_pretty(info).map_err(|e| {
        ReconcilerError::Store(StoreError::serialization(format!(
            "Failed to serialize lease: {e}"
        )))
    })?;
    store.replace(&lease_key(), &content, &Labels::new()).await
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}
