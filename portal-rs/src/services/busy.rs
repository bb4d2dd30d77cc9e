use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

/// In-flight remediation actions for one organization's dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusyRows {
    /// Any number of uploads can be reprocessing at once.
    pub reprocessing: HashSet<Uuid>,
    /// Deletion tracks a single upload; starting another replaces it.
    pub deleting: Option<Uuid>,
}

impl BusyRows {
    pub fn is_reprocessing(&self, upload_id: Uuid) -> bool {
        self.reprocessing.contains(&upload_id)
    }

    pub fn is_deleting(&self, upload_id: Uuid) -> bool {
        self.deleting == Some(upload_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusyKind {
    Reprocess,
    Delete,
}

/// Busy uploads keyed by organization. The lock is only held to flip
/// membership, never across a remote call.
#[derive(Clone, Default)]
pub struct BusyRegistry {
    orgs: Arc<Mutex<HashMap<Uuid, BusyRows>>>,
}

impl BusyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, BusyRows>> {
        self.orgs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks `upload_id` as reprocessing. `None` if it already is.
    pub fn begin_reprocess(&self, organization_id: Uuid, upload_id: Uuid) -> Option<BusyGuard> {
        let mut orgs = self.lock();
        let rows = orgs.entry(organization_id).or_default();
        if !rows.reprocessing.insert(upload_id) {
            return None;
        }
        Some(self.guard(organization_id, upload_id, BusyKind::Reprocess))
    }

    /// Marks `upload_id` as being deleted. `None` if it already is.
    pub fn begin_delete(&self, organization_id: Uuid, upload_id: Uuid) -> Option<BusyGuard> {
        let mut orgs = self.lock();
        let rows = orgs.entry(organization_id).or_default();
        if rows.is_deleting(upload_id) {
            return None;
        }
        rows.deleting = Some(upload_id);
        Some(self.guard(organization_id, upload_id, BusyKind::Delete))
    }

    pub fn snapshot(&self, organization_id: Uuid) -> BusyRows {
        self.lock()
            .get(&organization_id)
            .cloned()
            .unwrap_or_default()
    }

    fn guard(&self, organization_id: Uuid, upload_id: Uuid, kind: BusyKind) -> BusyGuard {
        BusyGuard {
            registry: self.clone(),
            organization_id,
            upload_id,
            kind,
        }
    }

    fn release(&self, organization_id: Uuid, upload_id: Uuid, kind: BusyKind) {
        let mut orgs = self.lock();
        let Some(rows) = orgs.get_mut(&organization_id) else {
            return;
        };
        match kind {
            BusyKind::Reprocess => {
                rows.reprocessing.remove(&upload_id);
            }
            BusyKind::Delete => {
                if rows.deleting == Some(upload_id) {
                    rows.deleting = None;
                }
            }
        }
        if rows.reprocessing.is_empty() && rows.deleting.is_none() {
            orgs.remove(&organization_id);
        }
    }
}

/// Clears its busy mark when dropped, whatever the action's outcome.
pub struct BusyGuard {
    registry: BusyRegistry,
    organization_id: Uuid,
    upload_id: Uuid,
    kind: BusyKind,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.registry
            .release(self.organization_id, self.upload_id, self.kind);
    }
}
