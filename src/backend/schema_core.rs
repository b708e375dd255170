use super::ApplyMode;
use crate::core::{RealmError, Result};
use crate::delta::{DeltaRepo, DeltaSet};
use crate::schema::{MetaCell, RealmMeta};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// Delta-application protocol shared by every backend.
///
/// Owns the realm's schema cell and the delta repository. The repository
/// mutex doubles as the single-writer lock for schema changes.
///
/// `replayed` is the schema the persisted history replays to. It differs
/// from the published schema only in representative mode, and every new
/// set must apply cleanly on top of it before anything is written.
pub struct SchemaCore<R: DeltaRepo> {
    meta: MetaCell,
    replayed: Mutex<RealmMeta>,
    repo: Mutex<R>,
    apply_mode: ApplyMode,
    head_ref: String,
}

impl<R: DeltaRepo> SchemaCore<R> {
    /// Start from an empty schema, built-ins suppressed
    pub fn new(repo: R, apply_mode: ApplyMode, head_ref: &str) -> Self {
        Self {
            meta: MetaCell::new(RealmMeta::new(false)),
            replayed: Mutex::new(RealmMeta::new(false)),
            repo: Mutex::new(repo),
            apply_mode,
            head_ref: head_ref.to_string(),
        }
    }

    /// Rebuild the schema from the repository's history up to the head
    /// reference, applying each persisted delta in order.
    pub fn replay(repo: R, apply_mode: ApplyMode, head_ref: &str) -> Result<Self> {
        let mut meta = RealmMeta::new(false);
        let history = repo.history_to_ref(head_ref)?;
        for delta in &history {
            delta.apply(&mut meta)?;
        }

        info!(deltas = history.len(), head = head_ref, "schema replayed from delta repository");
        Ok(Self {
            replayed: Mutex::new(meta.clone()),
            meta: MetaCell::new(meta),
            repo: Mutex::new(repo),
            apply_mode,
            head_ref: head_ref.to_string(),
        })
    }

    pub fn meta_cell(&self) -> &MetaCell {
        &self.meta
    }

    pub fn getmeta(&self) -> Result<Arc<RealmMeta>> {
        self.meta.snapshot()
    }

    pub fn apply_mode(&self) -> ApplyMode {
        self.apply_mode
    }

    pub fn head_ref(&self) -> &str {
        &self.head_ref
    }

    /// Exclusive access to the delta repository
    pub fn repo(&self) -> Result<MutexGuard<'_, R>> {
        Ok(self.repo.lock()?)
    }

    /// Apply `deltas` to a private copy of the schema, persist them, advance
    /// the head reference, then publish the copy.
    ///
    /// The whole set is first checked in order against the replayed history,
    /// whatever the apply mode, so a written set can always be replayed.
    /// A schema failure aborts before anything is written. A repository
    /// failure leaves the published schema untouched.
    pub fn apply_delta(&self, deltas: DeltaSet) -> Result<()> {
        let Some(first) = deltas.first() else {
            return Err(RealmError::EmptyDeltaSet);
        };

        let mut repo = self.repo.lock()?;
        let mut replayed = self.replayed.lock()?;

        let mut checked = replayed.clone();
        deltas.apply(&mut checked)?;

        let current = self.meta.snapshot()?;
        let mut next = RealmMeta::clone(&current);

        match self.apply_mode {
            ApplyMode::Representative => {
                if deltas.len() > 1 {
                    warn!(
                        deltas = deltas.len(),
                        applied = %first.id(),
                        "multi-delta set applied through its first delta only"
                    );
                }
                first.apply(&mut next)?;
            }
            ApplyMode::Sequential => deltas.apply(&mut next)?,
        }

        repo.write_delta_set(&deltas, &self.head_ref)?;
        *replayed = checked;
        self.meta.publish(next)?;

        if let Some(head) = deltas.head_id() {
            info!(deltas = deltas.len(), head = %head, reference = %self.head_ref, "schema delta applied");
        }
        Ok(())
    }
}
