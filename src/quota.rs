//! Per-account resource quotas.
//!
//! The tracker is a pure computation over counts; it exists to fail creating
//! operations fast with a clear signal before a round-trip is wasted. The
//! remote store's own enforcement stays authoritative, so callers must treat
//! a remote `QuotaExceeded` as equally possible even after a local pass.

use strum::IntoEnumIterator;

use crate::model::{NoteFilter, PlanTier};
use crate::store::{RemoteStore, ResourceKind, StoreError, StoreResult};

const BASE_NOTES: u32 = 100;
const BASE_FOLDERS: u32 = 10;
const BASE_FAVORITES: u32 = 10;
const BASE_TAGS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub notes: u32,
    pub folders: u32,
    pub favorites: u32,
    pub tags: u32,
}

impl QuotaLimits {
    pub fn for_plan(plan: PlanTier) -> Self {
        let base = Self {
            notes: BASE_NOTES,
            folders: BASE_FOLDERS,
            favorites: BASE_FAVORITES,
            tags: BASE_TAGS,
        };
        match plan {
            PlanTier::Base => base,
            // Premium doubles every base limit, nothing else changes.
            PlanTier::Premium => Self {
                notes: base.notes * 2,
                folders: base.folders * 2,
                favorites: base.favorites * 2,
                tags: base.tags * 2,
            },
        }
    }

    pub fn limit(&self, resource: ResourceKind) -> u32 {
        match resource {
            ResourceKind::Notes => self.notes,
            ResourceKind::Folders => self.folders,
            ResourceKind::Favorites => self.favorites,
            ResourceKind::Tags => self.tags,
        }
    }
}

/// Current active counts for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    pub notes: u32,
    pub folders: u32,
    pub favorites: u32,
    pub tags: u32,
}

impl QuotaUsage {
    pub fn used(&self, resource: ResourceKind) -> u32 {
        match resource {
            ResourceKind::Notes => self.notes,
            ResourceKind::Folders => self.folders,
            ResourceKind::Favorites => self.favorites,
            ResourceKind::Tags => self.tags,
        }
    }
}

/// Point-in-time usage against plan limits.
///
/// Valid for the moment it was collected; recollect before each creating
/// operation rather than caching across mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub usage: QuotaUsage,
    pub limits: QuotaLimits,
}

impl QuotaSnapshot {
    pub fn new(usage: QuotaUsage, plan: PlanTier) -> Self {
        Self {
            usage,
            limits: QuotaLimits::for_plan(plan),
        }
    }

    /// Count live entities from the store and pair them with the profile's
    /// plan limits.
    pub fn collect(store: &dyn RemoteStore) -> StoreResult<Self> {
        let profile = store.load_profile()?;
        let notes = store.load_notes(&NoteFilter::active())?;
        let favorites = notes.iter().filter(|note| note.favorited).count();
        let usage = QuotaUsage {
            notes: notes.len() as u32,
            folders: store.load_folders()?.len() as u32,
            favorites: favorites as u32,
            tags: store.load_tags()?.len() as u32,
        };
        Ok(Self::new(usage, profile.plan))
    }

    /// Reject the creation of one more `resource` when the limit is already
    /// reached.
    pub fn check(&self, resource: ResourceKind) -> StoreResult<()> {
        let limit = self.limits.limit(resource);
        if self.usage.used(resource) >= limit {
            return Err(StoreError::QuotaExceeded { resource, limit });
        }
        Ok(())
    }

    pub fn remaining(&self, resource: ResourceKind) -> u32 {
        self.limits
            .limit(resource)
            .saturating_sub(self.usage.used(resource))
    }

    /// `(resource, used, limit)` rows for the limits overview display.
    pub fn entries(&self) -> Vec<(ResourceKind, u32, u32)> {
        ResourceKind::iter()
            .map(|resource| {
                (
                    resource,
                    self.usage.used(resource),
                    self.limits.limit(resource),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn premium_doubles_every_base_limit() {
        let base = QuotaLimits::for_plan(PlanTier::Base);
        let premium = QuotaLimits::for_plan(PlanTier::Premium);
        assert_eq!(base.notes, 100);
        assert_eq!(base.folders, 10);
        assert_eq!(base.favorites, 10);
        assert_eq!(base.tags, 50);
        for resource in ResourceKind::iter() {
            assert_eq!(premium.limit(resource), base.limit(resource) * 2);
        }
    }

    #[test]
    fn check_rejects_exactly_at_limit() {
        let snapshot = QuotaSnapshot::new(
            QuotaUsage {
                notes: 100,
                ..QuotaUsage::default()
            },
            PlanTier::Base,
        );
        assert_matches!(
            snapshot.check(ResourceKind::Notes),
            Err(StoreError::QuotaExceeded {
                resource: ResourceKind::Notes,
                limit: 100
            })
        );
    }

    #[test]
    fn check_passes_one_below_limit() {
        let snapshot = QuotaSnapshot::new(
            QuotaUsage {
                notes: 99,
                ..QuotaUsage::default()
            },
            PlanTier::Base,
        );
        assert!(snapshot.check(ResourceKind::Notes).is_ok());
        assert_eq!(snapshot.remaining(ResourceKind::Notes), 1);
    }

    #[test]
    fn entries_cover_all_resources() {
        let snapshot = QuotaSnapshot::new(QuotaUsage::default(), PlanTier::Base);
        let entries = snapshot.entries();
        assert_eq!(entries.len(), 4);
        assert!(entries
            .iter()
            .any(|(resource, _, limit)| *resource == ResourceKind::Tags && *limit == 50));
    }
}
