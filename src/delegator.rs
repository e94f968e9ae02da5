// # Resource Delegation
//
// Ownership table for the resources sequences contend on, plus the
// conflict arbitration consulted at admission and at drain.
//
// Ownership is taken at admission for Allow/Override resolutions; a Queue
// resolution defers the transfer until the request reaches the queue head.
// Release happens on the owning request's terminal event.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::Priority;

/// How an admission contending on an owned resource is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    Allow,
    Override,
    Queue,
    Reject,
}

/// Result of a conflict check. `incumbent` names the owning instance when
/// the resolution displaces it.
#[derive(Debug, Clone)]
pub struct ConflictCheck {
    pub has_conflict: bool,
    pub resolution: ConflictResolution,
    pub reason: String,
    pub incumbent: Option<String>,
}

impl ConflictCheck {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            has_conflict: false,
            resolution: ConflictResolution::Allow,
            reason: reason.into(),
            incumbent: None,
        }
    }
}

/// Current owner of a resource.
#[derive(Debug, Clone)]
pub struct ResourceOwnership {
    pub instance_id: String,
    pub symphony_name: String,
    pub priority: Priority,
    pub since: Instant,
}

pub struct ResourceDelegator {
    ownership: RwLock<HashMap<String, ResourceOwnership>>,
    // Resources configured to reject rather than queue contending requests.
    strict_resources: HashSet<String>,
}

impl ResourceDelegator {
    pub fn new() -> Self {
        Self::with_strict_resources(HashSet::new())
    }

    pub fn with_strict_resources(strict_resources: HashSet<String>) -> Self {
        Self {
            ownership: RwLock::new(HashMap::new()),
            strict_resources,
        }
    }

    /// Arbitrate an incoming request against the current owner of
    /// `resource_id`. Rules are evaluated top-down.
    pub fn check_conflict(
        &self,
        resource_id: &str,
        instance_id: &str,
        symphony_name: &str,
        priority: Priority,
    ) -> ConflictCheck {
        let ownership = self.ownership.read();
        let Some(owner) = ownership.get(resource_id) else {
            return ConflictCheck::allow("resource is unowned");
        };

        if owner.instance_id == instance_id {
            return ConflictCheck::allow("re-entry by owning instance");
        }

        if priority == Priority::High && owner.priority != Priority::High {
            return ConflictCheck {
                has_conflict: true,
                resolution: ConflictResolution::Override,
                reason: format!(
                    "HIGH priority overrides {} owner of {}",
                    owner.priority, resource_id
                ),
                incumbent: Some(owner.instance_id.clone()),
            };
        }

        if priority == Priority::Chained && owner.symphony_name == symphony_name {
            return ConflictCheck {
                has_conflict: true,
                resolution: ConflictResolution::Queue,
                reason: format!("chained continuation of symphony {}", symphony_name),
                incumbent: None,
            };
        }

        if self.strict_resources.contains(resource_id) {
            return ConflictCheck {
                has_conflict: true,
                resolution: ConflictResolution::Reject,
                reason: format!("resource {} is strict and currently owned", resource_id),
                incumbent: None,
            };
        }

        ConflictCheck {
            has_conflict: true,
            resolution: ConflictResolution::Queue,
            reason: format!("resource {} owned by {}", resource_id, owner.instance_id),
            incumbent: None,
        }
    }

    /// Take (or re-take) ownership of a resource for an instance.
    pub fn acquire(
        &self,
        resource_id: &str,
        instance_id: &str,
        symphony_name: &str,
        priority: Priority,
    ) {
        let mut ownership = self.ownership.write();
        let previous = ownership.insert(
            resource_id.to_string(),
            ResourceOwnership {
                instance_id: instance_id.to_string(),
                symphony_name: symphony_name.to_string(),
                priority,
                since: Instant::now(),
            },
        );
        match previous {
            Some(prior) if prior.instance_id != instance_id => {
                info!(
                    resource = resource_id,
                    from = %prior.instance_id,
                    to = instance_id,
                    "resource ownership transferred"
                );
            }
            None => debug!(resource = resource_id, owner = instance_id, "resource acquired"),
            _ => {}
        }
    }

    /// Release a resource if `instance_id` still owns it. Releasing after
    /// an override is a no-op because ownership already moved on.
    pub fn release(&self, resource_id: &str, instance_id: &str) -> bool {
        let mut ownership = self.ownership.write();
        match ownership.get(resource_id) {
            Some(owner) if owner.instance_id == instance_id => {
                ownership.remove(resource_id);
                debug!(resource = resource_id, owner = instance_id, "resource released");
                true
            }
            _ => false,
        }
    }

    pub fn owner(&self, resource_id: &str) -> Option<ResourceOwnership> {
        self.ownership.read().get(resource_id).cloned()
    }

    pub fn owned_count(&self) -> usize {
        self.ownership.read().len()
    }
}

impl Default for ResourceDelegator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unowned_resource_allows() {
        let delegator = ResourceDelegator::new();
        let check = delegator.check_conflict("elem-1", "i1", "Canvas", Priority::Normal);
        assert!(!check.has_conflict);
        assert_eq!(check.resolution, ConflictResolution::Allow);
    }

    #[test]
    fn test_reentry_allows() {
        let delegator = ResourceDelegator::new();
        delegator.acquire("elem-1", "i1", "Canvas", Priority::Normal);
        let check = delegator.check_conflict("elem-1", "i1", "Canvas", Priority::Normal);
        assert_eq!(check.resolution, ConflictResolution::Allow);
    }

    #[test]
    fn test_high_overrides_non_high_owner() {
        let delegator = ResourceDelegator::new();
        delegator.acquire("elem-1", "i1", "Canvas", Priority::Normal);
        let check = delegator.check_conflict("elem-1", "i2", "Canvas", Priority::High);
        assert_eq!(check.resolution, ConflictResolution::Override);
        assert_eq!(check.incumbent.as_deref(), Some("i1"));

        // HIGH vs HIGH queues instead of overriding.
        delegator.acquire("elem-1", "i2", "Canvas", Priority::High);
        let check = delegator.check_conflict("elem-1", "i3", "Canvas", Priority::High);
        assert_eq!(check.resolution, ConflictResolution::Queue);
    }

    #[test]
    fn test_chained_same_symphony_queues() {
        let delegator = ResourceDelegator::new();
        delegator.acquire("elem-1", "i1", "Canvas", Priority::Normal);
        let check = delegator.check_conflict("elem-1", "i2", "Canvas", Priority::Chained);
        assert_eq!(check.resolution, ConflictResolution::Queue);
        assert!(check.reason.contains("chained"));
    }

    #[test]
    fn test_default_queue_and_strict_reject() {
        let strict = ResourceDelegator::with_strict_resources(
            ["elem-strict".to_string()].into_iter().collect(),
        );
        strict.acquire("elem-strict", "i1", "Canvas", Priority::Normal);
        strict.acquire("elem-free", "i1", "Canvas", Priority::Normal);

        let rejected = strict.check_conflict("elem-strict", "i2", "Canvas", Priority::Normal);
        assert_eq!(rejected.resolution, ConflictResolution::Reject);

        let queued = strict.check_conflict("elem-free", "i2", "Canvas", Priority::Normal);
        assert_eq!(queued.resolution, ConflictResolution::Queue);
    }

    #[test]
    fn test_release_only_by_owner() {
        let delegator = ResourceDelegator::new();
        delegator.acquire("elem-1", "i1", "Canvas", Priority::Normal);

        assert!(!delegator.release("elem-1", "i2"));
        assert!(delegator.owner("elem-1").is_some());

        assert!(delegator.release("elem-1", "i1"));
        assert!(delegator.owner("elem-1").is_none());
        assert_eq!(delegator.owned_count(), 0);
    }

    #[test]
    fn test_release_after_override_is_noop() {
        let delegator = ResourceDelegator::new();
        delegator.acquire("elem-1", "i1", "Canvas", Priority::Normal);
        delegator.acquire("elem-1", "i2", "Canvas", Priority::High);

        assert!(!delegator.release("elem-1", "i1"));
        assert_eq!(delegator.owner("elem-1").unwrap().instance_id, "i2");
    }
}
