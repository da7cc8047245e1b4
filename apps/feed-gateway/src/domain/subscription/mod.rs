//! Reference-Counted Registries
//!
//! Domain types for tracking who holds interest in a provider's shared
//! resources. Each registry covers a single provider; the multiplexer keeps
//! one set per provider session.
//!
//! # Design
//!
//! Reference counts are list lengths, not set sizes: a requester that
//! subscribes twice appears twice and must unsubscribe twice. Every mutation
//! reports a [`RefTransition`] so the caller knows when the first reference
//! was acquired (open the upstream resource) or the last one released (close
//! it).
//!
//! - [`LoginRegistry`]: app IDs holding the provider session open
//! - [`SubscriptionRegistry`]: strategies per security holding a tick stream
//! - [`LiveBarRegistry`]: live bar requests and their subscribers
//! - [`HistoricRequestRegistry`]: in-flight historic requests

use std::collections::HashMap;

use super::market::{AppId, BarRequestId, BarSpecification, HistoricRequestId, Security, StrategyId};

// =============================================================================
// Reference Transitions
// =============================================================================

/// Outcome of adding or removing one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTransition {
    /// Count went 0 → 1; the upstream resource must be opened.
    Acquired,
    /// Count grew but was already positive.
    Incremented,
    /// Count shrank but is still positive.
    Decremented,
    /// Count went 1 → 0; the upstream resource must be closed.
    Released,
    /// Nothing matched; no change was made.
    NotFound,
}

impl RefTransition {
    /// Whether this transition opened the resource.
    #[must_use]
    pub const fn is_first(self) -> bool {
        matches!(self, Self::Acquired)
    }

    /// Whether this transition closed the resource.
    #[must_use]
    pub const fn is_last(self) -> bool {
        matches!(self, Self::Released)
    }

    const fn after_add(previous_len: usize) -> Self {
        if previous_len == 0 {
            Self::Acquired
        } else {
            Self::Incremented
        }
    }

    const fn after_remove(remaining_len: usize) -> Self {
        if remaining_len == 0 {
            Self::Released
        } else {
            Self::Decremented
        }
    }
}

/// Remove the first occurrence of `value`, returning whether one was found.
fn remove_one<T: PartialEq>(list: &mut Vec<T>, value: &T) -> bool {
    list.iter()
        .position(|v| v == value)
        .map(|index| list.remove(index))
        .is_some()
}

// =============================================================================
// Login Registry
// =============================================================================

/// App IDs logged in to one provider, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct LoginRegistry {
    apps: Vec<AppId>,
}

impl LoginRegistry {
    /// Record one login.
    pub fn add(&mut self, app: &AppId) -> RefTransition {
        let previous = self.apps.len();
        self.apps.push(app.clone());
        RefTransition::after_add(previous)
    }

    /// Remove one login of `app`.
    pub fn remove(&mut self, app: &AppId) -> RefTransition {
        if remove_one(&mut self.apps, app) {
            RefTransition::after_remove(self.apps.len())
        } else {
            RefTransition::NotFound
        }
    }

    /// Number of logins held (the reference count).
    #[must_use]
    pub fn count(&self) -> usize {
        self.apps.len()
    }

    /// Whether no login is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// All logins in arrival order, duplicates included.
    #[must_use]
    pub fn apps(&self) -> &[AppId] {
        &self.apps
    }

    /// Logged-in apps with duplicates removed, in first-login order.
    #[must_use]
    pub fn distinct_apps(&self) -> Vec<AppId> {
        let mut seen = Vec::with_capacity(self.apps.len());
        for app in &self.apps {
            if !seen.contains(app) {
                seen.push(app.clone());
            }
        }
        seen
    }

    /// Drop every login.
    pub fn clear(&mut self) {
        self.apps.clear();
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Strategies subscribed to each security's tick stream on one provider.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    entries: HashMap<Security, Vec<StrategyId>>,
}

impl SubscriptionRegistry {
    /// Add one reference from `strategy` to `security`.
    ///
    /// Always appends, even if `strategy` is already present.
    pub fn add(&mut self, security: &Security, strategy: &StrategyId) -> RefTransition {
        let list = self.entries.entry(security.clone()).or_default();
        let previous = list.len();
        list.push(strategy.clone());
        RefTransition::after_add(previous)
    }

    /// Remove one reference from `strategy` to `security`.
    ///
    /// The security key is removed when its last reference goes.
    pub fn remove(&mut self, security: &Security, strategy: &StrategyId) -> RefTransition {
        let Some(list) = self.entries.get_mut(security) else {
            return RefTransition::NotFound;
        };

        if !remove_one(list, strategy) {
            return RefTransition::NotFound;
        }

        let transition = RefTransition::after_remove(list.len());
        if transition.is_last() {
            self.entries.remove(security);
        }
        transition
    }

    /// Subscribers of `security` in arrival order, duplicates included.
    #[must_use]
    pub fn subscribers(&self, security: &Security) -> &[StrategyId] {
        self.entries.get(security).map_or(&[], Vec::as_slice)
    }

    /// Reference count for `security`.
    #[must_use]
    pub fn count(&self, security: &Security) -> usize {
        self.subscribers(security).len()
    }

    /// Whether `security` has a key.
    #[must_use]
    pub fn contains(&self, security: &Security) -> bool {
        self.entries.contains_key(security)
    }

    /// Whether no security is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of securities with at least one reference.
    #[must_use]
    pub fn security_count(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over securities and their subscribers.
    pub fn iter(&self) -> impl Iterator<Item = (&Security, &[StrategyId])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Drop every subscription, returning the securities that were active.
    pub fn clear(&mut self) -> Vec<Security> {
        self.entries.drain().map(|(security, _)| security).collect()
    }
}

// =============================================================================
// Live Bar Registry
// =============================================================================

/// A live bar request and the strategies that hold it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveBarSubscription {
    /// Security the bars are built for.
    pub security: Security,
    /// Bar specification.
    pub spec: BarSpecification,
    subscribers: Vec<StrategyId>,
}

impl LiveBarSubscription {
    /// Subscribers in arrival order, duplicates included.
    #[must_use]
    pub fn subscribers(&self) -> &[StrategyId] {
        &self.subscribers
    }

    /// Reference count of this request.
    #[must_use]
    pub fn count(&self) -> usize {
        self.subscribers.len()
    }

    fn matches(&self, security: &Security, spec: &BarSpecification) -> bool {
        &self.security == security && &self.spec == spec
    }
}

/// Errors raised by registry mutations that cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A request ID is already bound to a different security or spec.
    #[error("bar request {request_id} is already registered for {existing}")]
    RequestIdConflict {
        /// The conflicting request ID.
        request_id: BarRequestId,
        /// Description of the existing registration.
        existing: String,
    },
}

/// Live bar requests on one provider.
#[derive(Debug, Default, Clone)]
pub struct LiveBarRegistry {
    entries: HashMap<BarRequestId, LiveBarSubscription>,
}

impl LiveBarRegistry {
    /// Check that `request_id` is free or already bound to the same stream.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::RequestIdConflict` if the ID is bound to a
    /// different security or specification.
    pub fn check(
        &self,
        request_id: &BarRequestId,
        security: &Security,
        spec: &BarSpecification,
    ) -> Result<(), RegistryError> {
        match self.entries.get(request_id) {
            Some(existing) if !existing.matches(security, spec) => {
                Err(RegistryError::RequestIdConflict {
                    request_id: request_id.clone(),
                    existing: format!("{} {}", existing.security, existing.spec),
                })
            }
            _ => Ok(()),
        }
    }

    /// Register or increment a live bar request.
    ///
    /// The returned transition describes the `(security, spec)` stream as a
    /// whole, across all request IDs, so the caller can create the
    /// aggregator exactly once.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::RequestIdConflict` if the ID is bound to a
    /// different security or specification.
    pub fn add(
        &mut self,
        request_id: &BarRequestId,
        security: &Security,
        spec: &BarSpecification,
        strategy: &StrategyId,
    ) -> Result<RefTransition, RegistryError> {
        self.check(request_id, security, spec)?;

        let previous = self.references(security, spec);
        self.entries
            .entry(request_id.clone())
            .or_insert_with(|| LiveBarSubscription {
                security: security.clone(),
                spec: spec.clone(),
                subscribers: Vec::new(),
            })
            .subscribers
            .push(strategy.clone());

        Ok(RefTransition::after_add(previous))
    }

    /// Remove one reference of `strategy` to `request_id`.
    ///
    /// Returns the stream-wide transition and the removed request's security
    /// and spec, or `None` if nothing matched.
    pub fn remove(
        &mut self,
        request_id: &BarRequestId,
        strategy: &StrategyId,
    ) -> Option<(RefTransition, Security, BarSpecification)> {
        let entry = self.entries.get_mut(request_id)?;
        if !remove_one(&mut entry.subscribers, strategy) {
            return None;
        }

        let security = entry.security.clone();
        let spec = entry.spec.clone();
        if entry.subscribers.is_empty() {
            self.entries.remove(request_id);
        }

        let remaining = self.references(&security, &spec);
        Some((RefTransition::after_remove(remaining), security, spec))
    }

    /// Look up a request.
    #[must_use]
    pub fn get(&self, request_id: &str) -> Option<&LiveBarSubscription> {
        self.entries.get(request_id)
    }

    /// Total references to a `(security, spec)` stream across request IDs.
    #[must_use]
    pub fn references(&self, security: &Security, spec: &BarSpecification) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.matches(security, spec))
            .map(LiveBarSubscription::count)
            .sum()
    }

    /// Requests consuming a `(security, spec)` stream.
    pub fn routes<'a>(
        &'a self,
        security: &'a Security,
        spec: &'a BarSpecification,
    ) -> impl Iterator<Item = (&'a BarRequestId, &'a LiveBarSubscription)> + 'a {
        self.entries
            .iter()
            .filter(move |(_, entry)| entry.matches(security, spec))
    }

    /// Iterate over all requests.
    pub fn iter(&self) -> impl Iterator<Item = (&BarRequestId, &LiveBarSubscription)> {
        self.entries.iter()
    }

    /// Number of request IDs registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no request is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every request.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// =============================================================================
// Historic Request Registry
// =============================================================================

/// In-flight historic requests on one provider.
#[derive(Debug, Default, Clone)]
pub struct HistoricRequestRegistry {
    pending: HashMap<HistoricRequestId, StrategyId>,
}

impl HistoricRequestRegistry {
    /// Record a request, returning the strategy previously bound to the ID.
    pub fn insert(&mut self, request_id: &HistoricRequestId, strategy: &StrategyId) -> Option<StrategyId> {
        self.pending.insert(request_id.clone(), strategy.clone())
    }

    /// Remove and return the strategy waiting on `request_id`.
    pub fn take(&mut self, request_id: &str) -> Option<StrategyId> {
        self.pending.remove(request_id)
    }

    /// Strategy waiting on `request_id`, without removing it.
    #[must_use]
    pub fn get(&self, request_id: &str) -> Option<&StrategyId> {
        self.pending.get(request_id)
    }

    /// Number of requests in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no request is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Iterate over pending requests.
    pub fn iter(&self) -> impl Iterator<Item = (&HistoricRequestId, &StrategyId)> {
        self.pending.iter()
    }

    /// Drop every pending request.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
