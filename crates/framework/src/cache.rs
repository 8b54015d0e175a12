use std::fmt;

use thiserror::Error;
use tracing::trace;

use crate::value::Value;

/// Opaque identifier for a cache entry.
///
/// Tickets are issued by [`Cache::make_ticket`] and declare their
/// prerequisite tickets at creation, immutably. Because a new ticket may
/// only name already-existing tickets as prerequisites, the dependency
/// structure is a DAG by construction.
///
/// A ticket is only meaningful to the cache that issued it (or to a clone of
/// that cache, which preserves ticket identity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheTicket(usize);

impl fmt::Display for CacheTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket {}", self.0)
    }
}

/// Errors from cache operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("unknown {ticket}: the cache holds {count} entries")]
    UnknownTicket { ticket: CacheTicket, count: usize },
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// Retained across invalidation; only replaced by the next store.
    value: Option<Value>,
    is_valid: bool,
    prerequisites: Vec<CacheTicket>,
    dependents: Vec<CacheTicket>,
}

impl CacheEntry {
    fn new(prerequisites: Vec<CacheTicket>) -> Self {
        Self {
            value: None,
            is_valid: false,
            prerequisites,
            dependents: Vec::new(),
        }
    }
}

/// A dependency-tracked store of type-erased computation results.
///
/// Entries are keyed by [`CacheTicket`] and are either *valid* (payload
/// observable) or *invalid* (payload absent). [`Cache::invalidate`] marks an
/// entry and every transitive dependent invalid; it never recomputes and
/// never deallocates the stored payload, which stays allocated until the
/// next [`Cache::set`] or [`Cache::swap`] on that entry.
///
/// Cloning a cache deep-copies the values and preserves the ticket identity
/// and dependency topology, so tickets issued by the original address the
/// corresponding entries of the clone. Afterwards the two caches are fully
/// independent.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    entries: Vec<CacheEntry>,
}

impl Cache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries ever allocated.
    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Allocates a fresh ticket whose entry depends on `prerequisites`.
    ///
    /// Reverse edges are recorded from each prerequisite to the new ticket
    /// so invalidation can propagate forward. The new entry starts invalid.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownTicket`] if any prerequisite was not
    /// issued by this cache.
    pub fn make_ticket(&mut self, prerequisites: &[CacheTicket]) -> Result<CacheTicket, CacheError> {
        for &ticket in prerequisites {
            self.entry(ticket)?;
        }

        let ticket = CacheTicket(self.entries.len());
        self.entries.push(CacheEntry::new(prerequisites.to_vec()));
        for &CacheTicket(index) in prerequisites {
            self.entries[index].dependents.push(ticket);
        }

        Ok(ticket)
    }

    /// Stores `value` at `ticket`, marking the entry valid, and returns a
    /// borrow of the stored value.
    ///
    /// Replaces any previous payload. Dependents are *not* invalidated;
    /// callers repopulating an entry after a prior invalidation rely on
    /// exactly that.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownTicket`] if `ticket` is unknown.
    pub fn set(&mut self, ticket: CacheTicket, value: Value) -> Result<&Value, CacheError> {
        let entry = self.entry_mut(ticket)?;
        entry.is_valid = true;
        Ok(&*entry.value.insert(value))
    }

    /// Exchanges the payload at `ticket` for `value`, marking the entry
    /// valid, and returns the previously observable payload if there was one.
    ///
    /// Like [`Cache::set`], this does not invalidate dependents.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownTicket`] if `ticket` is unknown.
    pub fn swap(&mut self, ticket: CacheTicket, value: Value) -> Result<Option<Value>, CacheError> {
        let entry = self.entry_mut(ticket)?;
        let previous = if entry.is_valid {
            entry.value.replace(value)
        } else {
            entry.value = Some(value);
            None
        };
        entry.is_valid = true;
        Ok(previous)
    }

    /// Returns a borrow of the stored value if the entry is valid, else
    /// `None`. Never computes anything.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownTicket`] if `ticket` is unknown.
    pub fn get(&self, ticket: CacheTicket) -> Result<Option<&Value>, CacheError> {
        let entry = self.entry(ticket)?;
        if entry.is_valid {
            Ok(entry.value.as_ref())
        } else {
            Ok(None)
        }
    }

    /// Marks `ticket` and every transitive dependent invalid.
    ///
    /// The walk continues through entries that are already invalid: a leaf
    /// may have been repopulated with [`Cache::set`] after an earlier
    /// invalidation of an intermediate, and a second invalidation of that
    /// intermediate must still reach the leaf. Stored payloads are retained,
    /// merely unreachable through their tickets.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownTicket`] if `ticket` is unknown.
    pub fn invalidate(&mut self, ticket: CacheTicket) -> Result<(), CacheError> {
        self.entry(ticket)?;

        let mut visited = vec![false; self.entries.len()];
        let mut pending = vec![ticket];
        let mut cleared = 0_usize;
        while let Some(CacheTicket(index)) = pending.pop() {
            if visited[index] {
                continue;
            }
            visited[index] = true;
            let entry = &mut self.entries[index];
            entry.is_valid = false;
            cleared += 1;
            pending.extend(
                entry
                    .dependents
                    .iter()
                    .copied()
                    .filter(|&CacheTicket(dependent)| !visited[dependent]),
            );
        }

        trace!(%ticket, cleared, "invalidated cache entries");
        Ok(())
    }

    /// Returns the prerequisites `ticket` was created with.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownTicket`] if `ticket` is unknown.
    pub fn prerequisites(&self, ticket: CacheTicket) -> Result<&[CacheTicket], CacheError> {
        Ok(&self.entry(ticket)?.prerequisites)
    }

    fn entry(&self, ticket: CacheTicket) -> Result<&CacheEntry, CacheError> {
        self.entries.get(ticket.0).ok_or(CacheError::UnknownTicket {
            ticket,
            count: self.entries.len(),
        })
    }

    fn entry_mut(&mut self, ticket: CacheTicket) -> Result<&mut CacheEntry, CacheError> {
        let count = self.entries.len();
        self.entries
            .get_mut(ticket.0)
            .ok_or(CacheError::UnknownTicket { ticket, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(value: i32) -> Value {
        Value::new(value)
    }

    fn unpack(value: &Value) -> i32 {
        *value.downcast_ref().expect("an i32 payload")
    }

    /// A three-entry cache where `t1` depends on `t0` and `t2` on both.
    fn diamond() -> (Cache, CacheTicket, CacheTicket, CacheTicket) {
        let mut cache = Cache::new();
        let t0 = cache.make_ticket(&[]).unwrap();
        let t1 = cache.make_ticket(&[t0]).unwrap();
        let t2 = cache.make_ticket(&[t0, t1]).unwrap();

        cache.set(t0, pack(0)).unwrap();
        cache.set(t1, pack(1)).unwrap();
        cache.set(t2, pack(2)).unwrap();

        (cache, t0, t1, t2)
    }

    #[test]
    fn set_returns_the_stored_value() {
        let mut cache = Cache::new();
        let ticket = cache.make_ticket(&[]).unwrap();

        let stored = cache.set(ticket, pack(42)).unwrap();

        assert_eq!(unpack(stored), 42);
    }

    #[test]
    fn get_returns_the_stored_value() {
        let mut cache = Cache::new();
        let ticket = cache.make_ticket(&[]).unwrap();
        cache.set(ticket, pack(42)).unwrap();

        assert_eq!(unpack(cache.get(ticket).unwrap().unwrap()), 42);
    }

    #[test]
    fn get_before_any_set_is_absent() {
        let mut cache = Cache::new();
        let ticket = cache.make_ticket(&[]).unwrap();

        assert!(cache.get(ticket).unwrap().is_none());
    }

    #[test]
    fn swap_returns_and_replaces_the_value() {
        let mut cache = Cache::new();
        let ticket = cache.make_ticket(&[]).unwrap();
        cache.set(ticket, pack(42)).unwrap();

        let previous = cache.swap(ticket, pack(43)).unwrap();

        assert_eq!(unpack(&previous.unwrap()), 42);
        assert_eq!(unpack(cache.get(ticket).unwrap().unwrap()), 43);
    }

    #[test]
    fn swap_on_an_invalid_entry_returns_none() {
        let (mut cache, _, t1, _) = diamond();
        cache.invalidate(t1).unwrap();

        let previous = cache.swap(t1, pack(10)).unwrap();

        assert!(previous.is_none());
        assert_eq!(unpack(cache.get(t1).unwrap().unwrap()), 10);
    }

    #[test]
    fn invalidation_is_recursive() {
        let (mut cache, t0, t1, t2) = diamond();

        cache.invalidate(t1).unwrap();

        assert_eq!(unpack(cache.get(t0).unwrap().unwrap()), 0);
        assert!(cache.get(t1).unwrap().is_none());
        assert!(cache.get(t2).unwrap().is_none());
    }

    #[test]
    fn invalidation_does_not_stop_on_invalid_entries() {
        let (mut cache, _, t1, t2) = diamond();
        cache.invalidate(t1).unwrap();

        // Repopulate the leaf without touching the middle, then invalidate
        // the middle again: the walk must still reach the leaf.
        cache.set(t2, pack(76)).unwrap();
        cache.invalidate(t1).unwrap();

        assert!(cache.get(t2).unwrap().is_none());
    }

    #[test]
    fn invalidation_does_not_delete_the_payload() {
        let (mut cache, _, t1, _) = diamond();
        let snapshot = cache.get(t1).unwrap().unwrap().clone();

        cache.invalidate(t1).unwrap();

        assert!(cache.get(t1).unwrap().is_none());
        assert_eq!(unpack(&snapshot), 1);
    }

    #[test]
    fn clone_preserves_values_and_topology() {
        let (cache, t0, t1, t2) = diamond();

        let mut clone = cache.clone();
        assert_eq!(unpack(clone.get(t0).unwrap().unwrap()), 0);
        assert_eq!(unpack(clone.get(t1).unwrap().unwrap()), 1);
        assert_eq!(unpack(clone.get(t2).unwrap().unwrap()), 2);

        clone.invalidate(t0).unwrap();
        assert!(clone.get(t0).unwrap().is_none());
        assert!(clone.get(t1).unwrap().is_none());
        assert!(clone.get(t2).unwrap().is_none());

        // The original is unaffected.
        assert_eq!(unpack(cache.get(t0).unwrap().unwrap()), 0);
        assert_eq!(unpack(cache.get(t1).unwrap().unwrap()), 1);
        assert_eq!(unpack(cache.get(t2).unwrap().unwrap()), 2);
    }

    #[test]
    fn mutating_the_original_leaves_the_clone_alone() {
        let (mut cache, t0, _, _) = diamond();
        let clone = cache.clone();

        cache.invalidate(t0).unwrap();

        assert_eq!(unpack(clone.get(t0).unwrap().unwrap()), 0);
    }

    #[test]
    fn prerequisites_must_exist() {
        let mut cache = Cache::new();
        let t0 = cache.make_ticket(&[]).unwrap();

        let mut other = Cache::new();
        let foreign = other.make_ticket(&[]).unwrap();
        let foreign = other.make_ticket(&[foreign]).unwrap();

        let result = cache.make_ticket(&[t0, foreign]);

        assert_eq!(
            result,
            Err(CacheError::UnknownTicket {
                ticket: foreign,
                count: 1,
            })
        );
        assert_eq!(cache.num_entries(), 1);
    }

    #[test]
    fn tickets_never_depend_on_themselves() {
        let (cache, t0, t1, t2) = diamond();

        // Prerequisites can only name earlier tickets, so no transitive
        // prerequisite chain can loop back.
        for &ticket in &[t0, t1, t2] {
            assert!(!cache.prerequisites(ticket).unwrap().contains(&ticket));
        }
        assert_eq!(cache.prerequisites(t2).unwrap(), &[t0, t1]);
    }

    #[test]
    fn operations_on_unknown_tickets_fail() {
        let mut other = Cache::new();
        for _ in 0..3 {
            other.make_ticket(&[]).unwrap();
        }
        let stranger = other.make_ticket(&[]).unwrap();

        let mut cache = Cache::new();
        cache.make_ticket(&[]).unwrap();

        assert!(cache.get(stranger).is_err());
        assert!(cache.set(stranger, pack(1)).is_err());
        assert!(cache.swap(stranger, pack(1)).is_err());
        assert!(cache.invalidate(stranger).is_err());
    }
}
