//! Client-side view of the review queue, kept consistent with a polled
//! server listing.
//!
//! An entry the user acts on is hidden at once and remembered as a tombstone.
//! A tombstone suppresses the entry in every later listing until a listing
//! no longer contains it (the delete landed) or the action reports failure
//! (the entry comes back). Listings are applied in request order; a response
//! older than one already applied is dropped, so a slow poll cannot bring
//! back an entry that a newer poll has already shown as gone.
use crate::model::QueueEntry;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Issued by [`QueueView::begin_poll`]; hand it back with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PollTicket(u64);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollDiff {
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
}

impl PollDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionResult {
    /// The server acknowledged the delete (or publish/confirm).
    Succeeded,
    /// The call failed; the entry should be shown again.
    Failed,
}

#[derive(Debug, Default)]
pub struct QueueView {
    /// Keyed by entry id, which follows creation order.
    displayed: BTreeMap<i64, QueueEntry>,
    tombstones: HashSet<i64>,
    /// Entries hidden by an action still in flight, kept for rollback.
    in_flight: HashMap<i64, QueueEntry>,
    next_ticket: u64,
    last_applied: Option<PollTicket>,
}

impl QueueView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.displayed.values()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.displayed.keys().copied().collect()
    }

    pub fn is_tombstoned(&self, id: i64) -> bool {
        self.tombstones.contains(&id)
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn begin_poll(&mut self) -> PollTicket {
        self.next_ticket += 1;
        PollTicket(self.next_ticket)
    }

    /// Merge a server listing. Returns `None` when the response is older
    /// than one already applied.
    pub fn apply_poll(&mut self, ticket: PollTicket, server: &[QueueEntry]) -> Option<PollDiff> {
        if self.last_applied.map_or(false, |last| ticket <= last) {
            return None;
        }
        self.last_applied = Some(ticket);

        let server_ids: HashSet<i64> = server.iter().map(|e| e.id).collect();
        // Absent from the server: the delete landed.
        self.tombstones.retain(|id| server_ids.contains(id));

        let mut diff = PollDiff::default();
        let gone: Vec<i64> = self
            .displayed
            .keys()
            .filter(|id| !server_ids.contains(id))
            .copied()
            .collect();
        for id in gone {
            self.displayed.remove(&id);
            diff.removed.push(id);
        }
        for entry in server {
            if self.tombstones.contains(&entry.id) {
                continue;
            }
            match self.displayed.get_mut(&entry.id) {
                Some(shown) => *shown = entry.clone(),
                None => {
                    self.displayed.insert(entry.id, entry.clone());
                    diff.added.push(entry.id);
                }
            }
        }
        Some(diff)
    }

    /// Hide `id` ahead of the server call. Returns false when it is not
    /// displayed (already actioned or never seen).
    pub fn begin_action(&mut self, id: i64) -> bool {
        let Some(entry) = self.displayed.remove(&id) else {
            return false;
        };
        self.tombstones.insert(id);
        self.in_flight.insert(id, entry);
        true
    }

    /// A failed action shows the entry again, unless a listing has already
    /// cleared its tombstone (the delete landed even though the call failed).
    pub fn action_settled(&mut self, id: i64, result: ActionResult) {
        let entry = self.in_flight.remove(&id);
        if result == ActionResult::Failed && self.tombstones.remove(&id) {
            if let Some(entry) = entry {
                self.displayed.insert(id, entry);
            }
        }
    }
}
