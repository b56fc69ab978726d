//! FIFO matchmaking queue
//!
//! Holds tickets for players waiting to be paired. Pairing always takes the
//! longest-waiting ticket first; a repeated request from a waiting player
//! replaces their ticket in place without losing queue position.

use crate::types::{ConnectionId, PlayerTicket, UserId};
use std::collections::VecDeque;

/// Outcome of adding a ticket to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Ticket joined the back of the queue
    Queued,
    /// Player was already waiting; their ticket was refreshed in place
    Replaced,
}

/// FIFO waiting list for unmatched players
#[derive(Debug, Default)]
pub struct MatchQueue {
    waiting: VecDeque<PlayerTicket>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ticket, replacing any existing ticket for the same user in place
    pub fn enqueue(&mut self, ticket: PlayerTicket) -> EnqueueOutcome {
        if let Some(existing) = self
            .waiting
            .iter_mut()
            .find(|t| t.user_id == ticket.user_id)
        {
            *existing = ticket;
            EnqueueOutcome::Replaced
        } else {
            self.waiting.push_back(ticket);
            EnqueueOutcome::Queued
        }
    }

    /// Take the longest-waiting ticket, if any
    pub fn pop_longest_waiting(&mut self) -> Option<PlayerTicket> {
        self.waiting.pop_front()
    }

    /// Remove a waiting ticket by user id; `None` when the user is not waiting
    pub fn cancel(&mut self, user_id: &UserId) -> Option<PlayerTicket> {
        let index = self.waiting.iter().position(|t| &t.user_id == user_id)?;
        self.waiting.remove(index)
    }

    /// Remove a waiting ticket by connection id; `None` when absent
    pub fn cancel_by_connection(&mut self, connection_id: &ConnectionId) -> Option<PlayerTicket> {
        let index = self
            .waiting
            .iter()
            .position(|t| &t.connection_id == connection_id)?;
        self.waiting.remove(index)
    }

    /// Whether the user currently has a waiting ticket
    pub fn contains_user(&self, user_id: &UserId) -> bool {
        self.waiting.iter().any(|t| &t.user_id == user_id)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Snapshot of waiting tickets in queue order
    pub fn waiting_tickets(&self) -> Vec<PlayerTicket> {
        self.waiting.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::current_timestamp;

    fn ticket(user_id: &str, connection_id: &str) -> PlayerTicket {
        PlayerTicket {
            user_id: user_id.to_string(),
            username: format!("{}-name", user_id),
            avatar: None,
            connection_id: connection_id.to_string(),
            enqueued_at: current_timestamp(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = MatchQueue::new();
        assert_eq!(queue.enqueue(ticket("u1", "c1")), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(ticket("u2", "c2")), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(ticket("u3", "c3")), EnqueueOutcome::Queued);

        assert_eq!(queue.pop_longest_waiting().unwrap().user_id, "u1");
        assert_eq!(queue.pop_longest_waiting().unwrap().user_id, "u2");
        assert_eq!(queue.pop_longest_waiting().unwrap().user_id, "u3");
        assert!(queue.pop_longest_waiting().is_none());
    }

    #[test]
    fn test_repeat_enqueue_replaces_in_place() {
        let mut queue = MatchQueue::new();
        queue.enqueue(ticket("u1", "c1"));
        queue.enqueue(ticket("u2", "c2"));

        // u1 reconnects with a new socket but keeps their spot
        assert_eq!(
            queue.enqueue(ticket("u1", "c1-new")),
            EnqueueOutcome::Replaced
        );
        assert_eq!(queue.len(), 2);

        let first = queue.pop_longest_waiting().unwrap();
        assert_eq!(first.user_id, "u1");
        assert_eq!(first.connection_id, "c1-new");
    }

    #[test]
    fn test_cancel() {
        let mut queue = MatchQueue::new();
        queue.enqueue(ticket("u1", "c1"));
        queue.enqueue(ticket("u2", "c2"));

        let removed = queue.cancel(&"u1".to_string());
        assert_eq!(removed.unwrap().user_id, "u1");
        assert_eq!(queue.len(), 1);

        // Cancelling an absent user is a no-op
        assert!(queue.cancel(&"u1".to_string()).is_none());
        assert!(queue.cancel(&"ghost".to_string()).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancel_by_connection() {
        let mut queue = MatchQueue::new();
        queue.enqueue(ticket("u1", "c1"));
        queue.enqueue(ticket("u2", "c2"));

        let removed = queue.cancel_by_connection(&"c2".to_string());
        assert_eq!(removed.unwrap().user_id, "u2");
        assert!(queue
            .cancel_by_connection(&"c-unknown".to_string())
            .is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_contains_and_snapshot() {
        let mut queue = MatchQueue::new();
        queue.enqueue(ticket("u1", "c1"));
        queue.enqueue(ticket("u2", "c2"));

        assert!(queue.contains_user(&"u1".to_string()));
        assert!(!queue.contains_user(&"u9".to_string()));

        let snapshot = queue.waiting_tickets();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].user_id, "u1");
        assert_eq!(snapshot[1].user_id, "u2");
    }
}
