//! FIFO operation queue with a single in-flight slot.
//!
//! The peripheral handles one GATT operation at a time. Requests wait in
//! the queue until the in-flight operation completes or its deadline
//! passes. Each dispatch gets a fresh [`OperationTicket`] so a completion
//! can only retire the operation it was issued for.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use brew_types::CharacteristicRole;
use tokio::time::Instant;

use crate::error::OperationError;
use crate::events::OperationContext;
use crate::link::OperationTicket;

/// A GATT operation requested by the session or its caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GattOperation {
    Read(CharacteristicRole),
    Write { role: CharacteristicRole, value: f32 },
    EnableNotifications(CharacteristicRole),
}

impl GattOperation {
    pub fn role(&self) -> CharacteristicRole {
        match self {
            GattOperation::Read(role)
            | GattOperation::Write { role, .. }
            | GattOperation::EnableNotifications(role) => *role,
        }
    }

    /// Event context for failures of this operation.
    pub fn context(&self) -> OperationContext {
        match self {
            GattOperation::Read(role) => OperationContext::Read(*role),
            GattOperation::Write { role, .. } => OperationContext::Write(*role),
            GattOperation::EnableNotifications(role) => {
                OperationContext::EnableNotifications(*role)
            }
        }
    }
}

impl fmt::Display for GattOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GattOperation::Write { role, value } => write!(f, "write {} = {}", role, value),
            other => write!(f, "{}", other.context()),
        }
    }
}

/// The operation currently owned by the link.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlight {
    pub ticket: OperationTicket,
    pub operation: GattOperation,
    /// Zero for the first dispatch, incremented per retry.
    pub attempt: u32,
    pub dispatched_at: Instant,
    pub deadline: Instant,
}

#[derive(Debug, Clone)]
struct Queued {
    operation: GattOperation,
    attempt: u32,
}

/// Bounded FIFO with at most one operation in flight.
#[derive(Debug)]
pub struct OperationQueue {
    pending: VecDeque<Queued>,
    in_flight: Option<InFlight>,
    capacity: usize,
    next_ticket: u64,
}

impl OperationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: None,
            capacity,
            next_ticket: 1,
        }
    }

    /// Append a request.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::QueueFull`] when `capacity` requests are
    /// already waiting.
    pub fn push_back(&mut self, operation: GattOperation) -> Result<(), OperationError> {
        if self.pending.len() >= self.capacity {
            return Err(OperationError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.pending.push_back(Queued {
            operation,
            attempt: 0,
        });
        Ok(())
    }

    /// Put a retry at the head of the queue, ahead of newer requests.
    ///
    /// Retries bypass the capacity check; they replace the slot the
    /// operation just released.
    pub fn push_retry(&mut self, operation: GattOperation, attempt: u32) {
        self.pending.push_front(Queued { operation, attempt });
    }

    /// Queue an operation the session issues itself once services resolve.
    /// Capacity only bounds caller requests.
    pub fn push_startup(&mut self, operation: GattOperation) {
        self.pending.push_back(Queued {
            operation,
            attempt: 0,
        });
    }

    /// Move the next request into the in-flight slot.
    ///
    /// Returns `None` if an operation is already in flight or nothing is
    /// waiting.
    pub fn begin_next(&mut self, now: Instant, timeout: Duration) -> Option<&InFlight> {
        if self.in_flight.is_some() {
            return None;
        }
        let queued = self.pending.pop_front()?;
        let ticket = OperationTicket::new(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight = Some(InFlight {
            ticket,
            operation: queued.operation,
            attempt: queued.attempt,
            dispatched_at: now,
            deadline: now + timeout,
        });
        self.in_flight.as_ref()
    }

    /// Retire the in-flight operation if `ticket` matches it.
    pub fn complete(&mut self, ticket: OperationTicket) -> Option<InFlight> {
        match &self.in_flight {
            Some(current) if current.ticket == ticket => self.in_flight.take(),
            _ => None,
        }
    }

    /// Retire the in-flight operation if its deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Option<InFlight> {
        match &self.in_flight {
            Some(current) if current.deadline <= now => self.in_flight.take(),
            _ => None,
        }
    }

    /// Drop the in-flight operation without a completion.
    pub fn abandon(&mut self) -> Option<InFlight> {
        self.in_flight.take()
    }

    /// Discard everything; returns how many operations were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len() + usize::from(self.in_flight.is_some());
        self.pending.clear();
        self.in_flight = None;
        dropped
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    /// Deadline of the in-flight operation.
    pub fn deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|op| op.deadline)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Number of requests waiting behind the in-flight slot.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REALTIME: CharacteristicRole = CharacteristicRole::RealtimeTemperature;
    const DESTINATION: CharacteristicRole = CharacteristicRole::DestinationTemperature;
    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn test_single_in_flight() {
        let mut queue = OperationQueue::new(4);
        queue.push_back(GattOperation::Read(REALTIME)).unwrap();
        queue.push_back(GattOperation::Read(DESTINATION)).unwrap();

        let now = Instant::now();
        let first = queue.begin_next(now, TIMEOUT).cloned().unwrap();
        assert_eq!(first.operation, GattOperation::Read(REALTIME));
        assert!(queue.begin_next(now, TIMEOUT).is_none());
        assert_eq!(queue.pending_len(), 1);

        assert!(queue.complete(first.ticket).is_some());
        let second = queue.begin_next(now, TIMEOUT).cloned().unwrap();
        assert_eq!(second.operation, GattOperation::Read(DESTINATION));
        assert!(second.ticket > first.ticket);
    }

    #[test]
    fn test_complete_with_wrong_ticket_is_ignored() {
        let mut queue = OperationQueue::new(4);
        queue.push_back(GattOperation::Read(REALTIME)).unwrap();
        let ticket = queue.begin_next(Instant::now(), TIMEOUT).unwrap().ticket;

        assert!(queue.complete(OperationTicket::new(ticket.value() + 7)).is_none());
        assert!(!queue.is_idle());
        assert!(queue.complete(ticket).is_some());
        assert!(queue.is_idle());
        assert!(queue.complete(ticket).is_none());
    }

    #[test]
    fn test_capacity() {
        let mut queue = OperationQueue::new(2);
        queue.push_back(GattOperation::Read(REALTIME)).unwrap();
        queue.push_back(GattOperation::Read(REALTIME)).unwrap();
        let err = queue.push_back(GattOperation::Read(REALTIME)).unwrap_err();
        assert_eq!(err, OperationError::QueueFull { capacity: 2 });
    }

    #[test]
    fn test_startup_operations_ignore_capacity() {
        let mut queue = OperationQueue::new(1);
        queue.push_startup(GattOperation::EnableNotifications(REALTIME));
        queue.push_startup(GattOperation::Read(REALTIME));
        assert_eq!(queue.pending_len(), 2);
        assert_eq!(
            queue.push_back(GattOperation::Read(REALTIME)).unwrap_err(),
            OperationError::QueueFull { capacity: 1 }
        );

        let first = queue.begin_next(Instant::now(), TIMEOUT).unwrap();
        assert_eq!(first.operation, GattOperation::EnableNotifications(REALTIME));
    }

    #[test]
    fn test_expire() {
        let mut queue = OperationQueue::new(4);
        queue.push_back(GattOperation::EnableNotifications(REALTIME)).unwrap();
        let start = Instant::now();
        queue.begin_next(start, TIMEOUT);

        assert_eq!(queue.deadline(), Some(start + TIMEOUT));
        assert!(queue.expire(start + Duration::from_secs(9)).is_none());
        let expired = queue.expire(start + TIMEOUT).unwrap();
        assert_eq!(expired.operation, GattOperation::EnableNotifications(REALTIME));
        assert!(queue.deadline().is_none());
    }

    #[test]
    fn test_retry_goes_first() {
        let mut queue = OperationQueue::new(4);
        queue.push_back(GattOperation::Read(DESTINATION)).unwrap();
        queue.push_retry(GattOperation::Read(REALTIME), 1);

        let next = queue.begin_next(Instant::now(), TIMEOUT).unwrap();
        assert_eq!(next.operation, GattOperation::Read(REALTIME));
        assert_eq!(next.attempt, 1);
    }

    #[test]
    fn test_clear_counts_everything() {
        let mut queue = OperationQueue::new(4);
        queue.push_back(GattOperation::Read(REALTIME)).unwrap();
        queue
            .push_back(GattOperation::Write {
                role: DESTINATION,
                value: 65.0,
            })
            .unwrap();
        queue.begin_next(Instant::now(), TIMEOUT);

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_idle());
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_operation_display() {
        let write = GattOperation::Write {
            role: DESTINATION,
            value: 65.5,
        };
        assert_eq!(write.to_string(), "write destination = 65.5");
        assert_eq!(GattOperation::Read(REALTIME).to_string(), "read realtime");
        assert_eq!(write.context(), OperationContext::Write(DESTINATION));
    }
}
