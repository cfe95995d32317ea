//! Acknowledgment tracking, retransmission, failover, and duplicate suppression.
//!
//! ## Pending Packet States
//!
//! ```text
//!            timeout, attempts < MAX
//!           +------------------------+
//!           v                        |
//! send -> [Sent(pin, attempts)] -----+
//!           |  \
//!      ack  |   \ timeout, attempts == MAX (or pin gone)
//!           v    v
//!      removed  remove pin's connection
//!                 |-- table not empty -> Sent(first pin, 1)
//!                 '-- table empty      -> dropped, NeighborExhausted
//! ```
//!
//! Pending identity is the packet checksum. A packet already pending is not
//! registered twice, and an acknowledgment clears it whatever id it carries.

use alloc::vec::Vec;

use crate::config::NodeConfig;
use crate::node::Node;
use crate::packet::Packet;
use crate::routing::RoutingTable;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Handler, Pins, Random};
use crate::types::{Error, Event, Pin};
use crate::wire::Frame;

/// A transmitted packet awaiting acknowledgment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingPacket {
    pub packet: Packet,
    /// Pin of the most recent transmission.
    pub pin: Pin,
    /// Transmissions on the current pin.
    pub attempts: u8,
    pub last_sent: Timestamp,
}

/// What a retry scan decided for one pending packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryAction {
    /// Send again on the same pin.
    Retransmit { packet: Packet, pin: Pin, attempt: u8 },
    /// `from` gave up; send on `to` with attempts reset.
    Failover {
        packet: Packet,
        from: Pin,
        to: Pin,
        /// Whether this scan removed the connection on `from`.
        removed: bool,
    },
    /// No neighbor left; the packet was dropped.
    Exhausted {
        packet: Packet,
        pin: Pin,
        removed: bool,
    },
}

/// Bounded set of in-flight packets, oldest first.
#[derive(Clone, Debug)]
pub struct PendingSet {
    entries: Vec<PendingPacket>,
    capacity: usize,
}

impl PendingSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, checksum: u16) -> Option<&PendingPacket> {
        self.entries.iter().find(|p| p.packet.checksum() == checksum)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingPacket> {
        self.entries.iter()
    }

    /// Track a first transmission. No-op if the checksum is already pending.
    ///
    /// Returns the entry evicted to make room, if any.
    pub fn register(&mut self, packet: Packet, pin: Pin, now: Timestamp) -> Option<PendingPacket> {
        if self.get(packet.checksum()).is_some() || self.capacity == 0 {
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            Some(self.entries.remove(0))
        } else {
            None
        };

        self.entries.push(PendingPacket {
            packet,
            pin,
            attempts: 1,
            last_sent: now,
        });
        evicted
    }

    /// Remove the entry matching an acknowledgment.
    ///
    /// Matches on the checksum alone. The id travels outside the checksummed
    /// bytes, so the receiver may ack a corrupted id for a packet it did get.
    pub fn acknowledge(&mut self, checksum: u16) -> Option<PendingPacket> {
        let index = self
            .entries
            .iter()
            .position(|p| p.packet.checksum() == checksum)?;
        Some(self.entries.remove(index))
    }

    /// Record when a (re)transmission finished.
    pub fn mark_sent(&mut self, checksum: u16, now: Timestamp) {
        if let Some(entry) = self.entries.iter_mut().find(|p| p.packet.checksum() == checksum) {
            entry.last_sent = now;
        }
    }

    /// Advance every timed-out entry one step.
    ///
    /// Failover removes connections from `table`. The caller performs the
    /// transmissions and then calls [`mark_sent`](Self::mark_sent).
    pub fn scan(
        &mut self,
        now: Timestamp,
        timeout: Duration,
        max_attempts: u8,
        table: &mut RoutingTable,
    ) -> Vec<RetryAction> {
        let mut actions = Vec::new();

        self.entries.retain_mut(|entry| {
            if now.saturating_sub(entry.last_sent) <= timeout {
                return true;
            }

            let pin_alive = table.contains_pin(entry.pin);
            if pin_alive && entry.attempts < max_attempts {
                entry.attempts += 1;
                entry.last_sent = now;
                actions.push(RetryAction::Retransmit {
                    packet: entry.packet.clone(),
                    pin: entry.pin,
                    attempt: entry.attempts,
                });
                return true;
            }

            let removed = table.remove_pin(entry.pin).is_some();
            match table.first() {
                Some(next) => {
                    let from = entry.pin;
                    entry.pin = next.pin;
                    entry.attempts = 1;
                    entry.last_sent = now;
                    actions.push(RetryAction::Failover {
                        packet: entry.packet.clone(),
                        from,
                        to: entry.pin,
                        removed,
                    });
                    true
                }
                None => {
                    actions.push(RetryAction::Exhausted {
                        packet: entry.packet.clone(),
                        pin: entry.pin,
                        removed,
                    });
                    false
                }
            }
        });

        actions
    }
}

/// Fixed-size ring of recently seen packet ids.
#[derive(Clone, Debug)]
pub struct RecentIds {
    slots: Vec<Option<u16>>,
    next: usize,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: alloc::vec![None; capacity],
            next: 0,
        }
    }

    pub fn contains(&self, id: u16) -> bool {
        self.slots.contains(&Some(id))
    }

    /// Record `id`, overwriting the oldest slot.
    pub fn insert(&mut self, id: u16) {
        if self.slots.is_empty() {
            return;
        }
        self.slots[self.next] = Some(id);
        self.next = (self.next + 1) % self.slots.len();
    }

    /// Returns true if `id` was already present. Records it otherwise.
    pub fn check_and_insert(&mut self, id: u16) -> bool {
        if self.contains(id) {
            return true;
        }
        self.insert(id);
        false
    }
}

impl<P, Clk, R, H, Cfg> Node<P, Clk, R, H, Cfg>
where
    P: Pins,
    Clk: Clock,
    R: Random,
    H: Handler,
    Cfg: NodeConfig,
{
    pub(crate) fn register_pending(&mut self, packet: Packet, pin: Pin, now: Timestamp) {
        if let Some(evicted) = self.pending_mut().register(packet, pin, now) {
            emit_debug!(
                self,
                PendingEvicted {
                    id: evicted.packet.id(),
                    checksum: evicted.packet.checksum(),
                }
            );
            self.metrics_mut().packets_dropped += 1;
        }
    }

    /// `RETURN_OK` arrived on `pin`.
    pub(crate) fn handle_ack(&mut self, pin: Pin, id: u16, checksum: u16) {
        self.metrics_mut().acks_received += 1;
        let matched = self.pending_mut().acknowledge(checksum).is_some();
        emit_debug!(
            self,
            AckReceived {
                pin,
                id,
                checksum,
                matched,
            }
        );
    }

    /// Retransmit, fail over, or drop timed-out packets.
    pub(crate) fn check_pending(&mut self) {
        let now = self.now();
        let timeout = Cfg::resend_timeout();

        for action in self.scan_pending(now, timeout, Cfg::MAX_ATTEMPTS) {
            match action {
                RetryAction::Retransmit {
                    packet,
                    pin,
                    attempt,
                } => {
                    emit_debug!(
                        self,
                        Retransmit {
                            checksum: packet.checksum(),
                            pin,
                            attempt,
                        }
                    );
                    self.metrics_mut().retransmissions += 1;
                    self.resend(packet, pin);
                }
                RetryAction::Failover {
                    packet,
                    from,
                    to,
                    removed,
                } => {
                    emit_debug!(
                        self,
                        Failover {
                            checksum: packet.checksum(),
                            from,
                            to,
                        }
                    );
                    self.metrics_mut().failovers += 1;
                    if removed {
                        self.notify(Event::ConnectionRemoved { pin: from });
                    }
                    self.notify(Event::Rerouted {
                        checksum: packet.checksum(),
                        from,
                        to,
                    });
                    self.resend(packet, to);
                }
                RetryAction::Exhausted {
                    packet,
                    pin,
                    removed,
                } => {
                    emit_debug!(
                        self,
                        Exhausted {
                            id: packet.id(),
                            checksum: packet.checksum(),
                            pin,
                        }
                    );
                    self.metrics_mut().packets_dropped += 1;
                    if removed {
                        self.notify(Event::ConnectionRemoved { pin });
                    }
                    let error = Error::NeighborExhausted {
                        id: packet.id(),
                        checksum: packet.checksum(),
                        pin,
                    };
                    self.handler_mut().on_error(&error);
                }
            }
        }
    }

    fn resend(&mut self, packet: Packet, pin: Pin) {
        let checksum = packet.checksum();
        self.transmit(pin, &Frame::Data(packet));
        let now = self.now();
        self.pending_mut().mark_sent(checksum, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Connection};

    const TIMEOUT: Duration = Duration::from_millis(2000);

    fn packet(id: u16, data: &[u8]) -> Packet {
        Packet::with_data(Address::from_slice(&[1, 9]).unwrap(), data, id).unwrap()
    }

    fn table(pins: &[Pin]) -> RoutingTable {
        RoutingTable::from_connections(
            pins.iter()
                .map(|&pin| Connection::new(Address::from_slice(&[pin as u16]).unwrap(), pin)),
        )
    }

    fn after(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn test_no_action_before_timeout() {
        let mut set = PendingSet::new(4);
        let mut t = table(&[1]);
        set.register(packet(1, b"a"), 1, after(0));

        // Strictly greater than the timeout is required.
        assert!(set.scan(after(2000), TIMEOUT, 3, &mut t).is_empty());
        assert_eq!(set.get(packet(1, b"a").checksum()).unwrap().attempts, 1);
    }

    #[test]
    fn test_retransmit_then_failover() {
        let mut set = PendingSet::new(4);
        let mut t = table(&[1, 2]);
        let p = packet(1, b"a");
        set.register(p.clone(), 1, after(0));

        let actions = set.scan(after(2001), TIMEOUT, 3, &mut t);
        assert_eq!(
            actions,
            [RetryAction::Retransmit {
                packet: p.clone(),
                pin: 1,
                attempt: 2
            }]
        );

        let actions = set.scan(after(4002), TIMEOUT, 3, &mut t);
        assert_eq!(
            actions,
            [RetryAction::Retransmit {
                packet: p.clone(),
                pin: 1,
                attempt: 3
            }]
        );

        // Third timeout: pin 1 is declared dead.
        let actions = set.scan(after(6003), TIMEOUT, 3, &mut t);
        assert_eq!(
            actions,
            [RetryAction::Failover {
                packet: p.clone(),
                from: 1,
                to: 2,
                removed: true
            }]
        );
        assert!(!t.contains_pin(1));

        let entry = set.get(p.checksum()).unwrap();
        assert_eq!(entry.pin, 2);
        assert_eq!(entry.attempts, 1);
    }

    #[test]
    fn test_exhausted_when_table_empties() {
        let mut set = PendingSet::new(4);
        let mut t = table(&[1]);
        let p = packet(7, b"z");
        set.register(p.clone(), 1, after(0));

        set.scan(after(2001), TIMEOUT, 3, &mut t);
        set.scan(after(4002), TIMEOUT, 3, &mut t);
        let actions = set.scan(after(6003), TIMEOUT, 3, &mut t);

        assert_eq!(
            actions,
            [RetryAction::Exhausted {
                packet: p,
                pin: 1,
                removed: true
            }]
        );
        assert!(set.is_empty());
        assert!(t.is_empty());
    }

    #[test]
    fn test_pin_removed_elsewhere_fails_over_immediately() {
        let mut set = PendingSet::new(4);
        let mut t = table(&[1, 2]);
        let p = packet(3, b"q");
        set.register(p.clone(), 1, after(0));
        t.remove_pin(1);

        let actions = set.scan(after(2001), TIMEOUT, 3, &mut t);
        assert_eq!(
            actions,
            [RetryAction::Failover {
                packet: p,
                from: 1,
                to: 2,
                removed: false
            }]
        );
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_second_packet_on_dead_pin_does_not_remove_twice() {
        let mut set = PendingSet::new(4);
        let mut t = table(&[1, 2, 3]);
        let a = packet(1, b"a");
        let b = packet(2, b"b");
        set.register(a.clone(), 1, after(0));
        set.register(b.clone(), 1, after(0));

        set.scan(after(2001), TIMEOUT, 3, &mut t);
        set.scan(after(4002), TIMEOUT, 3, &mut t);
        let actions = set.scan(after(6003), TIMEOUT, 3, &mut t);

        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], RetryAction::Failover { to: 2, removed: true, .. }));
        assert!(matches!(actions[1], RetryAction::Failover { to: 2, removed: false, .. }));
        assert_eq!(t.pins().collect::<Vec<_>>(), alloc::vec![2, 3]);
    }

    #[test]
    fn test_acknowledge() {
        let mut set = PendingSet::new(4);
        let p = packet(9, b"ack me");
        set.register(p.clone(), 1, after(0));

        assert_eq!(set.acknowledge(p.checksum().wrapping_add(1)), None);
        assert!(set.acknowledge(p.checksum()).is_some());
        assert!(set.is_empty());
        assert_eq!(set.acknowledge(p.checksum()), None);
    }

    #[test]
    fn test_acknowledge_ignores_id() {
        let mut set = PendingSet::new(4);
        let p = packet(0x1234, b"flipped");
        set.register(p.clone(), 1, after(0));

        // The receiver saw id 0x1334 after a bit flip but the same checksum.
        let acked = set.acknowledge(p.checksum()).unwrap();
        assert_eq!(acked.packet.id(), 0x1234);
        assert!(set.is_empty());
    }

    #[test]
    fn test_duplicate_register_is_noop() {
        let mut set = PendingSet::new(4);
        let p = packet(1, b"same");
        set.register(p.clone(), 1, after(0));
        set.register(p.clone(), 2, after(5));

        assert_eq!(set.len(), 1);
        assert_eq!(set.get(p.checksum()).unwrap().pin, 1);
    }

    #[test]
    fn test_full_set_evicts_oldest() {
        let mut set = PendingSet::new(2);
        let a = packet(1, b"a");
        let b = packet(2, b"b");
        let c = packet(3, b"c");
        assert_eq!(set.register(a.clone(), 1, after(0)), None);
        assert_eq!(set.register(b.clone(), 1, after(1)), None);

        let evicted = set.register(c.clone(), 1, after(2)).unwrap();
        assert_eq!(evicted.packet, a);
        assert_eq!(set.len(), 2);
        assert!(set.get(c.checksum()).is_some());
    }

    #[test]
    fn test_mark_sent_restarts_timer() {
        let mut set = PendingSet::new(4);
        let mut t = table(&[1]);
        let p = packet(1, b"slow");
        set.register(p.clone(), 1, after(0));
        set.mark_sent(p.checksum(), after(500));

        assert!(set.scan(after(2001), TIMEOUT, 3, &mut t).is_empty());
        assert_eq!(set.scan(after(2501), TIMEOUT, 3, &mut t).len(), 1);
    }

    #[test]
    fn test_recent_ids_detects_duplicates() {
        let mut ids = RecentIds::new(16);
        assert!(!ids.check_and_insert(42));
        assert!(ids.check_and_insert(42));
        assert!(!ids.check_and_insert(43));
    }

    #[test]
    fn test_recent_ids_forgets_oldest() {
        let mut ids = RecentIds::new(3);
        for id in [1, 2, 3] {
            assert!(!ids.check_and_insert(id));
        }
        // Overwrites slot holding 1.
        assert!(!ids.check_and_insert(4));
        assert!(!ids.contains(1));
        assert!(ids.contains(2) && ids.contains(3) && ids.contains(4));
    }

    #[test]
    fn test_recent_ids_zero_capacity() {
        let mut ids = RecentIds::new(0);
        assert!(!ids.check_and_insert(1));
        assert!(!ids.check_and_insert(1));
    }
}
