//! Packet routing over the hierarchical address space.
//!
//! There is no global topology. A node forwards toward whichever neighbor
//! shares the longest address prefix with the destination, which walks the
//! packet toward the least common ancestor and then down toward the target.
//!
//! Each neighbor gets a score: the length of the common prefix minus the
//! components of the neighbor's address left over past that prefix. The
//! strictly best score wins; ties go to the deeper (longer) neighbor address,
//! then to table order.

use alloc::vec::Vec;

use crate::config::NodeConfig;
use crate::node::Node;
use crate::packet::Packet;
use crate::traits::{Clock, Handler, Pins, Random};
use crate::types::{Address, Connection, Error, Pin};
use crate::wire::Frame;

/// Prefix agreement between a neighbor address and a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Length of the common prefix.
    pub positive: usize,
    /// Components of the neighbor address past the common prefix.
    pub negative: usize,
}

impl Match {
    /// Routing score: higher is more aligned with the destination.
    pub fn index(self) -> i32 {
        self.positive as i32 - self.negative as i32
    }
}

/// Compare a neighbor address against a destination.
pub fn match_addresses(connection: &Address, destination: &Address) -> Match {
    let positive = connection
        .components()
        .iter()
        .zip(destination.components())
        .take_while(|(a, b)| a == b)
        .count();

    Match {
        positive,
        negative: connection.len() - positive,
    }
}

/// Shorthand for `match_addresses(connection, destination).index()`.
pub fn match_index(connection: &Address, destination: &Address) -> i32 {
    match_addresses(connection, destination).index()
}

/// Outcome of next-hop selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Destination is this node.
    Local,
    /// Send on this pin.
    Forward(Pin),
    Unreachable,
}

/// Choose where a packet for `destination` goes next.
///
/// A destination below `own` must leave through a neighbor that is itself
/// under `own` (prefix match, own address included); otherwise the packet
/// would be sent back up and is unreachable instead.
pub fn select_next_hop(own: &Address, connections: &[Connection], destination: &Address) -> Route {
    if destination == own {
        return Route::Local;
    }

    let mut best: Option<(&Connection, i32)> = None;
    for connection in connections {
        let index = match_index(&connection.address, destination);
        let better = match best {
            None => true,
            Some((current, best_index)) => {
                index > best_index
                    || (index == best_index && connection.address.len() > current.address.len())
            }
        };
        if better {
            best = Some((connection, index));
        }
    }

    let Some((best, _)) = best else {
        return Route::Unreachable;
    };

    if destination.is_descendant_of(own) && !best.address.starts_with(own) {
        return Route::Unreachable;
    }

    Route::Forward(best.pin)
}

/// Neighbors reachable from this node, in configuration order.
///
/// Each address and each pin appears at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingTable {
    connections: Vec<Connection>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table, skipping connections that repeat an address or pin.
    pub fn from_connections(connections: impl IntoIterator<Item = Connection>) -> Self {
        let mut table = Self::new();
        for connection in connections {
            table.add(connection);
        }
        table
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn get(&self, pin: Pin) -> Option<&Connection> {
        self.connections.iter().find(|c| c.pin == pin)
    }

    pub fn contains_pin(&self, pin: Pin) -> bool {
        self.get(pin).is_some()
    }

    pub fn contains_address(&self, address: &Address) -> bool {
        self.connections.iter().any(|c| &c.address == address)
    }

    /// Add a neighbor. Returns false if its address or pin is already taken.
    pub fn add(&mut self, connection: Connection) -> bool {
        if self.contains_pin(connection.pin) || self.contains_address(&connection.address) {
            return false;
        }
        self.connections.push(connection);
        true
    }

    /// Remove the neighbor on `pin`, keeping the order of the rest.
    pub fn remove_pin(&mut self, pin: Pin) -> Option<Connection> {
        let index = self.connections.iter().position(|c| c.pin == pin)?;
        Some(self.connections.remove(index))
    }

    /// Failover target: the first remaining neighbor.
    pub fn first(&self) -> Option<&Connection> {
        self.connections.first()
    }

    pub fn pins(&self) -> impl Iterator<Item = Pin> + '_ {
        self.connections.iter().map(|c| c.pin)
    }

    pub fn select_next_hop(&self, own: &Address, destination: &Address) -> Route {
        select_next_hop(own, &self.connections, destination)
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
    /// Deliver, forward, or report a packet that is not a duplicate.
    pub(crate) fn route_packet(&mut self, packet: Packet) {
        let route = self.routing_table().select_next_hop(self.address(), packet.destination());

        match route {
            Route::Local => {
                emit_debug!(
                    self,
                    Delivered {
                        id: packet.id(),
                        checksum: packet.checksum(),
                    }
                );
                self.metrics_mut().delivered += 1;
                self.handler_mut().on_data(packet.payload());
            }
            Route::Forward(pin) => self.forward(packet, pin),
            Route::Unreachable => {
                emit_debug!(
                    self,
                    Unreachable {
                        destination: packet.destination().clone(),
                    }
                );
                self.metrics_mut().unreachable += 1;
                let error = Error::Unreachable {
                    destination: packet.destination().clone(),
                };
                self.handler_mut().on_error(&error);
            }
        }
    }

    /// Transmit on `pin` and track the packet until it is acknowledged.
    fn forward(&mut self, packet: Packet, pin: Pin) {
        emit_debug!(
            self,
            Forwarded {
                id: packet.id(),
                checksum: packet.checksum(),
                destination: packet.destination().clone(),
                pin,
            }
        );
        self.metrics_mut().forwarded += 1;

        self.transmit(pin, &Frame::Data(packet.clone()));
        let now = self.now();
        self.register_pending(packet, pin, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(parts: &[u16]) -> Address {
        Address::from_slice(parts).unwrap()
    }

    fn conn(parts: &[u16], pin: Pin) -> Connection {
        Connection::new(addr(parts), pin)
    }

    fn reference_table() -> Vec<Connection> {
        alloc::vec![conn(&[1, 2, 3], 10), conn(&[1, 2, 4], 11), conn(&[1, 3], 12)]
    }

    #[test]
    fn test_match_self() {
        let cases: [&[u16]; 4] = [&[], &[1], &[4, 2, 9], &[1, 1, 1, 1, 1]];
        for parts in cases {
            let a = addr(parts);
            assert_eq!(
                match_addresses(&a, &a),
                Match {
                    positive: a.len(),
                    negative: 0
                }
            );
            assert_eq!(match_index(&a, &a), a.len() as i32);
        }
    }

    #[test]
    fn test_match_counts_leftover_of_connection_only() {
        // Common prefix [1, 2]; the connection has one extra component.
        let m = match_addresses(&addr(&[1, 2, 3]), &addr(&[1, 2, 5, 6, 7]));
        assert_eq!(m, Match { positive: 2, negative: 1 });
        assert_eq!(m.index(), 1);

        // Connection is a prefix of the destination.
        let m = match_addresses(&addr(&[1, 3]), &addr(&[1, 3, 9]));
        assert_eq!(m, Match { positive: 2, negative: 0 });

        // Diverges at the first component.
        let m = match_addresses(&addr(&[5, 6]), &addr(&[1, 2]));
        assert_eq!(m.index(), -2);
    }

    #[test]
    fn test_local_delivery() {
        let own = addr(&[1, 2, 3]);
        assert_eq!(select_next_hop(&own, &reference_table(), &own), Route::Local);
        assert_eq!(select_next_hop(&own, &[], &own), Route::Local);
    }

    #[test]
    fn test_tie_keeps_first() {
        let own = addr(&[1, 2, 3]);
        assert_eq!(
            select_next_hop(&own, &reference_table(), &addr(&[1, 2, 5])),
            Route::Forward(10)
        );
    }

    #[test]
    fn test_exact_neighbor_wins() {
        let own = addr(&[1, 2, 3]);
        assert_eq!(
            select_next_hop(&own, &reference_table(), &addr(&[1, 2, 4])),
            Route::Forward(11)
        );
    }

    #[test]
    fn test_branch_neighbor_wins() {
        let own = addr(&[1, 2, 3]);
        assert_eq!(
            select_next_hop(&own, &reference_table(), &addr(&[1, 3, 9])),
            Route::Forward(12)
        );
    }

    #[test]
    fn test_prefers_deeper_prefix() {
        let own = addr(&[1, 2]);
        let table = [conn(&[1], 25), conn(&[1, 2], 26)];
        assert_eq!(
            select_next_hop(&own, &table, &addr(&[1, 2, 4])),
            Route::Forward(26)
        );
    }

    #[test]
    fn test_tie_prefers_longer_address() {
        // Against [1, 2, 3]: [1] scores 1 - 0, [1, 2, 8] scores 2 - 1.
        let own = addr(&[4]);
        let table = [conn(&[1], 1), conn(&[1, 2, 8], 2)];
        assert_eq!(
            select_next_hop(&own, &table, &addr(&[1, 2, 3])),
            Route::Forward(2)
        );
    }

    #[test]
    fn test_empty_table_unreachable() {
        let own = addr(&[1]);
        assert_eq!(
            select_next_hop(&own, &[], &addr(&[2])),
            Route::Unreachable
        );
    }

    #[test]
    fn test_child_destination_needs_downstream_neighbor() {
        // Only an upstream neighbor: a packet for our child must not go up.
        let own = addr(&[1, 2]);
        let table = [conn(&[1], 5)];
        assert_eq!(
            select_next_hop(&own, &table, &addr(&[1, 2, 7])),
            Route::Unreachable
        );

        // Same table, destination elsewhere in the tree: go up.
        assert_eq!(
            select_next_hop(&own, &table, &addr(&[1, 3])),
            Route::Forward(5)
        );
    }

    #[test]
    fn test_routing_is_deterministic() {
        let own = addr(&[1, 2, 3]);
        let table = reference_table();
        let dest = addr(&[1, 2, 9, 9]);
        let first = select_next_hop(&own, &table, &dest);
        for _ in 0..10 {
            assert_eq!(select_next_hop(&own, &table, &dest), first);
        }
    }

    #[test]
    fn test_table_rejects_duplicates() {
        let mut table = RoutingTable::new();
        assert!(table.add(conn(&[1], 3)));
        assert!(!table.add(conn(&[1], 4)), "same address");
        assert!(!table.add(conn(&[2], 3)), "same pin");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_table_remove_preserves_order() {
        let mut table = RoutingTable::from_connections(reference_table());
        assert_eq!(table.remove_pin(10), Some(conn(&[1, 2, 3], 10)));
        assert_eq!(table.remove_pin(10), None);
        assert_eq!(table.first().map(|c| c.pin), Some(11));
        assert_eq!(table.pins().collect::<Vec<_>>(), alloc::vec![11, 12]);
    }
}
