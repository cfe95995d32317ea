//! Node addresses and the wires between their pins.

use hashbrown::HashMap;
use wiretree::{Address, Error, NodeSetup, Pin};

/// Position of a node in the simulation.
pub type NodeIndex = usize;

/// One end of a wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub node: NodeIndex,
    pub pin: Pin,
}

impl Endpoint {
    pub fn new(node: NodeIndex, pin: Pin) -> Self {
        Self { node, pin }
    }
}

/// A wire joining a pin on one node to a pin on another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub a: Endpoint,
    pub b: Endpoint,
    /// Whether both ends start with each other in their connection table.
    /// Unannounced links are only polled, so the nodes must discover each
    /// other through address or connect requests.
    pub announced: bool,
}

impl Link {
    pub fn new(a: Endpoint, b: Endpoint) -> Self {
        Self {
            a,
            b,
            announced: true,
        }
    }

    pub fn with_announced(mut self, announced: bool) -> Self {
        self.announced = announced;
        self
    }

    /// The end of this link on `node`, if it has one.
    pub fn end(&self, node: NodeIndex) -> Option<Endpoint> {
        if self.a.node == node {
            Some(self.a)
        } else if self.b.node == node {
            Some(self.b)
        } else {
            None
        }
    }

    /// The far end, seen from `node`.
    pub fn peer(&self, node: NodeIndex) -> Option<Endpoint> {
        if self.a.node == node {
            Some(self.b)
        } else if self.b.node == node {
            Some(self.a)
        } else {
            None
        }
    }

    pub fn joins(&self, x: NodeIndex, y: NodeIndex) -> bool {
        (self.a.node == x && self.b.node == y) || (self.a.node == y && self.b.node == x)
    }
}

/// Addresses of the simulated nodes and how their pins are wired.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    addresses: Vec<Address>,
    by_address: HashMap<Address, NodeIndex>,
    links: Vec<Link>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// A line of `len` nodes, each the child of the one before:
    /// `1`, `1,1`, `1,1,1`, ...
    pub fn chain(len: usize) -> Result<Self, Error> {
        let mut topo = Self::new();
        let mut address = Address::root();
        let mut previous = None;
        for _ in 0..len {
            address = address.child(1)?;
            let node = topo.add_node(address.clone());
            if let Some(previous) = previous {
                topo.connect(previous, node);
            }
            previous = Some(node);
        }
        Ok(topo)
    }

    /// A full tree rooted at `1`, `depth` levels below the root, with
    /// `fanout` children per node numbered from 1.
    pub fn tree(depth: usize, fanout: u16) -> Result<Self, Error> {
        let mut topo = Self::new();
        let root = topo.add_node(Address::root().child(1)?);
        let mut level = vec![root];
        for _ in 0..depth {
            let mut next = Vec::new();
            for &parent in &level {
                for component in 1..=fanout {
                    let address = topo.addresses[parent].child(component)?;
                    let child = topo.add_node(address);
                    topo.connect(parent, child);
                    next.push(child);
                }
            }
            level = next;
        }
        Ok(topo)
    }

    /// Add a node, returning its index. A repeated address returns the
    /// existing node.
    pub fn add_node(&mut self, address: Address) -> NodeIndex {
        if let Some(&index) = self.by_address.get(&address) {
            return index;
        }
        let index = self.addresses.len();
        self.by_address.insert(address.clone(), index);
        self.addresses.push(address);
        index
    }

    /// Wire two nodes on their next free pins and announce them to each other.
    pub fn connect(&mut self, a: NodeIndex, b: NodeIndex) -> usize {
        let link = Link::new(
            Endpoint::new(a, self.next_pin(a)),
            Endpoint::new(b, self.next_pin(b)),
        );
        self.add_link(link)
    }

    /// Wire two nodes without telling either about the other.
    pub fn connect_unannounced(&mut self, a: NodeIndex, b: NodeIndex) -> usize {
        let link = Link::new(
            Endpoint::new(a, self.next_pin(a)),
            Endpoint::new(b, self.next_pin(b)),
        )
        .with_announced(false);
        self.add_link(link)
    }

    /// Add a link with explicit pins. Returns the link index.
    pub fn add_link(&mut self, link: Link) -> usize {
        self.links.push(link);
        self.links.len() - 1
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn address(&self, node: NodeIndex) -> Option<&Address> {
        self.addresses.get(node)
    }

    pub fn find(&self, address: &Address) -> Option<NodeIndex> {
        self.by_address.get(address).copied()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Indices of every link between `a` and `b`.
    pub fn links_between(&self, a: NodeIndex, b: NodeIndex) -> Vec<usize> {
        self.links
            .iter()
            .enumerate()
            .filter(|(_, link)| link.joins(a, b))
            .map(|(index, _)| index)
            .collect()
    }

    /// Nodes wired to `node`, in link order.
    pub fn neighbors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.links
            .iter()
            .filter_map(|link| link.peer(node))
            .map(|end| end.node)
            .collect()
    }

    /// Initial setup for `node`: announced links become connections,
    /// unannounced ones only ports.
    pub fn setup(&self, node: NodeIndex) -> Option<NodeSetup> {
        let mut setup = NodeSetup::new(self.address(node)?.clone());
        for link in &self.links {
            let (Some(own), Some(peer)) = (link.end(node), link.peer(node)) else {
                continue;
            };
            let Some(peer_address) = self.address(peer.node) else {
                continue;
            };
            setup = if link.announced {
                setup.with_connection(peer_address.clone(), own.pin)
            } else {
                setup.with_port(own.pin)
            };
        }
        Some(setup)
    }

    /// Pins are numbered from 1 on every node.
    fn next_pin(&self, node: NodeIndex) -> Pin {
        self.links
            .iter()
            .filter_map(|link| link.end(node))
            .map(|end| end.pin)
            .max()
            .map_or(1, |pin| pin + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_chain_addresses_and_pins() {
        let topo = Topology::chain(3).unwrap();
        assert_eq!(topo.len(), 3);
        assert_eq!(topo.address(2), Some(&addr("1,1,1")));
        assert_eq!(topo.links().len(), 2);

        // Middle node uses pin 1 toward its parent and pin 2 toward its child
        assert_eq!(topo.links()[0].b, Endpoint::new(1, 1));
        assert_eq!(topo.links()[1].a, Endpoint::new(1, 2));
        assert_eq!(topo.neighbors(1), [0, 2]);
    }

    #[test]
    fn test_chain_too_deep() {
        assert_eq!(
            Topology::chain(wiretree::MAX_ADDRESS_LEN + 1).unwrap_err(),
            Error::InvalidAddress
        );
    }

    #[test]
    fn test_tree() {
        let topo = Topology::tree(2, 2).unwrap();
        assert_eq!(topo.len(), 7);
        assert_eq!(topo.find(&addr("1,2,1")), Some(5));
        assert_eq!(topo.neighbors(0), [1, 2]);
        assert_eq!(topo.neighbors(1), [0, 3, 4]);
    }

    #[test]
    fn test_setup_from_links() {
        let mut topo = Topology::new();
        let a = topo.add_node(addr("1"));
        let b = topo.add_node(addr("1,1"));
        let c = topo.add_node(addr("1,2"));
        topo.connect(a, b);
        topo.connect_unannounced(a, c);

        let setup = topo.setup(a).unwrap();
        assert_eq!(setup.address, addr("1"));
        assert_eq!(setup.to_table_string(), "1,1:1\n");
        assert_eq!(setup.ports, [2]);
        assert_eq!(setup.all_ports(), [1, 2]);

        assert_eq!(topo.setup(c).unwrap().connections.len(), 0);
        assert!(topo.setup(9).is_none());
    }

    #[test]
    fn test_repeated_address_reuses_node() {
        let mut topo = Topology::new();
        assert_eq!(topo.add_node(addr("4")), 0);
        assert_eq!(topo.add_node(addr("4")), 0);
        assert_eq!(topo.len(), 1);
    }

    #[test]
    fn test_links_between() {
        let mut topo = Topology::new();
        let a = topo.add_node(addr("1"));
        let b = topo.add_node(addr("1,1"));
        let c = topo.add_node(addr("1,1,1"));
        topo.connect(a, b);
        topo.connect(b, c);
        topo.add_link(Link::new(Endpoint::new(b, 7), Endpoint::new(a, 8)));

        assert_eq!(topo.links_between(a, b), [0, 2]);
        assert_eq!(topo.links_between(c, b), [1]);
        assert!(topo.links_between(a, c).is_empty());
    }
}
