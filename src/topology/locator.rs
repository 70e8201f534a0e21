//! Key-to-node routing over a Ketama consistent-hash ring.

use crate::topology::node::Node;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Virtual points each node contributes to the ring.
const POINTS_PER_NODE: usize = 160;

/// How many 32-bit points one MD5 digest yields.
const POINTS_PER_DIGEST: usize = 4;

/// Maps a wire key to the node that owns it.
///
/// Implementations see the full node set and are expected to skip nodes
/// that are not Alive at lookup time.
pub trait NodeLocator: Send + Sync {
    /// The owning node, or None when no Alive node can serve the key.
    fn locate(&self, key: &str) -> Option<Arc<Node>>;

    /// Every node the locator was built over, regardless of liveness.
    fn nodes(&self) -> &[Arc<Node>];
}

/// Builds a locator for a node set. Installed through
/// `ClientConfig::with_locator` for custom routing.
pub trait NodeLocatorFactory: Send + Sync {
    fn build(&self, nodes: Vec<Arc<Node>>) -> Arc<dyn NodeLocator>;
}

/// Extract one ring position from an MD5 digest.
///
/// This is the libketama formula: four little-endian u32s per digest,
/// selected by `index`.
fn digest_point(digest: &[u8; 16], index: usize) -> u32 {
    let base = index * 4;
    (u32::from(digest[base + 3]) << 24)
        | (u32::from(digest[base + 2]) << 16)
        | (u32::from(digest[base + 1]) << 8)
        | u32::from(digest[base])
}

/// Ring position of a wire key.
fn key_point(key: &str) -> u32 {
    let digest = md5::compute(key.as_bytes());
    digest_point(&digest.0, 0)
}

/// Ketama-style consistent-hash ring.
///
/// Each node places 160 virtual points derived from MD5 of
/// `"<host>:<port>-<n>"`. Lookup hashes the key, then walks the ring
/// clockwise to the first point whose node is Alive. The ring itself is
/// immutable; liveness is filtered per lookup, so a node failure needs
/// no recomputation.
pub struct KetamaLocator {
    ring: BTreeMap<u32, usize>,
    nodes: Vec<Arc<Node>>,
}

impl KetamaLocator {
    pub fn new(nodes: Vec<Arc<Node>>) -> Self {
        let mut ring = BTreeMap::new();
        for (index, node) in nodes.iter().enumerate() {
            for n in 0..POINTS_PER_NODE / POINTS_PER_DIGEST {
                let vnode_key = format!("{}-{}", node.endpoint(), n);
                let digest = md5::compute(vnode_key.as_bytes());
                for point in 0..POINTS_PER_DIGEST {
                    ring.insert(digest_point(&digest.0, point), index);
                }
            }
        }
        Self { ring, nodes }
    }
}

impl NodeLocator for KetamaLocator {
    fn locate(&self, key: &str) -> Option<Arc<Node>> {
        if self.ring.is_empty() {
            return None;
        }
        let hash = key_point(key);
        // Clockwise from the key's position, wrapping once around.
        let walk = self
            .ring
            .range(hash..)
            .chain(self.ring.range(..hash))
            .map(|(_, &index)| index);
        for index in walk {
            let node = &self.nodes[index];
            if node.is_alive() {
                return Some(node.clone());
            }
        }
        None
    }

    fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }
}

/// Trivial locator for a single configured server.
pub struct SingleNodeLocator {
    nodes: Vec<Arc<Node>>,
}

impl SingleNodeLocator {
    pub fn new(node: Arc<Node>) -> Self {
        Self { nodes: vec![node] }
    }
}

impl NodeLocator for SingleNodeLocator {
    fn locate(&self, _key: &str) -> Option<Arc<Node>> {
        let node = &self.nodes[0];
        node.is_alive().then(|| node.clone())
    }

    fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }
}

/// Default locator selection: trivial for one node, Ketama otherwise.
pub(crate) fn default_locator(nodes: Vec<Arc<Node>>) -> Arc<dyn NodeLocator> {
    if nodes.len() == 1 {
        Arc::new(SingleNodeLocator::new(nodes.into_iter().next().unwrap()))
    } else {
        Arc::new(KetamaLocator::new(nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketPoolConfig;
    use crate::pool::SocketPool;
    use crate::protocol::binary::BinaryProtocol;
    use crate::protocol::Protocol;
    use crate::types::Endpoint;

    fn make_nodes(count: u16) -> Vec<Arc<Node>> {
        let protocol: Arc<dyn Protocol> = Arc::new(BinaryProtocol::new());
        (0..count)
            .map(|i| {
                let endpoint = Endpoint::new("10.0.0.1", 11211 + i);
                let pool = SocketPool::new(
                    endpoint.clone(),
                    SocketPoolConfig::default(),
                    protocol.clone(),
                    None,
                );
                Arc::new(Node::new(endpoint, pool, protocol.clone()))
            })
            .collect()
    }

    #[test]
    fn ring_has_points_for_every_node() {
        let locator = KetamaLocator::new(make_nodes(3));
        // Some MD5 points may collide between nodes; near-complete is
        // the expectation, exact count is not.
        assert!(locator.ring.len() > 3 * POINTS_PER_NODE - 10);
    }

    #[test]
    fn lookup_is_deterministic() {
        let nodes = make_nodes(4);
        let locator = KetamaLocator::new(nodes.clone());
        for key in ["alpha", "beta", "gamma", "user:1234", ""] {
            let first = locator.locate(key).unwrap();
            for _ in 0..10 {
                let again = locator.locate(key).unwrap();
                assert_eq!(again.endpoint(), first.endpoint());
            }
        }
    }

    #[test]
    fn two_rings_over_equal_endpoints_agree() {
        let a = KetamaLocator::new(make_nodes(5));
        let b = KetamaLocator::new(make_nodes(5));
        for i in 0..200 {
            let key = format!("key-{i}");
            assert_eq!(
                a.locate(&key).unwrap().endpoint(),
                b.locate(&key).unwrap().endpoint(),
            );
        }
    }

    #[test]
    fn dead_node_reroutes_deterministically() {
        let nodes = make_nodes(4);
        let locator = KetamaLocator::new(nodes.clone());

        let key = "reroute-me";
        let owner = locator.locate(key).unwrap();
        owner.mark_dead();

        let fallback = locator.locate(key).unwrap();
        assert_ne!(fallback.endpoint(), owner.endpoint());
        // The reroute target is stable too.
        assert_eq!(
            locator.locate(key).unwrap().endpoint(),
            fallback.endpoint()
        );

        owner.mark_alive();
        assert_eq!(locator.locate(key).unwrap().endpoint(), owner.endpoint());
    }

    #[test]
    fn all_dead_returns_none() {
        let nodes = make_nodes(2);
        let locator = KetamaLocator::new(nodes.clone());
        for node in &nodes {
            node.mark_dead();
        }
        assert!(locator.locate("anything").is_none());
    }

    #[test]
    fn distribution_is_roughly_even() {
        let nodes = make_nodes(3);
        let locator = KetamaLocator::new(nodes.clone());
        let mut counts = std::collections::HashMap::new();
        for i in 0..3000 {
            let key = format!("sample-{i}");
            let node = locator.locate(&key).unwrap();
            *counts.entry(node.endpoint().clone()).or_insert(0usize) += 1;
        }
        for node in &nodes {
            let count = counts.get(node.endpoint()).copied().unwrap_or(0);
            // A third each, with generous variance.
            assert!(count > 500, "{} only owns {count} keys", node.endpoint());
        }
    }

    #[test]
    fn single_node_locator_tracks_liveness() {
        let nodes = make_nodes(1);
        let locator = SingleNodeLocator::new(nodes[0].clone());
        assert!(locator.locate("k").is_some());
        nodes[0].mark_dead();
        assert!(locator.locate("k").is_none());
    }
}
