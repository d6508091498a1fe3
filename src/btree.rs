//! B*-tree nodes and the descent shared by the catalog and extents overflow
//! trees. Described in Inside Macintosh: Files > B*-Trees.

use crate::error::{Error, Result};
use deku::DekuContainerRead;
use hfs_types::{HeaderRecord, NODE_SIZE, NodeDescriptor, node_kind};
use itertools::Itertools;
use std::cmp::Ordering;
use std::ops::ControlFlow;

/// Record count marking a free node.
const FREE_NODE: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Index,
    Header,
    Map,
}

impl NodeKind {
    /// Unknown kinds are read as index nodes.
    fn from_raw(kind: u8) -> Self {
        match kind {
            node_kind::LEAF => Self::Leaf,
            node_kind::INDEX => Self::Index,
            node_kind::HEADER => Self::Header,
            node_kind::MAP => Self::Map,
            other => {
                log::debug!("Unknown node kind {other:#04x}, reading as index node");
                Self::Index
            }
        }
    }
}

/// One 512-byte node, with its records borrowed from the tree's bytes.
#[derive(Debug, Clone)]
pub struct Node<'a> {
    pub index: u32,
    pub forward_link: u32,
    pub backward_link: u32,
    pub kind: NodeKind,
    pub height: u8,
    records: Vec<&'a [u8]>,
}

impl<'a> Node<'a> {
    pub fn decode(index: u32, bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() != NODE_SIZE {
            return Err(Error::MalformedNode(format!(
                "node {index} is {} bytes",
                bytes.len()
            )));
        }

        let (_rest, descriptor) = NodeDescriptor::from_bytes((bytes, 0))?;
        let records = if descriptor.num_records == FREE_NODE {
            Vec::new()
        } else {
            slice_records(index, bytes, descriptor.num_records as usize)?
        };

        Ok(Self {
            index,
            forward_link: descriptor.forward_link,
            backward_link: descriptor.backward_link,
            kind: NodeKind::from_raw(descriptor.kind),
            height: descriptor.height,
            records,
        })
    }

    /// Raw records in stored order.
    pub fn records(&self) -> &[&'a [u8]] {
        &self.records
    }

    /// Records that `decode` accepts, in stored order. Rejected records are
    /// deleted entries or padding as far as the caller is concerned.
    pub fn decoded<T>(&self, decode: impl Fn(&[u8]) -> Result<T>) -> impl Iterator<Item = T> {
        let index = self.index;
        self.records
            .iter()
            .copied()
            .enumerate()
            .filter_map(move |(i, bytes)| match decode(bytes) {
                Ok(record) => Some(record),
                Err(err @ Error::KeyDecode(_)) => {
                    log::debug!("Skipping record {i} of node {index}: {err}");
                    None
                }
                Err(err) => {
                    log::warn!("Skipping record {i} of node {index}: {err}");
                    None
                }
            })
    }
}

/// Split a node into records using the offset table at its tail. The table
/// runs back-to-front from byte 510 and ends with the free space offset.
fn slice_records(index: u32, bytes: &[u8], count: usize) -> Result<Vec<&[u8]>> {
    let table_start = NODE_SIZE
        .checked_sub(2 * (count + 1))
        .filter(|&start| start >= NodeDescriptor::SIZE)
        .ok_or_else(|| Error::MalformedNode(format!("node {index} claims {count} records")))?;

    (0..=count)
        .map(|i| {
            let pos = NODE_SIZE - 2 * (i + 1);
            u16::from_be_bytes([bytes[pos], bytes[pos + 1]]) as usize
        })
        .tuple_windows()
        .map(|(start, end)| {
            if start < NodeDescriptor::SIZE || end < start || end > table_start {
                Err(Error::MalformedNode(format!(
                    "node {index} has record at {start}..{end}"
                )))
            } else {
                Ok(&bytes[start..end])
            }
        })
        .collect()
}

/// Big-endian u32 at `offset`, if the record is long enough.
pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    match bytes.get(offset..offset.checked_add(4)?) {
        Some(&[a, b, c, d]) => Some(u32::from_be_bytes([a, b, c, d])),
        _ => None,
    }
}

/// A B*-tree held in memory as the assembled bytes of its file.
pub struct BTree {
    data: Vec<u8>,
    header: HeaderRecord,
    map: Vec<u8>,
}

impl BTree {
    /// Validate the header node and keep the header and map records.
    pub fn open(data: Vec<u8>) -> Result<Self> {
        let (header, map) = {
            let bytes = data.get(..NODE_SIZE).ok_or_else(|| {
                Error::MalformedNode(format!("tree file is only {} bytes", data.len()))
            })?;
            let node = Node::decode(0, bytes)?;
            if node.kind != NodeKind::Header {
                log::warn!("Node 0 is a {:?} node, reading it as the header", node.kind);
            }

            let &[header, _reserved, map] = node.records() else {
                return Err(Error::MalformedNode(format!(
                    "header node has {} records, expected 3",
                    node.records().len()
                )));
            };
            let (_rest, header) = HeaderRecord::from_bytes((header, 0))?;
            (header, map.to_vec())
        };

        if header.node_size as usize != NODE_SIZE {
            return Err(Error::MalformedNode(format!(
                "node size is {}, expected {NODE_SIZE}",
                header.node_size
            )));
        }

        log::debug!(
            "B-tree depth={} root={} leaves={}..={} nodes={}",
            header.depth,
            header.root_node,
            header.first_leaf_node,
            header.last_leaf_node,
            header.total_nodes
        );

        Ok(Self { data, header, map })
    }

    pub fn header(&self) -> &HeaderRecord {
        &self.header
    }

    /// Nodes actually present in the file.
    pub fn node_count(&self) -> u32 {
        (self.data.len() / NODE_SIZE) as u32
    }

    pub fn node(&self, index: u32) -> Result<Node<'_>> {
        let start = index as usize * NODE_SIZE;
        let bytes = self.data.get(start..start + NODE_SIZE).ok_or_else(|| {
            Error::MalformedNode(format!("node {index} lies past the end of the tree"))
        })?;

        if !self.is_allocated(index) {
            log::debug!("Node {index} is not marked in use by the header map");
        }

        Node::decode(index, bytes)
    }

    /// Whether the header node's map record marks the node as in use. Nodes
    /// beyond the header's map are described by map nodes, which are not read.
    pub fn is_allocated(&self, index: u32) -> bool {
        let mask = 0x80u8 >> (index % 8);
        self.map
            .get((index / 8) as usize)
            .is_none_or(|bits| bits & mask != 0)
    }

    /// Walk from the root towards a leaf. At each index node `route` names the
    /// child to follow; `None` ends the walk with a miss, as does reaching a
    /// header or map node.
    pub fn descend<F>(&self, mut route: F) -> Result<Option<Node<'_>>>
    where
        F: FnMut(&Node<'_>) -> Option<u32>,
    {
        let mut index = self.header.root_node;
        for _ in 0..self.node_count() {
            let node = self.node(index)?;
            match node.kind {
                NodeKind::Leaf => return Ok(Some(node)),
                NodeKind::Index => match route(&node) {
                    Some(child) => {
                        log::trace!("Index node {index} routes to node {child}");
                        index = child;
                    }
                    None => return Ok(None),
                },
                other => {
                    log::debug!("Descent reached {other:?} node {index}");
                    return Ok(None);
                }
            }
        }

        Err(Error::MalformedNode(format!(
            "descent from node {} never reached a leaf",
            self.header.root_node
        )))
    }

    /// Leaf nodes in key order, from the first leaf to the last.
    pub fn leaves(&self) -> LeafChain<'_> {
        let first = self.header.first_leaf_node;
        LeafChain {
            tree: self,
            pending: None,
            next: (first != 0).then_some(first),
            remaining: self.node_count(),
        }
    }

    /// Leaf nodes from `start` onwards.
    pub fn leaves_from<'t>(&'t self, start: Node<'t>) -> LeafChain<'t> {
        LeafChain {
            tree: self,
            pending: Some(start),
            next: None,
            remaining: self.node_count(),
        }
    }
}

/// Follows forward links between leaves. Ends after the header's last leaf,
/// at a zero link, or with an error once more nodes have been visited than the
/// tree holds.
pub struct LeafChain<'a> {
    tree: &'a BTree,
    pending: Option<Node<'a>>,
    next: Option<u32>,
    remaining: u32,
}

impl<'a> Iterator for LeafChain<'a> {
    type Item = Result<Node<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = match self.pending.take() {
            Some(node) => node,
            None => match self.tree.node(self.next.take()?) {
                Ok(node) => node,
                Err(err) => return Some(Err(err)),
            },
        };

        if self.remaining == 0 {
            return Some(Err(Error::MalformedNode(format!(
                "leaf chain loops back through node {}",
                node.index
            ))));
        }
        self.remaining -= 1;

        if node.kind != NodeKind::Leaf {
            log::warn!("Leaf chain reached {:?} node {}", node.kind, node.index);
            return None;
        }

        let last = self.tree.header.last_leaf_node;
        self.next = (node.index != last && node.forward_link != 0).then_some(node.forward_link);

        Some(Ok(node))
    }
}

/// Why [`scan_ascending`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// `on_match` asked to stop.
    Stopped,
    /// A record sorted after the target, so no later record can match.
    Overshot,
    /// Every record was visited.
    Exhausted,
}

/// Visit records stored in ascending key order. `compare` orders a record
/// against the target: lesser records are skipped, equal ones are handed to
/// `on_match`, and the first greater one ends the scan.
pub fn scan_ascending<T>(
    records: impl IntoIterator<Item = T>,
    mut compare: impl FnMut(&T) -> Ordering,
    mut on_match: impl FnMut(T) -> ControlFlow<()>,
) -> ScanEnd {
    for record in records {
        match compare(&record) {
            Ordering::Less => {}
            Ordering::Equal => {
                if on_match(record).is_break() {
                    return ScanEnd::Stopped;
                }
            }
            Ordering::Greater => return ScanEnd::Overshot,
        }
    }

    ScanEnd::Exhausted
}

/// Pick the child of an index node to descend into: that of the last record
/// whose key is not greater than the target. If the very first record is
/// already greater, `accept_first_overshoot` may still claim it.
pub fn greatest_lower_bound<T>(
    records: impl IntoIterator<Item = T>,
    mut compare: impl FnMut(&T) -> Ordering,
    child: impl Fn(&T) -> u32,
    mut accept_first_overshoot: impl FnMut(&T) -> bool,
) -> Option<u32> {
    let mut next = None;
    for record in records {
        if compare(&record) == Ordering::Greater {
            if next.is_none() && accept_first_overshoot(&record) {
                next = Some(child(&record));
            }
            break;
        }
        next = Some(child(&record));
    }

    next
}
