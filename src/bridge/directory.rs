//! Read-through view of the device's node table.

use std::sync::Arc;

use crate::meshtastic::{MeshLink, MeshNode};

/// Projection over [`MeshLink::list_nodes`]. Every call reads the live table; nothing is cached.
#[derive(Clone)]
pub struct NodeDirectory {
    link: Arc<dyn MeshLink>,
}

impl NodeDirectory {
    pub fn new(link: Arc<dyn MeshLink>) -> Self {
        Self { link }
    }

    /// Nodes, most recently heard first. Nodes never heard sort last.
    pub fn snapshot(&self) -> Vec<MeshNode> {
        sort_by_last_heard(self.link.list_nodes())
    }

    pub fn find(&self, node_id: &str) -> Option<MeshNode> {
        self.link.list_nodes().into_iter().find(|n| n.id == node_id)
    }
}

/// Stable sort by `last_heard` descending, so ties keep their input order.
pub fn sort_by_last_heard(mut nodes: Vec<MeshNode>) -> Vec<MeshNode> {
    nodes.sort_by(|a, b| b.last_heard.cmp(&a.last_heard));
    nodes
}

/// Split into chunks of `page_size` (at least 1); the last may be partial.
/// An empty input yields a single empty page.
pub fn paginate<T: Clone>(items: &[T], page_size: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return vec![Vec::new()];
    }
    items.chunks(page_size.max(1)).map(<[T]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn node(num: u32, heard: Option<i64>) -> MeshNode {
        let mut n = MeshNode::new(num);
        n.last_heard = heard.and_then(|s| Utc.timestamp_opt(s, 0).single());
        n
    }

    #[test]
    fn newest_first_with_unheard_last() {
        let sorted = sort_by_last_heard(vec![node(1, Some(100)), node(2, None), node(3, Some(300))]);
        let nums: Vec<u32> = sorted.iter().map(|n| n.num).collect();
        assert_eq!(nums, vec![3, 1, 2]);
    }

    #[test]
    fn ties_keep_input_order() {
        let sorted = sort_by_last_heard(vec![
            node(5, Some(100)),
            node(4, Some(200)),
            node(9, Some(100)),
            node(7, Some(100)),
        ]);
        let nums: Vec<u32> = sorted.iter().map(|n| n.num).collect();
        assert_eq!(nums, vec![4, 5, 9, 7]);
    }

    #[test]
    fn pages_are_fixed_size_with_partial_tail() {
        let items: Vec<u32> = (0..23).collect();
        let pages = paginate(&items, 10);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2], vec![20, 21, 22]);
        assert_eq!(paginate::<u32>(&[], 10), vec![Vec::<u32>::new()]);
        assert_eq!(paginate(&items, 0).len(), 23);
    }
}
