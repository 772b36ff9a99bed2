//! Tree engine: search, insert with splitting, ordered range scans.
//!
//! The engine is a state machine over page ids. Every operation reads the
//! pages it needs through the [`PageStore`], mutates decoded in-memory views,
//! and writes back only the pages it changed. The root pointer is explicit
//! state held by the handle (and persisted by the store), never module-level
//! state, so multiple trees can coexist.
//!
//! Routing discipline: an internal node sends `key` to the child of the first
//! separator `>= key` (last child if none). Separators are promoted right-leaf
//! minima, and a record equal to a separator is inserted into the left child,
//! so scans that descend leftmost and walk the sibling chain never miss a key.
//! A consequence is that duplicates of a separator may straddle a leaf
//! boundary: records are ordered by `(hilbert_key, id)` within each leaf, but
//! equal keys split across siblings come back in page order, not id order.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{Result, TreeError};
use crate::page::{InternalNode, LeafNode, Node, PageId, MAX_INTERNAL_KEYS, MAX_LEAF_RECORDS};
use crate::record::PointRecord;
use crate::store::PageStore;

/// Node capacity configuration.
///
/// Defaults are the on-disk maxima; tests shrink them to force splits with a
/// handful of records. Overrides may never exceed what a page can hold.
#[derive(Clone, Copy, Debug)]
pub struct TreeOptions {
    /// Records per leaf before it splits.
    pub max_leaf_records: usize,
    /// Separator keys per internal node before it splits.
    pub max_internal_keys: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            max_leaf_records: MAX_LEAF_RECORDS,
            max_internal_keys: MAX_INTERNAL_KEYS,
        }
    }
}

impl TreeOptions {
    /// Sets the leaf capacity.
    pub fn max_leaf_records(mut self, count: usize) -> Self {
        self.max_leaf_records = count;
        self
    }

    /// Sets the internal-node key capacity.
    pub fn max_internal_keys(mut self, count: usize) -> Self {
        self.max_internal_keys = count;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_leaf_records < 2 || self.max_leaf_records > MAX_LEAF_RECORDS {
            return Err(TreeError::InvalidArgument(
                "max_leaf_records outside supported range",
            ));
        }
        if self.max_internal_keys < 2 || self.max_internal_keys > MAX_INTERNAL_KEYS {
            return Err(TreeError::InvalidArgument(
                "max_internal_keys outside supported range",
            ));
        }
        Ok(())
    }
}

/// Outcome of an insert that split a child: the separator to add to the
/// parent and the freshly written right sibling.
struct Split {
    separator: u32,
    right: PageId,
}

/// Shape counters produced by [`Tree::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Levels from root to leaves, inclusive.
    pub height: usize,
    /// Number of internal pages.
    pub internal_pages: usize,
    /// Number of leaf pages.
    pub leaf_pages: usize,
    /// Total records across all leaves.
    pub records: usize,
}

/// Handle to a Hilbert-keyed B+ tree stored behind a [`PageStore`].
pub struct Tree {
    store: Arc<dyn PageStore>,
    root: PageId,
    options: TreeOptions,
}

impl Tree {
    /// Opens the tree in `store` with default capacities, creating an empty
    /// root leaf if the store has none.
    pub fn open(store: Arc<dyn PageStore>) -> Result<Self> {
        Self::open_with(store, TreeOptions::default())
    }

    /// Opens the tree with explicit capacity options.
    pub fn open_with(store: Arc<dyn PageStore>, options: TreeOptions) -> Result<Self> {
        options.validate()?;
        let root = match store.root_page()? {
            Some(id) => id,
            None => {
                let id = store.allocate_page()?;
                store.write_page(id, &Node::Leaf(LeafNode::empty()).encode()?)?;
                store.set_root_page(id)?;
                debug!(target: "hilbert_tree::tree", root = id.0, "created empty tree");
                id
            }
        };
        Ok(Self {
            store,
            root,
            options,
        })
    }

    /// Current root page id.
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Inserts a record at its sorted position, splitting as needed.
    ///
    /// A root split is the only operation that changes the tree's height.
    pub fn insert(&mut self, record: PointRecord) -> Result<()> {
        if let Some(split) = self.insert_at(self.root, record)? {
            let new_root = InternalNode {
                keys: vec![split.separator],
                children: vec![self.root, split.right],
            };
            let new_root_id = self.store.allocate_page()?;
            self.store
                .write_page(new_root_id, &Node::Internal(new_root).encode()?)?;
            self.store.set_root_page(new_root_id)?;
            debug!(
                target: "hilbert_tree::split",
                old_root = self.root.0,
                new_root = new_root_id.0,
                separator = split.separator,
                "root split, tree grew one level"
            );
            self.root = new_root_id;
        }
        Ok(())
    }

    /// Finds a record with exactly this Hilbert key, if any.
    ///
    /// Equal keys may span a leaf boundary, so the lookup rides the same
    /// sibling-chain walk as a range scan rather than stopping at one leaf.
    pub fn search(&self, key: u32) -> Result<Option<PointRecord>> {
        match self.range_scan(key, key)?.next() {
            Some(record) => Ok(Some(record?)),
            None => Ok(None),
        }
    }

    /// Scans all records with keys in `[low, high]` in ascending order.
    ///
    /// The iterator is lazy and forward-only; pages are fetched as the scan
    /// crosses sibling boundaries.
    pub fn range_scan(&self, low: u32, high: u32) -> Result<RangeScan<'_>> {
        let leaf = self.leaf_for(low)?;
        let start = leaf.lower_bound(low);
        Ok(RangeScan {
            tree: self,
            current: Some(leaf),
            index: start,
            high,
        })
    }

    /// Walks the whole tree and reports its shape.
    pub fn stats(&self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut level = vec![self.root];
        while !level.is_empty() {
            stats.height += 1;
            let mut next_level = Vec::new();
            for id in level {
                match self.read_node(id)? {
                    Node::Leaf(leaf) => {
                        stats.leaf_pages += 1;
                        stats.records += leaf.records.len();
                    }
                    Node::Internal(node) => {
                        stats.internal_pages += 1;
                        next_level.extend(node.children);
                    }
                }
            }
            level = next_level;
        }
        Ok(stats)
    }

    /// Checks structural invariants: record ordering, capacity bounds,
    /// separator bounds, equal leaf depth, and sibling-chain consistency.
    ///
    /// A failure indicates a bug in the engine (or external page damage) and
    /// is fatal to whatever relied on the tree; nothing is repaired.
    pub fn verify(&self) -> Result<()> {
        let mut leaves = Vec::new();
        self.verify_node(self.root, None, None, 0, &mut leaves)?;
        let mut depth = None;
        for leaf in &leaves {
            match depth {
                None => depth = Some(leaf.depth),
                Some(expected) if expected != leaf.depth => {
                    return Err(TreeError::InvariantViolation("leaves at unequal depth"));
                }
                Some(_) => {}
            }
        }
        for pair in leaves.windows(2) {
            if pair[0].next_leaf != Some(pair[1].id) {
                return Err(TreeError::InvariantViolation("sibling chain broken"));
            }
        }
        if let Some(last) = leaves.last() {
            if last.next_leaf.is_some() {
                return Err(TreeError::InvariantViolation(
                    "last leaf has a sibling pointer",
                ));
            }
        }
        // Across leaves only the Hilbert key is checked, non-strictly: a
        // duplicate of a promoted separator routes to the left sibling, so
        // equal keys can legitimately straddle the boundary out of id order.
        let mut previous: Option<u32> = None;
        for leaf in &leaves {
            for &key in &leaf.keys {
                if previous.is_some_and(|prev| key < prev) {
                    return Err(TreeError::InvariantViolation(
                        "records out of order across leaves",
                    ));
                }
                previous = Some(key);
            }
        }
        Ok(())
    }

    fn verify_node(
        &self,
        id: PageId,
        low: Option<u32>,
        high: Option<u32>,
        depth: usize,
        leaves: &mut Vec<LeafSummary>,
    ) -> Result<()> {
        match self.read_node(id)? {
            Node::Leaf(leaf) => {
                if leaf.records.len() > self.options.max_leaf_records {
                    return Err(TreeError::InvariantViolation("leaf over capacity"));
                }
                for pair in leaf.records.windows(2) {
                    if pair[0].sort_key() >= pair[1].sort_key() {
                        return Err(TreeError::InvariantViolation(
                            "leaf records out of order or duplicated",
                        ));
                    }
                }
                for record in &leaf.records {
                    let key = record.hilbert_key();
                    if low.is_some_and(|bound| key < bound) || high.is_some_and(|bound| key > bound)
                    {
                        return Err(TreeError::InvariantViolation(
                            "leaf key outside parent separator bounds",
                        ));
                    }
                }
                leaves.push(LeafSummary {
                    id,
                    depth,
                    next_leaf: leaf.next_leaf,
                    keys: leaf.records.iter().map(PointRecord::hilbert_key).collect(),
                });
                Ok(())
            }
            Node::Internal(node) => {
                if node.keys.is_empty() {
                    return Err(TreeError::InvariantViolation(
                        "internal node without separators",
                    ));
                }
                if node.keys.len() > self.options.max_internal_keys {
                    return Err(TreeError::InvariantViolation("internal node over capacity"));
                }
                for pair in node.keys.windows(2) {
                    if pair[0] > pair[1] {
                        return Err(TreeError::InvariantViolation("separators out of order"));
                    }
                }
                for &key in &node.keys {
                    if low.is_some_and(|bound| key < bound) || high.is_some_and(|bound| key > bound)
                    {
                        return Err(TreeError::InvariantViolation(
                            "separator outside parent bounds",
                        ));
                    }
                }
                for (child_idx, &child) in node.children.iter().enumerate() {
                    let child_low = if child_idx == 0 {
                        low
                    } else {
                        Some(node.keys[child_idx - 1])
                    };
                    let child_high = if child_idx == node.keys.len() {
                        high
                    } else {
                        Some(node.keys[child_idx])
                    };
                    self.verify_node(child, child_low, child_high, depth + 1, leaves)?;
                }
                Ok(())
            }
        }
    }

    fn read_node(&self, id: PageId) -> Result<Node> {
        let buf = self.store.read_page(id)?;
        Node::decode(&buf)
    }

    fn write_node(&self, id: PageId, node: &Node) -> Result<()> {
        self.store.write_page(id, &node.encode()?)
    }

    /// Descends from the root to the leaf whose range covers `key`.
    fn leaf_for(&self, key: u32) -> Result<LeafNode> {
        let mut current = self.root;
        loop {
            match self.read_node(current)? {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Internal(node) => {
                    if node.children.is_empty() {
                        return Err(TreeError::CorruptPage("internal node without children"));
                    }
                    current = node.children[node.route(key)];
                }
            }
        }
    }

    fn insert_at(&self, id: PageId, record: PointRecord) -> Result<Option<Split>> {
        match self.read_node(id)? {
            Node::Leaf(leaf) => self.insert_into_leaf(id, leaf, record),
            Node::Internal(node) => self.insert_into_internal(id, node, record),
        }
    }

    fn insert_into_leaf(
        &self,
        id: PageId,
        mut leaf: LeafNode,
        record: PointRecord,
    ) -> Result<Option<Split>> {
        let index = leaf.insertion_index(&record);
        leaf.records.insert(index, record);
        if leaf.records.len() <= self.options.max_leaf_records {
            self.write_node(id, &Node::Leaf(leaf))?;
            return Ok(None);
        }

        // Midpoint split: upper half moves to a fresh page, sibling chain is
        // rewired, and the new leaf's first key becomes the separator.
        let mid = leaf.records.len() / 2;
        let upper = leaf.records.split_off(mid);
        let right = LeafNode {
            records: upper,
            next_leaf: leaf.next_leaf,
        };
        let separator = right.records[0].hilbert_key();
        let right_id = self.store.allocate_page()?;
        leaf.next_leaf = Some(right_id);
        self.write_node(right_id, &Node::Leaf(right))?;
        self.write_node(id, &Node::Leaf(leaf))?;
        trace!(
            target: "hilbert_tree::split",
            left = id.0,
            right = right_id.0,
            separator,
            "split leaf page"
        );
        Ok(Some(Split {
            separator,
            right: right_id,
        }))
    }

    fn insert_into_internal(
        &self,
        id: PageId,
        mut node: InternalNode,
        record: PointRecord,
    ) -> Result<Option<Split>> {
        if node.children.is_empty() {
            return Err(TreeError::CorruptPage("internal node without children"));
        }
        let child_idx = node.route(record.hilbert_key());
        let Some(split) = self.insert_at(node.children[child_idx], record)? else {
            return Ok(None);
        };

        node.keys.insert(child_idx, split.separator);
        node.children.insert(child_idx + 1, split.right);
        if node.keys.len() <= self.options.max_internal_keys {
            self.write_node(id, &Node::Internal(node))?;
            return Ok(None);
        }

        // Symmetric split: the median separator moves up, everything after it
        // (keys and children) moves right.
        let mid = node.keys.len() / 2;
        let promoted = node.keys[mid];
        let right = InternalNode {
            keys: node.keys.split_off(mid + 1),
            children: node.children.split_off(mid + 1),
        };
        node.keys.truncate(mid);
        let right_id = self.store.allocate_page()?;
        self.write_node(right_id, &Node::Internal(right))?;
        self.write_node(id, &Node::Internal(node))?;
        trace!(
            target: "hilbert_tree::split",
            left = id.0,
            right = right_id.0,
            separator = promoted,
            "split internal page"
        );
        Ok(Some(Split {
            separator: promoted,
            right: right_id,
        }))
    }
}

/// Per-leaf summary captured during verification.
struct LeafSummary {
    id: PageId,
    depth: usize,
    next_leaf: Option<PageId>,
    keys: Vec<u32>,
}

/// Lazy forward-only iterator over records in a key range.
///
/// Restartable only by asking the tree for a fresh scan; a page-store or
/// decode failure ends the scan after yielding the error.
pub struct RangeScan<'a> {
    tree: &'a Tree,
    current: Option<LeafNode>,
    index: usize,
    high: u32,
}

impl Iterator for RangeScan<'_> {
    type Item = Result<PointRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.current.as_ref()?;
            if self.index < leaf.records.len() {
                let record = leaf.records[self.index];
                if record.hilbert_key() > self.high {
                    self.current = None;
                    return None;
                }
                self.index += 1;
                return Some(Ok(record));
            }
            match leaf.next_leaf {
                Some(next) => match self
                    .tree
                    .read_node(next)
                    .and_then(|node| node.expect_leaf())
                {
                    Ok(next_leaf) => {
                        self.current = Some(next_leaf);
                        self.index = 0;
                    }
                    Err(err) => {
                        self.current = None;
                        return Some(Err(err));
                    }
                },
                None => {
                    self.current = None;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FixedAscii;
    use crate::store::MemStore;

    fn record(key: u32, id: &str) -> PointRecord {
        PointRecord::from_parts(
            FixedAscii::new(id).unwrap(),
            1.5,
            2.5,
            FixedAscii::new("2008-02-02 15:36:08").unwrap(),
            key,
        )
    }

    fn small_tree() -> Tree {
        Tree::open_with(
            Arc::new(MemStore::new()),
            TreeOptions::default()
                .max_leaf_records(4)
                .max_internal_keys(3),
        )
        .unwrap()
    }

    fn keys(tree: &Tree, low: u32, high: u32) -> Vec<u32> {
        tree.range_scan(low, high)
            .unwrap()
            .map(|r| r.unwrap().hilbert_key())
            .collect()
    }

    #[test]
    fn empty_tree_scans_nothing() -> Result<()> {
        let tree = Tree::open(Arc::new(MemStore::new()))?;
        assert_eq!(tree.range_scan(0, u32::MAX)?.count(), 0);
        assert!(tree.search(42)?.is_none());
        Ok(())
    }

    #[test]
    fn single_insert_is_searchable() -> Result<()> {
        let mut tree = Tree::open(Arc::new(MemStore::new()))?;
        tree.insert(record(42, "r1"))?;
        let found = tree.search(42)?.expect("record present");
        assert_eq!(found.id.as_str(), "r1");
        assert!(tree.search(41)?.is_none());
        Ok(())
    }

    #[test]
    fn scan_bounds_are_inclusive() -> Result<()> {
        let mut tree = small_tree();
        for (key, id) in [(10, "a"), (20, "b"), (30, "c")] {
            tree.insert(record(key, id))?;
        }
        assert_eq!(keys(&tree, 10, 30), vec![10, 20, 30]);
        assert_eq!(keys(&tree, 11, 29), vec![20]);
        assert_eq!(keys(&tree, 31, 100), Vec::<u32>::new());
        Ok(())
    }

    #[test]
    fn equal_keys_within_one_leaf_are_ordered_by_id() -> Result<()> {
        let mut tree = small_tree();
        for id in ["b", "a", "c"] {
            tree.insert(record(7, id))?;
        }
        let ids: Vec<String> = tree
            .range_scan(7, 7)?
            .map(|r| r.unwrap().id.as_str().into_owned())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        Ok(())
    }

    #[test]
    fn duplicates_of_a_separator_straddle_leaves_and_still_verify() -> Result<()> {
        // Enough equal keys to split: the separator equals the key itself and
        // later duplicates route into the left sibling. The tree stays valid;
        // a scan returns every record, though not in global id order.
        let mut tree = small_tree();
        for id in ["a", "b", "c", "d", "e", "f"] {
            tree.insert(record(7, id))?;
        }
        tree.verify()?;
        let mut ids: Vec<String> = tree
            .range_scan(7, 7)?
            .map(|r| r.unwrap().id.as_str().into_owned())
            .collect();
        assert_eq!(ids.len(), 6);
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e", "f"]);
        Ok(())
    }

    #[test]
    fn search_finds_key_equal_to_separator() -> Result<()> {
        let mut tree = small_tree();
        // Fill until several splits happen, then probe every key.
        for key in 0..40u32 {
            tree.insert(record(key, &format!("r{key:02}")))?;
        }
        for key in 0..40u32 {
            assert!(tree.search(key)?.is_some(), "key {key} lost");
        }
        tree.verify()?;
        Ok(())
    }

    #[test]
    fn options_outside_page_capacity_are_rejected() {
        let store: Arc<dyn PageStore> = Arc::new(MemStore::new());
        let options = TreeOptions::default().max_leaf_records(MAX_LEAF_RECORDS + 1);
        assert!(Tree::open_with(Arc::clone(&store), options).is_err());
        let options = TreeOptions::default().max_leaf_records(1);
        assert!(Tree::open_with(store, options).is_err());
    }

    #[test]
    fn root_survives_reopen() -> Result<()> {
        let store = Arc::new(MemStore::new());
        {
            let mut tree = Tree::open(Arc::clone(&store) as Arc<dyn PageStore>)?;
            tree.insert(record(9, "kept"))?;
        }
        let tree = Tree::open(store)?;
        assert!(tree.search(9)?.is_some());
        Ok(())
    }

    #[test]
    fn verify_rejects_planted_corruption() -> Result<()> {
        let store = Arc::new(MemStore::new());
        let mut tree = Tree::open_with(
            Arc::clone(&store) as Arc<dyn PageStore>,
            TreeOptions::default().max_leaf_records(4),
        )?;
        for key in 0..12u32 {
            tree.insert(record(key, &format!("r{key:02}")))?;
        }
        tree.verify()?;
        // Swap a leaf's records out of order behind the tree's back.
        let root = tree.root();
        let Node::Internal(node) = Node::decode(&store.read_page(root)?)? else {
            panic!("expected internal root after 12 inserts with capacity 4");
        };
        let first_leaf = node.children[0];
        let mut leaf = Node::decode(&store.read_page(first_leaf)?)?.expect_leaf()?;
        leaf.records.reverse();
        store.poke(first_leaf, Node::Leaf(leaf).encode()?);
        assert!(matches!(
            tree.verify(),
            Err(TreeError::InvariantViolation(_))
        ));
        Ok(())
    }

    #[test]
    fn stats_count_pages_and_records() -> Result<()> {
        let mut tree = small_tree();
        for key in 0..30u32 {
            tree.insert(record(key, &format!("r{key:02}")))?;
        }
        let stats = tree.stats()?;
        assert_eq!(stats.records, 30);
        assert!(stats.height >= 2);
        assert!(stats.leaf_pages >= 30 / 4);
        Ok(())
    }
}
