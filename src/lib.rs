//! Paged on-disk B+ tree over geospatial point records ordered by a
//! Hilbert-curve key.
//!
//! Pages are fixed 8000-byte blocks holding either a leaf (sorted 66-byte
//! point records plus a forward sibling link) or an internal routing node
//! (separator keys plus child page ids). Records are keyed by a 32-bit
//! Hilbert index derived from their coordinates, so short key ranges
//! approximate small geographic neighborhoods.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hilbert_tree::{FileStore, FixedAscii, PointRecord, Tree};
//!
//! # fn main() -> hilbert_tree::Result<()> {
//! let store = Arc::new(FileStore::open("points.htree")?);
//! let mut tree = Tree::open(store)?;
//! tree.insert(PointRecord::new(
//!     FixedAscii::new("trip-0001")?,
//!     38.995,
//!     -77.041,
//!     FixedAscii::new("2008-02-02 15:36:08")?,
//! )?)?;
//! for record in tree.range_scan(0, u32::MAX)? {
//!     println!("{}", record?.id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod hilbert;
pub mod page;
pub mod record;
pub mod store;
pub mod tree;

pub use error::{Result, TreeError};
pub use page::{InternalNode, LeafNode, Node, PageId, MAX_INTERNAL_KEYS, MAX_LEAF_RECORDS, PAGE_SIZE};
pub use record::{FixedAscii, PointRecord, ID_LEN, RECORD_SIZE, TIMESTAMP_LEN};
pub use store::{FileStore, MemStore, PageStore};
pub use tree::{RangeScan, Tree, TreeOptions, TreeStats};
