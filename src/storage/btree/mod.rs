mod file;
mod iter;
mod page;


pub use file::{BTreeFile, TreeStats};
pub use iter::{BTreeScan, EqualityLookup};
pub use page::{BTreePage, HeaderPage, InternalPage, LeafPage, NO_PAGE, NodeLayout};
