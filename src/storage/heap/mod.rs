mod file;
mod page;

pub use file::{HeapFile, HeapScan};
pub use page::HeapPage;
