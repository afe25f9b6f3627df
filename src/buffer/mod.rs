mod lock_manager;
mod page;
mod page_cache;


pub use lock_manager::{LockManager, LockMode};
pub use page::{Page, PageRef};
pub use page_cache::{EvictionPolicy, PageCache};
