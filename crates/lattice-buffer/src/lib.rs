//! Buffer pool manager for LatticeDB.
//!
//! Pages live in fixed-size frames with pin counts and dirty bits. All
//! page traffic between storage components and disk goes through
//! [`BufferPool`]: a read pins the page in memory, the pin is dropped
//! through the returned [`PageGuard`], and dirty pages are written back
//! lazily on eviction or explicitly via `flush_file`.

pub mod frame;
pub mod pool;
pub mod replacer;
pub mod store;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, PageGuard};
pub use replacer::{ClockReplacer, Replacer};
pub use store::PageStore;
