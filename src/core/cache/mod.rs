mod checksum;
mod store;

pub use checksum::{Checksum, ChecksumKind};
pub use store::{CacheHandle, ContentCache};
