//! Daily archive compaction and integrity verification

mod compactor;

pub use compactor::{ArchiveMeta, Compactor, IntegrityError, VerifyReport};
