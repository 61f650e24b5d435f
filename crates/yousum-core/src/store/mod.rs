pub mod crypto;
pub mod db;
pub mod model;

pub use crypto::KdfParams;
pub use db::Store;
pub use model::{HistoryEntry, KeyRecord, MergeOutcome};
