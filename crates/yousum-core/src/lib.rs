pub mod completion;
pub mod config;
pub mod dirs;
pub mod error;
pub mod history;
pub mod http;
pub mod session;
pub mod store;
pub mod transcript;
pub mod vault;
pub mod workflow;

pub use config::Config;
pub use error::{Error, Result};
pub use history::HistoryStore;
pub use session::{ClearReason, SessionKey, UnlockTicket};
pub use store::{HistoryEntry, MergeOutcome};
pub use vault::Vault;
pub use workflow::Yousum;
