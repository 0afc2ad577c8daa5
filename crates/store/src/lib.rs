pub mod error;
pub mod filter;
pub mod patch;
pub mod store;

pub use error::StoreError;
pub use filter::MetadataFilter;
pub use patch::MetadataPatch;
pub use store::{ConversationStore, QueryHit, StoreStats};
