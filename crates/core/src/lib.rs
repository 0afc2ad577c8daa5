pub mod schema;

pub use schema::{
    CONTENT_HASH_ALGORITHM, Entry, FeedbackSentiment, Role, SemanticAnalysis, SolutionCategory,
    bounded, entry_id,
};
