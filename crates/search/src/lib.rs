pub mod boosts;
pub mod engine;
pub mod request;

pub use boosts::AppliedBoosts;
pub use engine::{ContextChain, SearchEngine, SearchHit, SearchResponse};
pub use request::{
    CulturalProfile, Recency, SearchError, SearchMode, SearchRequest, ValidationPreference,
};
