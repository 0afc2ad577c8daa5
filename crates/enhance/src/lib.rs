pub mod feedback;
pub mod processor;
pub mod semantic;
pub mod solution;
pub mod topics;

pub use feedback::{PatternSignal, analyze_feedback};
pub use processor::{
    EnhancementProcessor, EnhancementStats, ProcessingContext, apply_feedback_to_solution,
};
pub use semantic::{SemanticFeedbackAnalyzer, SemanticVerdict};
pub use solution::{SolutionSignals, classify_solution};
pub use topics::{TopicDetector, TopicScores};
