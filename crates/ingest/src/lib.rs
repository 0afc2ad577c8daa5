pub mod normalize;
pub mod reader;

pub use normalize::{RecordContext, SkipReason, normalize};
pub use reader::{ParsedLine, RawContent, RawMessage, RawPart, RawRecord, TranscriptReader};
