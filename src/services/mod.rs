pub mod answer_reasoner;
pub mod answer_submitter;
pub mod extractor;
pub mod llm_service;
pub mod page_fetcher;

pub use answer_reasoner::{AnswerReasoner, Reasoner};
pub use answer_submitter::{AnswerSubmitter, HttpAnswerSubmitter, NextStep, Submission, SubmissionOutcome};
pub use extractor::{merge_attachment, ContentExtractor, ExtractionLimits, ExtractionStrategy};
pub use llm_service::{Completer, LlmService};
pub use page_fetcher::{HttpPageFetcher, PageFetcher};
