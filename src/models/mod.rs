pub mod chain;
pub mod quiz;

pub use chain::{ChainFailure, ChainState, ChainStatus, StepRecord, TerminationReason};
pub use quiz::{
    AnswerFormat, AnswerValue, ContentType, ExtractedContent, NextAction, QuizChainRequest, QuizStep,
    ReasonedAnswer, Row, TabularData,
};
