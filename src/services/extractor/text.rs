//! 未知类型：只接受可读的 UTF-8 文本

use super::links::discover;
use super::{pick_question, ExtractionStrategy};
use crate::error::ExtractError;
use crate::models::{ExtractedContent, QuizStep};

pub struct Utf8TextStrategy;

impl ExtractionStrategy for Utf8TextStrategy {
    fn name(&self) -> &'static str {
        "utf8-text"
    }

    fn extract(&self, step: &QuizStep) -> Result<ExtractedContent, ExtractError> {
        let text = std::str::from_utf8(&step.raw_content).map_err(|_| unsupported("不是有效的 UTF-8 文本"))?;

        let total = text.chars().count();
        let control = text
            .chars()
            .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
            .count();
        if text.contains('\0') || (total > 0 && control * 10 > total) {
            return Err(unsupported("内容看起来是二进制数据"));
        }

        let question_text = pick_question(text);
        if question_text.is_empty() {
            return Err(ExtractError::content(self.name(), "文本为空"));
        }

        let found = discover(&step.url, &[], text);
        Ok(ExtractedContent {
            question_text,
            supporting_text: text.trim().to_string(),
            submit_url: found.submit_url,
            data_links: found.data_links,
            ..Default::default()
        })
    }
}

fn unsupported(reason: &str) -> ExtractError {
    ExtractError::Unsupported {
        content_type: "UNKNOWN".to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;

    #[test]
    fn test_plain_text_accepted() {
        let step = QuizStep::new("https://x/q.txt", b"Intro\nWhat is 6 * 7?\n".to_vec(), ContentType::Unknown);
        let content = Utf8TextStrategy.extract(&step).unwrap();
        assert_eq!(content.question_text, "What is 6 * 7?");
    }

    #[test]
    fn test_nul_bytes_rejected() {
        let step = QuizStep::new("https://x/b", b"abc\0def".to_vec(), ContentType::Unknown);
        assert!(matches!(Utf8TextStrategy.extract(&step), Err(ExtractError::Unsupported { .. })));
    }
}
