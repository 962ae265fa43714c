//! Paragraph codec
//!
//! Turns a batch of paragraphs into one backend prompt and turns the backend's
//! raw reply back into a batch. Decoding always ends with a cardinality check:
//! a reply that does not hold exactly one paragraph per input paragraph is an
//! [`AskError::UnequalParagraphCount`], never truncated or padded.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AskError;

/// A line that starts with an ordinal such as `3. `
static ORDINAL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\d+\.\s*)").expect("ordinal regex"));

/// Body following an ordinal prefix, up to the end of the line
static ORDINAL_PARAGRAPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\d+\.\s*(.+)").expect("paragraph regex"));

static NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").expect("newline regex"));

/// Join paragraphs into one block of text
///
/// With `numbered` set and more than one paragraph, each line gets a `1. `,
/// `2. `, ... prefix. A single paragraph is always returned as-is.
#[must_use]
pub fn encode(paragraphs: &[String], numbered: bool) -> String {
    if paragraphs.len() == 1 {
        return paragraphs[0].clone();
    }
    if numbered {
        paragraphs
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        paragraphs.join("\n")
    }
}

/// Split a backend reply into exactly `expected` paragraphs
///
/// Surrounding spaces and newlines are stripped first. If the reply carries
/// exactly `expected` ordinal prefixes, the text after each prefix is taken;
/// otherwise the reply is split on runs of newlines.
///
/// # Errors
///
/// [`AskError::UnequalParagraphCount`] when the decoded count differs from
/// `expected`.
pub fn decode(raw: &str, expected: usize, source_id: &str) -> Result<Vec<String>, AskError> {
    let trimmed = raw.trim_matches(|c| c == '\n' || c == ' ');

    let paragraphs: Vec<String> = if ORDINAL_PREFIX.find_iter(trimmed).count() == expected {
        ORDINAL_PARAGRAPH
            .captures_iter(trimmed)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect()
    } else {
        split_lines(trimmed)
    };

    check_cardinality(paragraphs, expected, source_id)
}

/// Split on runs of newlines without looking for ordinals
///
/// Used for backends that translate line by line and never number their
/// output.
///
/// # Errors
///
/// [`AskError::UnequalParagraphCount`] when the line count differs from
/// `expected`.
pub fn decode_lines(raw: &str, expected: usize, source_id: &str) -> Result<Vec<String>, AskError> {
    let trimmed = raw.trim_matches(|c| c == '\n' || c == ' ');
    check_cardinality(split_lines(trimmed), expected, source_id)
}

fn split_lines(text: &str) -> Vec<String> {
    NEWLINES.split(text).map(str::to_string).collect()
}

fn check_cardinality(
    paragraphs: Vec<String>,
    expected: usize,
    source_id: &str,
) -> Result<Vec<String>, AskError> {
    if paragraphs.len() == expected {
        Ok(paragraphs)
    } else {
        tracing::error!(
            source = %source_id,
            expected,
            actual = paragraphs.len(),
            "UnequalParagraphCountError"
        );
        Err(AskError::UnequalParagraphCount {
            expected,
            actual: paragraphs.len(),
            source_id: source_id.to_string(),
        })
    }
}

// =============================================================================
// Prompts
// =============================================================================

const NO_EXPLAIN: &str = "Remember do not explain my original text, \
                          do not generate content that is not beneficial for translation.";

/// Prompt for chat web sessions
///
/// Multi-paragraph bodies are numbered so the reply can be decoded by ordinal.
#[must_use]
pub fn chat_prompt(paragraphs: &[String], system_prompt: &str, target_language: &str) -> String {
    let what = if paragraphs.len() == 1 {
        "text".to_string()
    } else {
        format!("{} paragraphs", paragraphs.len())
    };
    format!(
        "{system_prompt}Translate the following {what} into {target_language}. {NO_EXPLAIN}:\n\n{}",
        encode(paragraphs, true)
    )
}

/// Prompt for completion APIs
///
/// Bodies are newline-joined and the model is asked to answer line by line.
#[must_use]
pub fn completion_prompt(
    paragraphs: &[String],
    user_prompt_add: &str,
    target_language: &str,
) -> String {
    let n = paragraphs.len();
    let prompt = if n == 1 {
        format!(
            "{user_prompt_add}Translate the following 1 paragraph into {target_language}. \
             {NO_EXPLAIN}:\n\n{}",
            encode(paragraphs, false)
        )
    } else {
        format!(
            "{user_prompt_add}Translate the following {n} paragraphs into {target_language}, \
             line by line. {NO_EXPLAIN} Just provide the exactly {n} {target_language} \
             paragraphs.:\n\n{}",
            encode(paragraphs, false)
        )
    };
    tracing::debug!(service = "completion", prompt = %prompt, "Built prompt");
    prompt
}
