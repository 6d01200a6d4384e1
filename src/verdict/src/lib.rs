// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (C) 2025 Jonathan D.A. Jewell

//! Verdict Scorer - grading a defense
//!
//! The model is asked to answer in one fixed line:
//!
//! ```text
//! SCORE: <number> | EXPLANATION: <short explanation>
//! ```
//!
//! Anything that does not match collapses into the fallback verdict
//! (50, generic message), so a chatty or confused model never stalls a round.
//! Failures to reach the model are a different matter and propagate as
//! [`VerdictError::Chat`].
//!
//! [`rule_on`] is the static courtroom ruling shown next to the score. It
//! needs no model at all.

use chat_service::{ChatError, ChatOptions, ChatRequest, ChatService};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const JUDGE_ROLE: &str = "You are an AI courtroom judge.";

pub const FALLBACK_SCORE: u32 = 50;

pub const FALLBACK_EXPLANATION: &str = "Response could not be interpreted, default score applied.";

/// Temperature 0.5, 60 tokens
pub fn default_judge_options() -> ChatOptions {
    ChatOptions::new(0.5, 60)
}

// ============ Verdicts ============

/// Score and rationale for one defense.
///
/// The score is whatever the model said. It is expected to be in 0..=100
/// but is not clamped; see [`Verdict::in_range`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
    pub score: u32,
    pub explanation: String,
}

impl Verdict {
    pub fn fallback() -> Self {
        Self {
            score: FALLBACK_SCORE,
            explanation: FALLBACK_EXPLANATION.to_string(),
        }
    }

    pub fn in_range(&self) -> bool {
        self.score <= 100
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScoreOutcome {
    /// The reply matched the expected format
    Parsed(Verdict),
    /// The reply could not be interpreted; the raw text is kept for logs
    Fallback { reply: String },
}

impl ScoreOutcome {
    pub fn verdict(&self) -> Verdict {
        match self {
            ScoreOutcome::Parsed(verdict) => verdict.clone(),
            ScoreOutcome::Fallback { .. } => Verdict::fallback(),
        }
    }

    pub fn into_verdict(self) -> Verdict {
        match self {
            ScoreOutcome::Parsed(verdict) => verdict,
            ScoreOutcome::Fallback { .. } => Verdict::fallback(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ScoreOutcome::Fallback { .. })
    }
}

#[derive(Error, Debug)]
pub enum VerdictError {
    #[error("judge unavailable: {0}")]
    Chat(#[from] ChatError),
}

// ============ Parsing ============

static SCORE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)SCORE:\s*([0-9]+)\s*\|\s*EXPLANATION:\s*(.*)").expect("score pattern is valid")
});

/// Parse a judge reply. Never fails: unreadable replies become
/// [`ScoreOutcome::Fallback`].
pub fn parse_verdict(reply: &str) -> ScoreOutcome {
    let parsed = SCORE_LINE.captures(reply).and_then(|caps| {
        // A digit run too long for u32 is as unreadable as no digits
        let score = caps[1].parse::<u32>().ok()?;
        Some(Verdict {
            score,
            explanation: caps[2].trim().to_string(),
        })
    });

    match parsed {
        Some(verdict) => {
            if !verdict.in_range() {
                warn!(score = verdict.score, "judge score outside 0-100, passing through");
            }
            ScoreOutcome::Parsed(verdict)
        }
        None => {
            warn!(reply, "judge reply not in SCORE/EXPLANATION form, using default score");
            ScoreOutcome::Fallback {
                reply: reply.to_string(),
            }
        }
    }
}

/// Judge prompt. Both texts are embedded verbatim.
pub fn judge_prompt(case_text: &str, defense_text: &str) -> String {
    format!(
        "You are a fair and concise courtroom judge. Read the legal case and the player's defense, then score the defense.\n\
         \n\
         Case: {}\n\
         Defense: {}\n\
         \n\
         Score the defense from 0 (terrible) to 100 (perfect). Respond ONLY with:\n\
         - Score (0-100)\n\
         - A one-sentence explanation\n\
         Format: SCORE: <number> | EXPLANATION: <short explanation>\n",
        case_text, defense_text
    )
}

// ============ Scorer ============

pub struct VerdictScorer<C> {
    chat: C,
    options: ChatOptions,
}

impl<C: ChatService> VerdictScorer<C> {
    pub fn new(chat: C) -> Self {
        Self {
            chat,
            options: default_judge_options(),
        }
    }

    /// Builder: override the generation options
    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ChatOptions {
        self.options
    }

    pub async fn score(&self, defense_text: &str, case_text: &str) -> Result<ScoreOutcome, VerdictError> {
        let request = ChatRequest::new(
            self.chat.model(),
            JUDGE_ROLE,
            judge_prompt(case_text, defense_text),
            self.options,
        );
        info!(defense_chars = defense_text.len(), "asking the judge");

        let reply = self.chat.chat(&request).await?;
        debug!(reply = reply.as_str(), "judge replied");

        Ok(parse_verdict(&reply))
    }
}

// ============ Static Ruling ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Ruling {
    NotGuilty,
    Guilty,
    Dismissed,
}

impl Ruling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ruling::NotGuilty => "Not guilty",
            Ruling::Guilty => "Guilty",
            Ruling::Dismissed => "Case dismissed, no defense offered",
        }
    }
}

impl fmt::Display for Ruling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static ADMISSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(i did it|i admit|i confess|my fault|i(?:'m| am) sorry)\b")
        .expect("admission pattern is valid")
});

static EVIDENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(alibi|witness(?:es)?|receipts?|cameras?|footage|video|evidence|proof|records?|documents?|photos?|timestamps?)\b",
    )
    .expect("evidence pattern is valid")
});

const MIN_DEFENSE_WORDS: usize = 3;
const THOROUGH_DEFENSE_WORDS: usize = 12;

/// Deterministic ruling for a case and defense.
///
/// Order matters: an admission outweighs any evidence cited alongside it.
pub fn rule_on(case_text: &str, defense_text: &str) -> Ruling {
    let words: Vec<&str> = defense_text.split_whitespace().collect();
    if words.len() < MIN_DEFENSE_WORDS {
        return Ruling::Dismissed;
    }
    if ADMISSION.is_match(defense_text) {
        return Ruling::Guilty;
    }
    if EVIDENCE.is_match(defense_text) {
        return Ruling::NotGuilty;
    }
    if words.len() >= THOROUGH_DEFENSE_WORDS && addresses_case(case_text, &words) {
        return Ruling::NotGuilty;
    }
    Ruling::Guilty
}

// Shares at least one substantial word with the case
fn addresses_case(case_text: &str, defense_words: &[&str]) -> bool {
    let key_words: Vec<String> = case_text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 5)
        .map(str::to_lowercase)
        .collect();

    defense_words.iter().any(|word| {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        key_words.contains(&word)
    })
}

// ============ Tests ============
