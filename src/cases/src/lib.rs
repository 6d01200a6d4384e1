// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (C) 2025 Jonathan D.A. Jewell

//! Case Source - where each round's case text comes from
//!
//! Static modes draw uniformly from a pre-authored list; LLM modes ask the
//! chat service to write a fresh case. Whatever the origin, the text is cut
//! down to at most three sentences before it reaches the player, because
//! models do not reliably respect length instructions.

use chat_service::{ChatError, ChatOptions, ChatRequest, ChatService};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_SENTENCES: usize = 3;

pub const CASE_WRITER_ROLE: &str = "You are a creative legal writer.";

/// Temperature 0.7, 60 tokens
pub fn default_case_options() -> ChatOptions {
    ChatOptions::new(0.7, 60)
}

// ============ Static Cases ============

pub static CASUAL_CASES: &[&str] = &[
    "Your neighbor claims your cat stole their Sunday roast through an open window.",
    "A barista accuses you of ordering a triple-shot decaf just to confuse them.",
    "You are charged with returning a library book 14 years late. The librarian wants it framed as evidence.",
    "Your roommate says you ate the last slice of pizza labeled with their name.",
    "A parrot repeated your secret karaoke playlist at a dinner party, and the host sued for emotional damage.",
    "You are accused of rigging the office bake-off by buying a cake from a bakery.",
    "A mall Santa claims you told his reindeer they were just large dogs.",
    "Your smart fridge ordered forty pounds of cheese. The grocery store insists you pay for it.",
    "You parked in the spot reserved for the employee of the month, who is a golden retriever.",
    "Your neighbor says your garden gnome is staring at their house on purpose.",
    "A pigeon you fed every day followed you into the bank. The bank wants compensation for the chaos.",
    "You are accused of spoiling the season finale to an entire bus of commuters.",
];

pub static SERIOUS_CASES: &[&str] = &[
    "A warehouse burned down overnight and you were the last person seen leaving the building.",
    "Your business partner says you moved company funds into a private account without telling anyone.",
    "You are accused of selling a used car while hiding that it had been in a flood.",
    "A hiker was injured on a trail you were paid to keep safe. The family says you ignored a broken railing.",
    "A valuable painting disappeared from the gallery during your security shift.",
    "You are accused of leaking confidential product plans to a rival company.",
    "A tenant claims you entered their apartment without notice and took their belongings.",
    "Your delivery van hit a parked car and drove away. A witness says you were the driver.",
    "You are accused of forging a signature on your late uncle's will. Your cousins stand to lose the house.",
    "A charity you ran cannot account for half of last year's donations.",
];

// ============ Modes ============

/// Which source a round draws its case from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Casual,
    Serious,
    LlmCasual,
    LlmSerious,
}

/// Tone of a case, shared by the static and generated variants
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Casual,
    Serious,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Casual => "casual",
            Flavor::Serious => "serious",
        }
    }

    pub fn cases(&self) -> &'static [&'static str] {
        match self {
            Flavor::Casual => CASUAL_CASES,
            Flavor::Serious => SERIOUS_CASES,
        }
    }
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Casual, Mode::Serious, Mode::LlmCasual, Mode::LlmSerious];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Casual => "casual",
            Mode::Serious => "serious",
            Mode::LlmCasual => "llm-casual",
            Mode::LlmSerious => "llm-serious",
        }
    }

    pub fn flavor(&self) -> Flavor {
        match self {
            Mode::Casual | Mode::LlmCasual => Flavor::Casual,
            Mode::Serious | Mode::LlmSerious => Flavor::Serious,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, Mode::LlmCasual | Mode::LlmSerious)
    }

    /// Parse a mode name, falling back to [`Mode::Casual`] with a warning.
    ///
    /// Matching ignores case and treats spaces and underscores as hyphens,
    /// so menu labels such as "AI Serious" resolve too.
    pub fn parse_lenient(input: &str) -> Mode {
        match input.parse() {
            Ok(mode) => mode,
            Err(_) => {
                warn!(mode = input, "unknown mode, falling back to casual");
                Mode::Casual
            }
        }
    }
}

impl FromStr for Mode {
    type Err = CaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '_'], "-");
        match normalized.as_str() {
            "casual" => Ok(Mode::Casual),
            "serious" => Ok(Mode::Serious),
            "llm-casual" | "ollama-casual" | "ai-casual" => Ok(Mode::LlmCasual),
            "llm-serious" | "ollama-serious" | "ai-serious" => Ok(Mode::LlmSerious),
            _ => Err(CaseError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How hard the generated case should be to defend. Static modes ignore it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Normal,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
        }
    }

    fn tone(&self) -> Option<&'static str> {
        match self {
            Difficulty::Easy => Some("Make the accused easy to defend."),
            Difficulty::Normal => None,
            Difficulty::Hard => Some("Make the evidence against the accused look strong."),
        }
    }
}

impl FromStr for Difficulty {
    type Err = CaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "normal" => Ok(Difficulty::Normal),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(CaseError::UnknownDifficulty(s.to_string())),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Cases ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CaseOrigin {
    CasualList,
    SeriousList,
    Generated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Case {
    pub text: String,
    pub origin: CaseOrigin,
}

impl fmt::Display for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Error, Debug)]
pub enum CaseError {
    #[error("unknown case mode: {0}")]
    UnknownMode(String),
    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),
    #[error("no case text was produced")]
    EmptyCase,
    #[error("case generation failed: {0}")]
    Chat(#[from] ChatError),
}

// ============ Trimming ============

static SENTENCE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").expect("sentence break pattern is valid"));

/// Keep at most `max_sentences` sentences.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace. Kept sentences
/// are rejoined with single spaces and the result is trimmed.
pub fn trim_sentences(text: &str, max_sentences: usize) -> String {
    let mut sentences = Vec::with_capacity(max_sentences);
    let mut start = 0;

    for m in SENTENCE_BREAK.find_iter(text) {
        if sentences.len() == max_sentences {
            break;
        }
        // The terminal punctuation is a single ASCII byte
        sentences.push(&text[start..m.start() + 1]);
        start = m.end();
    }
    if sentences.len() < max_sentences {
        sentences.push(&text[start..]);
    }

    sentences.join(" ").trim().to_string()
}

// ============ Prompting ============

/// Prompt asking the model for a short, jargon-free case
pub fn case_prompt(flavor: Flavor, difficulty: Difficulty) -> String {
    let mut prompt = format!(
        "Create a {} legal case for a courtroom video game.\n\n\
         The case should be short and under 5 sentences. Do not include legal jargon.\n",
        flavor.as_str()
    );
    if let Some(tone) = difficulty.tone() {
        prompt.push_str(tone);
        prompt.push('\n');
    }
    prompt.push_str("Return only the case description, no extra commentary.\n");
    prompt
}

/// Uniform choice from a static list
pub fn pick_static<R: Rng + ?Sized>(flavor: Flavor, rng: &mut R) -> Option<Case> {
    let origin = match flavor {
        Flavor::Casual => CaseOrigin::CasualList,
        Flavor::Serious => CaseOrigin::SeriousList,
    };
    flavor.cases().choose(rng).map(|text| Case {
        text: trim_sentences(text, DEFAULT_MAX_SENTENCES),
        origin,
    })
}

// ============ Case Source ============

pub struct CaseSource<C> {
    chat: C,
    options: ChatOptions,
}

impl<C: ChatService> CaseSource<C> {
    pub fn new(chat: C) -> Self {
        Self {
            chat,
            options: default_case_options(),
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

    /// Fetch a case by mode name, tolerating unknown names
    pub async fn get_case_named(&self, mode: &str, difficulty: Difficulty) -> Result<Case, CaseError> {
        self.get_case(Mode::parse_lenient(mode), difficulty).await
    }

    pub async fn get_case(&self, mode: Mode, difficulty: Difficulty) -> Result<Case, CaseError> {
        let case = if mode.is_generated() {
            let text = self.generate(mode.flavor(), difficulty).await?;
            Case {
                text,
                origin: CaseOrigin::Generated,
            }
        } else {
            draw(mode.flavor())?
        };

        debug!(%mode, origin = ?case.origin, "case selected");
        Ok(case)
    }

    async fn generate(&self, flavor: Flavor, difficulty: Difficulty) -> Result<String, CaseError> {
        let request = ChatRequest::new(
            self.chat.model(),
            CASE_WRITER_ROLE,
            case_prompt(flavor, difficulty),
            self.options,
        );
        info!(flavor = flavor.as_str(), %difficulty, "generating case");

        let reply = self.chat.chat(&request).await?;
        let text = trim_sentences(reply.trim(), DEFAULT_MAX_SENTENCES);
        if text.is_empty() {
            return Err(CaseError::EmptyCase);
        }
        Ok(text)
    }
}

// Keeps the thread-local rng out of async state
fn draw(flavor: Flavor) -> Result<Case, CaseError> {
    pick_static(flavor, &mut rand::thread_rng()).ok_or(CaseError::EmptyCase)
}

// ============ Tests ============
