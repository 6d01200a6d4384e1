// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (C) 2025 Jonathan D.A. Jewell

//! Court Session - the game, independent of any user interface
//!
//! A [`Courtroom`] ties the pieces together for one player:
//! - opens a round by fetching a case ([`Courtroom::new_round`])
//! - judges the player's defense and pays out coins ([`Courtroom::submit`])
//! - keeps the encrypted coin balance in sync ([`Courtroom::coins`])
//!
//! Any front end (terminal, GUI, web) binds to these calls; nothing here
//! renders or reads input.

use case_source::{Case, CaseError, CaseSource, Difficulty, Mode};
use chat_service::{ChatError, ChatOptions, ChatService, ClientConfig};
use chrono::{DateTime, Utc};
use coin_vault::{SecretKey, Vault, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;
use verdict_scorer::{rule_on, Ruling, ScoreOutcome, Verdict, VerdictError, VerdictScorer};

pub const DEFAULT_REWARD_DIVISOR: u32 = 10;

// ============ Configuration ============

/// Game configuration, read from JSON. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    pub chat: ClientConfig,
    /// Directory holding `secret.key` and `coins.dat`
    pub data_dir: PathBuf,
    pub case_options: ChatOptions,
    pub judge_options: ChatOptions,
    /// Coins paid per round are `score / reward_divisor`
    pub reward_divisor: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            chat: ClientConfig::default(),
            data_dir: PathBuf::from("."),
            case_options: case_source::default_case_options(),
            judge_options: verdict_scorer::default_judge_options(),
            reward_divisor: DEFAULT_REWARD_DIVISOR,
        }
    }
}

impl GameConfig {
    pub fn load(path: &Path) -> Result<Self, CourtError> {
        let content = std::fs::read_to_string(path)?;
        let config: GameConfig = serde_json::from_str(&content)
            .map_err(|e| CourtError::Config(format!("{}: {}", path.display(), e)))?;
        if config.reward_divisor == 0 {
            return Err(CourtError::Config(format!(
                "{}: reward_divisor must be at least 1",
                path.display()
            )));
        }
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn vault(&self) -> Vault {
        Vault::new(&self.data_dir)
    }
}

// ============ Errors ============

#[derive(Error, Debug)]
pub enum CourtError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no case is open, start a round first")]
    NoActiveCase,
    #[error("please enter a defense")]
    EmptyDefense,
    #[error(transparent)]
    Case(#[from] CaseError),
    #[error(transparent)]
    Verdict(#[from] VerdictError),
    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl CourtError {
    /// The underlying chat failure, if the round failed on the model
    pub fn chat_error(&self) -> Option<&ChatError> {
        match self {
            CourtError::Case(CaseError::Chat(e)) | CourtError::Verdict(VerdictError::Chat(e)) => Some(e),
            _ => None,
        }
    }

    /// Whether the front end should offer "try again"
    pub fn is_retryable(&self) -> bool {
        self.chat_error().is_some_and(ChatError::is_retryable)
    }
}

// ============ Results ============

/// What the bench decided about one defense
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Judgement {
    pub verdict: Verdict,
    /// The model's reply was unreadable and the default verdict was used
    pub fallback: bool,
    pub ruling: Ruling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_id: Uuid,
    pub played_at: DateTime<Utc>,
    pub mode: Mode,
    pub difficulty: Difficulty,
    pub case: Case,
    pub defense: String,
    #[serde(flatten)]
    pub judgement: Judgement,
    pub coins_awarded: u64,
    pub balance: u64,
}

/// Coins paid for an outcome. Scores above 100 pay as 100; fallbacks pay nothing.
pub fn reward_for(outcome: &ScoreOutcome, divisor: u32) -> u64 {
    match outcome {
        ScoreOutcome::Parsed(verdict) => u64::from(verdict.score.min(100) / divisor.max(1)),
        ScoreOutcome::Fallback { .. } => 0,
    }
}

// ============ Courtroom ============

struct Round {
    id: Uuid,
    mode: Mode,
    difficulty: Difficulty,
    case: Case,
}

pub struct Courtroom<C> {
    cases: CaseSource<C>,
    scorer: VerdictScorer<C>,
    vault: Vault,
    key: SecretKey,
    coins: u64,
    reward_divisor: u32,
    round: Option<Round>,
}

impl<C: ChatService + Clone> Courtroom<C> {
    /// Prepare the save key and load the balance
    pub fn open(config: &GameConfig, chat: C) -> Result<Self, CourtError> {
        let vault = config.vault();
        let key = vault.ensure_key()?;
        let coins = vault.load(&key);
        info!(coins, data_dir = %vault.dir().display(), "courtroom open");

        Ok(Self {
            cases: CaseSource::new(chat.clone()).with_options(config.case_options),
            scorer: VerdictScorer::new(chat).with_options(config.judge_options),
            vault,
            key,
            coins,
            reward_divisor: config.reward_divisor.max(1),
            round: None,
        })
    }
}

impl<C: ChatService> Courtroom<C> {
    /// Fetch a case and make it the open round, replacing any earlier one
    pub async fn new_round(&mut self, mode: Mode, difficulty: Difficulty) -> Result<&Case, CourtError> {
        let case = self.cases.get_case(mode, difficulty).await?;
        let round = self.round.insert(Round {
            id: Uuid::new_v4(),
            mode,
            difficulty,
            case,
        });
        debug!(round_id = %round.id, %mode, "round opened");
        Ok(&round.case)
    }

    pub fn current_case(&self) -> Option<&Case> {
        self.round.as_ref().map(|r| &r.case)
    }

    /// Score a defense against any case text, without touching coins
    pub async fn judge(&self, case_text: &str, defense: &str) -> Result<Judgement, CourtError> {
        let outcome = self.scorer.score(defense, case_text).await?;
        Ok(judgement_from(&outcome, case_text, defense))
    }

    /// Judge the defense for the open round and pay out.
    ///
    /// The round closes only once judging succeeds, so a failed call to the
    /// model can be retried with the same case.
    pub async fn submit(&mut self, defense: &str) -> Result<RoundRecord, CourtError> {
        let defense = defense.trim();
        let case_text = match &self.round {
            Some(round) => round.case.text.clone(),
            None => return Err(CourtError::NoActiveCase),
        };
        if defense.is_empty() {
            return Err(CourtError::EmptyDefense);
        }

        let outcome = self.scorer.score(defense, &case_text).await?;
        let judgement = judgement_from(&outcome, &case_text, defense);

        let awarded = reward_for(&outcome, self.reward_divisor);
        if awarded > 0 {
            let balance = self.coins.saturating_add(awarded);
            self.vault.save(balance, &self.key)?;
            self.coins = balance;
        }

        let round = self.round.take().ok_or(CourtError::NoActiveCase)?;
        info!(
            round_id = %round.id,
            score = judgement.verdict.score,
            fallback = judgement.fallback,
            awarded,
            balance = self.coins,
            "round judged"
        );

        Ok(RoundRecord {
            round_id: round.id,
            played_at: Utc::now(),
            mode: round.mode,
            difficulty: round.difficulty,
            case: round.case,
            defense: defense.to_string(),
            judgement,
            coins_awarded: awarded,
            balance: self.coins,
        })
    }

    pub fn coins(&self) -> u64 {
        self.coins
    }

    /// Overwrite the balance and persist it
    pub fn set_coins(&mut self, coins: u64) -> Result<(), CourtError> {
        self.vault.save(coins, &self.key)?;
        self.coins = coins;
        Ok(())
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }
}

fn judgement_from(outcome: &ScoreOutcome, case_text: &str, defense: &str) -> Judgement {
    Judgement {
        verdict: outcome.verdict(),
        fallback: outcome.is_fallback(),
        ruling: rule_on(case_text, defense),
    }
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use case_source::{trim_sentences, CaseOrigin, CASUAL_CASES};
    use chat_service::ChatRequest;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    /// Replies in order; `None` entries fail with a transport error
    #[derive(Default)]
    struct ScriptedChat {
        replies: Mutex<VecDeque<Option<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        fn with(replies: &[Option<&str>]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.map(str::to_string)).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    impl ChatService for ScriptedChat {
        fn model(&self) -> &str {
            "court-model"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<String, ChatError> {
            self.prompts
                .lock()
                .unwrap()
                .push(request.prompt().unwrap_or_default().to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .flatten()
                .ok_or_else(|| ChatError::Transport("connection refused".to_string()))
        }
    }

    fn config(dir: &Path) -> GameConfig {
        GameConfig {
            data_dir: dir.to_path_buf(),
            ..GameConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_fresh_installation() {
        let dir = tempdir().unwrap();
        let court = Courtroom::open(&config(dir.path()), ScriptedChat::with(&[])).unwrap();
        assert_eq!(court.coins(), 0);
        assert!(court.current_case().is_none());
        assert!(court.vault().key_path().exists());
    }

    #[tokio::test]
    async fn test_full_round_pays_and_persists() {
        let dir = tempdir().unwrap();
        let chat = ScriptedChat::with(&[Some("SCORE: 87 | EXPLANATION: Solid alibi.")]);
        let mut court = Courtroom::open(&config(dir.path()), chat.clone()).unwrap();

        let case = court.new_round(Mode::Casual, Difficulty::Normal).await.unwrap().clone();
        assert_eq!(case.origin, CaseOrigin::CasualList);
        assert!(CASUAL_CASES
            .iter()
            .any(|c| trim_sentences(c, 3) == case.text));

        let record = court.submit("  My cat has an alibi: she was at the vet.  ").await.unwrap();
        assert_eq!(record.judgement.verdict.score, 87);
        assert_eq!(record.judgement.verdict.explanation, "Solid alibi.");
        assert!(!record.judgement.fallback);
        assert_eq!(record.judgement.ruling, Ruling::NotGuilty);
        assert_eq!(record.defense, "My cat has an alibi: she was at the vet.");
        assert_eq!(record.case, case);
        assert_eq!(record.coins_awarded, 8);
        assert_eq!(record.balance, 8);
        assert!(court.current_case().is_none());

        // The judge saw the case text
        assert!(chat.prompts.lock().unwrap()[0].contains(&case.text));

        let reopened = Courtroom::open(&config(dir.path()), ScriptedChat::with(&[])).unwrap();
        assert_eq!(reopened.coins(), 8);
    }

    #[tokio::test]
    async fn test_submit_requires_round_and_defense() {
        let dir = tempdir().unwrap();
        let mut court = Courtroom::open(&config(dir.path()), ScriptedChat::with(&[])).unwrap();

        assert!(matches!(court.submit("anything").await, Err(CourtError::NoActiveCase)));

        court.new_round(Mode::Serious, Difficulty::Normal).await.unwrap();
        assert!(matches!(court.submit("   ").await, Err(CourtError::EmptyDefense)));
        assert!(court.current_case().is_some());
    }

    #[tokio::test]
    async fn test_fallback_verdict_pays_nothing() {
        let dir = tempdir().unwrap();
        let chat = ScriptedChat::with(&[Some("I cannot answer that.")]);
        let mut court = Courtroom::open(&config(dir.path()), chat).unwrap();

        court.new_round(Mode::Casual, Difficulty::Normal).await.unwrap();
        let record = court.submit("It was the dog, honestly.").await.unwrap();
        assert!(record.judgement.fallback);
        assert_eq!(record.judgement.verdict, Verdict::fallback());
        assert_eq!(record.coins_awarded, 0);
        assert_eq!(court.coins(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_score_pays_as_hundred() {
        let dir = tempdir().unwrap();
        let chat = ScriptedChat::with(&[Some("SCORE: 250 | EXPLANATION: Unbeatable.")]);
        let mut court = Courtroom::open(&config(dir.path()), chat).unwrap();

        court.new_round(Mode::Casual, Difficulty::Normal).await.unwrap();
        let record = court.submit("I was on the moon at the time.").await.unwrap();
        assert_eq!(record.judgement.verdict.score, 250);
        assert_eq!(record.coins_awarded, 10);
    }

    #[tokio::test]
    async fn test_failed_judging_keeps_round_open() {
        let dir = tempdir().unwrap();
        let chat = ScriptedChat::with(&[None, Some("SCORE: 40 | EXPLANATION: Thin.")]);
        let mut court = Courtroom::open(&config(dir.path()), chat).unwrap();

        court.new_round(Mode::Casual, Difficulty::Normal).await.unwrap();
        let err = court.submit("Not my roast.").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err.chat_error(), Some(ChatError::Transport(_))));
        assert!(court.current_case().is_some());

        let record = court.submit("Not my roast.").await.unwrap();
        assert_eq!(record.coins_awarded, 4);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_balance_and_round() {
        let dir = tempdir().unwrap();
        let chat = ScriptedChat::with(&[
            Some("SCORE: 80 | EXPLANATION: Convincing."),
            Some("SCORE: 80 | EXPLANATION: Convincing."),
        ]);
        let mut court = Courtroom::open(&config(dir.path()), chat).unwrap();
        std::fs::create_dir(court.vault().save_path()).unwrap();

        court.new_round(Mode::Casual, Difficulty::Normal).await.unwrap();
        for _ in 0..2 {
            let err = court.submit("The parrot confessed to everything.").await.unwrap_err();
            assert!(matches!(err, CourtError::Vault(_)));
            assert!(!err.is_retryable());
            assert_eq!(court.coins(), 0);
            assert!(court.current_case().is_some());
        }
    }

    #[tokio::test]
    async fn test_generated_round_failure_is_retryable() {
        let dir = tempdir().unwrap();
        let mut court = Courtroom::open(&config(dir.path()), ScriptedChat::with(&[None])).unwrap();

        let err = court.new_round(Mode::LlmCasual, Difficulty::Normal).await.unwrap_err();
        assert!(matches!(err, CourtError::Case(CaseError::Chat(_))));
        assert!(err.is_retryable());
        assert!(court.current_case().is_none());
    }

    #[tokio::test]
    async fn test_generated_round_uses_model_text() {
        let dir = tempdir().unwrap();
        let chat = ScriptedChat::with(&[Some("A llama crashed a wedding. Guests want refunds.")]);
        let mut court = Courtroom::open(&config(dir.path()), chat).unwrap();

        let case = court.new_round(Mode::LlmSerious, Difficulty::Hard).await.unwrap();
        assert_eq!(case.text, "A llama crashed a wedding. Guests want refunds.");
        assert_eq!(case.origin, CaseOrigin::Generated);
    }

    #[tokio::test]
    async fn test_judge_does_not_touch_coins() {
        let dir = tempdir().unwrap();
        let chat = ScriptedChat::with(&[Some("SCORE: 90 | EXPLANATION: Great.")]);
        let court = Courtroom::open(&config(dir.path()), chat).unwrap();

        let judgement = court.judge("A case.", "I did it, sorry.").await.unwrap();
        assert_eq!(judgement.verdict.score, 90);
        assert_eq!(judgement.ruling, Ruling::Guilty);
        assert_eq!(court.coins(), 0);
    }

    #[tokio::test]
    async fn test_set_coins_persists() {
        let dir = tempdir().unwrap();
        let mut court = Courtroom::open(&config(dir.path()), ScriptedChat::with(&[])).unwrap();
        court.set_coins(120).unwrap();

        let reopened = Courtroom::open(&config(dir.path()), ScriptedChat::with(&[])).unwrap();
        assert_eq!(reopened.coins(), 120);
    }

    #[test]
    fn test_reward_rule() {
        let parsed = |score| {
            ScoreOutcome::Parsed(Verdict {
                score,
                explanation: String::new(),
            })
        };
        assert_eq!(reward_for(&parsed(0), 10), 0);
        assert_eq!(reward_for(&parsed(99), 10), 9);
        assert_eq!(reward_for(&parsed(100), 10), 10);
        assert_eq!(reward_for(&parsed(100), 0), 100);
        assert_eq!(
            reward_for(&ScoreOutcome::Fallback { reply: String::new() }, 10),
            0
        );
    }

    #[test]
    fn test_config_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("judge.json");
        std::fs::write(
            &path,
            r#"{"chat": {"model": "llama3"}, "reward_divisor": 5}"#,
        )
        .unwrap();

        let config = GameConfig::load(&path).unwrap();
        assert_eq!(config.chat.model, "llama3");
        assert_eq!(config.chat.host, "http://localhost:11434");
        assert_eq!(config.reward_divisor, 5);
        assert_eq!(config.judge_options, verdict_scorer::default_judge_options());
        assert_eq!(config.data_dir, PathBuf::from("."));
    }

    #[test]
    fn test_config_rejects_bad_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("judge.json");

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(GameConfig::load(&path), Err(CourtError::Config(_))));

        std::fs::write(&path, r#"{"reward_divisor": 0}"#).unwrap();
        assert!(matches!(GameConfig::load(&path), Err(CourtError::Config(_))));

        assert!(matches!(
            GameConfig::load(&dir.path().join("missing.json")),
            Err(CourtError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_record_serializes() {
        let dir = tempdir().unwrap();
        let chat = ScriptedChat::with(&[Some("SCORE: 60 | EXPLANATION: Fair.")]);
        let mut court = Courtroom::open(&config(dir.path()), chat).unwrap();
        court.new_round(Mode::Casual, Difficulty::Normal).await.unwrap();
        let record = court.submit("The roast walked away on its own.").await.unwrap();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["mode"], "casual");
        assert_eq!(json["verdict"]["score"], 60);
        assert_eq!(json["fallback"], false);
        assert_eq!(json["round_id"], record.round_id.to_string());
        assert!(json["played_at"].is_string());
    }
}
