// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (C) 2025 Jonathan D.A. Jewell

//! AI Judge CLI
//!
//! Terminal front end for the courtroom game.
//!
//! # Overview
//!
//! Each round the bench presents a short case, the player argues a defense,
//! and a language model grades it from 0 to 100 with a one-line explanation.
//! Good defenses earn coins, kept in an encrypted save file next to its key.
//!
//! # Offline play
//!
//! The `casual` and `serious` modes draw cases from built-in lists, but
//! judging always needs the chat service. When it cannot be reached the
//! command exits with code 2 so scripts can retry.

use case_source::{Difficulty, Mode};
use chat_service::OllamaClient;
use clap::{Parser, Subcommand, ValueEnum};
use court_session::{Courtroom, CourtError, GameConfig, Judgement, RoundRecord};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

/// Output format for results
#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine processing
    Json,
    /// Compact single-line output
    Compact,
}

/// Verbosity level
#[derive(Debug, Clone, ValueEnum)]
enum Verbosity {
    /// Errors only
    Quiet,
    /// Warnings and errors
    Normal,
    /// Progress of each request
    Verbose,
    /// Debug output including raw model replies
    Debug,
}

impl Verbosity {
    fn level(&self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::ERROR,
            Verbosity::Normal => LevelFilter::WARN,
            Verbosity::Verbose => LevelFilter::INFO,
            Verbosity::Debug => LevelFilter::DEBUG,
        }
    }
}

#[derive(Parser)]
#[command(name = "judge")]
#[command(author = "Jonathan D.A. Jewell <jonathan@hyperpolymath.org>")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Courtroom party game judged by a language model")]
#[command(long_about = r#"
AI Judge - argue your way out of absurd (and serious) cases

OVERVIEW
  1. The bench reads you a case: from a built-in list, or freshly written
     by a language model (llm-casual, llm-serious).
  2. You type a defense.
  3. The AI judge scores it 0-100 and explains why. You earn score/10 coins.

MODES
  casual, serious            built-in case lists
  llm-casual, llm-serious    generated by the chat service
  Unknown modes fall back to casual.

EXAMPLES
  judge play                                 # one casual round
  judge play --mode llm-serious --rounds 3   # three generated rounds
  judge case --mode serious                  # just show a case
  judge score --case "..." --defense "..."   # grade any defense
  judge coins                                # show your balance

EXIT CODES
  0  Success
  2  Chat service unavailable (try again)
  3  Error during execution
"#)]
#[command(after_help = r#"
SAVE FILES
  coins.dat and secret.key live in --data-dir (default: current directory).
  Deleting secret.key makes the existing coins.dat unreadable; the balance
  then starts again from zero.

SHELL COMPLETIONS
  Generate completions with:
    judge completions bash > /etc/bash_completion.d/judge
    judge completions zsh > ~/.zfunc/_judge
    judge completions fish > ~/.config/fish/completions/judge.fish
"#)]
struct Cli {
    /// Output verbosity level
    #[arg(short, long, value_enum, default_value = "normal", global = true)]
    verbosity: Verbosity,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Configuration file (JSON)
    #[arg(short, long, global = true, env = "JUDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Chat service base URL
    #[arg(long, global = true, env = "JUDGE_HOST")]
    host: Option<String>,

    /// Model name
    #[arg(long, global = true, env = "JUDGE_MODEL")]
    model: Option<String>,

    /// Chat request timeout in seconds
    #[arg(long, global = true, env = "JUDGE_TIMEOUT")]
    timeout: Option<u64>,

    /// Directory for coins.dat and secret.key
    #[arg(long, global = true, env = "JUDGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play rounds: get a case, argue, get judged, earn coins
    ///
    /// Reads each defense from stdin unless --defense is given.
    #[command(visible_alias = "p")]
    Play {
        /// Case mode (casual, serious, llm-casual, llm-serious)
        #[arg(short, long, default_value = "casual")]
        mode: String,

        /// Difficulty for generated cases
        #[arg(short, long, default_value = "normal")]
        difficulty: String,

        /// Defense text (used for every round)
        #[arg(long)]
        defense: Option<String>,

        /// Number of rounds
        #[arg(short, long, default_value = "1")]
        rounds: u32,
    },

    /// Show a single case
    #[command(visible_alias = "c")]
    Case {
        /// Case mode (casual, serious, llm-casual, llm-serious)
        #[arg(short, long, default_value = "casual")]
        mode: String,

        /// Difficulty for generated cases
        #[arg(short, long, default_value = "normal")]
        difficulty: String,
    },

    /// Score a defense against any case text; no coins change hands
    #[command(visible_alias = "s")]
    Score {
        /// Case text
        #[arg(long)]
        case: String,

        /// Defense text
        #[arg(long)]
        defense: String,
    },

    /// Show or overwrite the coin balance
    Coins {
        /// Replace the balance with this value
        #[arg(long)]
        set: Option<u64>,
    },

    /// Generate shell completions
    ///
    /// Outputs shell completion scripts to stdout.
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },

    /// Generate man page
    ///
    /// Outputs a man page in roff format.
    Man,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity.level())
        .with_writer(io::stderr)
        .init();

    let exit_code = match &cli.command {
        Commands::Completions { shell } => {
            generate_completions(*shell);
            0
        }
        Commands::Man => generate_man_page(),
        _ => match run(&cli).await {
            Ok(()) => 0,
            Err(e) if e.is_retryable() => {
                eprintln!("The judge is unavailable ({}). Please try again.", e);
                2
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                3
            }
        },
    };

    std::process::exit(exit_code);
}

/// File settings first, then flags and environment on top
fn resolve_config(cli: &Cli) -> Result<GameConfig, CourtError> {
    let mut config = match &cli.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };
    if let Some(host) = &cli.host {
        config.chat.host = host.clone();
    }
    if let Some(model) = &cli.model {
        config.chat.model = model.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.chat.timeout_secs = timeout;
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn parse_difficulty(input: &str) -> Result<Difficulty, CourtError> {
    input.parse().map_err(CourtError::from)
}

async fn run(cli: &Cli) -> Result<(), CourtError> {
    let config = resolve_config(cli)?;
    let chat = OllamaClient::new(config.chat.clone())
        .map_err(|e| CourtError::Config(format!("cannot build chat client: {}", e)))?;
    let mut court = Courtroom::open(&config, chat)?;

    match &cli.command {
        Commands::Play {
            mode,
            difficulty,
            defense,
            rounds,
        } => {
            let mode = Mode::parse_lenient(mode);
            let difficulty = parse_difficulty(difficulty)?;
            for round in 1..=*rounds {
                if *rounds > 1 && matches!(cli.format, OutputFormat::Text) {
                    println!("=== Round {} of {} ===\n", round, rounds);
                }
                play_round(&mut court, mode, difficulty, defense.as_deref(), &cli.format).await?;
            }
        }
        Commands::Case { mode, difficulty } => {
            let mode = Mode::parse_lenient(mode);
            let difficulty = parse_difficulty(difficulty)?;
            let case = court.new_round(mode, difficulty).await?;
            match cli.format {
                OutputFormat::Json => print_json(case),
                OutputFormat::Compact => println!("{}", case.text),
                OutputFormat::Text => println!("Judge says: {}", case.text),
            }
        }
        Commands::Score { case, defense } => {
            let judgement = court.judge(case, defense).await?;
            print_judgement(&judgement, &cli.format);
        }
        Commands::Coins { set } => {
            if let Some(coins) = set {
                court.set_coins(*coins)?;
            }
            match cli.format {
                OutputFormat::Json => print_json(&serde_json::json!({ "coins": court.coins() })),
                OutputFormat::Compact => println!("{}", court.coins()),
                OutputFormat::Text => println!("Coins: {}", court.coins()),
            }
        }
        Commands::Completions { .. } | Commands::Man => {}
    }

    Ok(())
}

async fn play_round(
    court: &mut Courtroom<OllamaClient>,
    mode: Mode,
    difficulty: Difficulty,
    defense: Option<&str>,
    format: &OutputFormat,
) -> Result<(), CourtError> {
    let case = court.new_round(mode, difficulty).await?;
    if matches!(format, OutputFormat::Text) {
        println!("Judge says: {}\n", case.text);
    }

    let record = loop {
        let text = match defense {
            Some(text) => text.to_string(),
            None => read_defense()?,
        };
        match court.submit(&text).await {
            Err(CourtError::EmptyDefense) if defense.is_none() => {
                println!("Please enter a defense.");
            }
            result => break result?,
        }
    };

    print_record(&record, format);
    Ok(())
}

fn read_defense() -> Result<String, CourtError> {
    print!("Your defense: ");
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(CourtError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stdin closed before a defense was entered",
        )));
    }
    Ok(line)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode JSON: {}", e),
    }
}

fn print_judgement(judgement: &Judgement, format: &OutputFormat) {
    match format {
        OutputFormat::Json => print_json(judgement),
        OutputFormat::Compact => println!(
            "score={} ruling={:?} fallback={}",
            judgement.verdict.score, judgement.ruling, judgement.fallback
        ),
        OutputFormat::Text => {
            println!("Score: {}/100", judgement.verdict.score);
            println!("{}", judgement.verdict.explanation);
            println!("Verdict: {}", judgement.ruling);
        }
    }
}

fn print_record(record: &RoundRecord, format: &OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Compact => println!(
            "{} score={} ruling={:?} awarded={} balance={}",
            record.round_id,
            record.judgement.verdict.score,
            record.judgement.ruling,
            record.coins_awarded,
            record.balance
        ),
        OutputFormat::Text => {
            println!();
            print_judgement(&record.judgement, format);
            println!("Coins: +{} (balance {})\n", record.coins_awarded, record.balance);
        }
    }
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    clap_complete::generate(shell, &mut Cli::command(), "judge", &mut io::stdout());
}

fn generate_man_page() -> i32 {
    use clap::CommandFactory;
    let man = clap_mangen::Man::new(Cli::command());
    let mut buffer: Vec<u8> = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        eprintln!("Failed to generate man page: {}", e);
        return 3;
    }
    print!("{}", String::from_utf8_lossy(&buffer));
    0
}
