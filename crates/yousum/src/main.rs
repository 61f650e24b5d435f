use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use yousum_core::{ClearReason, Config, HistoryEntry, SessionKey, Yousum};
use zeroize::Zeroizing;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "yousum",
    about = "Summarize video transcripts with a PIN-protected API key",
    version
)]
struct Cli {
    /// Data directory (default: platform data dir or $YOUSUM_DATA_DIR)
    #[arg(long, env = "YOUSUM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// PIN for the stored API key ($YOUSUM_PIN). Prompted for when absent.
    #[arg(long, env = "YOUSUM_PIN", hide_env_values = true)]
    pin: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the encrypted API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Summarize a video and add it to the history
    Summarize {
        /// youtu.be/<id> or youtube.com/watch?v=<id> URL
        url: String,
    },
    /// Ask a question about a summarized video
    Ask {
        /// History entry number as shown by `history list`
        index: usize,
        /// The question
        #[arg(trailing_var_arg = true, required = true)]
        question: Vec<String>,
    },
    /// Digest of the most recent summaries
    News {
        /// Number of history entries to include
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Inspect and move the summary history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Interactive session that keeps the key unlocked until idle
    Shell,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Encrypt and store an API key under a PIN
    Save {
        /// API key ($YOUSUM_API_KEY). Prompted for when absent.
        #[arg(long, env = "YOUSUM_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Check that the PIN decrypts the stored key
    Unlock,
    /// Delete the stored key
    Reset,
    /// Show whether a key is stored
    Status,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List entries, newest first
    List,
    /// Print one entry's summary
    Show { index: usize },
    /// Delete one entry
    Delete { index: usize },
    /// Write the history to yousum-YYYYMMDD-HHMMSS.json
    Export {
        /// Directory to write into
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Merge entries from an exported file
    Import { file: PathBuf },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("YOUSUM_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = Config {
        data_dir: cli.data_dir.clone(),
        ..Default::default()
    };
    let idle_timeout = cfg.idle_timeout;
    let app = Yousum::open(&cfg).context("open yousum data directory")?;
    let pin = cli.pin.map(Zeroizing::new);

    match cli.command {
        Commands::Key { action } => match action {
            KeyAction::Save { api_key } => cmd_key_save(&app, api_key, pin).await,
            KeyAction::Unlock => {
                unlock(&app, pin.as_ref()).await?;
                println!("✓ PIN accepted");
                Ok(())
            }
            KeyAction::Reset => cmd_key_reset(&app).await,
            KeyAction::Status => cmd_key_status(&app),
        },

        Commands::Summarize { url } => {
            let key = unlock(&app, pin.as_ref()).await?;
            summarize(&app, &url, &key).await
        }

        Commands::Ask { index, question } => {
            let key = unlock(&app, pin.as_ref()).await?;
            ask(&app, index, &question.join(" "), &key).await
        }

        Commands::News { limit } => {
            let key = unlock(&app, pin.as_ref()).await?;
            news(&app, limit, &key).await
        }

        Commands::History { action } => match action {
            HistoryAction::List => {
                list_history(&app);
                Ok(())
            }
            HistoryAction::Show { index } => show_entry(&app, index),
            HistoryAction::Delete { index } => delete_entry(&app, index),
            HistoryAction::Export { out } => export_history(&app, &out),
            HistoryAction::Import { file } => import_history(&app, &file),
        },

        Commands::Shell => cmd_shell(&app, pin, idle_timeout).await,
    }
}

// ── Key commands ──────────────────────────────────────────────────────────────

async fn cmd_key_save(
    app: &Yousum,
    api_key: Option<String>,
    pin: Option<Zeroizing<String>>,
) -> Result<()> {
    let api_key = match api_key {
        Some(k) => Zeroizing::new(k),
        None => prompt_secret("API key: ").await?,
    };
    let pin = match pin {
        Some(p) => p,
        None => {
            let first = prompt_secret("New PIN: ").await?;
            let second = prompt_secret("Confirm PIN: ").await?;
            if *first != *second {
                anyhow::bail!("PINs do not match");
            }
            first
        }
    };

    app.vault()
        .encrypt_and_store(api_key.trim(), &pin)
        .await
        .context("save API key")?;
    println!("✓ API key encrypted and saved");
    Ok(())
}

async fn cmd_key_reset(app: &Yousum) -> Result<()> {
    app.vault().clear().await.context("reset API key")?;
    println!("✓ stored API key deleted");
    Ok(())
}

fn cmd_key_status(app: &Yousum) -> Result<()> {
    let stored = app.vault().has_key()?;
    println!("data dir:   {}", app.data_dir().display());
    println!("API key:    {}", if stored { "stored" } else { "not set" });
    println!("history:    {} entries", app.history().len());
    Ok(())
}

// ── Shared command bodies ─────────────────────────────────────────────────────

async fn summarize(app: &Yousum, url: &str, key: &str) -> Result<()> {
    let entry = app.summarize_url(url, key).await?;
    println!("# {}\n", entry.title);
    println!("{}", entry.summary);
    Ok(())
}

async fn ask(app: &Yousum, number: usize, question: &str, key: &str) -> Result<()> {
    let answer = app.ask(to_index(number)?, question, key).await?;
    println!("{answer}");
    Ok(())
}

async fn news(app: &Yousum, limit: usize, key: &str) -> Result<()> {
    let digest = app.news(limit, key).await?;
    println!("{digest}");
    Ok(())
}

fn list_history(app: &Yousum) {
    let entries = app.history().load();
    if entries.is_empty() {
        println!("(no history)");
        return;
    }
    for (i, e) in entries.iter().enumerate() {
        println!("  #{} — {} — {} — {}", i + 1, short_date(e), e.title, e.url);
    }
}

fn show_entry(app: &Yousum, number: usize) -> Result<()> {
    let entry = app
        .history()
        .get(to_index(number)?)
        .with_context(|| format!("no history entry #{number}"))?;
    println!("# {}", entry.title);
    println!("{}  ({})\n", entry.url, entry.created_at);
    println!("{}", entry.summary);
    Ok(())
}

fn delete_entry(app: &Yousum, number: usize) -> Result<()> {
    app.history().delete_at(to_index(number)?);
    println!("✓ deleted #{number}");
    Ok(())
}

fn export_history(app: &Yousum, dir: &Path) -> Result<()> {
    let path = app.history().export_to(dir).context("export history")?;
    println!("✓ exported to {}", path.display());
    Ok(())
}

fn import_history(app: &Yousum, file: &Path) -> Result<()> {
    let outcome = app
        .history()
        .import_from(file)
        .with_context(|| format!("import {}", file.display()))?;
    println!(
        "✓ imported {} new entr{} ({} total)",
        outcome.added,
        if outcome.added == 1 { "y" } else { "ies" },
        outcome.total
    );
    Ok(())
}

// ── Interactive shell ─────────────────────────────────────────────────────────

const SHELL_HELP: &str = "\
commands:
  unlock                 decrypt the API key for this session
  lock                   forget the decrypted key
  save                   store a new API key under a PIN
  reset                  delete the stored key
  status                 show key and history status
  summarize <url>        summarize a video
  ask <n> <question>     ask about history entry n
  news [limit]           digest of recent summaries
  list | show <n> | delete <n>
  export [dir] | import <file>
  quit";

enum Flow {
    Continue,
    Quit,
}

async fn cmd_shell(
    app: &Yousum,
    pin: Option<Zeroizing<String>>,
    idle_timeout: Duration,
) -> Result<()> {
    let session = SessionKey::new();
    let watchdog = session.spawn_idle_watchdog(idle_timeout);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "yousum shell (key is forgotten after {} idle). Type `help`.",
        humantime::format_duration(idle_timeout)
    );

    loop {
        prompt(&session)?;
        // Ctrl-C ends the session both at the prompt and mid-command.
        let Some(line) = interruptible(lines.next_line(), tokio::signal::ctrl_c()).await else {
            println!();
            break;
        };
        let Some(line) = line.context("read stdin")? else { break };

        let command = shell_command(app, &session, pin.as_ref(), line.trim());
        match interruptible(command, tokio::signal::ctrl_c()).await {
            None => {
                println!();
                break;
            }
            Some(Ok(Flow::Continue)) => {}
            Some(Ok(Flow::Quit)) => break,
            Some(Err(e)) => eprintln!("error: {e:#}"),
        }
    }

    session.clear(ClearReason::Unload);
    watchdog.abort();
    Ok(())
}

async fn shell_command(
    app: &Yousum,
    session: &SessionKey,
    pin: Option<&Zeroizing<String>>,
    line: &str,
) -> Result<Flow> {
    let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match cmd {
        "" => {}
        "help" | "?" => println!("{SHELL_HELP}"),
        "quit" | "exit" => return Ok(Flow::Quit),

        "unlock" => {
            let ticket = session.begin_unlock();
            let key = unlock(app, pin).await?;
            if session.install(ticket, key) {
                println!("✓ unlocked");
            } else {
                println!("session was locked during unlock, try again");
            }
        }
        "lock" => {
            session.clear(ClearReason::Hidden);
            println!("✓ locked");
        }
        "save" => {
            cmd_key_save(app, None, pin.cloned()).await?;
            session.clear(ClearReason::Reset);
        }
        "reset" => {
            cmd_key_reset(app).await?;
            session.clear(ClearReason::Reset);
        }
        "status" => {
            cmd_key_status(app)?;
            println!(
                "session:    {}",
                if session.is_unlocked() { "unlocked" } else { "locked" }
            );
        }

        "summarize" => {
            let key = require_key(session)?;
            summarize(app, rest, &key).await?;
        }
        "ask" => {
            let (number, question) = rest
                .split_once(char::is_whitespace)
                .context("usage: ask <n> <question>")?;
            let number = number.parse().context("entry number must be a number")?;
            let key = require_key(session)?;
            ask(app, number, question, &key).await?;
        }
        "news" => {
            let limit = if rest.is_empty() {
                10
            } else {
                rest.parse().context("limit must be a number")?
            };
            let key = require_key(session)?;
            news(app, limit, &key).await?;
        }

        "list" => list_history(app),
        "show" => show_entry(app, parse_number(rest)?)?,
        "delete" => delete_entry(app, parse_number(rest)?)?,
        "export" => export_history(app, Path::new(if rest.is_empty() { "." } else { rest }))?,
        "import" => {
            anyhow::ensure!(!rest.is_empty(), "usage: import <file>");
            import_history(app, Path::new(rest))?;
        }

        other => println!("unknown command `{other}`, type `help`"),
    }
    Ok(Flow::Continue)
}

/// Run `fut` unless `interrupt` resolves first.
async fn interruptible<T>(
    fut: impl Future<Output = T>,
    interrupt: impl Future,
) -> Option<T> {
    tokio::select! {
        value = fut => Some(value),
        _ = interrupt => None,
    }
}

fn prompt(session: &SessionKey) -> Result<()> {
    use std::io::Write;
    let marker = if session.is_unlocked() { "*" } else { "" };
    print!("yousum{marker}> ");
    std::io::stdout().flush().context("flush stdout")
}

fn require_key(session: &SessionKey) -> Result<Zeroizing<String>> {
    session
        .get()
        .context("API key is locked, run `unlock` first")
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Decrypt the stored key, prompting for the PIN unless one was given.
async fn unlock(app: &Yousum, pin: Option<&Zeroizing<String>>) -> Result<Zeroizing<String>> {
    let pin = match pin {
        Some(p) => p.clone(),
        None => prompt_secret("PIN: ").await?,
    };
    let key = app.vault().decrypt_stored(&pin).await?;
    Ok(key)
}

async fn prompt_secret(label: &'static str) -> Result<Zeroizing<String>> {
    let value = tokio::task::spawn_blocking(move || rpassword::prompt_password(label))
        .await
        .context("prompt task failed")?
        .context("read from terminal")?;
    Ok(Zeroizing::new(value))
}

/// History numbers shown to the user start at 1.
fn to_index(number: usize) -> Result<usize> {
    number
        .checked_sub(1)
        .context("history entries are numbered from 1")
}

fn parse_number(s: &str) -> Result<usize> {
    s.parse()
        .with_context(|| format!("expected an entry number, got `{s}`"))
}

fn short_date(entry: &HistoryEntry) -> &str {
    entry.created_at.get(..10).unwrap_or(&entry.created_at)
}
