/// Configuration management
use crate::error::{AccordError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_INITIAL_MESSAGE_COUNT: usize = 15;
const DEFAULT_MORE_MESSAGE_COUNT: usize = 5;

/// Which projection of a conversation to print
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    #[default]
    Chat,
    Agreements,
    Proposals,
    Cancellations,
    Unread,
    /// Messages still waiting for reconciliation
    Unreconciled,
}

impl FromStr for View {
    type Err = AccordError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chat" => Ok(View::Chat),
            "agreements" => Ok(View::Agreements),
            "proposals" => Ok(View::Proposals),
            "cancellations" => Ok(View::Cancellations),
            "unread" => Ok(View::Unread),
            "unreconciled" => Ok(View::Unreconciled),
            other => Err(AccordError::Config(format!("Unknown view: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Size of the first message batch of a conversation
    pub initial_message_count: usize,

    /// Size of each "load more" batch
    pub more_message_count: usize,

    /// Conversation bundle to inspect (CLI only)
    pub bundle_path: Option<PathBuf>,

    pub view: View,

    /// Print JSON instead of the colored listing
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_message_count: DEFAULT_INITIAL_MESSAGE_COUNT,
            more_message_count: DEFAULT_MORE_MESSAGE_COUNT,
            bundle_path: None,
            view: View::Chat,
            json: false,
        }
    }
}

fn parse_count(flag: &str, value: Option<&String>) -> Result<usize> {
    let raw = value.ok_or_else(|| AccordError::Config(format!("{} requires a number", flag)))?;
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AccordError::Config(format!("{} must be a positive number", flag))),
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(AccordError::Config(format!(
                "Usage: {} <bundle.json> [--view chat|agreements|proposals|cancellations|unread|unreconciled] [--json] [--initial <n>] [--more <n>]",
                args.first().map(|s| s.as_str()).unwrap_or("accord")
            )));
        }

        let mut config = Config::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--view" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        AccordError::Config("--view requires a view name".to_string())
                    })?;
                    config.view = v.parse()?;
                    i += 2;
                }
                "--json" => {
                    config.json = true;
                    i += 1;
                }
                "--initial" => {
                    config.initial_message_count = parse_count("--initial", args.get(i + 1))?;
                    i += 2;
                }
                "--more" => {
                    config.more_message_count = parse_count("--more", args.get(i + 1))?;
                    i += 2;
                }
                flag if flag.starts_with("--") => {
                    return Err(AccordError::Config(format!("Unknown flag: {}", flag)));
                }
                path => {
                    if config.bundle_path.is_some() {
                        return Err(AccordError::Config(format!(
                            "Only one bundle may be given, got extra {}",
                            path
                        )));
                    }
                    config.bundle_path = Some(PathBuf::from(path));
                    i += 1;
                }
            }
        }

        config.apply_env();

        if config.bundle_path.is_none() {
            return Err(AccordError::Config("No bundle file given".to_string()));
        }

        Ok(config)
    }

    /// Env overrides (nice for scripts)
    pub fn apply_env(&mut self) {
        if let Some(n) = std::env::var("ACCORD_INITIAL_MESSAGES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            self.initial_message_count = n;
        }
        if let Some(n) = std::env::var("ACCORD_MORE_MESSAGES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            self.more_message_count = n;
        }
        if std::env::var("ACCORD_JSON").is_ok() {
            self.json = true;
        }
    }
}
