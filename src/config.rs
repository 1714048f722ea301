use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use chrono_tz::Tz;
use serde::Deserialize;

use crate::classify::ClassifierRules;

const DEFAULT_HORIZON_HOURS: f64 = 84.0;
const DEFAULT_TIMEZONE: &str = "America/Los_Angeles";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_TELEGRAM_BASE_URL: &str = "https://api.telegram.org";
const DEFAULT_STUDY_KIT_DIR: &str = "./study-guides";

/// One Canvas login, as stored in the accounts credentials file.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub name: String,
    pub url: String,
    pub api_token: String,
}

#[derive(Debug, Deserialize)]
struct AccountsFile {
    instances: Vec<Account>,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub base_url: String,
}

/// Everything one run needs, resolved once at startup. Components receive the
/// pieces they use instead of reading the environment ad hoc.
#[derive(Debug, Clone)]
pub struct Config {
    pub accounts: Vec<Account>,
    pub openai: OpenAiConfig,
    pub telegram: TelegramConfig,
    /// Forward window for notification-worthy items.
    pub horizon: Duration,
    /// Zone all times are rendered in. Source timestamps are UTC.
    pub timezone: Tz,
    pub rules: ClassifierRules,
    /// Due timestamps this close together count as the same assignment.
    pub merge_tolerance_secs: i64,
    pub plan_concurrency: usize,
    pub fetch_max_pages: u32,
    pub study_kit_timeout: std::time::Duration,
    pub study_kit_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let accounts_path = env::var("CANVAS_ACCOUNTS")
            .map_err(|_| anyhow!("CANVAS_ACCOUNTS must point to the accounts JSON file"))?;
        let accounts = load_accounts(Path::new(&accounts_path))?;

        let openai = OpenAiConfig {
            api_key: env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow!("OPENAI_API_KEY must be set"))?,
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
        };

        let telegram = TelegramConfig {
            bot_token: env::var("TELEGRAM_BOT_TOKEN")
                .map_err(|_| anyhow!("TELEGRAM_BOT_TOKEN must be set"))?,
            chat_id: env::var("TELEGRAM_CHAT_ID")
                .map_err(|_| anyhow!("TELEGRAM_CHAT_ID must be set"))?,
            base_url: env::var("TELEGRAM_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_TELEGRAM_BASE_URL.to_string()),
        };

        let horizon_hours = env_or("HORIZON_HOURS", DEFAULT_HORIZON_HOURS);
        if horizon_hours <= 0.0 {
            anyhow::bail!("HORIZON_HOURS must be positive");
        }

        let timezone = parse_timezone(
            &env::var("TIMEZONE").unwrap_or_else(|_| DEFAULT_TIMEZONE.to_string()),
        )?;

        let mut rules = ClassifierRules::default();
        if let Ok(keywords) = env::var("EXAM_KEYWORDS") {
            rules.exam_keywords = split_csv(&keywords);
        }
        rules.exam_point_threshold = env_or("EXAM_POINT_THRESHOLD", rules.exam_point_threshold);

        Ok(Self {
            accounts,
            openai,
            telegram,
            horizon: Duration::minutes((horizon_hours * 60.0) as i64),
            timezone,
            rules,
            merge_tolerance_secs: env_or("MERGE_TOLERANCE_SECS", 60),
            plan_concurrency: env_or("PLAN_CONCURRENCY", 4).max(1),
            fetch_max_pages: env_or("FETCH_MAX_PAGES", 10).max(1),
            study_kit_timeout: std::time::Duration::from_secs(env_or(
                "STUDY_KIT_TIMEOUT_SECS",
                300,
            )),
            study_kit_dir: PathBuf::from(
                env::var("STUDY_KIT_DIR").unwrap_or_else(|_| DEFAULT_STUDY_KIT_DIR.to_string()),
            ),
        })
    }
}

pub fn load_accounts(path: &Path) -> Result<Vec<Account>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read accounts file {}", path.display()))?;
    let file: AccountsFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse accounts file {}", path.display()))?;

    if file.instances.is_empty() {
        anyhow::bail!("accounts file {} lists no instances", path.display());
    }

    let mut accounts = Vec::with_capacity(file.instances.len());
    for mut account in file.instances {
        if account.name.trim().is_empty() {
            anyhow::bail!("account with empty name in {}", path.display());
        }
        if account.api_token.trim().is_empty() {
            anyhow::bail!("account {} has an empty api_token", account.name);
        }
        let url = account.url.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            anyhow::bail!("account {} has an empty url", account.name);
        }
        account.url = url;
        accounts.push(account);
    }
    Ok(accounts)
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    Tz::from_str(name.trim()).map_err(|_| anyhow!("unknown timezone: {}", name))
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<T>().ok())
        .unwrap_or(default)
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_accounts(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_accounts_and_trims_trailing_slash() {
        let file = write_accounts(
            r#"{"instances": [
                {"name": "State U", "url": "https://canvas.state.edu/", "api_token": "tok-1"},
                {"name": "Community College", "url": "https://cc.instructure.com", "api_token": "tok-2"}
            ]}"#,
        );

        let accounts = load_accounts(file.path()).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].url, "https://canvas.state.edu");
        assert_eq!(accounts[1].name, "Community College");
    }

    #[test]
    fn rejects_empty_instance_list() {
        let file = write_accounts(r#"{"instances": []}"#);
        let err = load_accounts(file.path()).unwrap_err();
        assert!(err.to_string().contains("no instances"));
    }

    #[test]
    fn rejects_blank_token() {
        let file = write_accounts(
            r#"{"instances": [{"name": "State U", "url": "https://x.edu", "api_token": "  "}]}"#,
        );
        assert!(load_accounts(file.path()).is_err());
    }

    #[test]
    fn parses_known_timezone_and_rejects_garbage() {
        assert_eq!(
            parse_timezone("America/Los_Angeles").unwrap().name(),
            "America/Los_Angeles"
        );
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }

    #[test]
    fn csv_splitting_lowercases_and_drops_blanks() {
        assert_eq!(
            split_csv("Midterm, FINAL ,,exam"),
            vec!["midterm", "final", "exam"]
        );
    }
}
