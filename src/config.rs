use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub google: GoogleConfig,
    pub telegram: TelegramConfig,
    pub gemini: GeminiConfig,
    pub reminders: ReminderConfig,
    pub http: HttpConfig,
    pub rate_limit: RateLimitConfig,
    pub sessions: SessionConfig,
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Where the authorization provider sends the user after consent.
    /// Served by `routes::oauth` which shows the code to paste into the chat.
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
    pub calendar_api_url: String,
    pub calendar_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    /// The assistant is disabled when no key is configured.
    pub api_key: Option<String>,
    pub model: String,
    pub api_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReminderConfig {
    pub enabled: bool,
    /// Seconds between two scheduler ticks.
    pub poll_interval_seconds: u64,
    /// Delay before the first tick after startup.
    pub first_tick_delay_seconds: u64,
    /// Events starting within `[now, now + lookahead)` are reminder-eligible.
    pub lookahead_minutes: i64,
    /// Users processed in parallel within one tick.
    pub concurrency: usize,
    /// How often expired entries are purged from the dedup ledger.
    pub ledger_gc_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Upper bound for every external call (token endpoint, calendar API,
    /// message delivery, language model, scheduler persistence).
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for the OAuth callback page
    pub callback_per_second: u64,
    /// Burst size for the OAuth callback page
    pub callback_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of users with a live assistant conversation.
    pub max_sessions: u64,
    /// Conversations untouched for this long are evicted.
    pub idle_ttl_seconds: u64,
    /// Number of conversation turns kept per user.
    pub max_history: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    /// IANA timezone used for "today", naive event times and day listings.
    pub timezone: String,
}

/// Client secrets file downloaded from the Google Cloud console.
///
/// Accepts the `{"installed": {...}}` / `{"web": {...}}` layouts as well as
/// `client_id`/`client_secret` at the root.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
}

fn parse_client_secrets(json: &str) -> Result<(String, String), ConfigError> {
    let file: ClientSecretsFile = serde_json::from_str(json)
        .map_err(|_| ConfigError::InvalidValue("GOOGLE_CREDENTIALS_FILE".to_string()))?;

    if let Some(nested) = file.installed.or(file.web) {
        return Ok((nested.client_id, nested.client_secret));
    }

    match (file.client_id, file.client_secret) {
        (Some(id), Some(secret)) => Ok((id, secret)),
        _ => Err(ConfigError::InvalidValue(
            "GOOGLE_CREDENTIALS_FILE".to_string(),
        )),
    }
}

fn google_client_credentials() -> Result<(String, String), ConfigError> {
    if let (Ok(id), Ok(secret)) = (
        env::var("GOOGLE_CLIENT_ID"),
        env::var("GOOGLE_CLIENT_SECRET"),
    ) {
        return Ok((id, secret));
    }

    let path = env::var("GOOGLE_CREDENTIALS_FILE")
        .unwrap_or_else(|_| "credentials/credentials.json".to_string());
    if !Path::new(&path).exists() {
        return Err(ConfigError::MissingEnv(
            "GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET or GOOGLE_CREDENTIALS_FILE".to_string(),
        ));
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|_| ConfigError::InvalidValue("GOOGLE_CREDENTIALS_FILE".to_string()))?;
    parse_client_secrets(&content)
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        let (client_id, client_secret) = google_client_credentials()?;

        let scopes = match env::var("GOOGLE_SCOPES") {
            Ok(v) => v
                .split([',', ' '])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => defaults.google.scopes.clone(),
        };

        let timezone = env::var("ASSISTANT_TIMEZONE").unwrap_or(defaults.assistant.timezone);
        if timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::InvalidValue("ASSISTANT_TIMEZONE".to_string()));
        }

        let config = Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: env_or("PORT", defaults.server.port)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            },
            google: GoogleConfig {
                client_id,
                client_secret,
                redirect_uri: env::var("GOOGLE_REDIRECT_URI")
                    .unwrap_or(defaults.google.redirect_uri),
                scopes,
                auth_url: env::var("GOOGLE_AUTH_URL").unwrap_or(defaults.google.auth_url),
                token_url: env::var("GOOGLE_TOKEN_URL").unwrap_or(defaults.google.token_url),
                calendar_api_url: env::var("GOOGLE_CALENDAR_API_URL")
                    .unwrap_or(defaults.google.calendar_api_url),
                calendar_id: env::var("GOOGLE_CALENDAR_ID")
                    .unwrap_or(defaults.google.calendar_id),
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN")
                    .or_else(|_| env::var("TELEGRAM_TOKEN"))
                    .map_err(|_| ConfigError::MissingEnv("TELEGRAM_BOT_TOKEN".to_string()))?,
            },
            gemini: GeminiConfig {
                api_key: env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
                model: env::var("GEMINI_MODEL").unwrap_or(defaults.gemini.model),
                api_url: env::var("GEMINI_API_URL").unwrap_or(defaults.gemini.api_url),
            },
            reminders: ReminderConfig {
                enabled: env_flag("REMINDERS_ENABLED", defaults.reminders.enabled),
                poll_interval_seconds: env_or(
                    "REMINDER_POLL_INTERVAL_SECONDS",
                    defaults.reminders.poll_interval_seconds,
                )?,
                first_tick_delay_seconds: env_or(
                    "REMINDER_FIRST_TICK_DELAY_SECONDS",
                    defaults.reminders.first_tick_delay_seconds,
                )?,
                lookahead_minutes: env_or(
                    "REMINDER_LOOKAHEAD_MINUTES",
                    defaults.reminders.lookahead_minutes,
                )?,
                concurrency: env_or("REMINDER_CONCURRENCY", defaults.reminders.concurrency)?,
                ledger_gc_interval_seconds: env_or(
                    "REMINDER_LEDGER_GC_INTERVAL_SECONDS",
                    defaults.reminders.ledger_gc_interval_seconds,
                )?,
            },
            http: HttpConfig {
                request_timeout_seconds: env_or(
                    "EXTERNAL_TIMEOUT_SECONDS",
                    defaults.http.request_timeout_seconds,
                )?,
            },
            rate_limit: RateLimitConfig {
                callback_per_second: env_or(
                    "RATE_LIMIT_CALLBACK_PER_SECOND",
                    defaults.rate_limit.callback_per_second,
                )?,
                callback_burst: env_or(
                    "RATE_LIMIT_CALLBACK_BURST",
                    defaults.rate_limit.callback_burst,
                )?,
            },
            sessions: SessionConfig {
                max_sessions: env_or("SESSION_MAX_USERS", defaults.sessions.max_sessions)?,
                idle_ttl_seconds: env_or(
                    "SESSION_IDLE_TTL_SECONDS",
                    defaults.sessions.idle_ttl_seconds,
                )?,
                max_history: env_or("SESSION_MAX_HISTORY", defaults.sessions.max_history)?,
            },
            assistant: AssistantConfig { timezone },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reminders.lookahead_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "REMINDER_LOOKAHEAD_MINUTES".to_string(),
            ));
        }
        if self.reminders.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "REMINDER_POLL_INTERVAL_SECONDS".to_string(),
            ));
        }
        if self.reminders.concurrency == 0 {
            return Err(ConfigError::InvalidValue("REMINDER_CONCURRENCY".to_string()));
        }
        if self.http.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "EXTERNAL_TIMEOUT_SECONDS".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.assistant.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http.request_timeout_seconds)
    }

    pub fn lookahead(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reminders.lookahead_minutes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://data/hope.db".to_string(),
                max_connections: 5,
            },
            google: GoogleConfig {
                client_id: String::new(),
                client_secret: String::new(),
                redirect_uri: "http://localhost:8080/oauth/callback".to_string(),
                scopes: vec!["https://www.googleapis.com/auth/calendar".to_string()],
                auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                calendar_api_url: "https://www.googleapis.com/calendar/v3".to_string(),
                calendar_id: "primary".to_string(),
            },
            telegram: TelegramConfig {
                bot_token: String::new(),
            },
            gemini: GeminiConfig {
                api_key: None,
                model: "gemini-2.5-flash".to_string(),
                api_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            },
            reminders: ReminderConfig {
                enabled: true,
                poll_interval_seconds: 60,
                first_tick_delay_seconds: 10,
                lookahead_minutes: 30,
                concurrency: 8,
                ledger_gc_interval_seconds: 60 * 60,
            },
            http: HttpConfig {
                request_timeout_seconds: 15,
            },
            rate_limit: RateLimitConfig {
                callback_per_second: 2,
                callback_burst: 10,
            },
            sessions: SessionConfig {
                max_sessions: 1000,
                idle_ttl_seconds: 30 * 60,
                max_history: 20,
            },
            assistant: AssistantConfig {
                timezone: "UTC".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_secrets_installed_layout() {
        let json = r#"{"installed": {"client_id": "abc.apps.googleusercontent.com", "client_secret": "s3cret", "redirect_uris": ["http://localhost"]}}"#;
        let (id, secret) = parse_client_secrets(json).unwrap();
        assert_eq!(id, "abc.apps.googleusercontent.com");
        assert_eq!(secret, "s3cret");
    }

    #[test]
    fn client_secrets_web_and_flat_layouts() {
        let web = r#"{"web": {"client_id": "w", "client_secret": "ws"}}"#;
        assert_eq!(
            parse_client_secrets(web).unwrap(),
            ("w".to_string(), "ws".to_string())
        );

        let flat = r#"{"client_id": "f", "client_secret": "fs"}"#;
        assert_eq!(
            parse_client_secrets(flat).unwrap(),
            ("f".to_string(), "fs".to_string())
        );
    }

    #[test]
    fn client_secrets_missing_fields_is_rejected() {
        assert!(parse_client_secrets(r#"{"client_id": "only-id"}"#).is_err());
        assert!(parse_client_secrets("not json").is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lookahead(), chrono::Duration::minutes(30));
        assert_eq!(config.reminders.poll_interval_seconds, 60);
        assert_eq!(config.timezone(), chrono_tz::UTC);
    }

    #[test]
    fn zero_lookahead_is_rejected() {
        let mut config = Config::default();
        config.reminders.lookahead_minutes = 0;
        assert!(config.validate().is_err());
    }
}
