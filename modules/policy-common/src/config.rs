use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::PolicyDiffError;

const DEFAULT_WORKFLOW_URL: &str = "https://api.coze.cn/v1/workflow/run";

/// A login from the static credential table.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Coze workflow API
    pub coze_api_token: String,
    pub coze_workflow_url: String,
    pub coze_policy_workflow_id: String,
    pub coze_standard_workflow_id: String,
    pub coze_max_attempts: u32,
    pub coze_retry_delay_ms: u64,
    pub coze_timeout_secs: Option<u64>,

    // Object storage
    pub storage_base_url: String,
    pub storage_bucket: String,
    pub storage_token: String,
    pub storage_public_url: String,
    pub upload_concurrency: usize,

    // Auth
    pub users: Vec<Credential>,
    pub session_secret: String,

    // Export
    pub pandoc_bin: String,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing or malformed.
    pub fn from_env() -> Self {
        let users = parse_users(&required_env("APP_USERS"))
            .unwrap_or_else(|e| panic!("APP_USERS is invalid: {e}"));

        Self {
            database_url: required_env("DATABASE_URL"),
            coze_api_token: required_env("COZE_API_TOKEN"),
            coze_workflow_url: env::var("COZE_WORKFLOW_URL")
                .unwrap_or_else(|_| DEFAULT_WORKFLOW_URL.to_string()),
            coze_policy_workflow_id: required_env("COZE_POLICY_WORKFLOW_ID"),
            coze_standard_workflow_id: required_env("COZE_STANDARD_WORKFLOW_ID"),
            coze_max_attempts: parsed_env("COZE_MAX_ATTEMPTS", 5),
            coze_retry_delay_ms: parsed_env("COZE_RETRY_DELAY_MS", 2000),
            coze_timeout_secs: optional_parsed_env("COZE_TIMEOUT_SECS"),
            storage_base_url: required_env("STORAGE_BASE_URL"),
            storage_bucket: required_env("STORAGE_BUCKET"),
            storage_token: required_env("STORAGE_TOKEN"),
            storage_public_url: required_env("STORAGE_PUBLIC_URL"),
            upload_concurrency: parsed_env("UPLOAD_CONCURRENCY", 3),
            users,
            session_secret: required_env("SESSION_SECRET"),
            pandoc_bin: env::var("PANDOC_BIN").unwrap_or_else(|_| "pandoc".to_string()),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: parsed_env("WEB_PORT", 3000),
        }
    }

    /// Look up a login. Compares every entry in constant time so response
    /// timing does not reveal which usernames exist.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<&Credential> {
        let mut found = None;
        for cred in &self.users {
            let user_ok = constant_time_eq(cred.username.as_bytes(), username.as_bytes());
            let pass_ok = constant_time_eq(cred.password.as_bytes(), password.as_bytes());
            if user_ok & pass_ok {
                found = Some(cred);
            }
        }
        found
    }

    /// Log the effective settings without secrets.
    pub fn log_redacted(&self) {
        tracing::info!(
            workflow_url = %self.coze_workflow_url,
            max_attempts = self.coze_max_attempts,
            retry_delay_ms = self.coze_retry_delay_ms,
            storage = %self.storage_base_url,
            bucket = %self.storage_bucket,
            upload_concurrency = self.upload_concurrency,
            users = self.users.len(),
            "Loaded configuration"
        );
    }
}

/// Parse `user:password,user:password`. Passwords may contain `:`.
pub fn parse_users(raw: &str) -> Result<Vec<Credential>, PolicyDiffError> {
    let mut users = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (username, password) = entry.split_once(':').ok_or_else(|| {
            PolicyDiffError::Config(format!("entry without ':' separator: {entry}"))
        })?;
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(PolicyDiffError::Config(format!(
                "empty username or password in entry for '{username}'"
            )));
        }
        if users.iter().any(|c: &Credential| c.username == username) {
            return Err(PolicyDiffError::Config(format!("duplicate user '{username}'")));
        }
        users.push(Credential {
            username: username.to_string(),
            password: password.to_string(),
        });
    }
    if users.is_empty() {
        return Err(PolicyDiffError::Config("no users configured".to_string()));
    }
    Ok(users)
}

/// Constant-time comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}

fn optional_parsed_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().map(|raw| {
        raw.trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(users: Vec<Credential>) -> Config {
        Config {
            database_url: String::new(),
            coze_api_token: String::new(),
            coze_workflow_url: DEFAULT_WORKFLOW_URL.to_string(),
            coze_policy_workflow_id: "wf-p".to_string(),
            coze_standard_workflow_id: "wf-s".to_string(),
            coze_max_attempts: 5,
            coze_retry_delay_ms: 2000,
            coze_timeout_secs: None,
            storage_base_url: String::new(),
            storage_bucket: String::new(),
            storage_token: String::new(),
            storage_public_url: String::new(),
            upload_concurrency: 3,
            users,
            session_secret: "s".to_string(),
            pandoc_bin: "pandoc".to_string(),
            web_host: "0.0.0.0".to_string(),
            web_port: 3000,
        }
    }

    #[test]
    fn parses_user_table() {
        let users = parse_users("hangzhou:pw1, ningbo:p:w:2 ,").unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "hangzhou");
        assert_eq!(users[1].password, "p:w:2");
    }

    #[test]
    fn rejects_malformed_user_tables() {
        assert!(parse_users("").is_err());
        assert!(parse_users("nopassword").is_err());
        assert!(parse_users("a:").is_err());
        assert!(parse_users("a:1,a:2").is_err());
    }

    #[test]
    fn authenticate_checks_both_fields() {
        let config = config_with(parse_users("hangzhou:pw1,ningbo:pw2").unwrap());
        assert_eq!(
            config.authenticate("ningbo", "pw2").map(|c| c.username.as_str()),
            Some("ningbo")
        );
        assert!(config.authenticate("ningbo", "pw1").is_none());
        assert!(config.authenticate("wenzhou", "pw2").is_none());
    }

    #[test]
    fn debug_output_hides_passwords() {
        let users = parse_users("a:secret").unwrap();
        assert!(!format!("{:?}", users[0]).contains("secret"));
    }

    #[test]
    fn constant_time_eq_matches_plain_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
