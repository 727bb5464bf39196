//! wabot configuration loader.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct WabotConfig {
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bot: BotConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    /// WhatsApp Business Account id; inbound deliveries for other accounts
    /// are rejected.
    #[serde(default)]
    pub business_account_id: String,
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub webhook_verify_token: String,
    /// Enables `x-hub-signature-256` checks on inbound deliveries.
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            business_account_id: String::new(),
            phone_number_id: String::new(),
            access_token: String::new(),
            webhook_verify_token: String::new(),
            app_secret: None,
            api_version: default_api_version(),
            base_url: default_base_url(),
        }
    }
}

fn default_api_version() -> String {
    wb_graph::DEFAULT_API_VERSION.to_string()
}

fn default_base_url() -> String {
    wb_graph::DEFAULT_BASE_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            webhook_path: default_webhook_path(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    256
}

/// Canned replies used by the bundled conversation flow.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_reply")]
    pub default_reply: String,
    #[serde(default = "default_error_reply")]
    pub error_reply: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            default_reply: default_reply(),
            error_reply: default_error_reply(),
        }
    }
}

fn default_greeting() -> String {
    "Hi! How can we help you today?".to_string()
}

fn default_reply() -> String {
    "Sorry, I didn't get that. Send \"hi\" to see the menu.".to_string()
}

fn default_error_reply() -> String {
    "Something went wrong on our side. Please try again in a moment.".to_string()
}

impl WabotConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg = Self::parse(&contents, &path)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, path))
    }

    fn parse(contents: &str, path: &Path) -> anyhow::Result<Self> {
        toml::from_str(contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(v) = lookup("WABOT_ACCESS_TOKEN") {
            self.whatsapp.access_token = v;
        }
        if let Some(v) = lookup("WABOT_VERIFY_TOKEN") {
            self.whatsapp.webhook_verify_token = v;
        }
        if let Some(v) = lookup("WABOT_APP_SECRET") {
            self.whatsapp.app_secret = Some(v);
        }
        if let Some(v) = lookup("WABOT_BUSINESS_ACCOUNT_ID") {
            self.whatsapp.business_account_id = v;
        }
        if let Some(v) = lookup("WABOT_PHONE_NUMBER_ID") {
            self.whatsapp.phone_number_id = v;
        }
        if let Some(v) = lookup("WABOT_BIND_ADDR") {
            self.server.bind_addr = v;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mandatory = [
            ("whatsapp.business_account_id", &self.whatsapp.business_account_id),
            ("whatsapp.phone_number_id", &self.whatsapp.phone_number_id),
            ("whatsapp.access_token", &self.whatsapp.access_token),
            ("whatsapp.webhook_verify_token", &self.whatsapp.webhook_verify_token),
            ("whatsapp.api_version", &self.whatsapp.api_version),
            ("whatsapp.base_url", &self.whatsapp.base_url),
        ];
        for (field, value) in mandatory {
            if value.trim().is_empty() {
                return Err(anyhow::anyhow!("{field} is mandatory"));
            }
        }
        self.bind_addr()?;
        if !self.server.webhook_path.starts_with('/') {
            return Err(anyhow::anyhow!("server.webhook_path must start with '/'"));
        }
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .bind_addr
            .trim()
            .parse()
            .map_err(|e| {
                anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", self.server.bind_addr)
            })
    }

    /// App secret with blank values treated as unset.
    pub fn app_secret(&self) -> Option<&str> {
        self.whatsapp
            .app_secret
            .as_deref()
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".wabot").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [whatsapp]
        business_account_id = "waba-1"
        phone_number_id = "1234"
        access_token = "token"
        webhook_verify_token = "verify-me"
    "#;

    fn parse(contents: &str) -> WabotConfig {
        WabotConfig::parse(contents, Path::new("test.toml")).expect("config parses")
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse(MINIMAL);
        cfg.validate().expect("valid");
        assert_eq!(cfg.whatsapp.api_version, "v16.0");
        assert_eq!(cfg.whatsapp.base_url, "https://graph.facebook.com");
        assert_eq!(cfg.server.webhook_path, "/webhook");
        assert_eq!(cfg.server.http_timeout_seconds, 30);
        assert_eq!(cfg.server.http_max_in_flight, 256);
        assert_eq!(
            cfg.bind_addr().expect("bind addr"),
            "127.0.0.1:3000".parse::<SocketAddr>().expect("addr")
        );
        assert!(cfg.app_secret().is_none());
    }

    #[test]
    fn missing_mandatory_field_is_named() {
        let cfg = parse("[whatsapp]\nphone_number_id = \"1234\"\n");
        let error = cfg.validate().expect_err("must fail");
        assert_eq!(error.to_string(), "whatsapp.business_account_id is mandatory");
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = parse(MINIMAL);
        let env: HashMap<&str, &str> = HashMap::from([
            ("WABOT_ACCESS_TOKEN", "env-token"),
            ("WABOT_APP_SECRET", "shh"),
            ("WABOT_BIND_ADDR", "0.0.0.0:8080"),
            ("WABOT_PHONE_NUMBER_ID", "   "),
        ]);
        cfg.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(cfg.whatsapp.access_token, "env-token");
        assert_eq!(cfg.app_secret(), Some("shh"));
        assert_eq!(cfg.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.whatsapp.phone_number_id, "1234");
    }

    #[test]
    fn blank_app_secret_is_unset() {
        let cfg = parse(&format!("{MINIMAL}\napp_secret = \"  \"\n"));
        assert!(cfg.app_secret().is_none());
    }

    #[test]
    fn server_settings_are_checked() {
        let mut cfg = parse(MINIMAL);
        cfg.server.webhook_path = "webhook".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = parse(MINIMAL);
        cfg.server.bind_addr = "not an address".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = parse(MINIMAL);
        cfg.server.http_max_in_flight = 0;
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            "{MINIMAL}\n[bot]\ngreeting = \"Welcome!\"\n[server]\nwebhook_path = \"/hooks/wa\"\n"
        )
        .expect("write");
        let (cfg, path) = WabotConfig::load_with_path(Some(file.path().to_path_buf()))
            .await
            .expect("load");
        assert_eq!(path, file.path());
        assert_eq!(cfg.bot.greeting, "Welcome!");
        assert_eq!(cfg.server.webhook_path, "/hooks/wa");
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = WabotConfig::load(Some(dir.path().join("absent.toml")))
            .await
            .expect_err("missing file");
        assert!(error.to_string().starts_with("read config"));
    }
}
