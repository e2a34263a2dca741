//! Defines the configuration settings for the wallshop-forms service.

use crate::templates::Brand;
use anyhow::Context;
use clap::{Parser, Subcommand};
use lettre::Address;
use lettre::message::Mailbox;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Command line arguments for wallshop-forms
#[derive(Parser, Debug)]
#[command(author, version, about = "Form intake service for The Wall Shop website", long_about = None)]
pub(crate) struct AppArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, global = true, env = "WALLSHOP_CONFIG")]
    pub config_file: Option<String>,

    /// API key for the transactional email provider
    #[arg(long, global = true, env = "RESEND_API_KEY", hide_env_values = true)]
    pub mail_api_key: Option<String>,

    /// Base URL of the email provider API
    #[arg(long, global = true, env = "WALLSHOP_MAIL_API_URL")]
    pub mail_api_url: Option<String>,

    /// Sender mailbox, e.g. "The Wall Shop <noreply@thewallshop.co.uk>"
    #[arg(long, global = true, env = "WALLSHOP_FROM_ADDRESS")]
    pub from_address: Option<String>,

    /// Comma-separated list of addresses that receive admin notifications
    #[arg(long, global = true, env = "WALLSHOP_ADMIN_RECIPIENTS")]
    pub admin_recipients: Option<String>,

    /// Comma-separated list of origins allowed to call the form endpoints
    #[arg(long, global = true, env = "WALLSHOP_ALLOWED_ORIGINS")]
    pub allowed_origins: Option<String>,

    /// Timeout for a single outbound email send, in seconds
    #[arg(long, global = true, env = "WALLSHOP_SEND_TIMEOUT")]
    pub send_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run the HTTP form endpoints
    Serve {
        /// Address to bind
        #[arg(long, env = "WALLSHOP_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "WALLSHOP_PORT")]
        port: Option<u16>,
    },
    /// Render quote emails for stored submissions without sending them
    Render {
        /// JSON file holding one quote submission or an array of them
        #[arg(short, long)]
        input: PathBuf,

        /// Directory the rendered emails are written to
        #[arg(short, long, default_value = "rendered")]
        output_dir: PathBuf,
    },
}

/// TOML Configuration file structure
#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    server: Option<ServerConfig>,
    mail: Option<MailConfig>,
    brand: Option<BrandConfig>,
    rate_limits: Option<RateLimitsConfig>,
}

#[derive(Deserialize, Debug, Default)]
struct ServerConfig {
    host: Option<String>,
    port: Option<u16>,
    allowed_origins: Option<Vec<String>>,
    max_body_bytes: Option<usize>,
    cors_max_age: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
struct MailConfig {
    api_url: Option<String>,
    from_address: Option<String>,
    admin_recipients: Option<Vec<String>>,
    request_timeout: Option<u64>,
    send_timeout: Option<u64>,
    min_successes: Option<usize>,
    user_agent: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct BrandConfig {
    company: Option<String>,
    website: Option<String>,
    support_phone: Option<String>,
    support_email: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct RateLimitsConfig {
    quote: Option<RateLimitEntry>,
    contact: Option<RateLimitEntry>,
    subscribe: Option<RateLimitEntry>,
}

#[derive(Deserialize, Debug, Default)]
struct RateLimitEntry {
    max_requests: Option<u32>,
    window_secs: Option<u64>,
}

/// Mail provider credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct ApiKey(String);

impl ApiKey {
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Request quota for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

/// Application configuration settings.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Address the HTTP server binds to.
    pub host: String,
    pub port: u16,
    /// Origins that receive an `Access-Control-Allow-Origin` echo.
    pub allowed_origins: Vec<String>,
    /// Request bodies larger than this are rejected with 413.
    pub max_body_bytes: usize,
    /// Preflight cache lifetime in seconds.
    pub cors_max_age: u64,
    /// `None` turns every form request into a configuration error.
    pub mail_api_key: Option<ApiKey>,
    pub mail_api_url: String,
    /// Sender mailbox for every outbound email.
    pub from_address: String,
    /// Recipients of admin notifications.
    pub admin_recipients: Vec<String>,
    /// Timeout for the HTTP client talking to the mail provider.
    pub request_timeout: Duration,
    /// Upper bound on a single send inside a dispatch.
    pub send_timeout: Duration,
    /// How many of a submission's emails must be delivered for it to count as sent.
    pub min_successes: usize,
    pub user_agent: String,
    pub brand: Brand,
    pub quote_limit: RateLimitSettings,
    pub contact_limit: RateLimitSettings,
    pub subscribe_limit: RateLimitSettings,
}

const SUPPORT_EMAIL: &str = "info@thewallshop.co.uk";

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 3000,
            allowed_origins: vec![
                "https://thewallshop.co.uk".to_string(),
                "https://www.thewallshop.co.uk".to_string(),
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            max_body_bytes: 64 * 1024,
            cors_max_age: 86_400,
            mail_api_key: None,
            mail_api_url: "https://api.resend.com".to_string(),
            from_address: "The Wall Shop <noreply@thewallshop.co.uk>".to_string(),
            admin_recipients: vec![SUPPORT_EMAIL.to_string()],
            request_timeout: Duration::from_secs(15),
            send_timeout: Duration::from_secs(10),
            min_successes: 1,
            user_agent: format!("wallshop-forms/{}", env!("CARGO_PKG_VERSION")),
            brand: Brand {
                company: "The Wall Shop".to_string(),
                website: "https://thewallshop.co.uk".to_string(),
                support_phone: "020 3000 0000".to_string(),
                support_email: SUPPORT_EMAIL.to_string(),
            },
            quote_limit: RateLimitSettings {
                max_requests: 2,
                window: Duration::from_secs(15 * 60),
            },
            contact_limit: RateLimitSettings {
                max_requests: 5,
                window: Duration::from_secs(15 * 60),
            },
            subscribe_limit: RateLimitSettings {
                max_requests: 3,
                window: Duration::from_secs(60 * 60),
            },
        }
    }
}

/// Load configuration from a TOML file
fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() {
        tracing::warn!("Configuration file {} not found, using defaults", file_path);
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::info!("Loaded configuration from {}", file_path);
    Ok(config)
}

fn apply_rate_limit(target: &mut RateLimitSettings, entry: &Option<RateLimitEntry>) {
    if let Some(entry) = entry {
        if let Some(max) = entry.max_requests {
            target.max_requests = max;
        }
        if let Some(secs) = entry.window_secs {
            target.window = Duration::from_secs(secs);
        }
    }
}

fn apply_file_config(config: &mut Config, file_config: &ConfigFile) {
    if let Some(server) = &file_config.server {
        if let Some(host) = &server.host {
            config.host = host.clone();
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(origins) = &server.allowed_origins {
            config.allowed_origins = origins.clone();
        }
        if let Some(limit) = server.max_body_bytes {
            config.max_body_bytes = limit;
        }
        if let Some(max_age) = server.cors_max_age {
            config.cors_max_age = max_age;
        }
    }

    if let Some(mail) = &file_config.mail {
        if let Some(url) = &mail.api_url {
            config.mail_api_url = url.clone();
        }
        if let Some(from) = &mail.from_address {
            config.from_address = from.clone();
        }
        if let Some(recipients) = &mail.admin_recipients {
            config.admin_recipients = recipients.clone();
        }
        if let Some(timeout) = mail.request_timeout {
            config.request_timeout = Duration::from_secs(timeout);
        }
        if let Some(timeout) = mail.send_timeout {
            config.send_timeout = Duration::from_secs(timeout);
        }
        if let Some(min) = mail.min_successes {
            config.min_successes = min;
        }
        if let Some(agent) = &mail.user_agent {
            config.user_agent = agent.clone();
        }
    }

    if let Some(brand) = &file_config.brand {
        if let Some(company) = &brand.company {
            config.brand.company = company.clone();
        }
        if let Some(website) = &brand.website {
            config.brand.website = website.clone();
        }
        if let Some(phone) = &brand.support_phone {
            config.brand.support_phone = phone.clone();
        }
        if let Some(email) = &brand.support_email {
            config.brand.support_email = email.clone();
        }
    }

    if let Some(limits) = &file_config.rate_limits {
        apply_rate_limit(&mut config.quote_limit, &limits.quote);
        apply_rate_limit(&mut config.contact_limit, &limits.contact);
        apply_rate_limit(&mut config.subscribe_limit, &limits.subscribe);
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Apply command line arguments (and their environment fallbacks) to the Config instance
fn apply_cli_args(config: &mut Config, args: &AppArgs) {
    if let Some(key) = &args.mail_api_key {
        config.mail_api_key = Some(ApiKey(key.trim().to_string()));
    }

    if let Some(url) = &args.mail_api_url {
        config.mail_api_url = url.clone();
    }

    if let Some(from) = &args.from_address {
        config.from_address = from.clone();
    }

    if let Some(ref recipients) = args.admin_recipients {
        config.admin_recipients = split_list(recipients);
    }

    if let Some(ref origins) = args.allowed_origins {
        config.allowed_origins = split_list(origins);
    }

    if let Some(timeout) = args.send_timeout {
        config.send_timeout = Duration::from_secs(timeout);
    }

    if let Command::Serve { host, port } = &args.command {
        if let Some(host) = host {
            config.host = host.clone();
        }
        if let Some(port) = port {
            config.port = *port;
        }
    }
}

fn validate_rate_limit(name: &str, limit: &mut RateLimitSettings, default: RateLimitSettings) {
    if limit.max_requests == 0 {
        limit.max_requests = 1;
        tracing::warn!("{} rate limit was set to 0 requests. Setting to 1.", name);
    }
    if limit.window.is_zero() {
        limit.window = default.window;
        tracing::warn!(
            "{} rate limit window was 0. Setting to {}s.",
            name,
            default.window.as_secs()
        );
    }
}

fn validate_config(config: &mut Config) -> anyhow::Result<()> {
    let defaults = Config::default();

    Mailbox::from_str(&config.from_address)
        .with_context(|| format!("Invalid sender mailbox: {}", config.from_address))?;

    if config
        .mail_api_key
        .as_ref()
        .is_some_and(|k| k.expose().is_empty())
    {
        config.mail_api_key = None;
    }
    if config.mail_api_key.is_none() {
        tracing::warn!("No mail API key configured (RESEND_API_KEY). Form submissions will fail.");
    }

    let before = config.admin_recipients.len();
    config
        .admin_recipients
        .retain(|r| Address::from_str(r).is_ok());
    if config.admin_recipients.len() < before {
        tracing::warn!(
            "Dropped {} invalid admin recipient address(es).",
            before - config.admin_recipients.len()
        );
    }
    if config.admin_recipients.is_empty() {
        config.admin_recipients = vec![config.brand.support_email.clone()];
        tracing::warn!(
            "Admin recipient list was empty. Setting to {}",
            config.brand.support_email
        );
    }

    if config.min_successes == 0 {
        config.min_successes = 1;
        tracing::warn!("Minimum successful sends was set to 0. Setting to 1.");
    }
    if config.min_successes > 2 {
        config.min_successes = 2;
        tracing::warn!("Minimum successful sends exceeded the 2 emails per submission. Setting to 2.");
    }

    if config.send_timeout.is_zero() {
        config.send_timeout = defaults.send_timeout;
        tracing::warn!(
            "Send timeout was 0. Setting to {}s.",
            defaults.send_timeout.as_secs()
        );
    }

    if config.max_body_bytes == 0 {
        config.max_body_bytes = defaults.max_body_bytes;
        tracing::warn!(
            "Max body size was 0. Setting to {} bytes.",
            defaults.max_body_bytes
        );
    }

    if config.allowed_origins.is_empty() {
        tracing::warn!("Allowed origins list is empty. Cross-origin browsers will be refused.");
    }
    config.allowed_origins = config
        .allowed_origins
        .iter()
        .map(|o| o.trim_end_matches('/').to_string())
        .collect();

    validate_rate_limit("Quote", &mut config.quote_limit, defaults.quote_limit);
    validate_rate_limit("Contact", &mut config.contact_limit, defaults.contact_limit);
    validate_rate_limit(
        "Subscribe",
        &mut config.subscribe_limit,
        defaults.subscribe_limit,
    );

    Ok(())
}

/// Builds the final configuration: defaults, then a TOML file, then CLI/env values.
pub(crate) fn build_config(args: &AppArgs) -> anyhow::Result<Config> {
    let mut config = Config::default();

    if let Some(ref file_path) = args.config_file {
        let file_config = load_config_file(file_path)?;
        apply_file_config(&mut config, &file_config);
    } else {
        for path in ["./wallshop-forms.toml", "./config.toml"].iter() {
            if Path::new(path).exists() {
                match load_config_file(path) {
                    Ok(file_config) => {
                        apply_file_config(&mut config, &file_config);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load configuration from {}: {}", path, e);
                    }
                }
            }
        }
    }

    apply_cli_args(&mut config, args);

    validate_config(&mut config)?;

    tracing::debug!("Final configuration: {:?}", config);

    Ok(config)
}

pub(crate) fn parse_args() -> AppArgs {
    AppArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> AppArgs {
        let mut argv = vec!["wallshop-forms"];
        argv.extend_from_slice(extra);
        AppArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        let mut config = Config::default();
        validate_config(&mut config).unwrap();
        assert_eq!(config.quote_limit.max_requests, 2);
        assert_eq!(config.quote_limit.window, Duration::from_secs(900));
        assert_eq!(config.subscribe_limit.window, Duration::from_secs(3600));
        assert_eq!(config.min_successes, 1);
    }

    #[test]
    fn test_file_config_is_applied() {
        let file: ConfigFile = toml::from_str(
            r#"
            [server]
            port = 8080
            allowed_origins = ["https://example.com/"]

            [mail]
            admin_recipients = ["sales@example.com", "not-an-address"]
            send_timeout = 3

            [brand]
            support_phone = "0800 000 000"

            [rate_limits.quote]
            max_requests = 10
            window_secs = 60
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        apply_file_config(&mut config, &file);
        validate_config(&mut config).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.allowed_origins, vec!["https://example.com"]);
        assert_eq!(config.admin_recipients, vec!["sales@example.com"]);
        assert_eq!(config.send_timeout, Duration::from_secs(3));
        assert_eq!(config.brand.support_phone, "0800 000 000");
        assert_eq!(config.quote_limit.max_requests, 10);
        assert_eq!(config.contact_limit.max_requests, 5);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config = Config::default();
        config.port = 8080;
        let parsed = args(&[
            "--admin-recipients",
            "a@example.com, b@example.com",
            "serve",
            "--port",
            "9090",
        ]);
        apply_cli_args(&mut config, &parsed);
        assert_eq!(config.port, 9090);
        assert_eq!(config.admin_recipients, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn test_invalid_values_are_clamped() {
        let mut config = Config::default();
        config.min_successes = 0;
        config.admin_recipients = vec!["nope".to_string()];
        config.contact_limit.max_requests = 0;
        config.send_timeout = Duration::ZERO;
        config.mail_api_key = Some(ApiKey(String::new()));
        validate_config(&mut config).unwrap();
        assert_eq!(config.min_successes, 1);
        assert_eq!(config.admin_recipients, vec![SUPPORT_EMAIL]);
        assert_eq!(config.contact_limit.max_requests, 1);
        assert_eq!(config.send_timeout, Duration::from_secs(10));
        assert!(config.mail_api_key.is_none());
    }

    #[test]
    fn test_bad_sender_is_rejected() {
        let mut config = Config::default();
        config.from_address = "not a mailbox".to_string();
        assert!(validate_config(&mut config).is_err());
    }

    #[test]
    fn test_api_key_is_not_printed() {
        let mut config = Config::default();
        config.mail_api_key = Some(ApiKey("re_secret".to_string()));
        assert!(!format!("{:?}", config).contains("re_secret"));
    }
}
