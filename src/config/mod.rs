//! Newsletter settings: `config/default.toml`, then `newsletter.toml`, then an
//! explicit `--config-file`, then `NEWSLETTER__*` variables, then CLI flags.

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "newsletter";
const ENV_PREFIX: &str = "NEWSLETTER";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_QUERY_TTL_SECS: u64 = 30 * 24 * 60 * 60;
const DEFAULT_DISPATCH_INTERVAL_MS: u64 = 2_000;
const DEFAULT_DRAIN_BATCH_LIMIT: u64 = 1_000;
const DEFAULT_COMMENT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_SUBSCRIBE_COOLDOWN_SECS: u64 = 5 * 60 * 60;
const DEFAULT_CALLBACK_PATH: &str = "/auth/callback";
const DEFAULT_POST_LOGOUT_REDIRECT: &str = "/";

/// Command-line arguments for the newsletter binary.
#[derive(Debug, Parser)]
#[command(name = "newsletter", version, about = "Newsletter and article server")]
pub struct CliArgs {
    /// Extra TOML file layered above the bundled defaults.
    #[arg(long = "config-file", env = "NEWSLETTER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service and the event dispatcher.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Seconds to wait for in-flight work on shutdown.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Log level directive, e.g. `debug`.
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit JSON log lines instead of compact text.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the maximum number of cached entries.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<u64>,

    /// Override the event dispatcher tick.
    #[arg(long = "events-dispatch-interval-ms", value_name = "MILLIS")]
    pub events_dispatch_interval_ms: Option<u64>,

    /// Override the identity provider authority URL.
    #[arg(long = "identity-authority", value_name = "URL")]
    pub identity_authority: Option<String>,
}

/// Validated settings handed to `main` for wiring.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub events: EventSettings,
    pub cooldowns: CooldownSettings,
    pub identity: IdentitySettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Take the caller address from `x-forwarded-for` instead of the peer.
    /// Only safe behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_entries: NonZeroUsize,
    pub query_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct EventSettings {
    pub dispatch_interval: Duration,
    pub drain_batch_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct CooldownSettings {
    pub comment: Duration,
    pub subscribe: Duration,
}

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    /// Base URL of the identity provider; login is unavailable when unset.
    pub authority: Option<Url>,
    pub client_id: Option<String>,
    pub callback_path: String,
    pub post_logout_redirect: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Merge every source for `cli` and validate the result.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Parse process arguments and load settings from them.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    events: RawEventSettings,
    cooldowns: RawCooldownSettings,
    identity: RawIdentitySettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    trust_forwarded_for: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_entries: Option<u64>,
    query_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEventSettings {
    dispatch_interval_ms: Option<u64>,
    drain_batch_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCooldownSettings {
    comment_seconds: Option<u64>,
    subscribe_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIdentitySettings {
    authority: Option<String>,
    client_id: Option<String>,
    callback_path: Option<String>,
    post_logout_redirect: Option<String>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(interval) = overrides.events_dispatch_interval_ms {
            self.events.dispatch_interval_ms = Some(interval);
        }
        if let Some(authority) = overrides.identity_authority.as_ref() {
            self.identity.authority = Some(authority.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            events,
            cooldowns,
            identity,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            events: build_event_settings(events)?,
            cooldowns: build_cooldown_settings(cooldowns)?,
            identity: build_identity_settings(identity)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_shutdown = seconds(
        server.graceful_shutdown_seconds,
        DEFAULT_GRACEFUL_SHUTDOWN_SECS,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
        trust_forwarded_for: server.trust_forwarded_for.unwrap_or(false),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_entries = non_zero_usize(
        cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        "cache.max_entries",
    )?;
    let query_ttl = seconds(
        cache.query_ttl_seconds,
        DEFAULT_QUERY_TTL_SECS,
        "cache.query_ttl_seconds",
    )?;

    Ok(CacheSettings {
        max_entries,
        query_ttl,
    })
}

fn build_event_settings(events: RawEventSettings) -> Result<EventSettings, LoadError> {
    let interval_ms = events
        .dispatch_interval_ms
        .unwrap_or(DEFAULT_DISPATCH_INTERVAL_MS);
    if interval_ms == 0 {
        return Err(LoadError::invalid(
            "events.dispatch_interval_ms",
            "must be greater than zero",
        ));
    }
    let drain_batch_limit = non_zero_usize(
        events.drain_batch_limit.unwrap_or(DEFAULT_DRAIN_BATCH_LIMIT),
        "events.drain_batch_limit",
    )?;

    Ok(EventSettings {
        dispatch_interval: Duration::from_millis(interval_ms),
        drain_batch_limit,
    })
}

fn build_cooldown_settings(cooldowns: RawCooldownSettings) -> Result<CooldownSettings, LoadError> {
    Ok(CooldownSettings {
        comment: seconds(
            cooldowns.comment_seconds,
            DEFAULT_COMMENT_COOLDOWN_SECS,
            "cooldowns.comment_seconds",
        )?,
        subscribe: seconds(
            cooldowns.subscribe_seconds,
            DEFAULT_SUBSCRIBE_COOLDOWN_SECS,
            "cooldowns.subscribe_seconds",
        )?,
    })
}

fn build_identity_settings(identity: RawIdentitySettings) -> Result<IdentitySettings, LoadError> {
    let authority = match non_blank(identity.authority) {
        Some(raw) => Some(Url::parse(&raw).map_err(|err| {
            LoadError::invalid("identity.authority", format!("invalid url `{raw}`: {err}"))
        })?),
        None => None,
    };

    let callback_path = non_blank(identity.callback_path)
        .unwrap_or_else(|| DEFAULT_CALLBACK_PATH.to_string());
    if !callback_path.starts_with('/') {
        return Err(LoadError::invalid(
            "identity.callback_path",
            "path must start with `/`",
        ));
    }

    Ok(IdentitySettings {
        authority,
        client_id: non_blank(identity.client_id),
        callback_path,
        post_logout_redirect: non_blank(identity.post_logout_redirect)
            .unwrap_or_else(|| DEFAULT_POST_LOGOUT_REDIRECT.to_string()),
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn seconds(value: Option<u64>, default: u64, key: &'static str) -> Result<Duration, LoadError> {
    let secs = value.unwrap_or(default);
    if secs == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.server.addr.to_string(), "127.0.0.1:3000");
        assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
        assert!(!settings.server.trust_forwarded_for);
        assert_eq!(settings.cache.max_entries.get(), 10_000);
        assert_eq!(settings.cache.query_ttl, Duration::from_secs(2_592_000));
        assert_eq!(settings.events.dispatch_interval, Duration::from_secs(2));
        assert_eq!(settings.events.drain_batch_limit.get(), 1_000);
        assert_eq!(settings.cooldowns.comment, Duration::from_secs(30));
        assert_eq!(settings.cooldowns.subscribe, Duration::from_secs(18_000));
        assert!(settings.identity.authority.is_none());
        assert_eq!(settings.identity.callback_path, "/auth/callback");
        assert!(matches!(settings.logging.format, LogFormat::Compact));
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let mut raw = RawSettings::default();
        raw.cooldowns.comment_seconds = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero cooldown");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cooldowns.comment_seconds",
                ..
            }
        ));

        let mut raw = RawSettings::default();
        raw.events.dispatch_interval_ms = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(0);
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = RawSettings::default();
        raw.logging.level = Some("loud".to_string());
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = RawSettings::default();
        raw.identity.authority = Some("not a url".to_string());
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = RawSettings::default();
        raw.cache.max_entries = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn identity_authority_is_parsed() {
        let mut raw = RawSettings::default();
        raw.identity.authority = Some(" https://login.example.com/tenant ".to_string());
        raw.identity.client_id = Some("  ".to_string());

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(
            settings.identity.authority.map(|url| url.to_string()),
            Some("https://login.example.com/tenant".to_string())
        );
        assert!(settings.identity.client_id.is_none());
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["newsletter"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_serve_arguments() {
        let args = CliArgs::parse_from([
            "newsletter",
            "serve",
            "--server-port",
            "8080",
            "--log-json",
            "true",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_port, Some(8080));
                assert_eq!(serve.overrides.log_json, Some(true));
            }
        }
    }
}
