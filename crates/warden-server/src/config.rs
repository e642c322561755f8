//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use warden_core::{GateError, GateResult, Mirror};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub blocklist: BlocklistSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub access: AccessSection,
    #[serde(default)]
    pub assets: AssetsSection,
    #[serde(default)]
    pub tunnel: TunnelSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            static_dir: default_static_dir(),
        }
    }
}

/// `[blocklist]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct BlocklistSection {
    #[serde(default = "default_blocklist_path")]
    pub path: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BlocklistSection {
    fn default() -> Self {
        Self {
            path: default_blocklist_path(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSection {
    /// Require Basic credentials on asset and application routes.
    #[serde(default)]
    pub challenge: bool,
    /// username → password
    #[serde(default)]
    pub users: BTreeMap<String, String>,
    /// Idle seconds after which a session binding may be taken over.
    #[serde(default)]
    pub session_idle_timeout_secs: Option<u64>,
}

/// `[access]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessSection {
    #[serde(default)]
    pub banned: Vec<String>,
}

/// `[assets]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsSection {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_forced_binary")]
    pub forced_binary: Vec<String>,
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<Mirror>,
}

impl Default for AssetsSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            forced_binary: default_forced_binary(),
            mirrors: default_mirrors(),
        }
    }
}

/// `[tunnel]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelSection {
    #[serde(default = "default_tunnel_prefix")]
    pub prefix: String,
    /// `host:port` of the engine. Unset means no engine.
    #[serde(default)]
    pub backend: Option<String>,
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            prefix: default_tunnel_prefix(),
            backend: None,
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_static_dir() -> String {
    "static".to_string()
}
fn default_blocklist_path() -> String {
    "blocklist.json".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_forced_binary() -> Vec<String> {
    vec![".unityweb".to_string()]
}
fn default_tunnel_prefix() -> String {
    "/ca/".to_string()
}

/// Mirrors used when the config names none.
pub fn default_mirrors() -> Vec<Mirror> {
    vec![
        Mirror::new("/e/1/", "https://raw.githubusercontent.com/qrs/x/fixy/"),
        Mirror::new("/e/2/", "https://raw.githubusercontent.com/3v1/V5-Assets/main/"),
        Mirror::new("/e/3/", "https://raw.githubusercontent.com/3v1/V5-Retro/master/"),
    ]
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub static_dir: PathBuf,
    pub blocklist_path: PathBuf,
    pub blocklist_poll: Duration,
    pub challenge: bool,
    pub users: BTreeMap<String, String>,
    pub session_idle_timeout: Option<Duration>,
    pub banned: Vec<String>,
    pub asset_ttl: Duration,
    pub fetch_timeout: Duration,
    pub forced_binary: Vec<String>,
    pub mirrors: Vec<Mirror>,
    pub tunnel_prefix: String,
    pub tunnel_backend: Option<String>,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_bind: Option<&str>,
        cli_static_dir: Option<&str>,
        cli_blocklist: Option<&str>,
        cli_tunnel_backend: Option<&str>,
    ) -> GateResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(
            file_config,
            cli_port,
            cli_bind,
            cli_static_dir,
            cli_blocklist,
            cli_tunnel_backend,
        )
    }

    fn resolve(
        file_config: ConfigFile,
        cli_port: Option<u16>,
        cli_bind: Option<&str>,
        cli_static_dir: Option<&str>,
        cli_blocklist: Option<&str>,
        cli_tunnel_backend: Option<&str>,
    ) -> GateResult<Self> {
        let ConfigFile {
            server,
            blocklist,
            auth,
            access,
            assets,
            tunnel,
        } = file_config;

        // Merge CLI overrides
        let port = cli_port.unwrap_or(server.port);
        let bind = cli_bind.map(str::to_string).unwrap_or(server.bind);
        let static_dir = cli_static_dir
            .map(str::to_string)
            .unwrap_or(server.static_dir);
        let blocklist_path = cli_blocklist
            .map(str::to_string)
            .unwrap_or(blocklist.path);
        let tunnel_backend = cli_tunnel_backend
            .map(str::to_string)
            .or(tunnel.backend)
            .filter(|b| !b.trim().is_empty());

        let ip: IpAddr = bind
            .parse()
            .map_err(|_| GateError::Config(format!("invalid bind address: {bind}")))?;

        if auth.challenge && auth.users.is_empty() {
            return Err(GateError::Config(
                "auth.challenge is enabled but auth.users is empty".to_string(),
            ));
        }
        if blocklist.poll_interval_ms == 0 {
            return Err(GateError::Config(
                "blocklist.poll_interval_ms must be positive".to_string(),
            ));
        }
        if assets.ttl_secs == 0 {
            return Err(GateError::Config("assets.ttl_secs must be positive".to_string()));
        }
        if assets.fetch_timeout_secs == 0 {
            return Err(GateError::Config(
                "assets.fetch_timeout_secs must be positive".to_string(),
            ));
        }
        if let Some(bad) = assets.mirrors.iter().find(|m| !m.prefix.starts_with('/')) {
            return Err(GateError::Config(format!(
                "mirror prefix must start with '/': {}",
                bad.prefix
            )));
        }
        if !tunnel.prefix.starts_with('/') {
            return Err(GateError::Config(format!(
                "tunnel prefix must start with '/': {}",
                tunnel.prefix
            )));
        }

        Ok(Self {
            listen: SocketAddr::new(ip, port),
            static_dir: expand_tilde_str(&static_dir),
            blocklist_path: expand_tilde_str(&blocklist_path),
            blocklist_poll: Duration::from_millis(blocklist.poll_interval_ms),
            challenge: auth.challenge,
            users: auth.users,
            session_idle_timeout: auth
                .session_idle_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            banned: access.banned,
            asset_ttl: Duration::from_secs(assets.ttl_secs),
            fetch_timeout: Duration::from_secs(assets.fetch_timeout_secs),
            forced_binary: assets.forced_binary,
            mirrors: assets.mirrors,
            tunnel_prefix: tunnel.prefix,
            tunnel_backend,
        })
    }
}

fn parse(content: &str) -> GateResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| GateError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(toml_text: &str) -> GateResult<ServerConfig> {
        ServerConfig::resolve(parse(toml_text)?, None, None, None, None, None)
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = resolve("").unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.asset_ttl, Duration::from_secs(2_592_000));
        assert_eq!(config.forced_binary, vec![".unityweb".to_string()]);
        assert_eq!(config.mirrors.len(), 3);
        assert_eq!(config.mirrors[1].prefix, "/e/2/");
        assert_eq!(config.tunnel_prefix, "/ca/");
        assert!(config.tunnel_backend.is_none());
        assert!(config.session_idle_timeout.is_none());
        assert!(!config.challenge);
    }

    #[test]
    fn parses_all_sections() {
        let config = resolve(
            r#"
            [server]
            port = 9000
            bind = "127.0.0.1"
            static_dir = "public"

            [blocklist]
            path = "lists/block.json"
            poll_interval_ms = 250

            [auth]
            challenge = true
            session_idle_timeout_secs = 900
            [auth.users]
            u1 = "pw1"

            [access]
            banned = ["203.0.113.42"]

            [assets]
            ttl_secs = 60
            forced_binary = [".unityweb", ".data"]
            [[assets.mirrors]]
            prefix = "/m/"
            base_url = "https://mirror.example/"

            [tunnel]
            prefix = "/engine/"
            backend = "127.0.0.1:9001"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.static_dir, PathBuf::from("public"));
        assert_eq!(config.blocklist_path, PathBuf::from("lists/block.json"));
        assert_eq!(config.blocklist_poll, Duration::from_millis(250));
        assert!(config.challenge);
        assert_eq!(config.users.get("u1").map(String::as_str), Some("pw1"));
        assert_eq!(config.session_idle_timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.banned, vec!["203.0.113.42".to_string()]);
        assert_eq!(config.asset_ttl, Duration::from_secs(60));
        assert_eq!(config.forced_binary.len(), 2);
        assert_eq!(config.mirrors, vec![Mirror::new("/m/", "https://mirror.example/")]);
        assert_eq!(config.tunnel_prefix, "/engine/");
        assert_eq!(config.tunnel_backend.as_deref(), Some("127.0.0.1:9001"));
    }

    #[test]
    fn cli_overrides_file() {
        let file = parse("[server]\nport = 9000\n[tunnel]\nbackend = \"10.0.0.1:1\"").unwrap();
        let config = ServerConfig::resolve(
            file,
            Some(7000),
            Some("127.0.0.1"),
            Some("site"),
            Some("other.json"),
            Some("127.0.0.1:2"),
        )
        .unwrap();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.static_dir, PathBuf::from("site"));
        assert_eq!(config.blocklist_path, PathBuf::from("other.json"));
        assert_eq!(config.tunnel_backend.as_deref(), Some("127.0.0.1:2"));
    }

    #[test]
    fn challenge_without_users_is_rejected() {
        let err = resolve("[auth]\nchallenge = true").unwrap_err();
        assert!(matches!(err, GateError::Config(_)));
    }

    #[test]
    fn bad_bind_is_rejected() {
        assert!(matches!(
            resolve("[server]\nbind = \"not-an-ip\""),
            Err(GateError::Config(_))
        ));
    }

    #[test]
    fn zero_durations_are_rejected() {
        for toml in [
            "[assets]\nfetch_timeout_secs = 0",
            "[assets]\nttl_secs = 0",
            "[blocklist]\npoll_interval_ms = 0",
        ] {
            assert!(matches!(resolve(toml), Err(GateError::Config(_))), "{toml}");
        }
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(resolve("[server\nport ="), Err(GateError::Config(_))));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(
            Some(&dir.path().join("absent.toml")),
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(config.listen.port(), 8080);
    }

    #[test]
    fn loads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "[server]\nport = 8181\n").unwrap();
        let config = ServerConfig::load(Some(&path), None, None, None, None, None).unwrap();
        assert_eq!(config.listen.port(), 8181);
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde_str("~/lists/b.json"), home.join("lists/b.json"));
        }
        assert_eq!(expand_tilde_str("/abs/b.json"), PathBuf::from("/abs/b.json"));
    }
}
