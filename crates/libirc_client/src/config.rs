//! Config *shapes*, not config *loading*. `pyaib`'s `config.py` locates and parses a YAML file
//! on disk; that whole concern (file search path, YAML parsing, case-insensitive lookups) is out
//! of scope here. What callers get instead is a set of `serde::Deserialize` structs they can feed
//! from whatever source they like (a YAML file via `serde_yaml`, environment variables, a
//! hand-built value in tests) and hand to [`crate::Client::new`].

use serde::Deserialize;
use std::fmt;

use crate::error::ServerAddrError;

/// A `host[:port]` server address, optionally prefixed with `ssl://` or `ssl:` to request TLS.
/// Grounded on `pyaib/irc.py`'s `__parseserver` regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

const DEFAULT_PORT: u16 = 6667;

impl ServerAddr {
    pub fn parse(s: &str) -> Result<ServerAddr, ServerAddrError> {
        let err = || ServerAddrError {
            input: s.to_owned(),
        };

        let rest = s.trim();
        if rest.is_empty() {
            return Err(err());
        }

        let (tls, rest) = if let Some(r) = rest.strip_prefix("ssl://") {
            (true, r)
        } else if let Some(r) = rest.strip_prefix("ssl:") {
            (true, r)
        } else {
            (false, rest)
        };

        if rest.is_empty() {
            return Err(err());
        }

        let (host, port) = match rest.rfind(':') {
            // IPv6 literals aren't handled here (the source this is ported from doesn't either);
            // a ':' in the tail is always a port separator.
            Some(idx) => {
                let host = &rest[..idx];
                let port_str = &rest[idx + 1..];
                if host.is_empty() {
                    return Err(err());
                }
                let port: u16 = port_str.parse().map_err(|_| err())?;
                (host.to_owned(), port)
            }
            None => (rest.to_owned(), DEFAULT_PORT),
        };

        Ok(ServerAddr { host, port, tls })
    }

    /// Parse `irc.servers`, which may be a YAML list or a single comma-separated string (the
    /// latter matching `pyaib`'s `config.py` comma-splitting fallback for list-shaped settings).
    pub fn parse_list(servers: &[String]) -> Result<Vec<ServerAddr>, ServerAddrError> {
        let mut out = Vec::new();
        for entry in servers {
            for part in entry.split(',') {
                let part = part.trim();
                if !part.is_empty() {
                    out.push(ServerAddr::parse(part)?);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tls {
            write!(f, "ssl://{}:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn default_auto_ping() -> u64 {
    600
}

fn default_reconnect_backoff() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_username() -> String {
    "irc".to_owned()
}

fn default_realname() -> String {
    "irc bot".to_owned()
}

fn default_trigger_prefix() -> String {
    "!".to_owned()
}

/// `irc.*`: server list, identity and the few connection-level knobs `pyaib/irc.py`'s
/// `IRCClient.__init__` reads off `conf.irc`.
#[derive(Debug, Clone, Deserialize)]
pub struct IrcConfig {
    /// Servers are tried in order; after the last one fails the client wraps around, after
    /// waiting `reconnect_backoff_secs`.
    pub servers: Vec<String>,
    pub nick: String,
    #[serde(default = "default_username")]
    pub user: String,
    /// `{version}` is substituted by the caller before this reaches the client, matching the
    /// source's `realname.format(version=...)` - out of scope here since it's string
    /// formatting, not connection logic.
    #[serde(default = "default_realname")]
    pub realname: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Seconds between idle `PING`s; `0` disables the pinger. Defaults to 600, matching the
    /// `pinger.rs` interval this was generalized from.
    #[serde(default = "default_auto_ping")]
    pub auto_ping: u64,
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// `channels.*`: autojoin list, plus whether the joined-channel set should be persisted to
/// storage and merged back in on restart (§8 testable property 10).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub autojoin: Vec<String>,
    #[serde(default)]
    pub db: bool,
}

/// `triggers.*`: just the command prefix today, but kept as its own struct since `pyaib`'s
/// config keeps it as its own top-level section rather than nesting it under `irc`.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggersConfig {
    #[serde(default = "default_trigger_prefix")]
    pub prefix: String,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        TriggersConfig {
            prefix: default_trigger_prefix(),
        }
    }
}

/// `plugins.*`: `base` is the dotted-module prefix `pyaib/components.py` used to resolve a bare
/// plugin name to an importable module; in this rendering there's no dynamic import, so `base`
/// is carried through only as a namespacing convention callers may use for their own
/// `ComponentFactory` registration keys. `load` lists which registered plugins to load at
/// startup. Anything else under `plugins:` is per-plugin config, keyed by basename, exactly the
/// way `pyaib/config.py` scopes `plugin.<basename>`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub load: Vec<String>,
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// `components.*`: same shape as `plugins.*` minus the `base` import prefix (components are
/// framework-internal, not user-supplied).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComponentsConfig {
    #[serde(default)]
    pub load: Vec<String>,
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// `db.*`: driver selection; the driver implementation itself is supplied by the embedding
/// application via [`crate::storage::StorageDriver`], matching the Non-goal that no concrete
/// storage backend ships with this crate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub backend: Option<String>,
    /// `db.driver.<name>`, driver-specific settings the chosen driver's constructor reads.
    #[serde(default)]
    pub driver: serde_json::Map<String, serde_json::Value>,
}

/// Top-level config passed to [`crate::Client::new`]. Component- and plugin-specific config
/// lives under `components`/`plugins`, keyed by a component's basename (the final `::`-segment
/// of its name) exactly as `pyaib/config.py` scopes per-component config by the component's
/// last dotted segment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub irc: IrcConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub triggers: TriggersConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub components: ComponentsConfig,
    #[serde(default)]
    pub db: DbConfig,
}

impl Config {
    /// Config scoped to a single component, by basename. Returns `Null` if nothing was
    /// configured for that name.
    pub fn component_config(&self, basename: &str) -> serde_json::Value {
        self.components
            .config
            .get(basename)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn plugin_config(&self, basename: &str) -> serde_json::Value {
        self.plugins
            .config
            .get(basename)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}
