//! A cooperative, single-threaded IRC client/bot framework, grounded on `pyaib`'s top-level
//! `run_bot`/`IRCClient` and `libtiny_client`'s `connect`/`main_loop`.
//!
//! The runtime ([`Client`]) owns exactly one [`Context`], round-robins through the configured
//! server list, and for each connection runs a `tokio::select!` loop that reads lines off the
//! socket, dispatches them to events/triggers/the pinger, and tears the connection down either
//! on a socket error or a `Context::die`/`Context::cycle` request. Everything here runs on a
//! single OS thread inside a `tokio::task::LocalSet`; see `context.rs` for why.

pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
mod linesocket;
pub mod message;
mod pinger;
pub mod signals;
pub mod storage;
mod stream;
mod supervise;
pub mod timers;
pub mod triggers;
mod utils;

use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use libirc_common::ChanName;

pub use config::{Config, ServerAddr};
pub use context::Context;
pub use error::ServerAddrError;
pub use events::EventArgs;
pub use message::Message;
pub use storage::{Storage, StorageDriver};

use crate::error::SocketError;
use crate::linesocket::LineSocket;
use crate::pinger::{Event as PingerEvent, Pinger};

/// Numerics the server sends back when a `JOIN` is refused. Grounded on `pyaib/irc.py`'s
/// handling of `ERR_*CHANNEL*`/`ERR_BANNEDFROMCHAN`.
const CHANNEL_JOIN_ERROR_NUMERICS: [&str; 4] = ["471", "473", "474", "475"];

/// The runtime. Construct one with [`Client::new`], then drive it from inside a
/// `tokio::task::LocalSet` with [`Client::run`].
pub struct Client {
    ctx: Rc<Context>,
}

impl Client {
    pub fn new(config: Config, storage: Option<Storage>) -> Client {
        Client {
            ctx: Context::new(config, storage),
        }
    }

    /// The shared context every component, plugin and handler receives. Register components and
    /// plugins on `ctx.components`/`ctx.plugins` before calling [`Client::run`].
    pub fn context(&self) -> &Rc<Context> {
        &self.ctx
    }

    /// Spawn a task that calls [`Context::die`] on `SIGINT`, matching the convenience the
    /// original bot scaffolding wires up around its own supervisor loop. Opt-in: call this
    /// before [`Client::run`] if the embedding application wants ctrl-c to mean "quit", rather
    /// than leaving process-signal handling to the caller entirely.
    pub fn spawn_sigint_handler(&self) {
        let ctx = self.ctx.clone();
        tokio::task::spawn_local(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctx.die("Received a ctrl+c exiting");
            }
        });
    }

    /// Connect, register, and keep running until [`Context::die`] stops the reconnect policy or
    /// every configured server is unreachable. Must run inside a `tokio::task::LocalSet`.
    pub async fn run(&self) -> Result<(), ServerAddrError> {
        let servers = ServerAddr::parse_list(&self.ctx.config.irc.servers)?;
        if servers.is_empty() {
            return Err(ServerAddrError {
                input: String::new(),
            });
        }

        tokio::task::spawn_local(self.ctx.timers.clone().tick_loop(self.ctx.clone()));

        let backoff = Duration::from_secs(self.ctx.config.irc.reconnect_backoff_secs);
        let mut index = 0usize;
        loop {
            let server = &servers[index];
            log::info!("connecting to {}", server);
            self.run_session(server).await;

            if !self.ctx.should_reconnect() {
                return Ok(());
            }

            index += 1;
            if index >= servers.len() {
                index = 0;
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Connect to `server`, register, and run until the connection drops (socket error, or a
    /// `die`/`cycle` request). Always returns, never errors: failures are logged and handled by
    /// [`Client::run`]'s reconnect loop.
    async fn run_session(&self, server: &ServerAddr) {
        let ctx = &self.ctx;
        let connect_timeout = Duration::from_secs(ctx.config.irc.connect_timeout_secs);

        let mut socket =
            match LineSocket::connect(&server.host, server.port, server.tls, connect_timeout).await {
                Ok(socket) => socket,
                Err(err) => {
                    log::warn!("could not connect to {}: {}", server, err);
                    return;
                }
            };

        ctx.events.fire(
            "IRC_SOCKET_CONNECT",
            ctx.clone(),
            EventArgs::Raw(server.to_string()),
        );

        let (quit_tx, mut quit_rx) = tokio::sync::mpsc::channel(1);
        ctx.set_outbound(Some(socket.outbound()));
        ctx.set_quit_notify(Some(quit_tx));
        ctx.set_registered(false);
        ctx.set_server("");

        if let Some(password) = &ctx.config.irc.password {
            ctx.raw(&libirc_wire::pass(password));
        }
        ctx.raw(&libirc_wire::user(&ctx.config.irc.user, &ctx.config.irc.realname));
        ctx.nick_cmd(&ctx.config.irc.nick);

        let mut collision_suffix: u32 = 0;
        let mut pinger: Option<Pinger> = None;
        let mut pinger_events: Option<tokio::sync::mpsc::Receiver<PingerEvent>> = None;

        loop {
            tokio::select! {
                line = socket.readline() => {
                    match line {
                        Ok(raw) => {
                            self.handle_line(
                                &raw,
                                &mut collision_suffix,
                                &mut pinger,
                                &mut pinger_events,
                            );
                        }
                        Err(err) => {
                            log_disconnect(&err);
                            break;
                        }
                    }
                }
                event = recv_or_pending(&mut pinger_events) => {
                    match event {
                        PingerEvent::SendPing => {
                            let identity = ctx.server();
                            ctx.raw(&libirc_wire::ping(&format!(":{}", identity)));
                        }
                        PingerEvent::Disconnect => {
                            log::warn!("no PONG within the ping interval, disconnecting");
                            break;
                        }
                    }
                }
                _ = quit_rx.recv() => {
                    break;
                }
            }
        }

        ctx.set_outbound(None);
        ctx.set_quit_notify(None);
        socket.shutdown().await;
    }

    /// Parse one raw line and dispatch it: reset the pinger, fire the generic and per-kind
    /// events, run the registration/collision/autojoin state machine, and dispatch `PRIVMSG`
    /// triggers. Grounded on `pyaib/irc.py`'s `IRCClient.process_data`.
    fn handle_line(
        &self,
        raw: &str,
        collision_suffix: &mut u32,
        pinger: &mut Option<Pinger>,
        pinger_events: &mut Option<tokio::sync::mpsc::Receiver<PingerEvent>>,
    ) {
        let ctx = &self.ctx;
        ctx.events
            .fire("IRC_RAW_MSG", ctx.clone(), EventArgs::Raw(raw.to_owned()));

        let server_identity = ctx.server();
        let nick = ctx.nick();
        let msg = match message::parse(raw, &server_identity, &nick, &ctx.parsers) {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("could not parse line {:?}: {}", raw, err.reason);
                return;
            }
        };

        if let Some(pinger) = pinger {
            pinger.reset();
        }

        if !msg.sender.is_server() && msg.nick().eq_ignore_ascii_case(&nick) {
            ctx.observe_self_sender(msg.sender.raw());
        }

        match msg.kind.as_str() {
            "PING" => ctx.raw(&libirc_wire::pong(&format!(":{}", msg.args))),

            "001" => {
                ctx.set_server(msg.sender.raw());
                ctx.set_registered(true);
                ctx.set_confirmed_nick(&nick);
                *collision_suffix = 0;
                ctx.events.fire("IRC_ONCONNECT", ctx.clone(), EventArgs::None);

                let interval = Duration::from_secs(ctx.config.irc.auto_ping);
                match Pinger::new(interval) {
                    Some((p, rx)) => {
                        *pinger = Some(p);
                        *pinger_events = Some(rx);
                    }
                    None => {
                        *pinger = None;
                        *pinger_events = None;
                    }
                }

                let autojoin = self.autojoin_channels();
                if !autojoin.is_empty() {
                    ctx.join(&autojoin);
                }
            }

            "433" => {
                *collision_suffix += 1;
                let attempted = format!(
                    "{}{}",
                    ctx.config.irc.nick,
                    "_".repeat(*collision_suffix as usize)
                );
                ctx.events.fire(
                    "IRC_NICK_INUSE",
                    ctx.clone(),
                    EventArgs::NickInUse(attempted.clone()),
                );
                ctx.nick_cmd(&attempted);
            }

            "NICK" if msg.nick().eq_ignore_ascii_case(&nick) => {
                let new_nick = msg.args.clone();
                ctx.set_confirmed_nick(&new_nick);
                ctx.events.fire(
                    "IRC_NICK_CHANGE",
                    ctx.clone(),
                    EventArgs::NickChange {
                        old: nick.clone(),
                        new: new_nick,
                    },
                );
            }

            "JOIN" if msg.nick().eq_ignore_ascii_case(&nick) => {
                if let Some(chan) = &msg.raw_channel {
                    self.record_joined_channel(chan);
                }
            }

            kind if CHANNEL_JOIN_ERROR_NUMERICS.contains(&kind) => {
                let channel = msg.args.split_whitespace().nth(1).unwrap_or("").to_owned();
                let reason = msg
                    .args
                    .splitn(2, ':')
                    .nth(1)
                    .unwrap_or(&msg.args)
                    .to_owned();
                ctx.events.fire(
                    "IRC_CHANNEL_JOIN_ERROR",
                    ctx.clone(),
                    EventArgs::ChannelJoinError { channel, reason },
                );
            }

            _ => {}
        }

        let msg = Rc::new(msg);
        ctx.events.fire(
            &format!("IRC_MSG_{}", msg.kind),
            ctx.clone(),
            EventArgs::Msg(msg.clone()),
        );
        ctx.events
            .fire("IRC_MSG", ctx.clone(), EventArgs::Msg(msg.clone()));

        if msg.kind == "PRIVMSG" {
            let prefixes = [ctx.config.triggers.prefix.clone()];
            ctx.triggers.dispatch(ctx, &msg, &prefixes, &nick);
        }
    }

    /// The sorted union of `channels.autojoin` and whatever channels were recorded as joined on
    /// a previous run, when `channels.db` opts into persisting that set.
    fn autojoin_channels(&self) -> Vec<ChanName> {
        let ctx = &self.ctx;
        let mut names: BTreeSet<String> = ctx.config.channels.autojoin.iter().cloned().collect();

        if ctx.config.channels.db {
            if let Some(storage) = &ctx.storage {
                match storage.item("channels", "autojoin") {
                    Ok(item) => {
                        if let serde_json::Value::Array(joined) = &item.value {
                            for v in joined {
                                if let Some(s) = v.as_str() {
                                    names.insert(s.to_owned());
                                }
                            }
                        }
                    }
                    Err(err) => log::warn!("could not load previously joined channels: {}", err),
                }
            }
        }

        names.into_iter().map(ChanName::new).collect()
    }

    /// Persist `chan` to the joined-channel set, when `channels.db` is enabled.
    fn record_joined_channel(&self, chan: &str) {
        let ctx = &self.ctx;
        if !ctx.config.channels.db {
            return;
        }
        let Some(storage) = &ctx.storage else {
            return;
        };

        let mut item = match storage.item("channels", "autojoin") {
            Ok(item) => item,
            Err(err) => {
                log::warn!("could not load joined-channel storage: {}", err);
                return;
            }
        };

        let mut names: BTreeSet<String> = match &item.value {
            serde_json::Value::Array(joined) => joined
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => BTreeSet::new(),
        };
        if !names.insert(chan.to_owned()) {
            return;
        }

        item.value =
            serde_json::Value::Array(names.into_iter().map(serde_json::Value::String).collect());
        if let Err(err) = item.commit("channels", "autojoin") {
            log::warn!("could not persist joined channel {:?}: {}", chan, err);
        }
    }
}

fn log_disconnect(err: &SocketError) {
    match err {
        SocketError::Eof => log::info!("connection closed by peer"),
        other => log::warn!("connection error: {}", other),
    }
}

/// `select!`-friendly helper: resolves to the next event from `rx`, or never resolves if `rx` is
/// `None` (no pinger running yet, e.g. before `001`). Lets the session loop's `select!` arm stay
/// uniform whether or not a pinger currently exists.
async fn recv_or_pending(
    rx: &mut Option<tokio::sync::mpsc::Receiver<PingerEvent>>,
) -> PingerEvent {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn test_config(server: String) -> Config {
        serde_json::from_value(serde_json::json!({
            "irc": {
                "servers": [server],
                "nick": "bot",
                "user": "bot",
                "auto_ping": 0,
                "connect_timeout_secs": 5,
                "reconnect_backoff_secs": 0,
            }
        }))
        .unwrap()
    }

    async fn read_lines(socket: &mut TcpStream, n: usize) -> Vec<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let mut lines = Vec::new();
        while lines.len() < n {
            let read = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..read]);
            while let Some(idx) = buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = buf.drain(..=idx).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                lines.push(String::from_utf8(line).unwrap());
            }
        }
        lines
    }

    #[tokio::test(flavor = "current_thread")]
    async fn registers_and_handles_a_nick_collision() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();

                let server_task = tokio::task::spawn_local(async move {
                    let (mut socket, _) = listener.accept().await.unwrap();
                    let lines = read_lines(&mut socket, 2).await;
                    assert!(lines[0].starts_with("USER bot"));
                    assert_eq!(lines[1], "NICK bot");

                    socket
                        .write_all(b":srv 433 * bot :Nickname is already in use\r\n")
                        .await
                        .unwrap();
                    let collided = read_lines(&mut socket, 1).await;
                    assert_eq!(collided[0], "NICK bot_");

                    socket
                        .write_all(b":srv 001 bot_ :Welcome\r\n")
                        .await
                        .unwrap();

                    socket.write_all(b":bot_!u@h QUIT :bye\r\n").await.unwrap();
                });

                let client = Client::new(test_config(addr.to_string()), None);
                let ctx = client.context().clone();
                let registered = Rc::new(RefCell::new(false));
                let registered2 = registered.clone();
                ctx.events.observe(
                    "IRC_ONCONNECT",
                    Rc::new(move |_ctx, _args| {
                        let registered2 = registered2.clone();
                        Box::pin(async move {
                            *registered2.borrow_mut() = true;
                        })
                    }),
                );

                tokio::time::timeout(
                    Duration::from_secs(5),
                    client.run_session(&ServerAddr::parse(&addr.to_string()).unwrap()),
                )
                .await
                .unwrap();

                assert!(*registered.borrow());
                assert_eq!(ctx.nick(), "bot_");
                server_task.await.unwrap();
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn responds_to_ping_with_pong() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();

                let server_task = tokio::task::spawn_local(async move {
                    let (mut socket, _) = listener.accept().await.unwrap();
                    let _ = read_lines(&mut socket, 2).await;
                    socket.write_all(b"PING :srv\r\n").await.unwrap();
                    let pong = read_lines(&mut socket, 1).await;
                    assert_eq!(pong[0], "PONG :srv");
                    socket.write_all(b":srv 001 bot :hi\r\n").await.unwrap();
                    socket.write_all(b"ERROR :closing\r\n").await.unwrap();
                });

                let client = Client::new(test_config(addr.to_string()), None);
                tokio::time::timeout(
                    Duration::from_secs(5),
                    client.run_session(&ServerAddr::parse(&addr.to_string()).unwrap()),
                )
                .await
                .unwrap();

                server_task.await.unwrap();
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn autojoin_merges_configured_and_previously_joined_channels() {
        use crate::error::StorageError;
        use std::collections::HashMap as StdHashMap;

        #[derive(Default)]
        struct MemoryDriver(RefCell<StdHashMap<(String, String), serde_json::Value>>);
        impl StorageDriver for MemoryDriver {
            fn load(
                &self,
                bucket: &str,
                key: &str,
            ) -> Result<Option<serde_json::Value>, StorageError> {
                Ok(self
                    .0
                    .borrow()
                    .get(&(bucket.to_owned(), key.to_owned()))
                    .cloned())
            }
            fn save(
                &self,
                bucket: &str,
                key: &str,
                value: &serde_json::Value,
            ) -> Result<(), StorageError> {
                self.0
                    .borrow_mut()
                    .insert((bucket.to_owned(), key.to_owned()), value.clone());
                Ok(())
            }
            fn rename(
                &self,
                _ob: &str,
                _ok: &str,
                _nb: &str,
                _nk: &str,
            ) -> Result<(), StorageError> {
                Ok(())
            }
            fn delete(&self, _bucket: &str, _key: &str) -> Result<(), StorageError> {
                Ok(())
            }
            fn load_all(&self, _bucket: &str) -> Result<Vec<(String, serde_json::Value)>, StorageError> {
                Ok(Vec::new())
            }
        }

        let driver = Rc::new(MemoryDriver::default());
        driver
            .save("channels", "autojoin", &serde_json::json!(["#old"]))
            .unwrap();
        let storage = Storage::new(driver);

        let mut config = test_config("irc.example.org".to_owned());
        config.channels.autojoin = vec!["#new".to_owned()];
        config.channels.db = true;

        let client = Client::new(config, Some(storage));
        let joined = client.autojoin_channels();
        let names: Vec<&str> = joined.iter().map(|c| c.display()).collect();
        assert_eq!(names, vec!["#new", "#old"]);
    }
}
