//! The process-wide handle every handler receives, grounded on `pyaib/context.py`'s `Context`
//! (née `Persistable`): one object created at startup, carrying the config tree, a reference to
//! each service (events, timers, triggers, signals, components, storage), the bot's identity, and
//! the helper "send" methods (`RAW`, `NICK`, `PRIVMSG`, `JOIN`, `PART`) that every handler uses to
//! talk back to the server.
//!
//! Modeled as `Rc<Context>` with `RefCell`-guarded mutable state, matching the single-threaded
//! cooperative scheduling model (§5): nothing here is ever touched from more than one OS thread,
//! so there's no need for `Arc`/`Mutex`. `Context` needs to hand a fresh `Rc<Context>` to itself
//! when firing events or running send helpers (`Events::fire` takes `Rc<Context>` by value); it
//! gets one via a `Weak` back-reference seeded through `Rc::new_cyclic`, which avoids an
//! `Option<Rc<Context>>` dance during construction.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use libirc_common::ChanName;
use tokio::sync::mpsc;

use crate::component::ComponentManager;
use crate::config::Config;
use crate::events::{EventArgs, Events};
use crate::message::ParserRegistry;
use crate::signals::Signals;
use crate::storage::Storage;
use crate::timers::Timers;
use crate::triggers::TriggerTable;
use crate::utils::split_iterator;

/// Bounded outbound queue depth. Matches the teacher crate's own `mpsc::channel(100)` sizing for
/// its command/event channels.
const OUTBOUND_QUEUE_DEPTH: usize = 256;

struct ContextState {
    /// The nick currently in use or being attempted. Before `001` this is whatever `NICK` the
    /// client last sent (optimistically assigned); afterward it tracks confirmed `NICK` changes.
    nick: String,
    /// Self-observed `nick!user@host`, used for `PRIVMSG` wrap-width accounting. Empty (just the
    /// nick) until the runtime observes a line whose sender is the bot itself.
    bot_sender_raw: String,
    /// The identity used as the implicit sender for lines that arrive with no `:prefix` (see
    /// `Sender::server`); set to the connected server's own prefix once `001` arrives.
    server: String,
    registered: bool,
    /// Cleared by [`Context::die`]; the runtime's connect loop checks this after a disconnect to
    /// decide whether to try again.
    reconnect: bool,
    outbound: Option<mpsc::Sender<String>>,
    /// Set by the runtime once a connection is established; `die`/`cycle` poke it after
    /// queueing `QUIT` so the connect loop can tear the socket down immediately rather than
    /// waiting on the server to close its end.
    quit_notify: Option<mpsc::Sender<()>>,
}

pub struct Context {
    pub config: Config,
    pub events: Events,
    pub timers: Rc<Timers>,
    pub triggers: Rc<TriggerTable>,
    pub signals: Signals,
    pub components: ComponentManager,
    pub plugins: ComponentManager,
    pub parsers: Rc<ParserRegistry>,
    pub storage: Option<Storage>,
    self_weak: Weak<Context>,
    state: RefCell<ContextState>,
}

impl Context {
    pub fn new(config: Config, storage: Option<Storage>) -> Rc<Context> {
        let initial_nick = config.irc.nick.clone();
        Rc::new_cyclic(|weak| Context {
            config,
            events: Events::new(),
            timers: Rc::new(Timers::new()),
            triggers: TriggerTable::new(),
            signals: Signals::new(),
            components: ComponentManager::new(),
            plugins: ComponentManager::new(),
            parsers: Rc::new(ParserRegistry::new()),
            storage,
            self_weak: weak.clone(),
            state: RefCell::new(ContextState {
                bot_sender_raw: initial_nick.clone(),
                nick: initial_nick,
                server: String::new(),
                registered: false,
                reconnect: true,
                outbound: None,
                quit_notify: None,
            }),
        })
    }

    /// A throwaway `Context` for unit tests that exercise `Events`/`Timers`/`Signals`/send
    /// helpers in isolation. Built through `Rc::new_cyclic` exactly like the real constructor, so
    /// `self_rc()` resolves correctly for tests that call `raw`/`privmsg`/... directly.
    #[cfg(test)]
    pub fn for_tests() -> Rc<Context> {
        use crate::config::{ChannelsConfig, ComponentsConfig, DbConfig, IrcConfig, PluginsConfig, TriggersConfig};

        Rc::new_cyclic(|weak| Context {
            config: Config {
                irc: IrcConfig {
                    servers: vec!["irc.example.org".to_owned()],
                    nick: "testbot".to_owned(),
                    user: "testbot".to_owned(),
                    realname: "test bot".to_owned(),
                    password: None,
                    auto_ping: 600,
                    reconnect_backoff_secs: 10,
                    connect_timeout_secs: 10,
                },
                channels: ChannelsConfig::default(),
                triggers: TriggersConfig::default(),
                plugins: PluginsConfig::default(),
                components: ComponentsConfig::default(),
                db: DbConfig::default(),
            },
            events: Events::new(),
            timers: Rc::new(Timers::new()),
            triggers: TriggerTable::new(),
            signals: Signals::new(),
            components: ComponentManager::new(),
            plugins: ComponentManager::new(),
            parsers: Rc::new(crate::message::ParserRegistry::new()),
            storage: None,
            self_weak: weak.clone(),
            state: RefCell::new(ContextState {
                bot_sender_raw: "testbot".to_owned(),
                nick: "testbot".to_owned(),
                server: String::new(),
                registered: false,
                reconnect: true,
                outbound: None,
                quit_notify: None,
            }),
        })
    }

    fn self_rc(&self) -> Rc<Context> {
        self.self_weak
            .upgrade()
            .expect("Context used after it was dropped")
    }

    //
    // Identity bookkeeping. Called by the runtime (`client.rs`), not by ordinary handlers.
    //

    pub fn set_outbound(&self, tx: Option<mpsc::Sender<String>>) {
        self.state.borrow_mut().outbound = tx;
    }

    /// Called by the runtime once a session's socket is up; `die`/`cycle` poke this so the
    /// connect loop can tear the socket down right away instead of waiting on the peer.
    pub fn set_quit_notify(&self, tx: Option<mpsc::Sender<()>>) {
        self.state.borrow_mut().quit_notify = tx;
    }

    pub fn nick(&self) -> String {
        self.state.borrow().nick.clone()
    }

    /// Record a nick as confirmed (the server accepted it, or an observed self-`NICK` changed
    /// it). Distinct from the optimistic assignment `nick_cmd` does before registration.
    pub fn set_confirmed_nick(&self, nick: &str) {
        self.state.borrow_mut().nick = nick.to_owned();
    }

    pub fn bot_sender_raw(&self) -> String {
        self.state.borrow().bot_sender_raw.clone()
    }

    /// Called when the runtime observes a line whose sender nick matches the bot's own nick,
    /// i.e. the server just told us our own `user@host`.
    pub fn observe_self_sender(&self, raw: &str) {
        self.state.borrow_mut().bot_sender_raw = raw.to_owned();
    }

    pub fn server(&self) -> String {
        self.state.borrow().server.clone()
    }

    pub fn set_server(&self, identity: &str) {
        self.state.borrow_mut().server = identity.to_owned();
    }

    pub fn is_registered(&self) -> bool {
        self.state.borrow().registered
    }

    pub fn set_registered(&self, registered: bool) {
        self.state.borrow_mut().registered = registered;
    }

    pub fn should_reconnect(&self) -> bool {
        self.state.borrow().reconnect
    }

    //
    // Send helpers (§4.8).
    //

    fn send_line(&self, line: String) {
        let delivered = {
            let state = self.state.borrow();
            match &state.outbound {
                Some(tx) => tx.try_send(line.clone()).is_ok(),
                None => false,
            }
        };
        if !delivered {
            log::warn!("dropping outbound line, not connected: {:?}", line);
        }
        self.events
            .fire("IRC_RAW_SEND", self.self_rc(), EventArgs::Raw(line));
    }

    /// Join `parts` with single spaces, strip CR/LF, expand tabs to 4 spaces, right-strip, and
    /// suppress the line entirely if that leaves it empty. Matches `pyaib/irc.py`'s `RAW`.
    pub fn raw_list(&self, parts: &[&str]) {
        let joined = parts.join(" ");
        let no_newlines: String = joined.chars().filter(|&c| c != '\r' && c != '\n').collect();
        let expanded = no_newlines.replace('\t', "    ");
        let trimmed = expanded.trim_end();
        if trimmed.is_empty() {
            return;
        }
        self.send_line(trimmed.to_owned());
    }

    pub fn raw(&self, line: &str) {
        self.raw_list(&[line]);
    }

    /// Send `NICK n`. If registration hasn't completed yet, optimistically assume the server
    /// will accept it (the only way to find out otherwise is a later `433`, handled by the
    /// runtime's `NickCollision` state).
    pub fn nick_cmd(&self, new_nick: &str) {
        self.send_line(libirc_wire::nick(new_nick));
        if !self.is_registered() {
            self.state.borrow_mut().nick = new_nick.to_owned();
        }
    }

    /// Width budget in bytes available to a single wrapped chunk of `PRIVMSG target :<chunk>`,
    /// accounting for the bot's own sender overhead the server will prepend on the receiving end.
    /// Grounded on the teacher's `Client::split_privmsg`.
    fn privmsg_chunk_budget(&self, target: &str) -> usize {
        let overhead = self.bot_sender_raw().len() + 2 + format!("PRIVMSG {} :", target).len();
        510usize.saturating_sub(overhead)
    }

    /// Word-wrap `msg` into chunks of at most `510 - prefix_overhead` bytes (never code points,
    /// per §9 Open Question (c)) and send one `PRIVMSG` per chunk.
    pub fn privmsg(&self, target: &str, msg: &str) {
        let budget = self.privmsg_chunk_budget(target).max(1);
        for chunk in split_iterator(msg, budget) {
            self.send_line(libirc_wire::privmsg(target, chunk));
        }
    }

    pub fn notice(&self, target: &str, msg: &str) {
        let budget = self.privmsg_chunk_budget(target).max(1);
        for chunk in split_iterator(msg, budget) {
            self.send_line(libirc_wire::notice(target, chunk));
        }
    }

    /// Batch `chans` into as few `JOIN` lines as fit in 510 bytes each, comma-separated.
    pub fn join(&self, chans: &[ChanName]) {
        let mut line = String::from("JOIN ");
        let mut first_in_line = true;
        for chan in chans {
            let piece = chan.display();
            let extra = if first_in_line { piece.len() } else { piece.len() + 1 };
            if !first_in_line && line.len() + extra > 510 {
                self.send_line(std::mem::replace(&mut line, String::from("JOIN ")));
                first_in_line = true;
            }
            if !first_in_line {
                line.push(',');
            }
            line.push_str(piece);
            first_in_line = false;
        }
        if !first_in_line {
            self.send_line(line);
        }
    }

    pub fn part(&self, chans: &[ChanName], message: Option<&str>) {
        if chans.is_empty() {
            return;
        }
        let names: Vec<String> = chans.iter().map(|c| c.display().to_owned()).collect();
        self.send_line(libirc_wire::part(&names, message));
    }

    /// `QUIT` with a supplied reason and stop reconnecting once the current connection drops.
    pub fn die(&self, reason: &str) {
        self.state.borrow_mut().reconnect = false;
        self.send_line(libirc_wire::quit(Some(reason)));
        self.notify_quit();
    }

    /// `QUIT "Reconnecting"` but leave the reconnect policy enabled, so the runtime immediately
    /// tries the server list again.
    pub fn cycle(&self) {
        self.send_line(libirc_wire::quit(Some("Reconnecting")));
        self.notify_quit();
    }

    fn notify_quit(&self) {
        if let Some(tx) = &self.state.borrow().quit_notify {
            let _ = tx.try_send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_list_strips_crlf_and_expands_tabs() {
        let ctx = Context::for_tests();
        let (tx, mut rx) = mpsc::channel(8);
        ctx.set_outbound(Some(tx));

        ctx.raw_list(&["NAMES\t#chan\r\n"]);
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent, "NAMES    #chan");
    }

    #[test]
    fn raw_suppresses_a_line_that_is_empty_after_trimming() {
        let ctx = Context::for_tests();
        let (tx, mut rx) = mpsc::channel(8);
        ctx.set_outbound(Some(tx));
        ctx.raw("   \r\n  ");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn nick_cmd_optimistically_assigns_nick_before_registration() {
        let ctx = Context::for_tests();
        let (tx, _rx) = mpsc::channel(8);
        ctx.set_outbound(Some(tx));
        ctx.nick_cmd("newnick");
        assert_eq!(ctx.nick(), "newnick");
    }

    #[test]
    fn privmsg_wraps_long_messages_into_byte_budgeted_chunks() {
        let ctx = Context::for_tests();
        let (tx, mut rx) = mpsc::channel(16);
        ctx.set_outbound(Some(tx));
        ctx.observe_self_sender(&"a".repeat(30));

        let msg = "x".repeat(900);
        ctx.privmsg("#c", &msg);

        let mut reconstructed = String::new();
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            assert!(line.len() <= 510);
            let body = line.strip_prefix("PRIVMSG #c :").unwrap();
            reconstructed.push_str(body);
            lines.push(line);
        }
        assert_eq!(reconstructed, msg);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn join_batches_channels_without_exceeding_line_budget() {
        let ctx = Context::for_tests();
        let (tx, mut rx) = mpsc::channel(16);
        ctx.set_outbound(Some(tx));
        let chans: Vec<ChanName> = vec![ChanName::new("#a".to_owned()), ChanName::new("#b".to_owned())];
        ctx.join(&chans);
        let line = rx.try_recv().unwrap();
        assert_eq!(line, "JOIN #a,#b");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn die_disables_reconnect_and_sends_quit_with_reason() {
        let ctx = Context::for_tests();
        let (tx, mut rx) = mpsc::channel(8);
        ctx.set_outbound(Some(tx));
        assert!(ctx.should_reconnect());
        ctx.die("bye");
        assert!(!ctx.should_reconnect());
        assert_eq!(rx.try_recv().unwrap(), "QUIT :bye");
    }
}
