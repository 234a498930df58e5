//! Parsed IRC messages and the per-command secondary parser registry.
//!
//! `Message` deliberately keeps `kind` as an open `String` rather than a closed enum: the
//! registry below lets components register a parser for a command word it has never heard of,
//! something a Rust sum type can't accommodate without becoming either unbounded or sealed.
//! Everything past the primary grammar (sender, command, raw `args`) is filled in by whichever
//! secondary parser is registered for `kind`, which is why most of `Message`'s fields are
//! `Option`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::SystemTime;

use libirc_common::ChanName;
use libirc_wire::Sender;

use crate::error::ParseError;

/// The symbol that prefixed a channel name in a directed message's target, recording the
/// sender's channel privilege at the time the message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPrefix {
    Op,
    HalfOp,
    Voice,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub raw: String,
    pub sender: Sender,
    pub kind: String,
    /// The argument remainder after the command word. For kinds with a registered secondary
    /// parser this is the untouched remainder (the parser decides what, if anything, to strip);
    /// for everything else a single leading `:` is stripped here.
    pub args: String,
    pub timestamp: SystemTime,

    // Filled in by the PRIVMSG/NOTICE/INVITE "directed message" parser.
    pub target: Option<String>,
    pub reply_target: Option<String>,
    pub message: Option<String>,
    pub channel: Option<ChanName>,
    pub raw_channel: Option<String>,
    pub channel_prefix: Option<ChannelPrefix>,

    // Filled in by the KICK parser.
    pub victim: Option<String>,

    /// The raw tail handed to the trigger tokenizer, before it's split into positional/keyword
    /// arguments. Set by `TriggerTable::dispatch` just before parsing, so a handler that wants
    /// the untokenized remainder doesn't have to reconstruct it from `args`/`kwargs`. `Message`
    /// is otherwise immutable once parsed; this is the one field set after the fact, hence the
    /// `RefCell`.
    pub unparsed: RefCell<Option<String>>,
}

impl Message {
    pub fn nick(&self) -> &str {
        self.sender.nick()
    }

    /// Whether this message is directed at a channel (as opposed to a private message).
    pub fn is_channel_message(&self) -> bool {
        self.channel.is_some()
    }

    /// The target a reply to this message should go to: the sender's nick for a private
    /// message, or the channel for a channel message. `None` for messages that never went
    /// through the directed-message parser.
    pub fn reply_target(&self) -> Option<&str> {
        self.reply_target.as_deref()
    }
}

pub type SecondaryParser = Rc<dyn Fn(&mut Message, &str, &str)>;

/// Chaining mode for [`ParserRegistry::add_parser`]: whether a newly registered parser replaces
/// whatever was there, or runs alongside the existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    Replace,
    ChainBefore,
    ChainAfter,
}

/// Per-command secondary parsers, keyed by command word (case-sensitive, matching the wire
/// grammar's numeric/named command words directly).
pub struct ParserRegistry {
    parsers: std::cell::RefCell<HashMap<String, Vec<SecondaryParser>>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        let registry = ParserRegistry {
            parsers: std::cell::RefCell::new(HashMap::new()),
        };
        registry.install_builtins();
        registry
    }
}

impl ParserRegistry {
    pub fn new() -> ParserRegistry {
        ParserRegistry::default()
    }

    fn install_builtins(&self) {
        self.set("PRIVMSG", vec![Rc::new(directed_parser)]);
        self.set("NOTICE", vec![Rc::new(directed_parser)]);
        self.set("INVITE", vec![Rc::new(directed_parser)]);
        self.set("JOIN", vec![Rc::new(join_parser)]);
        self.set("PART", vec![Rc::new(part_parser)]);
        self.set("KICK", vec![Rc::new(kick_parser)]);
    }

    fn set(&self, command: &str, parsers: Vec<SecondaryParser>) {
        self.parsers
            .borrow_mut()
            .insert(command.to_owned(), parsers);
    }

    /// Register a secondary parser for `command`. `ChainMode::Replace` (the default a caller
    /// should reach for) drops whatever was registered before; `ChainBefore`/`ChainAfter` run
    /// this parser in addition to the existing chain, in the given order.
    pub fn add_parser(&self, command: &str, mode: ChainMode, parser: SecondaryParser) {
        let mut parsers = self.parsers.borrow_mut();
        let entry = parsers.entry(command.to_owned()).or_default();
        match mode {
            ChainMode::Replace => *entry = vec![parser],
            ChainMode::ChainBefore => entry.insert(0, parser),
            ChainMode::ChainAfter => entry.push(parser),
        }
    }

    fn run(&self, command: &str, msg: &mut Message, raw_args: &str, botnick: &str) -> bool {
        let chain = self.parsers.borrow().get(command).cloned();
        match chain {
            Some(chain) => {
                for parser in &chain {
                    parser(msg, raw_args, botnick);
                }
                msg.args = raw_args.to_owned();
                true
            }
            None => false,
        }
    }
}

/// Parse a raw line into a [`Message`]. `server_identity` stands in for the sender when the line
/// carries no `:prefix` (true of `PING`/`ERROR` and a handful of others).
pub fn parse(
    raw: &str,
    server_identity: &str,
    botnick: &str,
    registry: &ParserRegistry,
) -> Result<Message, ParseError> {
    let parsed = libirc_wire::parse_line(raw).map_err(|e| ParseError { reason: e.reason })?;
    let sender = match parsed.prefix {
        Some(prefix) => Sender::parse(&prefix),
        None => Sender::server(server_identity),
    };

    let mut msg = Message {
        raw: raw.to_owned(),
        sender,
        kind: parsed.command.clone(),
        args: String::new(),
        timestamp: SystemTime::now(),
        target: None,
        reply_target: None,
        message: None,
        channel: None,
        raw_channel: None,
        channel_prefix: None,
        victim: None,
        unparsed: RefCell::new(None),
    };

    if !registry.run(&parsed.command, &mut msg, &parsed.args, botnick) {
        msg.args = strip_leading_colon_once(&parsed.args);
    }

    Ok(msg)
}

fn strip_leading_colon_once(s: &str) -> String {
    match s.strip_prefix(':') {
        Some(rest) => rest.to_owned(),
        None => s.to_owned(),
    }
}

fn directed_parser(msg: &mut Message, raw_args: &str, botnick: &str) {
    let Some(sp) = raw_args.find(' ') else {
        return;
    };
    let target = &raw_args[..sp];
    let mut body = &raw_args[sp + 1..];
    if let Some(stripped) = body.strip_prefix(':') {
        body = stripped;
    }

    msg.target = Some(target.to_owned());
    msg.message = Some(body.to_owned());

    if target.eq_ignore_ascii_case(botnick) {
        msg.reply_target = Some(msg.sender.nick().to_owned());
        return;
    }

    let (prefix, chan) = match target.chars().next() {
        Some('@') => (Some(ChannelPrefix::Op), &target[1..]),
        Some('%') => (Some(ChannelPrefix::HalfOp), &target[1..]),
        Some('+') => (Some(ChannelPrefix::Voice), &target[1..]),
        _ => (None, target),
    };

    msg.raw_channel = Some(chan.to_owned());
    msg.channel = Some(ChanName::new(chan.to_lowercase()));
    msg.channel_prefix = prefix;
    msg.reply_target = Some(target.to_owned());
}

fn join_parser(msg: &mut Message, raw_args: &str, _botnick: &str) {
    let chan = raw_args.strip_prefix(':').unwrap_or(raw_args);
    msg.raw_channel = Some(chan.to_owned());
    msg.channel = Some(ChanName::new(chan.to_lowercase()));
}

fn part_parser(msg: &mut Message, raw_args: &str, _botnick: &str) {
    let args = raw_args.trim();
    let (chan, rest) = match args.find(' ') {
        Some(idx) => (&args[..idx], args[idx + 1..].trim_start()),
        None => (args, ""),
    };
    msg.raw_channel = Some(chan.to_owned());
    msg.channel = Some(ChanName::new(chan.to_lowercase()));
    if !rest.is_empty() {
        msg.message = Some(rest.strip_prefix(':').unwrap_or(rest).to_owned());
    }
}

fn kick_parser(msg: &mut Message, raw_args: &str, _botnick: &str) {
    let mut parts = raw_args.splitn(3, ' ');
    let chan = parts.next().unwrap_or("");
    let victim = parts.next().unwrap_or("");
    let reason = parts.next().unwrap_or("");
    msg.raw_channel = Some(chan.to_owned());
    msg.channel = Some(ChanName::new(chan.to_lowercase()));
    msg.victim = Some(victim.to_owned());
    msg.message = Some(reason.strip_prefix(':').unwrap_or(reason).to_owned());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privmsg_to_self_sets_reply_target_to_sender_nick() {
        let registry = ParserRegistry::new();
        let msg = parse(
            ":alice!u@h PRIVMSG mybot :hello there",
            "srv",
            "mybot",
            &registry,
        )
        .unwrap();
        assert_eq!(msg.kind, "PRIVMSG");
        assert_eq!(msg.target.as_deref(), Some("mybot"));
        assert_eq!(msg.message.as_deref(), Some("hello there"));
        assert_eq!(msg.reply_target.as_deref(), Some("alice"));
        assert!(msg.channel.is_none());
    }

    #[test]
    fn privmsg_to_channel_sets_channel_and_strips_prefix() {
        let registry = ParserRegistry::new();
        let msg = parse(
            ":alice!u@h PRIVMSG @#Rust :hi all",
            "srv",
            "mybot",
            &registry,
        )
        .unwrap();
        assert_eq!(msg.raw_channel.as_deref(), Some("#Rust"));
        assert_eq!(msg.channel.as_ref().unwrap().display(), "#rust");
        assert!(matches!(msg.channel_prefix, Some(ChannelPrefix::Op)));
        assert_eq!(msg.reply_target.as_deref(), Some("@#Rust"));
    }

    #[test]
    fn join_sets_channel_and_strips_leading_colon() {
        let registry = ParserRegistry::new();
        let msg = parse(":alice!u@h JOIN :#chan", "srv", "mybot", &registry).unwrap();
        assert_eq!(msg.raw_channel.as_deref(), Some("#chan"));
    }

    #[test]
    fn kick_splits_channel_victim_and_reason() {
        let registry = ParserRegistry::new();
        let msg = parse(
            ":op!u@h KICK #chan victim :be nice",
            "srv",
            "mybot",
            &registry,
        )
        .unwrap();
        assert_eq!(msg.raw_channel.as_deref(), Some("#chan"));
        assert_eq!(msg.victim.as_deref(), Some("victim"));
        assert_eq!(msg.message.as_deref(), Some("be nice"));
    }

    #[test]
    fn unregistered_kind_strips_one_leading_colon_on_args() {
        let registry = ParserRegistry::new();
        let msg = parse(":srv 353 mybot = #c :a b c", "srv", "mybot", &registry).unwrap();
        assert_eq!(msg.kind, "353");
        // No leading ':' on the remainder itself, so nothing is stripped.
        assert_eq!(msg.args, "mybot = #c :a b c");

        let quit_msg = parse(":alice!u@h QUIT :gone fishing", "srv", "mybot", &registry).unwrap();
        assert_eq!(quit_msg.args, "gone fishing");
    }

    #[test]
    fn ping_with_no_prefix_uses_server_identity() {
        let registry = ParserRegistry::new();
        let msg = parse("PING :srv.example.org", "srv.example.org", "mybot", &registry).unwrap();
        assert!(msg.sender.is_server());
        assert_eq!(msg.args, "srv.example.org");
    }
}
