//! Command-word dispatch on `PRIVMSG`, grounded on `pyaib/triggers.py`.
//!
//! A message activates trigger dispatch in exactly one of three ways: it starts with a
//! configured command prefix (`!foo`), it addresses the bot by nick (`mybot: foo` / `mybot, foo`),
//! or it's a private message (anything said directly to the bot, no prefix required). Whichever
//! applies, the remaining text is tokenized into a trigger word plus positional/keyword
//! arguments and dispatched to every handler registered for that word, in registration order.
//!
//! The filter combinators below (`filter_channel`, `filter_private_only`, `filter_ignore`,
//! `filter_sub`, `filter_nosub`, `filter_autohelp`, `filter_autohelp_noargs`) wrap a
//! [`TriggerObserver`] the way `pyaib/components.py`'s `_Channel`/`_Ignore`/`triggers_on` nested
//! decorators wrap a Python callable: composable, each one deciding whether to call through to
//! the next layer or short-circuit.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use libirc_common::ChanName;

use crate::context::Context;
use crate::message::Message;
use crate::supervise::spawn_guarded;
use crate::utils::split_iterator;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()>>>;
pub type TriggerObserver =
    Rc<dyn Fn(Rc<Context>, Rc<Message>, String, Vec<String>, HashMap<String, KwArg>) -> BoxFuture>;

/// A keyword argument's value: a bare `--flag` carries no value, `--key=value` does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KwArg {
    Flag,
    Value(String),
}

impl KwArg {
    pub fn as_value(&self) -> Option<&str> {
        match self {
            KwArg::Value(v) => Some(v),
            KwArg::Flag => None,
        }
    }
}

#[derive(Clone)]
struct TriggerHandler {
    doc: Option<String>,
    callback: TriggerObserver,
}

#[derive(Default)]
pub struct TriggerTable {
    table: RefCell<HashMap<String, Vec<TriggerHandler>>>,
    /// Preserves first-registration order for the compact help listing; `table`'s hashmap
    /// iteration order isn't meaningful.
    order: RefCell<Vec<String>>,
}

impl TriggerTable {
    pub fn new() -> Rc<TriggerTable> {
        let table = Rc::new(TriggerTable::default());
        table.install_help();
        table
    }

    /// Register a handler for `word`. `doc` becomes the trigger's help text; a `None` doc keeps
    /// the trigger out of the compact `help` listing (but `help <word>` still finds it if
    /// someone knows to ask).
    pub fn observe(&self, word: &str, doc: Option<&str>, callback: TriggerObserver) {
        let key = word.to_lowercase();
        let mut table = self.table.borrow_mut();
        if !table.contains_key(&key) {
            self.order.borrow_mut().push(key.clone());
        }
        table.entry(key).or_default().push(TriggerHandler {
            doc: doc.map(str::to_owned),
            callback,
        });
    }

    /// Parse `text` (a full `PRIVMSG` body) against the three activation conditions, tokenize
    /// and dispatch to every handler registered for the resulting trigger word.
    pub fn dispatch(&self, ctx: &Rc<Context>, msg: &Rc<Message>, prefixes: &[String], botnick: &str) {
        if msg.kind != "PRIVMSG" {
            return;
        }
        let Some(text) = msg.message.as_deref() else {
            return;
        };

        let body = if let Some(rest) = strip_prefix(text, prefixes) {
            rest
        } else if let Some(rest) = strip_addressed(text, botnick) {
            rest
        } else if !msg.is_channel_message() {
            text
        } else {
            return;
        };

        let body = body.trim_start();
        if body.is_empty() {
            return;
        }
        let (word, tail) = match body.find(char::is_whitespace) {
            Some(idx) => (&body[..idx], &body[idx..]),
            None => (body, ""),
        };
        *msg.unparsed.borrow_mut() = Some(tail.to_owned());
        let (args, kwargs) = parse_args(tail);

        let handlers = self
            .table
            .borrow()
            .get(&word.to_lowercase())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            let ctx = ctx.clone();
            let msg = msg.clone();
            let word = word.to_owned();
            let args = args.clone();
            let kwargs = kwargs.clone();
            spawn_guarded(async move { (handler.callback)(ctx, msg, word, args, kwargs).await });
        }
    }

    fn install_help(self: &Rc<Self>) {
        let table = self.clone();
        let callback: TriggerObserver = Rc::new(move |ctx, msg, _word, args, kwargs| {
            let table = table.clone();
            Box::pin(async move {
                let Some(target) = msg.reply_target().map(str::to_owned) else {
                    return;
                };
                // `--full` or an explicit trigger name gets the long form; bare `!help` and
                // `--list` both get the compact one-liner.
                if kwargs.contains_key("full") {
                    for line in table.full_help() {
                        ctx.privmsg(&target, &line);
                    }
                } else if let Some(topic) = args.first() {
                    for line in table.long_help(topic) {
                        ctx.privmsg(&target, &line);
                    }
                } else {
                    ctx.privmsg(&target, &table.compact_help());
                }
            })
        });
        self.observe(
            "help",
            Some("help [--list] [--full] [trigger] - list triggers, or show help for one"),
            callback,
        );
    }

    fn visible_words(&self) -> Vec<String> {
        let table = self.table.borrow();
        let order = self.order.borrow();
        let mut words: Vec<String> = order
            .iter()
            .filter(|w| {
                table
                    .get(*w)
                    .map(|handlers| handlers.iter().any(|h| h.doc.is_some()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        words.sort_unstable();
        words
    }

    /// A single `Command List: ...` line; the caller's own wrapping re-splits it if the target's
    /// budget is narrower than the joined list.
    fn compact_help(&self) -> String {
        format!("Command List: {}", self.visible_words().join(", "))
    }

    /// One line per `(trigger, doc)` pair across every visible trigger, for `help --full`.
    fn full_help(&self) -> Vec<String> {
        let table = self.table.borrow();
        self.visible_words()
            .iter()
            .flat_map(|word| {
                table
                    .get(word)
                    .into_iter()
                    .flat_map(|handlers| handlers.iter())
                    .filter_map(|h| h.doc.as_deref())
                    .map(|doc| format!("{}: {}", word, doc))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn long_help(&self, word: &str) -> Vec<String> {
        let table = self.table.borrow();
        match table.get(&word.to_lowercase()) {
            None => vec![format!("no such trigger: {}", word)],
            Some(handlers) => {
                let docs: Vec<&str> = handlers.iter().filter_map(|h| h.doc.as_deref()).collect();
                if docs.is_empty() {
                    vec![format!("{}: no help available", word)]
                } else {
                    docs.iter()
                        .flat_map(|doc| split_iterator(doc, 400).map(str::to_owned).collect::<Vec<_>>())
                        .collect()
                }
            }
        }
    }
}

fn strip_prefix<'a>(text: &'a str, prefixes: &[String]) -> Option<&'a str> {
    prefixes
        .iter()
        .find_map(|p| (!p.is_empty()).then(|| text.strip_prefix(p.as_str())).flatten())
}

fn strip_addressed<'a>(text: &'a str, botnick: &str) -> Option<&'a str> {
    if botnick.is_empty() || text.len() <= botnick.len() {
        return None;
    }
    let (head, rest) = text.split_at(botnick.len());
    if !head.eq_ignore_ascii_case(botnick) {
        return None;
    }
    let rest = match rest.strip_prefix(':').or_else(|| rest.strip_prefix(',')) {
        Some(r) => r,
        None => return None,
    };
    Some(rest.trim_start())
}

//
// Tokenizer. The Python source uses a regex with a `\1` backreference to match the opening
// quote character at the close; the `regex` crate doesn't support backreferences, so this is a
// hand-rolled scan instead, built to the same contract: `--flag`/`--key=value` keyword tokens,
// quoted or bare positional tokens, with `\"`/`\'` unescaped inside quotes.
//

pub fn parse_args(text: &str) -> (Vec<String>, HashMap<String, KwArg>) {
    let mut args = Vec::new();
    let mut kwargs = HashMap::new();
    let mut rest = text;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        if let Some((name, has_eq, after_keyword)) = take_keyword(rest) {
            if has_eq {
                let (value, after_value) = take_positional(after_keyword);
                kwargs.insert(name, KwArg::Value(value));
                rest = after_value;
            } else {
                kwargs.insert(name, KwArg::Flag);
                rest = after_keyword;
            }
            continue;
        }

        let (value, after_value) = take_positional(rest);
        args.push(value);
        rest = after_value;
    }

    (args, kwargs)
}

/// Matches `--?[a-zA-Z_]\w*(?:\s*=)?\s*`, returning the keyword name, whether a `=` followed it,
/// and the text after the keyword (and after the `=`'s surrounding whitespace, if any).
fn take_keyword(s: &str) -> Option<(String, bool, &str)> {
    let body = if let Some(b) = s.strip_prefix("--") {
        b
    } else {
        s.strip_prefix('-')?
    };

    let mut chars = body.char_indices();
    let (_, first) = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    let mut end = first.len_utf8();
    for (i, c) in body.char_indices().skip(1) {
        if c.is_alphanumeric() || c == '_' {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }

    let name = body[..end].to_owned();
    let rest = &body[end..];
    let trimmed = rest.trim_start();

    match trimmed.strip_prefix('=') {
        Some(after_eq) => Some((name, true, after_eq.trim_start())),
        None => Some((name, false, trimmed)),
    }
}

fn take_positional(s: &str) -> (String, &str) {
    let s = s.trim_start();
    if let Some(rest) = s.strip_prefix('"') {
        take_quoted(rest, '"')
    } else if let Some(rest) = s.strip_prefix('\'') {
        take_quoted(rest, '\'')
    } else {
        match s.find(char::is_whitespace) {
            Some(idx) => (s[..idx].to_owned(), &s[idx..]),
            None => (s.to_owned(), ""),
        }
    }
}

fn take_quoted(s: &str, quote: char) -> (String, &str) {
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            if let Some(&(_, next)) = chars.peek() {
                if next == quote {
                    chars.next();
                    continue;
                }
            }
        } else if c == quote {
            return (unescape(&s[..i]), &s[i + 1..]);
        }
    }
    (unescape(s), "")
}

fn unescape(s: &str) -> String {
    s.replace("\\\"", "\"").replace("\\'", "'")
}

//
// Filter combinators.
//

pub fn filter_channel(allowed: Vec<ChanName>, allow_private: bool, inner: TriggerObserver) -> TriggerObserver {
    Rc::new(move |ctx, msg, word, args, kwargs| {
        let permitted = match &msg.channel {
            Some(chan) => allowed.iter().any(|c| c == chan),
            None => allow_private,
        };
        if permitted {
            inner(ctx, msg, word, args, kwargs)
        } else {
            Box::pin(async {})
        }
    })
}

pub fn filter_private_only(inner: TriggerObserver) -> TriggerObserver {
    Rc::new(move |ctx, msg, word, args, kwargs| {
        if msg.channel.is_none() {
            inner(ctx, msg, word, args, kwargs)
        } else {
            Box::pin(async {})
        }
    })
}

pub fn filter_ignore(ignored: Vec<String>, inner: TriggerObserver) -> TriggerObserver {
    Rc::new(move |ctx, msg, word, args, kwargs| {
        if ignored.iter().any(|n| n.eq_ignore_ascii_case(msg.nick())) {
            Box::pin(async {})
        } else {
            inner(ctx, msg, word, args, kwargs)
        }
    })
}

/// Only calls through when `args[0]` matches one of `subs`; the matched subcommand is folded
/// into the trigger word (`"plugin enable"`) and consumed from `args`.
pub fn filter_sub(subs: Vec<String>, inner: TriggerObserver) -> TriggerObserver {
    Rc::new(move |ctx, msg, word, mut args, kwargs| {
        if !args.is_empty() && subs.iter().any(|s| s.eq_ignore_ascii_case(&args[0])) {
            let sub = args.remove(0);
            let word = format!("{} {}", word, sub);
            inner(ctx, msg, word, args, kwargs)
        } else {
            Box::pin(async {})
        }
    })
}

/// The complement of [`filter_sub`]: only calls through when there's no subcommand, or the
/// first argument isn't one of `subs` (i.e. this is the "default" handler, leaving subcommand
/// dispatch to sibling `filter_sub`-wrapped handlers on the same word).
pub fn filter_nosub(subs: Vec<String>, inner: TriggerObserver) -> TriggerObserver {
    Rc::new(move |ctx, msg, word, args, kwargs| {
        if args.first().map(|a| subs.iter().any(|s| s.eq_ignore_ascii_case(a))) == Some(true) {
            Box::pin(async {})
        } else {
            inner(ctx, msg, word, args, kwargs)
        }
    })
}

fn wants_help(args: &[String], kwargs: &HashMap<String, KwArg>) -> bool {
    kwargs.contains_key("h")
        || kwargs.contains_key("help")
        || args.first().map(|a| a.eq_ignore_ascii_case("help")) == Some(true)
}

pub fn filter_autohelp(doc: &'static str, inner: TriggerObserver) -> TriggerObserver {
    Rc::new(move |ctx, msg, word, args, kwargs| {
        if wants_help(&args, &kwargs) {
            let ctx = ctx.clone();
            let msg = msg.clone();
            Box::pin(async move {
                if let Some(target) = msg.reply_target() {
                    ctx.privmsg(target, doc);
                }
            })
        } else {
            inner(ctx, msg, word, args, kwargs)
        }
    })
}

pub fn filter_autohelp_noargs(doc: &'static str, inner: TriggerObserver) -> TriggerObserver {
    Rc::new(move |ctx, msg, word, args, kwargs| {
        if wants_help(&args, &kwargs) || (args.is_empty() && kwargs.is_empty()) {
            let ctx = ctx.clone();
            let msg = msg.clone();
            Box::pin(async move {
                if let Some(target) = msg.reply_target() {
                    ctx.privmsg(target, doc);
                }
            })
        } else {
            inner(ctx, msg, word, args, kwargs)
        }
    })
}
