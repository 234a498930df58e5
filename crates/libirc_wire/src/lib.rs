//! IRC line grammar: splitting a raw line into a sender prefix, command word and argument
//! remainder, plus builders for the handful of outbound lines the client needs to speak during
//! registration and normal operation.
//!
//! Unlike a parser built around a closed `Cmd` enum, this one leaves the command word as an open
//! `String` (the runtime's parser registry attaches per-command secondary parsing on top) and
//! leaves `args` as the raw remainder rather than a fully decomposed parameter list. Outbound
//! builders return bare lines with no trailing `\r\n`: framing is owned by the line socket, not
//! by the crate that builds message bodies.

use std::fmt;

/// The sender of a line, as it appeared in the optional `:prefix` before the command. A
/// `nick!user@host` prefix yields all three components; a bare server name (no `!`) yields an
/// empty `nick` and no user/host, matching `pyaib/irc.py`'s `Sender` class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    raw: String,
    nick: String,
    user: Option<String>,
    hostname: Option<String>,
}

impl Sender {
    pub fn parse(raw: &str) -> Sender {
        match raw.find('!') {
            Some(bang) => {
                let nick = raw[..bang].to_owned();
                let rest = &raw[bang + 1..];
                let (user, hostname) = match rest.find('@') {
                    Some(at) => (
                        rest[..at].trim_start_matches('~').to_owned(),
                        rest[at + 1..].to_owned(),
                    ),
                    None => (rest.trim_start_matches('~').to_owned(), String::new()),
                };
                Sender {
                    raw: raw.to_owned(),
                    nick,
                    user: Some(user),
                    hostname: Some(hostname),
                }
            }
            None => Sender {
                raw: raw.to_owned(),
                nick: String::new(),
                user: None,
                hostname: None,
            },
        }
    }

    /// The server identity used when a line arrives without an explicit `:prefix`.
    pub fn server(name: &str) -> Sender {
        Sender {
            raw: name.to_owned(),
            nick: String::new(),
            user: None,
            hostname: None,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Empty for server prefixes.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn usermask(&self) -> Option<String> {
        match (&self.user, &self.hostname) {
            (Some(user), Some(host)) => Some(format!("{}@{}", user, host)),
            _ => None,
        }
    }

    pub fn is_server(&self) -> bool {
        self.nick.is_empty()
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A raw line split into its three grammatical parts: `[:prefix] command args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub prefix: Option<String>,
    pub command: String,
    /// Everything after the command word, verbatim (including any leading `:` that marks a
    /// trailing multi-word parameter). Callers decide how much further decomposition a
    /// particular command needs.
    pub args: String,
}

#[derive(Debug)]
pub struct ParseError {
    pub reason: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse IRC line: {}", self.reason)
    }
}

impl std::error::Error for ParseError {}

/// Split a single line (no trailing `\r\n`, already decoded to UTF-8) into its prefix, command
/// and argument remainder.
pub fn parse_line(line: &str) -> Result<ParsedLine, ParseError> {
    let mut rest = line;

    let prefix = if let Some(r) = rest.strip_prefix(':') {
        match r.find(' ') {
            Some(idx) => {
                let prefix = &r[..idx];
                rest = &r[idx + 1..];
                Some(prefix.to_owned())
            }
            None => {
                return Err(ParseError {
                    reason: "line has a prefix but no command".to_owned(),
                });
            }
        }
    } else {
        None
    };

    rest = rest.trim_start();
    if rest.is_empty() {
        return Err(ParseError {
            reason: "empty command".to_owned(),
        });
    }

    let (command, args) = match rest.find(' ') {
        Some(idx) => (&rest[..idx], rest[idx + 1..].trim_start()),
        None => (rest, ""),
    };

    if command.is_empty() {
        return Err(ParseError {
            reason: "empty command".to_owned(),
        });
    }

    Ok(ParsedLine {
        prefix,
        command: command.to_owned(),
        args: args.to_owned(),
    })
}

//
// Outbound line builders. None of these append `\r\n`.
//

pub fn pass(password: &str) -> String {
    format!("PASS {}", password)
}

pub fn nick(new_nick: &str) -> String {
    format!("NICK {}", new_nick)
}

pub fn user(username: &str, realname: &str) -> String {
    format!("USER {} 0 * :{}", username, realname)
}

pub fn ping(arg: &str) -> String {
    format!("PING {}", arg)
}

pub fn pong(arg: &str) -> String {
    format!("PONG {}", arg)
}

pub fn join(chans: &[String]) -> String {
    format!("JOIN {}", chans.join(","))
}

pub fn part(chans: &[String], message: Option<&str>) -> String {
    match message {
        Some(msg) => format!("PART {} :{}", chans.join(","), msg),
        None => format!("PART {}", chans.join(",")),
    }
}

pub fn privmsg(target: &str, msg: &str) -> String {
    format!("PRIVMSG {} :{}", target, msg)
}

pub fn notice(target: &str, msg: &str) -> String {
    format!("NOTICE {} :{}", target, msg)
}

pub fn quit(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("QUIT :{}", reason),
        None => "QUIT".to_owned(),
    }
}
