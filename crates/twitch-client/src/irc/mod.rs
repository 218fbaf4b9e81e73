//! IRC line codec for Twitch chat.
//!
//! Parses raw IRCv3 lines (`@tags :prefix COMMAND params :trailing`) and
//! classifies them into the handful of frames the connector cares about.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::TwitchError;


static RE_CHANNEL_LOGIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]{1,25}$").unwrap());

const ACTION_PREFIX: &str = "\u{1}ACTION ";
const ACTION_SUFFIX: char = '\u{1}';

/// A single parsed IRC line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse one IRC line. Trailing `\r\n` is ignored.
    pub fn parse(line: &str) -> Result<Self, TwitchError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(malformed("empty line"));
        }

        let mut rest = line;
        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, tail) = stripped
                .split_once(' ')
                .ok_or_else(|| malformed("tags without command"))?;
            tags = parse_tags(raw_tags)?;
            rest = tail.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (raw_prefix, tail) = stripped
                .split_once(' ')
                .ok_or_else(|| malformed("prefix without command"))?;
            if raw_prefix.is_empty() {
                return Err(malformed("empty prefix"));
            }
            prefix = Some(raw_prefix.to_string());
            rest = tail.trim_start_matches(' ');
        }

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() || !command.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed(&format!("invalid command {command:?}")));
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param.to_string());
                    rest = tail;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Self {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Tag value, treating empty values as absent.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Nickname from a `nick!user@host` prefix. Server prefixes yield `None`.
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .and_then(|prefix| prefix.split_once('!'))
            .map(|(nick, _)| nick)
            .filter(|nick| !nick.is_empty())
    }
}

/// A user chat message (`PRIVMSG`) before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub channel: String,
    pub login: Option<String>,
    pub tags: HashMap<String, String>,
    pub text: String,
}

impl ChatLine {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Classified upstream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    ChatLine(ChatLine),
    Ping(String),
    Pong,
    Welcome,
    JoinAck {
        channel: String,
        nick: Option<String>,
    },
    Notice {
        channel: Option<String>,
        msg_id: Option<String>,
        text: String,
    },
    Reconnect,
    Unrecognized(String),
}

impl Frame {
    pub fn parse(line: &str) -> Result<Self, TwitchError> {
        Self::from_message(IrcMessage::parse(line)?)
    }

    pub fn from_message(msg: IrcMessage) -> Result<Self, TwitchError> {
        let frame = match msg.command.as_str() {
            "PRIVMSG" => {
                let channel = msg
                    .param(0)
                    .and_then(normalize_channel_login)
                    .ok_or_else(|| malformed("PRIVMSG without channel"))?;
                let text = msg
                    .param(1)
                    .ok_or_else(|| malformed("PRIVMSG without text"))?;
                let text = unwrap_action(text).to_string();
                let login = msg.nick().map(str::to_lowercase);
                Frame::ChatLine(ChatLine {
                    channel,
                    login,
                    tags: msg.tags,
                    text,
                })
            }
            "PING" => Frame::Ping(msg.params.last().cloned().unwrap_or_default()),
            "PONG" => Frame::Pong,
            "001" => Frame::Welcome,
            "JOIN" => Frame::JoinAck {
                channel: msg
                    .param(0)
                    .and_then(normalize_channel_login)
                    .ok_or_else(|| malformed("JOIN without channel"))?,
                nick: msg.nick().map(str::to_lowercase),
            },
            // RPL_ENDOFNAMES: "<nick> #<channel> :End of /NAMES list"
            "366" => Frame::JoinAck {
                channel: msg
                    .param(1)
                    .and_then(normalize_channel_login)
                    .ok_or_else(|| malformed("366 without channel"))?,
                nick: msg.param(0).map(str::to_lowercase),
            },
            "NOTICE" => Frame::Notice {
                channel: msg.param(0).and_then(normalize_channel_login),
                msg_id: msg.tag("msg-id").map(ToOwned::to_owned),
                text: msg.params.last().cloned().unwrap_or_default(),
            },
            "RECONNECT" => Frame::Reconnect,
            _ => Frame::Unrecognized(msg.command),
        };
        Ok(frame)
    }
}

/// Whether a NOTICE text means the credentials were rejected.
pub fn is_auth_failure(text: &str) -> bool {
    text.contains("Login authentication failed")
        || text.contains("Login unsuccessful")
        || text.contains("Improperly formatted auth")
}

/// Normalize `#Channel` / ` channel ` into a Twitch login, or `None` if invalid.
pub fn normalize_channel_login(raw: &str) -> Option<String> {
    let login = raw.trim().trim_start_matches('#').to_lowercase();
    RE_CHANNEL_LOGIN.is_match(&login).then_some(login)
}

fn unwrap_action(text: &str) -> &str {
    text.strip_prefix(ACTION_PREFIX)
        .map(|inner| inner.strip_suffix(ACTION_SUFFIX).unwrap_or(inner))
        .unwrap_or(text)
}

fn parse_tags(raw: &str) -> Result<HashMap<String, String>, TwitchError> {
    let mut tags = HashMap::new();
    for item in raw.split(';') {
        if item.is_empty() {
            continue;
        }
        let (key, value) = item.split_once('=').unwrap_or((item, ""));
        if key.is_empty() {
            return Err(malformed("tag with empty key"));
        }
        tags.insert(key.to_string(), unescape_tag_value(value));
    }
    Ok(tags)
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn malformed(reason: &str) -> TwitchError {
    TwitchError::MalformedMessage(reason.to_string())
}
