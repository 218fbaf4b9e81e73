//! Conversion of raw chat lines into the canonical relay message.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::TwitchError;
use crate::irc::ChatLine;

static RE_HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").unwrap());

/// Canonical chat message relayed to subscribers.
///
/// `id` is assigned locally and increases in arrival order within a channel.
/// `timestamp` is the capture time on this side of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub channel: String,
    pub username: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub badges: Vec<String>,
    pub color: Option<String>,
}

/// Per-channel normalizer owning the message id counter.
#[derive(Debug)]
pub struct Normalizer {
    channel: String,
    next_id: u64,
}

impl Normalizer {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            next_id: 1,
        }
    }

    /// Id the next accepted message will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Build a [`ChatMessage`] from a chat line captured at `received_at`.
    ///
    /// Lines without any usable username are rejected and do not consume an id.
    pub fn normalize(
        &mut self,
        line: &ChatLine,
        received_at: DateTime<Utc>,
    ) -> Result<ChatMessage, TwitchError> {
        let username = line
            .tag("display-name")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or(line.login.as_deref())
            .ok_or_else(|| {
                TwitchError::MalformedMessage(format!(
                    "chat line in #{} has no username",
                    self.channel
                ))
            })?
            .to_string();

        let id = self.next_id;
        self.next_id += 1;

        Ok(ChatMessage {
            id,
            channel: self.channel.clone(),
            username,
            body: line.text.clone(),
            timestamp: received_at,
            badges: parse_badges(line.tag("badges")),
            color: parse_color(line.tag("color")),
        })
    }
}

fn parse_badges(raw: Option<&str>) -> Vec<String> {
    raw.map(|badges| {
        badges
            .split(',')
            .map(str::trim)
            .filter(|badge| !badge.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_color(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|color| RE_HEX_COLOR.is_match(color))
        .map(str::to_ascii_uppercase)
}
