//! Setting value validation.

use regex::Regex;
use std::sync::LazyLock;

use twitch_client::irc::normalize_channel_login;

static RE_WS_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^wss?://[^\s/]+").unwrap());
static RE_IRC_NICK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,25}$").unwrap());

/// Validate a setting value. Returns `Ok(())` if valid, or an error message.
pub fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    match key {
        "TWITCH_CHANNELS" => {
            let channels = parse_channels(value)?;
            if channels.is_empty() {
                return Err("must list at least one channel".into());
            }
        }
        "TWITCH_IRC_NICK" => {
            if !value.is_empty() && !RE_IRC_NICK.is_match(value) {
                return Err("must be a Twitch login (letters, digits, underscore)".into());
            }
        }
        "TWITCH_IRC_URL" => {
            if !RE_WS_URL.is_match(value) {
                return Err("must be a ws:// or wss:// URL".into());
            }
        }
        "SERVER_PORT" => validate_int_range(value, 1, 65535)?,
        "CHANNEL_BUFFER_CAPACITY" | "SUBSCRIBER_QUEUE_CAPACITY" => {
            validate_int_range(value, 1, 10_000)?
        }
        "RECONNECT_BASE_MS" => validate_int_range(value, 10, 60_000)?,
        "RECONNECT_MAX_MS" => validate_int_range(value, 10, 3_600_000)?,
        "RECONNECT_MAX_ATTEMPTS" => validate_int_range(value, 0, 1_000_000)?,
        "RECONNECT_JITTER" => {
            let v: f64 = value.parse().map_err(|_| "must be a float")?;
            if !(0.0..=1.0).contains(&v) {
                return Err("must be between 0.0 and 1.0".into());
            }
        }
        "SUBSCRIBER_HEARTBEAT_SECS" => validate_int_range(value, 1, 3600)?,
        "SUBSCRIBER_IDLE_TIMEOUT_SECS" => validate_int_range(value, 1, 7200)?,
        "UPSTREAM_PING_INTERVAL_SECS" => validate_int_range(value, 1, 3600)?,
        "UPSTREAM_PONG_TIMEOUT_SECS" => validate_int_range(value, 1, 600)?,
        "BUFFER_GRACE_SECS" => validate_int_range(value, 0, 86_400)?,
        _ => {}
    }
    Ok(())
}

/// Split a comma-separated channel list into normalized, de-duplicated logins.
pub fn parse_channels(value: &str) -> Result<Vec<String>, String> {
    let mut channels: Vec<String> = Vec::new();
    for raw in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let channel =
            normalize_channel_login(raw).ok_or_else(|| format!("invalid channel name '{raw}'"))?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    Ok(channels)
}

fn validate_int_range(value: &str, min: i64, max: i64) -> Result<(), String> {
    let v: i64 = value.parse().map_err(|_| "must be an integer")?;
    if v < min || v > max {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_channels() {
        assert!(validate_setting("TWITCH_CHANNELS", "ronni, #Shroud").is_ok());
        assert!(validate_setting("TWITCH_CHANNELS", " , ").is_err());
        assert!(validate_setting("TWITCH_CHANNELS", "ronni,bad name").is_err());
    }

    #[test]
    fn test_parse_channels_normalizes_and_dedupes() {
        assert_eq!(
            parse_channels("#Ronni,shroud,,RONNI").unwrap(),
            vec!["ronni".to_string(), "shroud".to_string()]
        );
    }

    #[test]
    fn test_valid_url() {
        assert!(validate_setting("TWITCH_IRC_URL", "wss://irc-ws.chat.twitch.tv:443").is_ok());
        assert!(validate_setting("TWITCH_IRC_URL", "ws://127.0.0.1:9000").is_ok());
        assert!(validate_setting("TWITCH_IRC_URL", "https://twitch.tv").is_err());
    }

    #[test]
    fn test_valid_nick() {
        assert!(validate_setting("TWITCH_IRC_NICK", "relay_bot").is_ok());
        assert!(validate_setting("TWITCH_IRC_NICK", "").is_ok());
        assert!(validate_setting("TWITCH_IRC_NICK", "bad nick").is_err());
    }

    #[test]
    fn test_int_ranges() {
        assert!(validate_setting("CHANNEL_BUFFER_CAPACITY", "200").is_ok());
        assert!(validate_setting("CHANNEL_BUFFER_CAPACITY", "0").is_err());
        assert!(validate_setting("SERVER_PORT", "70000").is_err());
        assert!(validate_setting("SERVER_PORT", "abc").is_err());
        assert!(validate_setting("RECONNECT_MAX_ATTEMPTS", "0").is_ok());
    }

    #[test]
    fn test_jitter() {
        assert!(validate_setting("RECONNECT_JITTER", "0.5").is_ok());
        assert!(validate_setting("RECONNECT_JITTER", "1.5").is_err());
        assert!(validate_setting("RECONNECT_JITTER", "x").is_err());
    }
}
