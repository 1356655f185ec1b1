use crate::peer::types::{IceServerConfig, IceServerKind};
use chrono::{DateTime, Utc};

/// Prepend the `stun:`/`turn:` scheme to an ICE server URL if it has none
pub fn add_ice_url_scheme(config: &IceServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        let scheme = match config.kind {
            IceServerKind::Turn => "turn:",
            IceServerKind::Stun => "stun:",
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Milliseconds since the Unix epoch, the unit the relay uses for `fromTime`
pub fn unix_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Parse an HTTP `Date` header (IMF-fixdate) into epoch milliseconds
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_added_by_kind() {
        let mut server = IceServerConfig::stun("stun.example.com:3478");
        assert_eq!(add_ice_url_scheme(&server), "stun:stun.example.com:3478");

        server.kind = IceServerKind::Turn;
        assert_eq!(add_ice_url_scheme(&server), "turn:stun.example.com:3478");

        server.url = "stun:already.example.com".into();
        assert_eq!(add_ice_url_scheme(&server), "stun:already.example.com");
    }

    #[test]
    fn http_date_to_millis() {
        let ms = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(ms, 784_111_777_000);
    }

    #[test]
    fn garbage_date_is_rejected() {
        assert_eq!(parse_http_date("yesterday"), None);
        assert_eq!(parse_http_date(""), None);
    }
}
