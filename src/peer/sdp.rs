use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

// only H.264 fmtp lines carry level-asymmetry-allowed
const START_ATTR: &str = "x-google-start-bitrate";
const MAX_ATTR: &str = "x-google-max-bitrate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitratePolicy {
    pub enabled: bool,
    /// kbit/s the encoder starts at
    pub start_kbps: u32,
    /// kbit/s ceiling
    pub max_kbps: u32,
}

impl Default for BitratePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            start_kbps: 16_000,
            max_kbps: 160_000,
        }
    }
}

impl BitratePolicy {
    /// Append start/max bitrate attributes to every matching fmtp line.
    ///
    /// Lines that already carry the start attribute are left alone, so a
    /// second application is a no-op. Input without a matching line passes
    /// through unchanged.
    pub fn apply(&self, sdp: &str) -> String {
        if !self.enabled {
            return sdp.to_string();
        }
        fmtp_line()
            .replace_all(sdp, |caps: &regex::Captures<'_>| {
                let line = &caps[1];
                if line.contains(START_ATTR) {
                    line.to_string()
                } else {
                    format!(
                        "{line};{START_ATTR}={};{MAX_ATTR}={}",
                        self.start_kbps, self.max_kbps
                    )
                }
            })
            .into_owned()
    }
}

fn fmtp_line() -> &'static Regex {
    static FMTP: OnceLock<Regex> = OnceLock::new();
    FMTP.get_or_init(|| {
        Regex::new(r"(?m)^(a=fmtp:\d+ [^\r\n]*level-asymmetry-allowed=[^\r\n]*)")
            .expect("fmtp pattern is valid")
    })
}

/// Count `m=video` sections, logged after an answer is generated
pub fn count_video_sections(sdp: &str) -> usize {
    sdp.lines().filter(|line| line.starts_with("m=video")).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102 96\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f\r\n\
a=rtpmap:96 VP8/90000\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n";

    #[test]
    fn injects_bitrate_on_h264_fmtp() {
        let out = BitratePolicy::default().apply(OFFER);
        assert!(out.contains(
            "a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f;x-google-start-bitrate=16000;x-google-max-bitrate=160000\r\n"
        ));
        assert_eq!(out.matches("x-google-start-bitrate").count(), 1);
        // opus fmtp untouched
        assert!(out.contains("a=fmtp:111 minptime=10;useinbandfec=1\r\n"));
    }

    #[test]
    fn second_application_is_noop() {
        let policy = BitratePolicy::default();
        let once = policy.apply(OFFER);
        let twice = policy.apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sdp_without_pattern_passes_through() {
        let sdp = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=fmtp:111 minptime=10\r\n";
        assert_eq!(BitratePolicy::default().apply(sdp), sdp);
        assert_eq!(BitratePolicy::default().apply("not an sdp"), "not an sdp");
    }

    #[test]
    fn every_matching_line_is_rewritten() {
        let sdp = "a=fmtp:102 level-asymmetry-allowed=1;profile-level-id=42001f\r\n\
a=fmtp:104 level-asymmetry-allowed=1;profile-level-id=42e01f\r\n";
        let out = BitratePolicy::default().apply(sdp);
        assert_eq!(out.matches("x-google-max-bitrate=160000\r\n").count(), 2);
    }

    #[test]
    fn configured_values_are_used() {
        let policy = BitratePolicy {
            enabled: true,
            start_kbps: 500,
            max_kbps: 2_000,
        };
        let out = policy.apply(OFFER);
        assert!(out.contains(";x-google-start-bitrate=500;x-google-max-bitrate=2000\r\n"));
    }

    #[test]
    fn disabled_policy_is_identity() {
        let policy = BitratePolicy {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(policy.apply(OFFER), OFFER);
    }

    #[test]
    fn counts_video_sections() {
        assert_eq!(count_video_sections(OFFER), 1);
        assert_eq!(count_video_sections(""), 0);
    }
}
