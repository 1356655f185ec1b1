use crate::config::LoggingConfig;
use crate::peer::types::IceCandidate;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

/// Install the global fmt subscriber. `RUST_LOG` wins over the configured
/// filter. Returns false when logging is disabled or a subscriber was
/// already installed.
pub fn init(config: &LoggingConfig) -> bool {
    if !config.enabled {
        return false;
    }
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Trickle-ICE trace of one candidate
pub fn dump_candidate(direction: &str, connection_id: &str, candidate: &IceCandidate) {
    debug!(
        direction,
        connection_id,
        candidate = %candidate.candidate,
        sdp_mid = ?candidate.sdp_mid,
        sdp_mline_index = ?candidate.sdp_mline_index,
        "trickle candidate"
    );
}

/// Log the nominated candidate pair from a stats snapshot
pub async fn dump_selected_pair(pc: &RTCPeerConnection, connection_id: &str, moment: &str) {
    let stats = pc.get_stats().await;
    for report in stats.reports.into_values() {
        if let StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                info!(
                    connection_id,
                    moment,
                    local = %pair.local_candidate_id,
                    remote = %pair.remote_candidate_id,
                    bytes_sent = pair.bytes_sent,
                    bytes_received = pair.bytes_received,
                    state = ?pair.state,
                    "selected candidate pair"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logging_installs_nothing() {
        let config = LoggingConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!init(&config));
    }
}
