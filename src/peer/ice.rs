use crate::peer::types::IceCandidate;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

/// Serialize a locally gathered candidate into its signaling form
pub fn local_candidate(candidate: &RTCIceCandidate) -> Option<IceCandidate> {
    match candidate.to_json() {
        Ok(init) => Some(init.into()),
        Err(err) => {
            warn!(error = %err, "failed to serialize local ice candidate");
            None
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

/// Count candidate types in a trickled batch and log the breakdown.
pub fn analyze_candidates(connection_id: &str, candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        connection_id,
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "remote candidate analysis"
    );
    if summary.relay == 0 && !candidates.is_empty() {
        debug!(connection_id, "no relay candidates, connection through NAT may fail");
    }
    summary
}
