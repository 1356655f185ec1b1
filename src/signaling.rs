use crate::config::SignalingConfig;
use crate::error::SignalingError;
use crate::peer::types::{CandidateBatch, IceCandidate, Offer};
use crate::utils::parse_http_date;
use async_trait::async_trait;
use reqwest::header::DATE;
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Offers returned by one poll plus the relay's clock at response time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfferPoll {
    pub offers: Vec<Offer>,
    pub server_time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidatePoll {
    pub batches: Vec<CandidateBatch>,
    pub server_time: Option<i64>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Open a session on the relay, returning its id
    async fn create_session(&self) -> Result<String, SignalingError>;

    async fn poll_offers(&self, session_id: &str, since: i64) -> Result<OfferPoll, SignalingError>;

    async fn poll_candidates(
        &self,
        session_id: &str,
        since: i64,
    ) -> Result<CandidatePoll, SignalingError>;

    async fn post_answer(
        &self,
        session_id: &str,
        connection_id: &str,
        sdp: &str,
    ) -> Result<(), SignalingError>;

    async fn post_candidate(
        &self,
        session_id: &str,
        connection_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError>;
}

/// Per-message-type "last seen" timestamps, in relay clock milliseconds
/// taken from the `Date` header. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingCursor {
    offers: i64,
    candidates: i64,
}

impl PollingCursor {
    /// Start both windows `lookback_ms` before `now_ms`, so messages posted
    /// just before we came up are still picked up.
    pub fn starting_at(now_ms: i64, lookback_ms: i64) -> Self {
        let start = now_ms.saturating_sub(lookback_ms);
        Self {
            offers: start,
            candidates: start,
        }
    }

    pub fn offers(&self) -> i64 {
        self.offers
    }

    pub fn candidates(&self) -> i64 {
        self.candidates
    }

    pub fn advance_offers(&mut self, server_time: Option<i64>) -> i64 {
        self.offers = advance(self.offers, server_time, "offer");
        self.offers
    }

    pub fn advance_candidates(&mut self, server_time: Option<i64>) -> i64 {
        self.candidates = advance(self.candidates, server_time, "candidate");
        self.candidates
    }
}

fn advance(current: i64, server_time: Option<i64>, kind: &str) -> i64 {
    match server_time {
        Some(time) if time < current => {
            debug!(kind, current, server_time = time, "server clock behind cursor, keeping cursor");
            current
        }
        Some(time) => time,
        None => {
            warn!(kind, current, "poll response without usable Date header, cursor unchanged");
            current
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct OffersResponse {
    #[serde(default)]
    offers: Vec<Offer>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatesResponse {
    #[serde(default)]
    candidates: Vec<CandidateBatch>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnswerRequest<'a> {
    session_id: &'a str,
    connection_id: &'a str,
    sdp: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CandidateRequest<'a> {
    session_id: &'a str,
    connection_id: &'a str,
    candidate: &'a str,
    sdp_mid: Option<&'a str>,
    #[serde(rename = "sdpMLineIndex")]
    sdp_mline_index: Option<u16>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PollQuery<'a> {
    session_id: &'a str,
    from_time: i64,
}

/// [`Signaling`] over HTTP(S) with reqwest
pub struct HttpSignaling {
    client: reqwest::Client,
    base: Url,
}

impl HttpSignaling {
    pub fn new(config: &SignalingConfig) -> Result<Self, SignalingError> {
        let mut base = Url::parse(&config.url)
            .map_err(|err| SignalingError::InvalidUrl(format!("{}: {err}", config.url)))?;
        if base.cannot_be_a_base() {
            return Err(SignalingError::InvalidUrl(config.url.clone()));
        }
        // endpoints are resolved relative to the base path
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, SignalingError> {
        self.base
            .join(path)
            .map_err(|err| SignalingError::InvalidUrl(format!("{path}: {err}")))
    }

    async fn get_window<T>(
        &self,
        path: &str,
        session_id: &str,
        since: i64,
    ) -> Result<(T, Option<i64>), SignalingError>
    where
        T: DeserializeOwned + Default,
    {
        let endpoint = self.endpoint(path)?;
        let response = self
            .client
            .get(endpoint)
            .query(&PollQuery {
                session_id,
                from_time: since,
            })
            .send()
            .await?;
        let response = check_status(response)?;
        let server_time = response
            .headers()
            .get(DATE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);
        let body = response.text().await?;
        Ok((parse_optional_body(&body)?, server_time))
    }
}

fn check_status(response: Response) -> Result<Response, SignalingError> {
    if !response.status().is_success() {
        return Err(SignalingError::HttpStatus(response.status()));
    }
    Ok(response)
}

/// Empty bodies and JSON `null` mean "nothing new".
fn parse_optional_body<T>(body: &str) -> Result<T, SignalingError>
where
    T: DeserializeOwned + Default,
{
    let body = body.trim();
    if body.is_empty() {
        return Ok(T::default());
    }
    let parsed: Option<T> =
        serde_json::from_str(body).map_err(|err| SignalingError::Protocol(err.to_string()))?;
    Ok(parsed.unwrap_or_default())
}

#[async_trait]
impl Signaling for HttpSignaling {
    async fn create_session(&self) -> Result<String, SignalingError> {
        let response = self.client.post(self.base.clone()).send().await?;
        let response = check_status(response)?;
        let body = response.text().await?;
        let payload: CreateSessionResponse =
            serde_json::from_str(&body).map_err(|err| SignalingError::Protocol(err.to_string()))?;
        if payload.session_id.is_empty() {
            return Err(SignalingError::Protocol("empty session id".into()));
        }
        Ok(payload.session_id)
    }

    async fn poll_offers(&self, session_id: &str, since: i64) -> Result<OfferPoll, SignalingError> {
        let (payload, server_time): (OffersResponse, _) =
            self.get_window("offer", session_id, since).await?;
        Ok(OfferPoll {
            offers: payload.offers,
            server_time,
        })
    }

    async fn poll_candidates(
        &self,
        session_id: &str,
        since: i64,
    ) -> Result<CandidatePoll, SignalingError> {
        let (payload, server_time): (CandidatesResponse, _) =
            self.get_window("candidate", session_id, since).await?;
        Ok(CandidatePoll {
            batches: payload.candidates,
            server_time,
        })
    }

    async fn post_answer(
        &self,
        session_id: &str,
        connection_id: &str,
        sdp: &str,
    ) -> Result<(), SignalingError> {
        let endpoint = self.endpoint("answer")?;
        let response = self
            .client
            .post(endpoint)
            .json(&AnswerRequest {
                session_id,
                connection_id,
                sdp,
            })
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }

    async fn post_candidate(
        &self,
        session_id: &str,
        connection_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        let endpoint = self.endpoint("candidate")?;
        let response = self
            .client
            .post(endpoint)
            .json(&CandidateRequest {
                session_id,
                connection_id,
                candidate: &candidate.candidate,
                sdp_mid: candidate.sdp_mid.as_deref(),
                sdp_mline_index: candidate.sdp_mline_index,
            })
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }
}
