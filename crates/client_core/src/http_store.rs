use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{MatchDocument, MatchId, PlayerId, PlayerStats, StatKind},
    error::ApiError,
    protocol::{
        CreateMatchRequest, IncrementStatRequest, MatchUpdate, Precondition, ServerEvent,
        UpdateMatchRequest, UpdateMatchResponse,
    },
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::StoreError,
    store::{MatchStore, MatchSubscription, StatsStore, UpdateResult, SUBSCRIPTION_BUFFER},
};

/// Match and stats store backed by the HTTP server, with websocket pushes.
#[derive(Clone)]
pub struct HttpStore {
    http: Client,
    server_url: String,
}

impl HttpStore {
    pub fn new(server_url: &str) -> Result<Self, StoreError> {
        let parsed = Url::parse(server_url)
            .map_err(|err| StoreError::Rejected(format!("invalid server url {server_url}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StoreError::Rejected(
                "server_url must start with http:// or https://".to_string(),
            ));
        }
        Ok(Self {
            http: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// `/stats/<player_id>[/<action>]`, with the player id encoded as a
    /// single path segment.
    pub(crate) fn stats_url(
        &self,
        player_id: &PlayerId,
        action: Option<&str>,
    ) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.server_url)
            .map_err(|err| StoreError::Rejected(format!("invalid server url: {err}")))?;
        url.path_segments_mut()
            .map_err(|()| StoreError::Rejected("server url cannot take a path".to_string()))?
            .pop_if_empty()
            .push("stats")
            .push(player_id.as_str())
            .extend(action);
        Ok(url)
    }

    pub(crate) fn ws_url(&self, match_id: MatchId) -> String {
        let ws_base = if self.server_url.starts_with("https://") {
            self.server_url.replacen("https://", "wss://", 1)
        } else {
            self.server_url.replacen("http://", "ws://", 1)
        };
        format!("{ws_base}/ws?match_id={}", match_id.0)
    }
}

#[async_trait]
impl MatchStore for HttpStore {
    async fn create_match(&self, player_x: &PlayerId) -> Result<MatchDocument, StoreError> {
        let response = self
            .http
            .post(format!("{}/matches", self.server_url))
            .json(&CreateMatchRequest {
                player_x: player_x.clone(),
            })
            .send()
            .await
            .map_err(unavailable)?;
        read_json(response, None).await
    }

    async fn get_match(&self, match_id: MatchId) -> Result<MatchDocument, StoreError> {
        let response = self
            .http
            .get(format!("{}/matches/{}", self.server_url, match_id.0))
            .send()
            .await
            .map_err(unavailable)?;
        read_json(response, Some(match_id)).await
    }

    async fn update_match(
        &self,
        match_id: MatchId,
        update: MatchUpdate,
        precondition: Precondition,
    ) -> Result<UpdateResult, StoreError> {
        let response = self
            .http
            .post(format!("{}/matches/{}/update", self.server_url, match_id.0))
            .json(&UpdateMatchRequest {
                update,
                precondition,
            })
            .send()
            .await
            .map_err(unavailable)?;
        let body: UpdateMatchResponse = read_json(response, Some(match_id)).await?;
        Ok(if body.applied {
            UpdateResult::Applied(body.document)
        } else {
            UpdateResult::Conflict(body.document)
        })
    }

    async fn query_waiting_matches(&self, limit: u32) -> Result<Vec<MatchDocument>, StoreError> {
        let response = self
            .http
            .get(format!("{}/matches/waiting", self.server_url))
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(unavailable)?;
        read_json(response, None).await
    }

    async fn subscribe(&self, match_id: MatchId) -> Result<MatchSubscription, StoreError> {
        let ws_url = self.ws_url(match_id);
        let (mut ws_stream, _) = connect_async(ws_url.as_str()).await.map_err(|err| {
            StoreError::Unavailable(format!("failed to connect websocket {ws_url}: {err}"))
        })?;
        debug!(match_id = match_id.0, "match websocket connected");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(async move {
            while let Some(msg) = ws_stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(ServerEvent::MatchUpdated { document }) => {
                            if tx.send(document).await.is_err() {
                                break;
                            }
                        }
                        Ok(ServerEvent::Error(err)) => {
                            warn!(match_id = match_id.0, code = ?err.code, "store push error: {}", err.message);
                        }
                        Err(err) => {
                            warn!(match_id = match_id.0, "invalid server event: {err}");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(match_id = match_id.0, "match websocket failed: {err}");
                        break;
                    }
                }
            }
        });

        Ok(MatchSubscription::new(match_id, rx, task))
    }
}

#[async_trait]
impl StatsStore for HttpStore {
    async fn get_stats(&self, player_id: &PlayerId) -> Result<Option<PlayerStats>, StoreError> {
        let response = self
            .http
            .get(self.stats_url(player_id, None)?)
            .send()
            .await
            .map_err(unavailable)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(response, None).await.map(Some)
    }

    async fn increment_stat(
        &self,
        player_id: &PlayerId,
        stat: StatKind,
    ) -> Result<PlayerStats, StoreError> {
        let response = self
            .http
            .post(self.stats_url(player_id, Some("increment"))?)
            .json(&IncrementStatRequest { stat })
            .send()
            .await
            .map_err(unavailable)?;
        read_json(response, None).await
    }

    async fn create_stats(
        &self,
        player_id: &PlayerId,
        initial: PlayerStats,
    ) -> Result<bool, StoreError> {
        let response = self
            .http
            .post(self.stats_url(player_id, None)?)
            .json(&initial)
            .send()
            .await
            .map_err(unavailable)?;
        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(error_from_response(response, None).await),
        }
    }
}

async fn read_json<T: DeserializeOwned>(
    response: Response,
    match_id: Option<MatchId>,
) -> Result<T, StoreError> {
    if !response.status().is_success() {
        return Err(error_from_response(response, match_id).await);
    }
    response.json::<T>().await.map_err(unavailable)
}

async fn error_from_response(response: Response, match_id: Option<MatchId>) -> StoreError {
    let status = response.status();
    let message = response
        .json::<ApiError>()
        .await
        .map(|err| err.message)
        .unwrap_or_else(|_| status.to_string());
    match (status, match_id) {
        (StatusCode::NOT_FOUND, Some(match_id)) => StoreError::MatchNotFound(match_id),
        (status, _) if status.is_server_error() => StoreError::Unavailable(message),
        _ => StoreError::Rejected(message),
    }
}

fn unavailable(err: reqwest::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[cfg(test)]
#[path = "tests/http_store_tests.rs"]
mod tests;
