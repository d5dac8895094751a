use std::time::Duration;

use data_model::{ArtifactId, ChunkRequest, ChunkResponse, ChunkStatus};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    session::{Step, TransferError, TransferEvent, TransferSession},
    source::{ChunkSource, TransportError},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Wait between polls while the artifact is not ready, or after a store
    /// fault.
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub poll_interval: Duration,
    /// Consecutive store faults tolerated before giving up.
    #[serde(default = "default_store_retry_budget")]
    pub store_retry_budget: u32,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_store_retry_budget() -> u32 {
    5
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            store_retry_budget: default_store_retry_budget(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Polls a [`ChunkSource`] until an artifact has been fully delivered.
pub struct TransferClient<S> {
    source: S,
    config: ClientConfig,
}

impl<S: ChunkSource> TransferClient<S> {
    pub fn new(source: S, config: ClientConfig) -> Self {
        Self { source, config }
    }

    /// Downloads and reassembles the artifact owned by `request_id`.
    pub async fn download(
        &self,
        artifact_id: &ArtifactId,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransferError> {
        let mut session = TransferSession::new(
            artifact_id.clone(),
            request_id,
            self.config.store_retry_budget,
        );
        self.run(&mut session, cancel).await
    }

    /// Drives `session` to a terminal state. Cancelling leaves the session
    /// where it was, so it can be resumed.
    pub async fn run(
        &self,
        session: &mut TransferSession,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransferError> {
        loop {
            let request = session.next_request();
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                response = self.source.fetch_chunk(&request) => to_event(&request, response),
            };

            match session.handle(event) {
                Step::Fetch => continue,
                Step::Wait => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Step::Complete => {
                    let artifact = session.assemble().ok_or_else(|| {
                        TransferError::Protocol("session completed without data".to_string())
                    })?;
                    info!(
                        artifact_id = %request.artifact_id,
                        chunks = session.chunks_received(),
                        size = artifact.len(),
                        "artifact transfer complete"
                    );
                    return Ok(artifact);
                }
                Step::Failed(err) => {
                    warn!(
                        artifact_id = %request.artifact_id,
                        chunk_index = request.chunk_index,
                        "artifact transfer failed: {}",
                        err
                    );
                    return Err(err);
                }
            }
        }
    }
}

fn to_event(
    request: &ChunkRequest,
    response: Result<ChunkResponse, TransportError>,
) -> TransferEvent {
    let response = match response {
        Ok(response) => response,
        Err(err) => {
            warn!(
                artifact_id = %request.artifact_id,
                chunk_index = request.chunk_index,
                "chunk request failed: {}",
                err
            );
            return TransferEvent::StoreFault;
        }
    };

    match response.status {
        ChunkStatus::InProgress => TransferEvent::Timeout,
        ChunkStatus::StoreUnavailable => TransferEvent::StoreFault,
        ChunkStatus::NotFound => TransferEvent::Error(TransferError::NotFound),
        ChunkStatus::Forbidden => TransferEvent::Error(TransferError::OwnershipMismatch),
        ChunkStatus::AlreadyDelivered => TransferEvent::Error(TransferError::AlreadyDelivered),
        ChunkStatus::InvalidRange => TransferEvent::Error(TransferError::InvalidRange),
        ChunkStatus::Ready => {
            let Some(is_last) = response.is_last else {
                return TransferEvent::Error(TransferError::Protocol(
                    "ready response without isLast".to_string(),
                ));
            };
            match response.decode_payload() {
                Ok(bytes) => TransferEvent::ChunkReceived {
                    chunk_index: request.chunk_index,
                    bytes,
                    is_last,
                },
                Err(err) => TransferEvent::Error(TransferError::Protocol(err.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;

    type Scripted = Result<ChunkResponse, TransportError>;

    /// Replays canned responses and records every request it sees. Once the
    /// script runs out it keeps answering `in_progress`.
    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<u64>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Scripted>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            }
        }

        fn requested_indices(&self) -> Vec<u64> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<ChunkResponse, TransportError> {
            self.requests.lock().unwrap().push(request.chunk_index);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ChunkResponse::in_progress()))
        }
    }

    fn client(responses: Vec<Scripted>) -> TransferClient<ScriptedSource> {
        TransferClient::new(ScriptedSource::new(responses), ClientConfig::default())
    }

    fn rejected(status: ChunkStatus) -> Scripted {
        Ok(ChunkResponse::rejected(status, "rejected"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_ready_then_reassembles() {
        let client = client(vec![
            Ok(ChunkResponse::in_progress()),
            Ok(ChunkResponse::in_progress()),
            Ok(ChunkResponse::ready(b"RIFF", false)),
            Ok(ChunkResponse::ready(b"WAVE", true)),
        ]);

        let started = Instant::now();
        let artifact = client
            .download(&ArtifactId::from("a"), "abc", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact, b"RIFFWAVE");
        assert_eq!(client.source.requested_indices(), vec![0, 0, 0, 1]);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_fail_without_retry() {
        let cases = [
            (ChunkStatus::Forbidden, TransferError::OwnershipMismatch, "ownership mismatch"),
            (ChunkStatus::AlreadyDelivered, TransferError::AlreadyDelivered, "already delivered"),
            (ChunkStatus::NotFound, TransferError::NotFound, "artifact not found"),
            (ChunkStatus::InvalidRange, TransferError::InvalidRange, "invalid chunk range"),
        ];
        for (status, expected, message) in cases {
            let client = client(vec![rejected(status), Ok(ChunkResponse::ready(b"x", true))]);
            let err = client
                .download(&ArtifactId::from("a"), "abc", &CancellationToken::new())
                .await
                .unwrap_err();
            assert_eq!(err, expected);
            assert_eq!(err.to_string(), message);
            assert_eq!(client.source.requested_indices(), vec![0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_mid_transfer() {
        let client = client(vec![
            Ok(ChunkResponse::ready(b"RIFF", false)),
            rejected(ChunkStatus::AlreadyDelivered),
        ]);
        let err = client
            .download(&ArtifactId::from("a"), "abc", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::AlreadyDelivered);
        assert_eq!(client.source.requested_indices(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_faults_exhaust_budget() {
        let source = ScriptedSource::new(vec![
            rejected(ChunkStatus::StoreUnavailable),
            Err(TransportError::Other("connection refused".to_string())),
            rejected(ChunkStatus::StoreUnavailable),
        ]);
        let client = TransferClient::new(
            source,
            ClientConfig {
                poll_interval: Duration::from_secs(2),
                store_retry_budget: 2,
            },
        );

        let err = client
            .download(&ArtifactId::from("a"), "abc", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::RetriesExhausted { attempts: 3 });
        assert_eq!(err.to_string(), "transfer failed after retries");
        assert_eq!(client.source.requested_indices(), vec![0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_faults_within_budget_recover() {
        let client = client(vec![
            Ok(ChunkResponse::ready(b"RI", false)),
            rejected(ChunkStatus::StoreUnavailable),
            Err(TransportError::UnexpectedResponse {
                status: 502,
                body: "bad gateway".to_string(),
            }),
            Ok(ChunkResponse::ready(b"FF", true)),
        ]);
        let artifact = client
            .download(&ArtifactId::from("a"), "abc", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(artifact, b"RIFF");
        assert_eq!(client.source.requested_indices(), vec![0, 1, 1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_ready_response() {
        let mut missing_flag = ChunkResponse::ready(b"x", true);
        missing_flag.is_last = None;
        let client = client(vec![Ok(missing_flag)]);
        let err = client
            .download(&ArtifactId::from("a"), "abc", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_polls() {
        let client = client(vec![]);
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                cancel.cancel();
            })
        };

        let mut session = TransferSession::new(ArtifactId::from("a"), "abc", 5);
        let err = client.run(&mut session, &cancel).await.unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, TransferError::Cancelled);
        assert!(!session.is_terminal());
        // Polls at 0s, 2s and 4s, cancelled while sleeping towards 6s.
        assert_eq!(client.source.requested_indices(), vec![0, 0, 0]);
    }

    #[test]
    fn test_client_config_from_json() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"poll_interval": 0.5}"#).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.store_retry_budget, 5);
    }
}
