use data_model::{ArtifactId, ChunkRequest};
use tracing::{debug, warn};

/// Terminal outcome of a failed transfer. The display strings are what the
/// user gets to see.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("ownership mismatch")]
    OwnershipMismatch,

    #[error("already delivered")]
    AlreadyDelivered,

    #[error("artifact not found")]
    NotFound,

    #[error("invalid chunk range")]
    InvalidRange,

    #[error("transfer failed after retries")]
    RetriesExhausted { attempts: u32 },

    #[error("malformed chunk response: {0}")]
    Protocol(String),

    #[error("transfer cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Init,
    Polling,
    Accumulating,
    Complete,
    Failed,
}

/// What the last poll told the session.
#[derive(Debug)]
pub enum TransferEvent {
    ChunkReceived {
        chunk_index: u64,
        bytes: Vec<u8>,
        is_last: bool,
    },
    /// The artifact is not ready yet.
    Timeout,
    /// The store behind the coordinator, or the channel to it, failed.
    StoreFault,
    Error(TransferError),
}

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Fetch `next_request()` right away.
    Fetch,
    /// Sleep for the poll interval, then fetch the same index again.
    Wait,
    Complete,
    Failed(TransferError),
}

/// Client-local state of one artifact download.
///
/// The session only ever asks for `next_chunk_index` and only accepts that
/// chunk, which keeps the accumulated chunks in order without any help from
/// the server.
#[derive(Debug)]
pub struct TransferSession {
    artifact_id: ArtifactId,
    request_id: String,
    next_chunk_index: u64,
    accumulated_chunks: Vec<Vec<u8>>,
    state: TransferState,
    store_faults: u32,
    store_retry_budget: u32,
    failure: Option<TransferError>,
}

impl TransferSession {
    pub fn new(artifact_id: ArtifactId, request_id: &str, store_retry_budget: u32) -> Self {
        Self {
            artifact_id,
            request_id: request_id.to_string(),
            next_chunk_index: 0,
            accumulated_chunks: Vec::new(),
            state: TransferState::Init,
            store_faults: 0,
            store_retry_budget,
            failure: None,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn next_chunk_index(&self) -> u64 {
        self.next_chunk_index
    }

    pub fn chunks_received(&self) -> usize {
        self.accumulated_chunks.len()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TransferState::Complete | TransferState::Failed)
    }

    /// Request for the chunk the session is waiting on. Moves the session
    /// into `Polling` unless it already finished.
    pub fn next_request(&mut self) -> ChunkRequest {
        if !self.is_terminal() {
            self.state = TransferState::Polling;
        }
        ChunkRequest::new(
            self.artifact_id.clone(),
            &self.request_id,
            self.next_chunk_index,
        )
    }

    pub fn handle(&mut self, event: TransferEvent) -> Step {
        if let Some(step) = self.terminal_step() {
            return step;
        }

        match event {
            TransferEvent::ChunkReceived {
                chunk_index,
                bytes,
                is_last,
            } => {
                if chunk_index != self.next_chunk_index {
                    return self.fail(TransferError::Protocol(format!(
                        "received chunk {} while waiting for chunk {}",
                        chunk_index, self.next_chunk_index
                    )));
                }
                self.store_faults = 0;
                debug!(
                    artifact_id = %self.artifact_id,
                    chunk_index,
                    len = bytes.len(),
                    is_last,
                    "chunk received"
                );
                self.accumulated_chunks.push(bytes);
                if is_last {
                    self.state = TransferState::Complete;
                    return Step::Complete;
                }
                self.next_chunk_index += 1;
                self.state = TransferState::Accumulating;
                Step::Fetch
            }
            TransferEvent::Timeout => {
                self.store_faults = 0;
                self.state = TransferState::Polling;
                Step::Wait
            }
            TransferEvent::StoreFault => {
                self.store_faults += 1;
                if self.store_faults > self.store_retry_budget {
                    return self.fail(TransferError::RetriesExhausted {
                        attempts: self.store_faults,
                    });
                }
                warn!(
                    artifact_id = %self.artifact_id,
                    chunk_index = self.next_chunk_index,
                    faults = self.store_faults,
                    budget = self.store_retry_budget,
                    "store fault while fetching chunk, will retry"
                );
                self.state = TransferState::Polling;
                Step::Wait
            }
            TransferEvent::Error(err) => self.fail(err),
        }
    }

    /// Concatenates the accumulated chunks once the session is complete.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        if self.state != TransferState::Complete {
            return None;
        }
        Some(self.accumulated_chunks.concat())
    }

    fn fail(&mut self, err: TransferError) -> Step {
        self.state = TransferState::Failed;
        self.failure = Some(err.clone());
        Step::Failed(err)
    }

    fn terminal_step(&self) -> Option<Step> {
        match self.state {
            TransferState::Complete => Some(Step::Complete),
            TransferState::Failed => Some(Step::Failed(
                self.failure
                    .clone()
                    .unwrap_or(TransferError::Protocol("session failed".to_string())),
            )),
            _ => None,
        }
    }
}
