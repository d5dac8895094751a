pub mod tests {
    use crate::{ArtifactId, ArtifactRecord, ArtifactRecordBuilder, ArtifactStatus};

    pub const TEST_REQUEST_ID: &str = "abc";
    pub const TEST_ARTIFACT_ID: &str = "567fab82_2_44100_16";

    pub fn mock_artifact(id: &str, request_id: &str) -> ArtifactRecord {
        ArtifactRecordBuilder::default()
            .id(ArtifactId::from(id))
            .request_id(request_id.to_string())
            .parameters(Some(serde_json::json!({
                "wav_spec": {"number_of_channels": 2, "sample_rate": 44100, "bits_per_sample": 16},
                "wav_data": {"frequencies": [440, 660], "duration": 30, "volume": 0.9},
            })))
            .build()
            .unwrap()
    }

    pub fn mock_ready_artifact(id: &str, request_id: &str) -> ArtifactRecord {
        ArtifactRecord {
            status: ArtifactStatus::Ready,
            ..mock_artifact(id, request_id)
        }
    }

    /// Deterministic, non-repeating-looking payload so misplaced ranges are
    /// caught by byte comparison.
    pub fn mock_blob(size: usize) -> Vec<u8> {
        (0..size)
            .map(|i| ((i * 31 + i / 4096) % 251) as u8)
            .collect()
    }
}
