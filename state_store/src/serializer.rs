use std::{any::type_name, fmt::Debug};

use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Records are stored as JSON so that fields added later (with serde
/// defaults) still decode rows written by older builds.
pub struct JsonEncoder;

pub trait JsonEncode {
    fn encode<T: Serialize + Debug>(value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}

impl JsonEncode for JsonEncoder {
    fn encode<T: Serialize + Debug>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| {
            anyhow!(
                "error serializing {} into json: {}, value: {:?}",
                type_name::<T>(),
                e,
                value
            )
        })
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| {
            anyhow!(
                "error deserializing {} from {} json bytes: {}",
                type_name::<T>(),
                bytes.len(),
                e
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use data_model::{test_objects::tests::mock_artifact, ArtifactRecord, ArtifactStatus};

    use super::*;

    #[test]
    fn test_decodes_rows_without_expansion_fields() {
        let row = br#"{"id":"legacy","request_id":"abc","is_downloaded":false,"created_at":1}"#;
        let record: ArtifactRecord = JsonEncoder::decode(row).unwrap();
        assert_eq!(record.status, ArtifactStatus::Pending);
        assert!(record.parameters.is_none());

        let artifact = mock_artifact("legacy", "abc");
        let encoded = JsonEncoder::encode(&artifact).unwrap();
        let decoded: ArtifactRecord = JsonEncoder::decode(&encoded).unwrap();
        assert_eq!(decoded, artifact);
    }

    #[test]
    fn test_decode_garbage_names_type() {
        let err = JsonEncoder::decode::<ArtifactRecord>(b"not json").unwrap_err();
        assert!(err.to_string().contains("ArtifactRecord"));
    }
}
