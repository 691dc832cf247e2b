use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{
    errors::{DomainError, DomainResult},
    session::StreamId,
    stream::StreamStats,
};

fn required(value: Option<String>, field: &str) -> DomainResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DomainError::InvalidInput(format!("{field} is required")))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub stream_id: Option<String>,
    #[serde(rename = "sourceURI", alias = "sourceUri", alias = "rtspUrl")]
    pub source_uri: Option<String>,
}

impl StartRequest {
    /// `(streamId, sourceURI)`, both present and non-blank.
    pub fn into_parts(self) -> DomainResult<(String, String)> {
        Ok((required(self.stream_id, "streamId")?, required(self.source_uri, "sourceURI")?))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub stream_id: Option<String>,
}

impl StopRequest {
    pub fn into_stream_id(self) -> DomainResult<String> {
        required(self.stream_id, "streamId")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub stream_id: StreamId,
    pub stream_path: String,
}

impl StartResponse {
    pub fn for_stream(stream_id: StreamId) -> Self {
        let stream_path = format!("/stream/{stream_id}");
        Self { stream_id, stream_path }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub active_stream_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsListResponse {
    pub count: usize,
    pub data: BTreeMap<StreamId, StreamStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveResponse {
    pub count: usize,
    pub streams: Vec<StreamId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_accepts_aliases() {
        for body in [
            r#"{"streamId":"camA","sourceURI":"rtsp://x"}"#,
            r#"{"streamId":"camA","sourceUri":"rtsp://x"}"#,
            r#"{"streamId":"camA","rtspUrl":"rtsp://x"}"#,
        ] {
            let req: StartRequest = serde_json::from_str(body).unwrap();
            assert_eq!(req.into_parts().unwrap(), ("camA".to_string(), "rtsp://x".to_string()));
        }
    }

    #[test]
    fn missing_or_blank_fields_are_invalid() {
        let req: StartRequest = serde_json::from_str(r#"{"streamId":"camA"}"#).unwrap();
        assert!(matches!(req.into_parts(), Err(DomainError::InvalidInput(m)) if m.contains("sourceURI")));
        let req: StartRequest = serde_json::from_str(r#"{"streamId":"  ","sourceURI":"rtsp://x"}"#).unwrap();
        assert!(matches!(req.into_parts(), Err(DomainError::InvalidInput(m)) if m.contains("streamId")));
        assert!(StopRequest::default().into_stream_id().is_err());
    }

    #[test]
    fn start_response_shape() {
        let resp = StartResponse::for_stream(StreamId::parse("camA").unwrap());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, serde_json::json!({"streamId": "camA", "streamPath": "/stream/camA"}));
    }
}
