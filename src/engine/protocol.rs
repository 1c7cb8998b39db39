//! Wire protocol spoken with the render engine.
//!
//! Every frame is a JSON object `{ "type": ..., "payload": { ... } }`.
//! Binary mesh data travels base64-encoded inside `COMPLETE` payloads.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    Capabilities, LibraryMount, OutputFormat, Parameters, RenderRequest, RenderStats,
};

use super::error::ProtocolError;

/// Request id used by `ERROR` frames that target initialisation.
pub const INIT_REQUEST_ID: &str = "init";

const INBOUND_TYPES: [&str; 5] = ["READY", "PROGRESS", "COMPLETE", "ERROR", "MEMORY_USAGE"];

/// Frames sent to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    Init {
        #[serde(
            rename = "assetBaseUrl",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        asset_base_url: Option<String>,
    },
    Render(RenderPayload),
    Cancel {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    GetMemoryUsage {},
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPayload {
    pub request_id: String,
    pub scad_content: String,
    pub parameters: Parameters,
    pub output_format: OutputFormat,
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libraries: Option<Vec<LibraryMount>>,
}

impl From<&RenderRequest> for RenderPayload {
    fn from(request: &RenderRequest) -> Self {
        let (files, main_file) = match request.project.as_ref() {
            Some(project) => (Some(project.files.clone()), project.main_file.clone()),
            None => (None, None),
        };
        let libraries = (!request.libraries.is_empty()).then(|| request.libraries.clone());

        Self {
            request_id: request.id.clone(),
            scad_content: request.scad_source.clone(),
            parameters: request.parameters.clone(),
            output_format: request.output_format,
            timeout_ms: u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX),
            files,
            main_file,
            libraries,
        }
    }
}

/// Frames received from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    #[serde(rename_all = "camelCase")]
    Ready {
        #[serde(default)]
        init_duration_ms: u64,
        #[serde(default)]
        capabilities: Capabilities,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        request_id: String,
        #[serde(default)]
        percent: f64,
        #[serde(default)]
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        request_id: String,
        #[serde(with = "base64_bytes")]
        data: Bytes,
        #[serde(default)]
        stats: RenderStats,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        request_id: String,
        code: String,
        #[serde(default)]
        message: String,
    },
    MemoryUsage {
        #[serde(rename = "usedMB")]
        used_mb: f64,
        #[serde(rename = "limitMB")]
        limit_mb: f64,
        percent: f64,
    },
}

/// Decode one inbound frame, telling unknown message types apart from
/// malformed known ones.
pub fn decode_inbound(frame: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|err| ProtocolError::Malformed(err.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing `type` field".to_string()))?
        .to_string();

    if !INBOUND_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|err| ProtocolError::Malformed(format!("{kind}: {err}")))
}

pub fn encode_outbound(message: &OutboundMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::domain::params::parameters;
    use crate::domain::{ProjectContext, QualityTier};

    #[test]
    fn render_frame_matches_wire_shape() {
        let request = RenderRequest {
            id: "render-1".to_string(),
            scad_source: "cube(width);".to_string(),
            parameters: parameters([("width", 10)]),
            output_format: OutputFormat::Stl,
            timeout: Duration::from_secs(30),
            quality: QualityTier::Preview,
            project: None,
            libraries: Vec::new(),
        };

        let frame = serde_json::to_value(OutboundMessage::Render(RenderPayload::from(&request)))
            .unwrap();
        assert_eq!(
            frame,
            json!({
                "type": "RENDER",
                "payload": {
                    "requestId": "render-1",
                    "scadContent": "cube(width);",
                    "parameters": {"width": 10},
                    "outputFormat": "stl",
                    "timeoutMs": 30000
                }
            })
        );
    }

    #[test]
    fn project_context_is_forwarded() {
        let mut files = BTreeMap::new();
        files.insert("lib/util.scad".to_string(), "module m() {}".to_string());
        let request = RenderRequest {
            id: "render-2".to_string(),
            scad_source: "include <lib/util.scad>".to_string(),
            parameters: Parameters::new(),
            output_format: OutputFormat::ThreeMf,
            timeout: Duration::from_millis(1500),
            quality: QualityTier::Full,
            project: Some(ProjectContext {
                files,
                main_file: Some("main.scad".to_string()),
            }),
            libraries: vec![LibraryMount {
                id: "bosl2".to_string(),
                mount_path: "/libraries/BOSL2".to_string(),
            }],
        };

        let payload = RenderPayload::from(&request);
        assert_eq!(payload.main_file.as_deref(), Some("main.scad"));
        assert_eq!(payload.files.as_ref().map(BTreeMap::len), Some(1));
        let frame = serde_json::to_value(OutboundMessage::Render(payload)).unwrap();
        assert_eq!(frame["payload"]["libraries"][0]["mountPath"], json!("/libraries/BOSL2"));
    }

    #[test]
    fn control_frames_serialise() {
        assert_eq!(
            serde_json::to_value(OutboundMessage::Init { asset_base_url: None }).unwrap(),
            json!({"type": "INIT", "payload": {}})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::GetMemoryUsage {}).unwrap(),
            json!({"type": "GET_MEMORY_USAGE", "payload": {}})
        );
        assert_eq!(
            encode_outbound(&OutboundMessage::Cancel {
                request_id: "r".into()
            })
            .unwrap(),
            r#"{"type":"CANCEL","payload":{"requestId":"r"}}"#
        );
    }

    #[test]
    fn decodes_complete_with_base64_mesh() {
        let frame = r#"{"type":"COMPLETE","payload":{"requestId":"r1","data":"c29saWQ=","stats":{"triangleCount":12}}}"#;
        match decode_inbound(frame).unwrap() {
            InboundMessage::Complete {
                request_id,
                data,
                stats,
            } => {
                assert_eq!(request_id, "r1");
                assert_eq!(&data[..], b"solid");
                assert_eq!(stats.triangle_count, 12);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decodes_memory_usage_field_names() {
        let frame = r#"{"type":"MEMORY_USAGE","payload":{"usedMB":512,"limitMB":2048,"percent":25}}"#;
        assert_eq!(
            decode_inbound(frame).unwrap(),
            InboundMessage::MemoryUsage {
                used_mb: 512.0,
                limit_mb: 2048.0,
                percent: 25.0
            }
        );
    }

    #[test]
    fn unknown_types_are_distinguished_from_malformed_frames() {
        assert_eq!(
            decode_inbound(r#"{"type":"LOG","payload":{}}"#),
            Err(ProtocolError::UnknownType("LOG".to_string()))
        );
        assert!(matches!(
            decode_inbound(r#"{"type":"COMPLETE","payload":{}}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(decode_inbound("not json"), Err(ProtocolError::Malformed(_))));
    }
}
