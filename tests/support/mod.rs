//! Scripted in-memory render engine driven over `ChannelTransport`.
//!
//! Render requests are answered according to their parameters:
//! - `delay_ms: n` waits `n` ms before replying
//! - `hang: true` never replies
//! - `fail: true` replies with a `COMPILE_ERROR`
//! - `engine_timeout: true` replies with a `TIMEOUT` error
//!
//! Everything else completes with `mesh:<request id>` as its mesh bytes.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tessera::domain::{Capabilities, OutputFormat, RenderStats};
use tessera::engine::{
    ChannelTransport, EngineEndpoint, EngineGateway, GatewayConfig, InboundMessage,
    OutboundMessage, RenderPayload,
};

pub const ENGINE_VERSION: &str = "fake-2024.1";

#[derive(Clone)]
pub struct FakeEngine {
    log: Arc<Mutex<Vec<OutboundMessage>>>,
    memory_percent: Arc<Mutex<f64>>,
    replies: mpsc::UnboundedSender<InboundMessage>,
}

impl FakeEngine {
    /// Start serving `endpoint` on the current runtime.
    pub fn serve(endpoint: EngineEndpoint) -> Self {
        let engine = Self {
            log: Arc::new(Mutex::new(Vec::new())),
            memory_percent: Arc::new(Mutex::new(25.0)),
            replies: endpoint.replies.clone(),
        };
        tokio::spawn(run(engine.clone(), endpoint));
        engine
    }

    pub fn requests(&self) -> Vec<OutboundMessage> {
        self.log.lock().unwrap().clone()
    }

    pub fn renders(&self) -> Vec<RenderPayload> {
        self.requests()
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::Render(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn init_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|message| matches!(message, OutboundMessage::Init { .. }))
            .count()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::Cancel { request_id } => Some(request_id),
                _ => None,
            })
            .collect()
    }

    pub fn set_memory_percent(&self, percent: f64) {
        *self.memory_percent.lock().unwrap() = percent;
    }

    /// Push a frame to the gateway as if the engine had sent it.
    pub fn send(&self, message: InboundMessage) {
        self.replies.send(message).unwrap();
    }
}

async fn run(engine: FakeEngine, mut endpoint: EngineEndpoint) {
    while let Some(message) = endpoint.requests.recv().await {
        engine.log.lock().unwrap().push(message.clone());
        match message {
            OutboundMessage::Init { .. } => {
                let _ = endpoint.replies.send(InboundMessage::Ready {
                    init_duration_ms: 3,
                    capabilities: Capabilities {
                        available: true,
                        version: Some(ENGINE_VERSION.to_string()),
                        has_manifold: true,
                        binary_export: true,
                        formats: vec![OutputFormat::Stl, OutputFormat::ThreeMf],
                    },
                });
            }
            OutboundMessage::Render(payload) => {
                tokio::spawn(respond(payload, endpoint.replies.clone()));
            }
            OutboundMessage::Cancel { request_id } => {
                let _ = endpoint.replies.send(InboundMessage::Error {
                    request_id,
                    code: "CANCELLED".to_string(),
                    message: "Render cancelled".to_string(),
                });
            }
            OutboundMessage::GetMemoryUsage {} => {
                let percent = *engine.memory_percent.lock().unwrap();
                let _ = endpoint.replies.send(InboundMessage::MemoryUsage {
                    used_mb: percent * 20.48,
                    limit_mb: 2048.0,
                    percent,
                });
            }
        }
    }
}

async fn respond(payload: RenderPayload, replies: mpsc::UnboundedSender<InboundMessage>) {
    let flag = |name: &str| payload.parameters.get(name) == Some(&json!(true));

    if let Some(delay) = payload.parameters.get("delay_ms").and_then(Value::as_u64) {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if flag("hang") {
        return;
    }
    if flag("fail") {
        let _ = replies.send(InboundMessage::Error {
            request_id: payload.request_id,
            code: "COMPILE_ERROR".to_string(),
            message: "Parser error: syntax error in line 3".to_string(),
        });
        return;
    }
    if flag("engine_timeout") {
        let _ = replies.send(InboundMessage::Error {
            request_id: payload.request_id,
            code: "TIMEOUT".to_string(),
            message: "Render exceeded its time limit".to_string(),
        });
        return;
    }

    let _ = replies.send(InboundMessage::Progress {
        request_id: payload.request_id.clone(),
        percent: 50.0,
        message: "Rendering".to_string(),
    });
    let _ = replies.send(InboundMessage::Complete {
        request_id: payload.request_id.clone(),
        data: Bytes::from(format!("mesh:{}", payload.request_id)),
        stats: RenderStats {
            triangle_count: 12,
            ..RenderStats::default()
        },
    });
}

/// Gateway wired to a fresh fake engine, not yet initialised.
pub fn gateway_with(config: GatewayConfig) -> (EngineGateway, FakeEngine) {
    let (transport, inbound, endpoint) = ChannelTransport::pair();
    let gateway = EngineGateway::new(transport, inbound, config);
    (gateway, FakeEngine::serve(endpoint))
}

/// Gateway wired to a fake engine and already initialised.
pub async fn ready_gateway(config: GatewayConfig) -> (EngineGateway, FakeEngine) {
    let (gateway, engine) = gateway_with(config);
    gateway.initialize(None).await.unwrap();
    (gateway, engine)
}

/// Yield to the runtime until `condition` holds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
