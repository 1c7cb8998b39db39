mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tessera::domain::params::parameters;
use tessera::domain::{
    ErrorKind, OutputFormat, Parameters, QualityPreset, QualityPresets, QualityTier,
    RenderOptions, RenderStats,
};
use tessera::engine::{
    ChannelTransport, EngineError, EngineGateway, GatewayConfig, InboundMessage, OutboundMessage,
};

use support::{ENGINE_VERSION, gateway_with, ready_gateway, wait_for};

const SOURCE: &str = "cube([width, 10, 10]);";

fn hang() -> Parameters {
    parameters([("hang", json!(true))])
}

#[tokio::test]
async fn initialise_is_idempotent() {
    let (gateway, engine) = gateway_with(GatewayConfig::default());

    let (first, second) = tokio::join!(gateway.initialize(None), gateway.initialize(None));
    let third = gateway.initialize(Some("https://assets.example".into())).await;

    assert_eq!(first.unwrap().version.as_deref(), Some(ENGINE_VERSION));
    assert_eq!(second.unwrap(), third.unwrap());
    assert_eq!(engine.init_count(), 1);
    assert!(gateway.is_ready());
    assert!(gateway.capabilities().available);
}

#[tokio::test]
async fn capabilities_default_to_unavailable_before_ready() {
    let (gateway, _engine) = gateway_with(GatewayConfig::default());
    let capabilities = gateway.capabilities();
    assert!(!capabilities.available);
    assert_eq!(capabilities.version, None);
}

#[tokio::test]
async fn init_error_rejects_and_allows_retry() {
    let (transport, inbound, mut endpoint) = ChannelTransport::pair();
    let gateway = EngineGateway::new(transport, inbound, GatewayConfig::default());

    let attempt = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.initialize(None).await })
    };
    assert!(matches!(
        endpoint.requests.recv().await,
        Some(OutboundMessage::Init { .. })
    ));
    endpoint
        .replies
        .send(InboundMessage::Error {
            request_id: "init".into(),
            code: "INIT_FAILED".into(),
            message: "wasm module failed to load".into(),
        })
        .unwrap();

    let err = attempt.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RenderFailed);
    assert_eq!(err.engine_message(), Some("wasm module failed to load"));
    assert!(!gateway.is_ready());

    let retry = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.initialize(None).await })
    };
    assert!(matches!(
        endpoint.requests.recv().await,
        Some(OutboundMessage::Init { .. })
    ));
    endpoint
        .replies
        .send(InboundMessage::Ready {
            init_duration_ms: 1,
            capabilities: Default::default(),
        })
        .unwrap();
    assert!(retry.await.unwrap().is_ok());
    assert!(gateway.is_ready());
}

#[tokio::test]
async fn render_before_initialise_is_not_ready() {
    let (gateway, engine) = gateway_with(GatewayConfig::default());

    let err = gateway
        .render(SOURCE.into(), Parameters::new(), RenderOptions::preview())
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::NotReady);
    assert!(engine.renders().is_empty());
}

#[tokio::test]
async fn render_resolves_with_mesh_and_reports_progress() {
    let (gateway, engine) = ready_gateway(GatewayConfig::default()).await;
    let progress = Arc::new(Mutex::new(Vec::new()));
    {
        let progress = Arc::clone(&progress);
        gateway.on_progress(move |update| progress.lock().unwrap().push(update.percent));
    }

    let result = gateway
        .render(
            SOURCE.into(),
            parameters([("width", 20)]),
            RenderOptions::full(OutputFormat::ThreeMf),
        )
        .await
        .unwrap();

    assert_eq!(result.mesh_data, Bytes::from(format!("mesh:{}", result.request_id)));
    assert_eq!(result.stats.triangle_count, 12);
    assert_eq!(progress.lock().unwrap().as_slice(), &[50.0]);
    assert!(!gateway.is_busy());

    let payload = &engine.renders()[0];
    assert_eq!(payload.output_format, OutputFormat::ThreeMf);
    assert_eq!(payload.timeout_ms, 120_000);
    assert_eq!(payload.parameters["width"], json!(20));
    assert_eq!(payload.parameters["$fa"], json!(1));
}

#[tokio::test]
async fn unsubscribe_only_removes_the_named_listener() {
    let (gateway, engine) = ready_gateway(GatewayConfig::default()).await;
    let progress = Arc::new(Mutex::new(Vec::new()));
    let progress_id = {
        let progress = Arc::clone(&progress);
        gateway.on_progress(move |update| progress.lock().unwrap().push(update.percent))
    };
    let warnings = Arc::new(Mutex::new(Vec::new()));
    let warning_id = {
        let warnings = Arc::clone(&warnings);
        gateway.on_memory_warning(move |usage| warnings.lock().unwrap().push(usage.percent))
    };
    assert_ne!(progress_id, warning_id);

    assert!(gateway.unsubscribe(warning_id));
    assert!(!gateway.unsubscribe(warning_id));

    gateway
        .render(SOURCE.into(), Parameters::new(), RenderOptions::preview())
        .await
        .unwrap();
    engine.set_memory_percent(95.0);
    gateway.memory_usage().await;

    assert_eq!(progress.lock().unwrap().as_slice(), &[50.0]);
    assert!(warnings.lock().unwrap().is_empty());
}

#[tokio::test]
async fn engine_error_rejects_only_that_render() {
    let (gateway, _engine) = ready_gateway(GatewayConfig::default()).await;

    let err = gateway
        .render(
            SOURCE.into(),
            parameters([("fail", true)]),
            RenderOptions::preview(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RenderFailed);
    assert!(err.to_string().contains("Parser error"));
    assert!(!gateway.is_busy());

    assert!(
        gateway
            .render(SOURCE.into(), Parameters::new(), RenderOptions::preview())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn engine_reported_timeout_carries_the_preset_deadline() {
    let (gateway, _engine) = ready_gateway(GatewayConfig::default()).await;

    let err = gateway
        .render(
            SOURCE.into(),
            parameters([("engine_timeout", true)]),
            RenderOptions::preview(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::Timeout { after_ms: 30_000 });
}

#[tokio::test(start_paused = true)]
async fn local_watchdog_times_out_and_cancels() {
    let mut presets = QualityPresets::new();
    presets.insert(
        QualityTier::Preview,
        QualityPreset {
            timeout_ms: 50,
            ..QualityPreset::preview()
        },
    );
    let config = GatewayConfig {
        presets,
        timeout_grace: Duration::from_millis(10),
        ..GatewayConfig::default()
    };
    let (gateway, engine) = ready_gateway(config).await;

    let err = gateway
        .render(SOURCE.into(), hang(), RenderOptions::preview())
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::Timeout { after_ms: 50 });
    assert!(!gateway.is_busy());
    let request_id = engine.renders()[0].request_id.clone();
    wait_for(|| engine.cancelled_ids() == vec![request_id.clone()]).await;

    assert!(
        gateway
            .render(SOURCE.into(), Parameters::new(), RenderOptions::preview())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn cancel_rejects_the_in_flight_render() {
    let (gateway, engine) = ready_gateway(GatewayConfig::default()).await;

    let pending = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .render(SOURCE.into(), hang(), RenderOptions::preview())
                .await
        })
    };
    wait_for(|| gateway.is_busy()).await;
    let request_id = gateway.current_request().unwrap();

    gateway.cancel();

    assert_eq!(pending.await.unwrap(), Err(EngineError::Cancelled));
    assert!(!gateway.is_busy());
    wait_for(|| engine.cancelled_ids() == vec![request_id.clone()]).await;

    // The engine's CANCELLED acknowledgement arrives late and is dropped.
    let next = gateway
        .render(SOURCE.into(), Parameters::new(), RenderOptions::preview())
        .await;
    assert!(next.is_ok());
}

#[tokio::test]
async fn busy_gateway_rejects_a_second_render() {
    let (gateway, _engine) = ready_gateway(GatewayConfig::default()).await;

    let first = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .render(SOURCE.into(), hang(), RenderOptions::preview())
                .await
        })
    };
    wait_for(|| gateway.is_busy()).await;
    let active = gateway.current_request().unwrap();

    let err = gateway
        .render(SOURCE.into(), Parameters::new(), RenderOptions::preview())
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Busy { request_id: active });

    gateway.cancel();
    assert_eq!(first.await.unwrap(), Err(EngineError::Cancelled));
}

#[tokio::test]
async fn late_messages_for_unknown_requests_are_dropped() {
    let (gateway, engine) = ready_gateway(GatewayConfig::default()).await;

    engine.send(InboundMessage::Complete {
        request_id: "render-unknown".into(),
        data: Bytes::from_static(b"stale"),
        stats: RenderStats::default(),
    });
    engine.send(InboundMessage::Error {
        request_id: "render-unknown".into(),
        code: "COMPILE_ERROR".into(),
        message: "stale".into(),
    });

    let result = gateway
        .render(SOURCE.into(), Parameters::new(), RenderOptions::preview())
        .await
        .unwrap();
    assert_ne!(result.mesh_data, Bytes::from_static(b"stale"));
}

#[tokio::test]
async fn memory_usage_reports_and_warns_above_threshold() {
    let (gateway, engine) = gateway_with(GatewayConfig::default());
    assert!(!gateway.memory_usage().await.available);

    gateway.initialize(None).await.unwrap();
    let warnings = Arc::new(Mutex::new(Vec::new()));
    {
        let warnings = Arc::clone(&warnings);
        gateway.on_memory_warning(move |usage| warnings.lock().unwrap().push(usage.percent));
    }

    let usage = gateway.memory_usage().await;
    assert!(usage.available);
    assert_eq!(usage.limit_mb, 2048.0);
    assert_eq!(usage.percent, 25.0);
    assert!(warnings.lock().unwrap().is_empty());

    engine.set_memory_percent(91.0);
    let usage = gateway.memory_usage().await;
    assert_eq!(usage.percent, 91.0);
    assert_eq!(warnings.lock().unwrap().as_slice(), &[91.0]);
}

#[tokio::test]
async fn terminate_rejects_outstanding_and_future_work() {
    let (gateway, _engine) = ready_gateway(GatewayConfig::default()).await;

    let pending = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .render(SOURCE.into(), hang(), RenderOptions::preview())
                .await
        })
    };
    wait_for(|| gateway.is_busy()).await;

    gateway.terminate();
    gateway.terminate();

    assert_eq!(pending.await.unwrap(), Err(EngineError::Terminated));
    assert!(!gateway.is_ready());
    assert!(!gateway.capabilities().available);
    assert_eq!(
        gateway
            .render(SOURCE.into(), Parameters::new(), RenderOptions::preview())
            .await,
        Err(EngineError::Terminated)
    );
    assert_eq!(gateway.initialize(None).await, Err(EngineError::Terminated));
}

#[tokio::test]
async fn closed_engine_channel_rejects_pending_render() {
    let (transport, inbound, mut endpoint) = ChannelTransport::pair();
    let gateway = EngineGateway::new(transport, inbound, GatewayConfig::default());

    let init = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.initialize(None).await })
    };
    endpoint.requests.recv().await.unwrap();
    endpoint
        .replies
        .send(InboundMessage::Ready {
            init_duration_ms: 1,
            capabilities: Default::default(),
        })
        .unwrap();
    init.await.unwrap().unwrap();

    let pending = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .render(SOURCE.into(), Parameters::new(), RenderOptions::preview())
                .await
        })
    };
    assert!(matches!(
        endpoint.requests.recv().await,
        Some(OutboundMessage::Render(_))
    ));
    drop(endpoint);

    assert_eq!(pending.await.unwrap(), Err(EngineError::Terminated));
    assert!(!gateway.is_ready());
}
