//! Orchestrator tests against a stub AVTransport control endpoint.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use tokio::net::TcpListener;

use pmocastservice::{CastError, CastService, CastServiceConfig, CastStatus};
use pmocastupnp::{CastDevice, UpnpError};

/// Stub renderer control endpoint recording the SOAP bodies it receives.
async fn spawn_control_stub(
    status: StatusCode,
    response_body: &'static str,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new().route(
        "/ctrl",
        post({
            let received = received.clone();
            move |body: String| {
                let received = received.clone();
                async move {
                    received.lock().unwrap().push(body);
                    (status, response_body)
                }
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, received)
}

fn stub_device(addr: SocketAddr) -> CastDevice {
    CastDevice::new(
        "uuid:stub-renderer",
        "Stub TV",
        format!("http://{}/", addr),
        "ctrl",
        "127.0.0.1",
        100,
    )
}

fn test_config() -> CastServiceConfig {
    CastServiceConfig {
        // Ephemeral port: the surface itself is not exercised here
        http_port: 0,
        ffmpeg_path: "ffmpeg".to_string(),
        discovery_mx: 1,
    }
}

#[tokio::test]
async fn select_and_cast_file_walk_the_state_machine() {
    let (addr, received) = spawn_control_stub(StatusCode::OK, "<ok/>").await;

    let service = CastService::new(test_config());

    // Nothing is legal before init
    assert!(matches!(
        service.select_device("uuid:stub-renderer"),
        Err(CastError::StateConflict(CastStatus::Uninitialized))
    ));

    service.init().await.unwrap();
    assert_eq!(service.status(), CastStatus::Ready);

    // Unknown device: the register rolls back to the matched pre-state
    assert!(matches!(
        service.select_device("uuid:nope"),
        Err(CastError::DeviceNotFound(_))
    ));
    assert_eq!(service.status(), CastStatus::Ready);

    service.registry().upsert(stub_device(addr));
    service.select_device("uuid:stub-renderer").unwrap();
    assert_eq!(service.status(), CastStatus::DeviceSelected);
    assert_eq!(
        service.selected_device().unwrap().udn,
        "uuid:stub-renderer"
    );

    // Re-selecting while idle-with-device is legal
    service.select_device("uuid:stub-renderer").unwrap();
    assert_eq!(service.status(), CastStatus::DeviceSelected);

    service.cast_file("/tmp/movie.mkv").await.unwrap();
    assert_eq!(service.status(), CastStatus::CastingFile);

    // The renderer was pointed at this host's /file endpoint
    {
        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("SetAVTransportURI"));
        assert!(bodies[0].contains("<InstanceID>0</InstanceID>"));
        assert!(bodies[0].contains("http://127.0.0.1:0/file"));
    }

    // While casting, neither a new cast nor a new selection is legal
    assert!(matches!(
        service.cast_file("/tmp/other.mkv").await,
        Err(CastError::StateConflict(CastStatus::CastingFile))
    ));
    assert!(matches!(
        service.select_device("uuid:stub-renderer"),
        Err(CastError::StateConflict(CastStatus::CastingFile))
    ));

    service.cancel_cast_file().unwrap();
    assert_eq!(service.status(), CastStatus::DeviceSelected);
    assert!(service.cancel_cast_file().is_err());

    service.shutdown();
}

#[tokio::test]
async fn soap_fault_rolls_the_register_back() {
    const FAULT: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>716</errorCode>
          <errorDescription>Resource not found</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

    let (addr, _received) = spawn_control_stub(StatusCode::INTERNAL_SERVER_ERROR, FAULT).await;

    let service = CastService::new(test_config());
    service.init().await.unwrap();
    service.registry().upsert(stub_device(addr));
    service.select_device("uuid:stub-renderer").unwrap();

    let result = service.cast_file("/tmp/movie.mkv").await;
    match result {
        Err(CastError::Control(UpnpError::SoapFault(action, code, _, status))) => {
            assert_eq!(action, "SetAVTransportURI");
            assert_eq!(code, "716");
            assert_eq!(status, 500);
        }
        other => panic!("expected a SOAP fault, got {:?}", other),
    }

    // The service is back in a consistent idle state
    assert_eq!(service.status(), CastStatus::DeviceSelected);
    service.shutdown();
}

#[tokio::test]
async fn select_by_name_resolves_through_the_registry() {
    let (addr, _received) = spawn_control_stub(StatusCode::OK, "<ok/>").await;

    let service = CastService::new(test_config());
    service.init().await.unwrap();
    service.registry().upsert(stub_device(addr));

    assert!(matches!(
        service.select_device_by_name("Bedroom TV"),
        Err(CastError::DeviceNotFound(_))
    ));
    assert_eq!(service.status(), CastStatus::Ready);

    service.select_device_by_name("Stub TV").unwrap();
    assert_eq!(service.status(), CastStatus::DeviceSelected);
    service.shutdown();
}

#[tokio::test]
async fn failed_encoder_spawn_rolls_back_a_screen_cast() {
    let (addr, received) = spawn_control_stub(StatusCode::OK, "<ok/>").await;

    let service = CastService::new(CastServiceConfig {
        ffmpeg_path: "/nonexistent/pmocast-test-ffmpeg".to_string(),
        ..test_config()
    });
    service.init().await.unwrap();
    service.registry().upsert(stub_device(addr));
    service.select_device("uuid:stub-renderer").unwrap();

    let result = service.cast_screen(Default::default()).await;
    assert!(result.is_err());
    if cfg!(target_os = "linux") {
        assert!(matches!(result, Err(CastError::EncoderSpawn(_, _))));
    }
    assert_eq!(service.status(), CastStatus::DeviceSelected);

    // The renderer was never redirected
    assert!(received.lock().unwrap().is_empty());
    service.shutdown();
}

#[tokio::test]
async fn cancel_screen_cast_is_idempotent_once_idle() {
    let service = CastService::new(test_config());
    service.init().await.unwrap();

    // Not even a device selected: cancellation is a real state conflict
    assert!(service.cancel_cast_screen().await.is_err());
    assert_eq!(service.status(), CastStatus::Ready);

    let (addr, _received) = spawn_control_stub(StatusCode::OK, "<ok/>").await;
    service.registry().upsert(stub_device(addr));
    service.select_device("uuid:stub-renderer").unwrap();

    // Idle-with-device: the watcher (or a previous cancel) already returned
    // the register, so cancel reports success
    service.cancel_cast_screen().await.unwrap();
    assert_eq!(service.status(), CastStatus::DeviceSelected);
    service.shutdown();
}
