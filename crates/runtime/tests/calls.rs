//! Call-path tests: id correlation under concurrency, close semantics for
//! in-flight calls, and `wrap_api_call` annotation and instrumentation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use tether_runtime::{Error, Instrumentation, ROOT_GUID};

use common::{Session, connect, read_frame, write_create, write_frame};

#[tokio::test]
async fn concurrent_calls_resolve_by_id_not_arrival_order() {
    let (connection, mut server) = connect();
    let root = connection.root().unwrap();

    let first = tokio::spawn({
        let root = root.clone();
        async move { root.initialize().await }
    });
    let second = tokio::spawn(async move { root.initialize().await });

    let request_a = read_frame(&mut server).await;
    let request_b = read_frame(&mut server).await;
    let (id_a, id_b) = (request_a["id"].clone(), request_b["id"].clone());
    assert_ne!(id_a, id_b);

    // Answer in reverse order; each caller must still get its own payload.
    write_frame(&mut server, &json!({"id": id_b, "result": {"tag": id_b}})).await;
    write_frame(&mut server, &json!({"id": id_a, "result": {"tag": id_a}})).await;

    let result_a = first.await.unwrap().unwrap();
    let result_b = second.await.unwrap().unwrap();
    assert_eq!(result_a["tag"], id_a);
    assert_eq!(result_b["tag"], id_b);
}

#[tokio::test]
async fn transport_loss_rejects_in_flight_calls() {
    let (connection, mut server) = connect();
    let root = connection.root().unwrap();

    let call = tokio::spawn(async move { root.initialize().await });
    let _request = read_frame(&mut server).await;
    drop(server);

    let error = call.await.unwrap().unwrap_err();
    match error {
        Error::ConnectionClosed(reason) => assert!(reason.contains("transport closed")),
        other => panic!("expected connection closed, got {other}"),
    }

    // No wire round trip after close.
    let error = connection.root().unwrap_err();
    assert!(matches!(error, Error::ConnectionClosed(_)));
}

#[tokio::test]
async fn params_failing_validation_never_reach_the_wire() {
    let (connection, mut server) = connect();

    write_create(&mut server, ROOT_GUID, "Session", "s1", json!({})).await;
    let session = connection
        .wait_for_object("s1", Duration::from_secs(1))
        .await
        .unwrap();

    let error = session
        .channel()
        .invoke("navigate", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Validation(_)));

    let error = session
        .channel()
        .invoke("teleport", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Validation(_)));
}

#[tokio::test]
async fn wrapped_call_annotates_remote_errors_with_call_name() {
    let (connection, mut server) = connect();

    write_create(&mut server, ROOT_GUID, "Session", "s1", json!({})).await;
    let session = connection
        .wait_for_object("s1", Duration::from_secs(1))
        .await
        .unwrap();
    let session = session.downcast_arc::<Session>().ok().unwrap();

    let call = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .core
                .wrap_api_call("session.navigate", |channel| async move {
                    channel
                        .invoke("navigate", json!({"url": "https://example.com"}))
                        .await
                })
                .await
        }
    });

    let request = read_frame(&mut server).await;
    write_frame(
        &mut server,
        &json!({
            "id": request["id"],
            "error": {"error": {"message": "net::ERR_FAILED", "name": "TargetError", "stack": "at z"}},
        }),
    )
    .await;

    let error = call.await.unwrap().unwrap_err();
    match error {
        Error::Remote { name, message, stack } => {
            assert_eq!(name, "TargetError");
            assert!(message.starts_with("session.navigate: "));
            assert!(message.contains("net::ERR_FAILED"));
            let stack = stack.unwrap();
            assert!(stack.contains("at z"));
            assert!(stack.contains("calls.rs"));
        }
        other => panic!("expected remote error, got {other}"),
    }
}

#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<String>>,
}

impl Instrumentation for Recorder {
    fn call_begin(&self, api_name: &str) {
        self.log.lock().push(format!("begin {api_name}"));
    }

    fn call_end(&self, api_name: &str, error: Option<&Error>) {
        let status = if error.is_some() { "err" } else { "ok" };
        self.log.lock().push(format!("end {api_name} {status}"));
    }
}

#[tokio::test]
async fn nested_wrapped_calls_report_once_to_nearest_sink() {
    let (connection, mut server) = connect();
    let recorder = Arc::new(Recorder::default());
    connection.root().unwrap().set_instrumentation(recorder.clone());

    write_create(&mut server, ROOT_GUID, "Session", "s1", json!({})).await;
    let session = connection
        .wait_for_object("s1", Duration::from_secs(1))
        .await
        .unwrap();
    let session = session.downcast_arc::<Session>().ok().unwrap();

    let call = tokio::spawn({
        let session = session.clone();
        async move {
            let inner_session = session.clone();
            session
                .core
                .wrap_api_call("session.openAndNavigate", move |_channel| async move {
                    // Composite operation: the inner wrapped call must not be
                    // reported separately.
                    inner_session
                        .core
                        .wrap_api_call("session.navigate", |channel| async move {
                            channel
                                .invoke("navigate", json!({"url": "https://example.com"}))
                                .await
                        })
                        .await
                })
                .await
        }
    });

    let request = read_frame(&mut server).await;
    write_frame(&mut server, &json!({"id": request["id"], "result": {"status": 200}})).await;

    let result = call.await.unwrap().unwrap();
    assert_eq!(result["status"], 200);

    let log = recorder.log.lock().clone();
    assert_eq!(
        log,
        vec![
            "begin session.openAndNavigate".to_string(),
            "end session.openAndNavigate ok".to_string(),
        ]
    );
}
