//! End-to-end lifecycle tests: object creation, adoption, disposal, and event
//! routing driven through a scripted server over the pipe transport.

mod common;

use std::time::Duration;

use serde_json::json;

use tether_runtime::{Error, ROOT_GUID, Waiter};

use common::{Session, connect, read_frame, write_create, write_event, write_frame};

#[tokio::test]
async fn initialize_then_create_yields_live_session_under_root() {
    let (connection, mut server) = connect();
    let root = connection.root().unwrap();

    let initialize = tokio::spawn(async move { root.initialize().await });
    let request = read_frame(&mut server).await;
    assert_eq!(request["guid"], ROOT_GUID);
    assert_eq!(request["method"], "initialize");

    write_frame(
        &mut server,
        &json!({"id": request["id"], "result": {"sessionGuid": "s1"}}),
    )
    .await;
    write_create(&mut server, ROOT_GUID, "Session", "s1", json!({"label": "main"})).await;

    let result = initialize.await.unwrap().unwrap();
    assert_eq!(result["sessionGuid"], "s1");

    let session = connection
        .wait_for_object("s1", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(session.type_name(), "Session");
    assert_eq!(session.parent().unwrap().guid(), ROOT_GUID);
    assert_eq!(session.initializer()["label"], "main");
}

#[tokio::test]
async fn domain_events_reach_the_addressed_emitter_only() {
    let (connection, mut server) = connect();

    write_create(&mut server, ROOT_GUID, "Session", "s1", json!({})).await;
    write_create(&mut server, ROOT_GUID, "Session", "s2", json!({})).await;
    let s1 = connection
        .wait_for_object("s1", Duration::from_secs(1))
        .await
        .unwrap();
    let s2 = connection
        .wait_for_object("s2", Duration::from_secs(1))
        .await
        .unwrap();

    let mut s1_events = s1.emitter().subscribe();
    let mut s2_events = s2.emitter().subscribe();

    write_event(&mut server, "s1", "stateChanged", json!({"state": "busy"})).await;

    let event = s1_events.recv().await.unwrap();
    assert_eq!(event.name.as_ref(), "stateChanged");
    assert_eq!(event.params, json!({"state": "busy"}));
    assert!(s2_events.try_recv().is_err());
}

#[tokio::test]
async fn adoption_relinks_without_touching_identity() {
    let (connection, mut server) = connect();

    write_create(&mut server, ROOT_GUID, "Session", "s1", json!({})).await;
    write_create(&mut server, ROOT_GUID, "Session", "s2", json!({})).await;
    write_create(&mut server, "s1", "Worker", "w1", json!({})).await;
    let worker = connection
        .wait_for_object("w1", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(worker.parent().unwrap().guid(), "s1");

    write_event(&mut server, "s2", "__adopt__", json!({"guid": "w1"})).await;

    // Adoption is asynchronous from this side; wait until the link flips.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        if worker.parent().unwrap().guid() == "s2" {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "adoption never applied");
        tokio::task::yield_now().await;
    }

    assert_eq!(worker.guid(), "w1");
    assert_eq!(worker.type_name(), "Worker");
    assert!(!worker.is_disposed());

    let s1 = connection.object("s1").unwrap();
    let s1 = s1.downcast_arc::<Session>().ok().unwrap();
    assert!(s1.core.children().is_empty());
}

#[tokio::test]
async fn remote_dispose_cascades_through_the_subtree() {
    let (connection, mut server) = connect();

    write_create(&mut server, ROOT_GUID, "Session", "s1", json!({})).await;
    write_create(&mut server, "s1", "Worker", "w1", json!({})).await;
    let session = connection
        .wait_for_object("s1", Duration::from_secs(1))
        .await
        .unwrap();
    let worker = connection
        .wait_for_object("w1", Duration::from_secs(1))
        .await
        .unwrap();

    write_event(&mut server, "s1", "__dispose__", json!({})).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while connection.object("s1").is_some() {
        assert!(tokio::time::Instant::now() < deadline, "dispose never applied");
        tokio::task::yield_now().await;
    }

    assert!(session.is_disposed());
    assert!(worker.is_disposed());
    assert!(connection.object("w1").is_none());
}

#[tokio::test]
async fn waiter_resolves_with_first_matching_event() {
    let (connection, mut server) = connect();

    write_create(&mut server, ROOT_GUID, "Session", "s1", json!({})).await;
    let session = connection
        .wait_for_object("s1", Duration::from_secs(1))
        .await
        .unwrap();

    let mut waiter = Waiter::new();
    waiter.wait_for_event(&session.emitter(), "stateChanged", |params| {
        params["state"] == "idle"
    });
    waiter.reject_on_timeout(Duration::from_secs(5), "state never settled");

    write_event(&mut server, "s1", "stateChanged", json!({"state": "busy"})).await;
    write_event(&mut server, "s1", "stateChanged", json!({"state": "idle"})).await;

    let params = waiter.wait().await.unwrap();
    assert_eq!(params["state"], "idle");
    waiter.dispose();
}

#[tokio::test]
async fn waiter_poisoned_by_connection_close() {
    let (connection, mut server) = connect();

    write_create(&mut server, ROOT_GUID, "Session", "s1", json!({})).await;
    let session = connection
        .wait_for_object("s1", Duration::from_secs(1))
        .await
        .unwrap();

    let mut waiter = Waiter::new();
    waiter.wait_for_event(&session.emitter(), "stateChanged", |_| true);
    waiter.reject_on_event(
        &connection.emitter(),
        "closed",
        Error::ConnectionClosed("underlying transport went away".to_string()),
    );

    // EOF on the server half tears the connection down and fires `closed`.
    drop(server);

    let error = waiter.wait().await.unwrap_err();
    match error {
        Error::ConnectionClosed(reason) => assert!(reason.contains("transport went away")),
        other => panic!("expected connection closed, got {other}"),
    }
    waiter.dispose();
}
