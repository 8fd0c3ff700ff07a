//! Shared harness: a connection wired to a scripted server on the far end of
//! an in-memory duplex pipe. Tests read the frames the client sends and push
//! back handwritten responses and events.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use tether_protocol::{Catalog, Field, Shape, TypeSchema};
use tether_runtime::{
    Connection, PipeTransport, RemoteObject, RemoteObjectCore, TypeRegistry, impl_remote_object,
};

pub struct Session {
    pub core: RemoteObjectCore,
}

impl_remote_object!(Session, core);

pub struct Worker {
    pub core: RemoteObjectCore,
}

impl_remote_object!(Worker, core);

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.register_type(
        "Root",
        TypeSchema::new(Shape::empty_object()).method(
            "initialize",
            Shape::empty_object(),
            Shape::Any,
        ),
    );
    catalog.register_type(
        "Session",
        TypeSchema::new(Shape::Object(vec![Field::optional("label", Shape::String)]))
            .method(
                "navigate",
                Shape::Object(vec![Field::required("url", Shape::String)]),
                Shape::Object(vec![Field::optional("status", Shape::Number)]),
            )
            .event(
                "stateChanged",
                Shape::Object(vec![Field::required("state", Shape::String)]),
            )
            .event("closed", Shape::empty_object()),
    );
    catalog.register_type("Worker", TypeSchema::new(Shape::empty_object()));
    catalog
}

pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register("Session", |parent, guid, initializer| {
        let object: Arc<dyn RemoteObject> = Arc::new(Session {
            core: RemoteObjectCore::new(parent, "Session", guid, initializer),
        });
        Ok(object)
    });
    registry.register("Worker", |parent, guid, initializer| {
        let object: Arc<dyn RemoteObject> = Arc::new(Worker {
            core: RemoteObjectCore::new(parent, "Worker", guid, initializer),
        });
        Ok(object)
    });
    registry
}

/// Builds a connection over a duplex pipe and spawns its dispatch loop.
/// Returns the server half the test scripts against.
pub fn connect() -> (Arc<Connection>, DuplexStream) {
    let (client, server) = tokio::io::duplex(1 << 16);
    let (client_read, client_write) = tokio::io::split(client);
    let (transport, message_rx) = PipeTransport::new(client_write, client_read);
    let connection = Connection::new(
        transport.into_transport_parts(message_rx),
        registry(),
        Arc::new(catalog()),
    );
    tokio::spawn(connection.clone().run());
    (connection, server)
}

/// Reads one length-prefixed frame from the client.
pub async fn read_frame(server: &mut DuplexStream) -> Value {
    let mut prefix = [0u8; 4];
    server.read_exact(&mut prefix).await.unwrap();
    let mut body = vec![0u8; u32::from_le_bytes(prefix) as usize];
    server.read_exact(&mut body).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Writes one length-prefixed frame to the client.
pub async fn write_frame(server: &mut DuplexStream, value: &Value) {
    let payload = serde_json::to_vec(value).unwrap();
    server
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .unwrap();
    server.write_all(&payload).await.unwrap();
}

pub async fn write_event(server: &mut DuplexStream, guid: &str, method: &str, params: Value) {
    write_frame(server, &json!({"guid": guid, "method": method, "params": params})).await;
}

pub async fn write_create(
    server: &mut DuplexStream,
    parent: &str,
    type_name: &str,
    guid: &str,
    initializer: Value,
) {
    write_event(
        server,
        parent,
        "__create__",
        json!({"type": type_name, "guid": guid, "initializer": initializer}),
    )
    .await;
}
