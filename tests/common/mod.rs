#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use vsrpc::config::ServerConfig;
use vsrpc::context::AppContext;
use vsrpc::rpc::{CallContext, CallRegistry, Endpoint, MethodTable};
use vsrpc::services;
use vsrpc::web::RpcServer;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    pub replicas: u32,
    pub weight: f64,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub region: Option<String>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub ctx: AppContext,
    pub calls: CallRegistry,
    /// How many times the `Add` test handler actually ran.
    pub add_invocations: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn add_invocations(&self) -> usize {
        self.add_invocations.load(Ordering::SeqCst)
    }
}

fn test_endpoint(counter: Arc<AtomicUsize>) -> Endpoint {
    let table = MethodTable::new()
        .with("Echo", |_cx: CallContext, d: Deployment| async move {
            Ok::<_, anyhow::Error>(d)
        })
        .unwrap()
        .with("Add", move |_cx: CallContext, a: i64, b: i64| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(a + b)
            }
        })
        .unwrap()
        .with("Ping", |_cx: CallContext| async move {
            Ok::<_, anyhow::Error>("pong")
        })
        .unwrap();

    Endpoint::new("TestService", table).unwrap()
}

/// Start a server with every endpoint mounted, on a free port.
pub async fn start_server() -> TestServer {
    start_server_with(ServerConfig {
        debug_endpoints: true,
        ..ServerConfig::default()
    })
    .await
}

pub async fn start_server_with(config: ServerConfig) -> TestServer {
    let ctx = AppContext::new(config);
    let counter = Arc::new(AtomicUsize::new(0));

    let mut server = RpcServer::new(&ctx);
    for endpoint in services::endpoints(&ctx).unwrap() {
        server.mount(endpoint).unwrap();
    }
    server.mount(test_endpoint(counter.clone())).unwrap();

    let calls = server.calls().clone();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    TestServer {
        addr,
        ctx,
        calls,
        add_invocations: counter,
    }
}

pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: i64,
}

impl Client {
    pub async fn connect(addr: SocketAddr, endpoint: &str) -> Self {
        let url = format!("ws://{addr}/{endpoint}/v1.0");
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        Self { ws, next_id: 1 }
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(tungstenite::Message::text(text.to_string()))
            .await
            .expect("send");
    }

    pub async fn send_binary(&mut self, bytes: Vec<u8>) {
        self.ws
            .send(tungstenite::Message::binary(bytes))
            .await
            .expect("send");
    }

    /// Send a request and return its id without waiting for the response.
    pub async fn request(&mut self, method: &str, params: Value) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        let msg = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.send_raw(&msg.to_string()).await;
        id
    }

    pub async fn cancel(&mut self, id: i64) {
        let msg = json!({"jsonrpc": "2.0", "method": "$/cancelRequest", "params": {"id": id}});
        self.send_raw(&msg.to_string()).await;
    }

    /// Next JSON message from the server, or `None` once the connection is closed.
    pub async fn try_recv(&mut self) -> Option<Value> {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timeout waiting for message")?;
            match frame {
                Ok(tungstenite::Message::Text(text)) => {
                    return Some(serde_json::from_str(text.as_str()).expect("valid json"));
                }
                Ok(tungstenite::Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    pub async fn recv(&mut self) -> Value {
        self.try_recv().await.expect("connection closed")
    }

    /// Send a request and wait for its response, skipping anything else.
    pub async fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.request(method, params).await;
        loop {
            let msg = self.recv().await;
            if msg["id"] == json!(id) {
                return msg;
            }
        }
    }
}
