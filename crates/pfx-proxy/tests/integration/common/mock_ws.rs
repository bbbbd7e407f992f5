//! Mock pythd WebSocket server for integration tests.
//!
//! - answers `get_product_list` with a canned result or error
//! - records every JSON-RPC request it receives
//! - records the Close code sent by the client and acknowledges it
//! - counts accepted connections

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How the mock answers `get_product_list`.
#[derive(Debug, Clone)]
pub enum ProductListReply {
    Products(Value),
    Error { code: i64, message: String },
}

#[derive(Debug, Clone)]
pub struct MockOracleOptions {
    pub product_list: ProductListReply,
    /// Send Close(1001) right after answering `get_product_list`.
    pub close_after_product_list: bool,
}

impl MockOracleOptions {
    pub fn products(list: Value) -> Self {
        Self {
            product_list: ProductListReply::Products(list),
            close_after_product_list: false,
        }
    }
}

#[derive(Default)]
struct Recorded {
    requests: Vec<Value>,
    close_codes: Vec<u16>,
    connections: u32,
}

/// A mock oracle server for testing.
pub struct MockOracle {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockOracle {
    /// Start on an available port.
    pub async fn start(options: MockOracleOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let recorded_clone = recorded.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, options.clone(), recorded_clone.clone()));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            recorded,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        self.recorded.lock().await.connections
    }

    pub async fn requests(&self) -> Vec<Value> {
        self.recorded.lock().await.requests.clone()
    }

    /// `params` of every request with the given method, in arrival order.
    pub async fn params_of(&self, method: &str) -> Vec<Value> {
        self.requests()
            .await
            .into_iter()
            .filter(|r| r["method"] == method)
            .map(|r| r["params"].clone())
            .collect()
    }

    pub async fn close_codes(&self) -> Vec<u16> {
        self.recorded.lock().await.close_codes.clone()
    }

    /// Poll until `count` requests of `method` arrived or `deadline` passes.
    pub async fn wait_for(&self, method: &str, count: usize, deadline: Duration) -> bool {
        tokio::time::timeout(deadline, async {
            loop {
                if self.params_of(method).await.len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    options: MockOracleOptions,
    recorded: Arc<Mutex<Recorded>>,
) {
    recorded.lock().await.connections += 1;

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let Ok(request) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                recorded.lock().await.requests.push(request.clone());

                if request["method"] != "get_product_list" {
                    continue;
                }
                let reply = match &options.product_list {
                    ProductListReply::Products(list) => {
                        json!({"jsonrpc": "2.0", "id": request["id"], "result": list})
                    }
                    ProductListReply::Error { code, message } => json!({
                        "jsonrpc": "2.0",
                        "id": request["id"],
                        "error": {"code": code, "message": message}
                    }),
                };
                let _ = write.send(Message::Text(reply.to_string())).await;

                if options.close_after_product_list {
                    let frame = CloseFrame {
                        code: CloseCode::Away,
                        reason: "".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(frame)) => {
                let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                recorded.lock().await.close_codes.push(code);
                // Flushes the Close reply queued by the protocol layer.
                let _ = write.flush().await;
                break;
            }
            Err(_) => break,
            _ => {}
        }
    }
}

/// Product list with XAUUSD on two accounts and EURUSD on one.
pub fn sample_product_list() -> Value {
    json!([
        {
            "account": "xau-product",
            "attr_dict": {"symbol": "Metal.XAU/USD", "generic_symbol": "XAUUSD"},
            "price": [
                {"account": "xau-px-5", "price_exponent": -5, "price_type": "price"},
                {"account": "xau-px-3", "price_exponent": -3, "price_type": "price"}
            ]
        },
        {
            "account": "eur-product",
            "attr_dict": {"symbol": "FX.EUR/USD", "generic_symbol": "EURUSD"},
            "price": [{"account": "eur-px", "price_exponent": -5}]
        }
    ])
}
