use anyhow::{Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(25);
const IDLE_CHECK_PERIOD: Duration = Duration::from_secs(5);
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(90);

type SubscribeReply = oneshot::Sender<Result<(u64, mpsc::UnboundedReceiver<Value>)>>;

enum PubsubCommand {
    Subscribe {
        method: String,
        params: Value,
        reply: SubscribeReply,
    },
    Unsubscribe {
        method: String,
        subscription: u64,
        reply: oneshot::Sender<Result<()>>,
    },
}

enum Pending {
    Subscribe(SubscribeReply),
    Unsubscribe(oneshot::Sender<Result<()>>),
}

/// Handle to one JSON-RPC websocket connection. Notifications for each
/// subscription are routed to their own channel; the channel closes when the
/// connection dies.
#[derive(Clone)]
pub struct PubsubClient {
    commands: mpsc::UnboundedSender<PubsubCommand>,
}

impl PubsubClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| anyhow!("WebSocket connection timeout after {:?}", CONNECT_TIMEOUT))?
            .map_err(|e| anyhow!("WebSocket connection failed: {}", e))?;
        info!("✅ Connected to WebSocket: {}", url);

        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(ws_stream, command_rx));

        Ok(Self { commands })
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Sends `method` with `params` and waits for the subscription id.
    pub async fn subscribe(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(u64, mpsc::UnboundedReceiver<Value>)> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(PubsubCommand::Subscribe {
                method: method.to_string(),
                params,
                reply,
            })
            .map_err(|_| anyhow!("WebSocket connection is closed"))?;
        response
            .await
            .map_err(|_| anyhow!("WebSocket connection dropped before {} was acknowledged", method))?
    }

    pub async fn unsubscribe(&self, method: &str, subscription: u64) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(PubsubCommand::Unsubscribe {
                method: method.to_string(),
                subscription,
                reply,
            })
            .map_err(|_| anyhow!("WebSocket connection is closed"))?;
        response
            .await
            .map_err(|_| anyhow!("WebSocket connection dropped before {} was acknowledged", method))?
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run_connection(ws_stream: WsStream, mut commands: mpsc::UnboundedReceiver<PubsubCommand>) {
    let (mut write, mut read) = ws_stream.split();
    let mut router = Router::default();

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + HEARTBEAT_PERIOD,
        HEARTBEAT_PERIOD,
    );
    let mut idle_check = tokio::time::interval(IDLE_CHECK_PERIOD);
    let mut last_message = Instant::now();
    let mut ping_counter = 0u32;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                ping_counter = ping_counter.wrapping_add(1);
                if let Err(e) = write.send(Message::Ping(ping_counter.to_le_bytes().to_vec().into())).await {
                    warn!("💔 Heartbeat failed: {}", e);
                    break;
                }
                debug!("💓 Heartbeat sent ({})", ping_counter);
            }

            _ = idle_check.tick() => {
                if last_message.elapsed() > MESSAGE_TIMEOUT {
                    warn!("⏰ No messages received for {:?}, assuming connection is dead", MESSAGE_TIMEOUT);
                    break;
                }
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("🔄 All pubsub handles dropped, closing connection");
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let request = router.register(command);
                if let Err(e) = write.send(Message::Text(request.to_string().into())).await {
                    error!("❌ Failed to send request: {}", e);
                    break;
                }
            }

            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        last_message = Instant::now();
                        if let Err(e) = router.handle_text(&text) {
                            error!("❌ Error handling WebSocket message: {}", e);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_message = Instant::now();
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            error!("❌ Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_message = Instant::now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!("🔌 WebSocket connection closed: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {
                        last_message = Instant::now();
                    }
                    Some(Err(e)) => {
                        error!("❌ WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        warn!("🔌 WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    router.fail_pending();
}

/// Request/subscription bookkeeping for one connection.
#[derive(Default)]
struct Router {
    next_request_id: u64,
    pending: HashMap<u64, Pending>,
    subscriptions: HashMap<u64, mpsc::UnboundedSender<Value>>,
}

impl Router {
    fn register(&mut self, command: PubsubCommand) -> Value {
        self.next_request_id += 1;
        let id = self.next_request_id;
        match command {
            PubsubCommand::Subscribe {
                method,
                params,
                reply,
            } => {
                self.pending.insert(id, Pending::Subscribe(reply));
                json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
            }
            PubsubCommand::Unsubscribe {
                method,
                subscription,
                reply,
            } => {
                self.subscriptions.remove(&subscription);
                self.pending.insert(id, Pending::Unsubscribe(reply));
                json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": [subscription] })
            }
        }
    }

    fn handle_text(&mut self, text: &str) -> Result<()> {
        let message: Value = serde_json::from_str(text)?;

        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            let Some(pending) = self.pending.remove(&id) else {
                debug!("Response for unknown request {}", id);
                return Ok(());
            };
            let outcome = match message.get("error") {
                Some(err) if !err.is_null() => Err(anyhow!("RPC error: {}", err)),
                _ => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
            };
            match pending {
                Pending::Subscribe(reply) => {
                    let result = outcome.and_then(|result| {
                        let subscription = result
                            .as_u64()
                            .ok_or_else(|| anyhow!("Unexpected subscription result: {}", result))?;
                        let (tx, rx) = mpsc::unbounded_channel();
                        self.subscriptions.insert(subscription, tx);
                        debug!("✅ Subscription confirmed with ID: {}", subscription);
                        Ok((subscription, rx))
                    });
                    let _ = reply.send(result);
                }
                Pending::Unsubscribe(reply) => {
                    let _ = reply.send(outcome.map(|_| ()));
                }
            }
            return Ok(());
        }

        let Some(params) = message.get("params") else {
            return Ok(());
        };
        let Some(subscription) = params.get("subscription").and_then(Value::as_u64) else {
            return Ok(());
        };
        let result = params.get("result").cloned().unwrap_or(Value::Null);

        let delivered = self
            .subscriptions
            .get(&subscription)
            .map(|tx| tx.send(result).is_ok());
        if delivered == Some(false) {
            self.subscriptions.remove(&subscription);
        }
        Ok(())
    }

    fn fail_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            match pending {
                Pending::Subscribe(reply) => {
                    let _ = reply.send(Err(anyhow!("WebSocket connection ended")));
                }
                Pending::Unsubscribe(reply) => {
                    let _ = reply.send(Err(anyhow!("WebSocket connection ended")));
                }
            }
        }
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribe(router: &mut Router) -> (Value, oneshot::Receiver<Result<(u64, mpsc::UnboundedReceiver<Value>)>>) {
        let (reply, rx) = oneshot::channel();
        let request = router.register(PubsubCommand::Subscribe {
            method: "accountSubscribe".into(),
            params: json!(["key", { "commitment": "confirmed" }]),
            reply,
        });
        (request, rx)
    }

    #[tokio::test]
    async fn routes_notifications_by_subscription_id() {
        let mut router = Router::default();
        let (request, mut ack) = subscribe(&mut router);
        assert_eq!(request["method"], "accountSubscribe");
        assert_eq!(request["id"], 1);

        router
            .handle_text(r#"{"jsonrpc":"2.0","result":77,"id":1}"#)
            .unwrap();
        let (subscription, mut updates) = ack.try_recv().unwrap().unwrap();
        assert_eq!(subscription, 77);

        router
            .handle_text(
                r#"{"jsonrpc":"2.0","method":"accountNotification","params":{"subscription":77,"result":{"value":{"lamports":42}}}}"#,
            )
            .unwrap();
        router
            .handle_text(
                r#"{"jsonrpc":"2.0","method":"accountNotification","params":{"subscription":5,"result":{"value":{"lamports":1}}}}"#,
            )
            .unwrap();

        let update = updates.recv().await.unwrap();
        assert_eq!(update["value"]["lamports"], 42);
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn rpc_error_fails_the_subscription() {
        let mut router = Router::default();
        let (_, mut ack) = subscribe(&mut router);
        router
            .handle_text(r#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid params"},"id":1}"#)
            .unwrap();
        assert!(ack.try_recv().unwrap().is_err());
    }

    #[tokio::test]
    async fn dropping_the_connection_closes_subscriber_channels() {
        let mut router = Router::default();
        let (_, mut ack) = subscribe(&mut router);
        router.handle_text(r#"{"jsonrpc":"2.0","result":3,"id":1}"#).unwrap();
        let (_, mut updates) = ack.try_recv().unwrap().unwrap();
        let (_, mut second) = subscribe(&mut router);

        router.fail_pending();
        assert!(updates.recv().await.is_none());
        assert!(second.try_recv().unwrap().is_err());
    }

    #[test]
    fn unsubscribe_stops_routing() {
        let mut router = Router::default();
        let (_, mut ack) = subscribe(&mut router);
        router.handle_text(r#"{"jsonrpc":"2.0","result":9,"id":1}"#).unwrap();
        let (_, mut updates) = ack.try_recv().unwrap().unwrap();

        let (reply, mut done) = oneshot::channel();
        let request = router.register(PubsubCommand::Unsubscribe {
            method: "accountUnsubscribe".into(),
            subscription: 9,
            reply,
        });
        assert_eq!(request["params"], json!([9]));
        router.handle_text(r#"{"jsonrpc":"2.0","result":true,"id":2}"#).unwrap();
        assert!(done.try_recv().unwrap().is_ok());
        assert!(updates.try_recv().is_err());
        assert!(router.subscriptions.is_empty());
    }
}
