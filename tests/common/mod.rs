//! Shared harness for integration tests: an in-process mock STOMP broker.
//!
//! The broker accepts WebSocket sessions, answers CONNECT with CONNECTED
//! (or an ERROR frame when auth rejection is scripted), records SUBSCRIBE
//! and SEND frames, and echoes every SEND back to the session's matching
//! room subscription — the contract the tests exercise end to end.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use souq_link::stomp::{Command, Frame, HeartBeat};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

pub struct MockBroker {
    addr: SocketAddr,
    state: Arc<BrokerState>,
    accept_task: JoinHandle<()>,
}

#[derive(Default)]
pub struct BrokerState {
    reject_auth: AtomicBool,
    required_token: Mutex<Option<String>>,
    connect_count: AtomicUsize,
    subscribes: Mutex<Vec<String>>,
    unsubscribes: Mutex<Vec<String>>,
    publishes: Mutex<Vec<Value>>,
    sessions: Mutex<HashMap<u64, mpsc::UnboundedSender<SessionCtl>>>,
    next_session: AtomicU64,
}

enum SessionCtl {
    Kill,
}

impl MockBroker {
    pub async fn start() -> MockBroker {
        let _ = env_logger::builder().is_test(true).try_init();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock broker");
        let addr = listener.local_addr().expect("mock broker local addr");
        let state = Arc::new(BrokerState::default());

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let state = accept_state.clone();
                        tokio::spawn(async move {
                            let _ = serve_session(stream, state).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        MockBroker {
            addr,
            state,
            accept_task,
        }
    }

    /// Base URL in the shape the client builder expects.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Reply to every CONNECT with an ERROR frame instead of CONNECTED.
    pub fn reject_auth(&self, reject: bool) {
        self.state.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Require this bearer token on the CONNECT frame.
    pub fn require_token(&self, token: &str) {
        *self.state.required_token.lock().unwrap() = Some(token.to_string());
    }

    /// Number of CONNECT frames seen.
    pub fn connect_count(&self) -> usize {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    /// SUBSCRIBE destinations, in order of arrival.
    pub fn subscribes(&self) -> Vec<String> {
        self.state.subscribes.lock().unwrap().clone()
    }

    /// UNSUBSCRIBE ids, in order of arrival.
    pub fn unsubscribes(&self) -> Vec<String> {
        self.state.unsubscribes.lock().unwrap().clone()
    }

    /// SEND frame bodies, in order of arrival.
    pub fn publishes(&self) -> Vec<Value> {
        self.state.publishes.lock().unwrap().clone()
    }

    /// `message` fields of the SEND bodies, in order of arrival.
    pub fn published_contents(&self) -> Vec<String> {
        self.publishes()
            .iter()
            .map(|body| body["message"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Forcibly close every live session, as a crashing broker would.
    pub fn kill_sessions(&self) {
        let sessions = self.state.sessions.lock().unwrap();
        for ctl in sessions.values() {
            let _ = ctl.send(SessionCtl::Kill);
        }
    }

    /// Stop accepting new connections; reconnect attempts are refused.
    pub fn stop_accepting(&self) {
        self.accept_task.abort();
    }
}

async fn serve_session(
    stream: TcpStream,
    state: Arc<BrokerState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ws = accept_async(stream).await?;
    let (ctl_tx, mut ctl_rx) = mpsc::unbounded_channel();
    let session_id = state.next_session.fetch_add(1, Ordering::SeqCst);
    state.sessions.lock().unwrap().insert(session_id, ctl_tx);

    // Subscription id → destination, for this session only.
    let mut subs: HashMap<String, String> = HashMap::new();
    let mut message_seq: u64 = 0;

    loop {
        tokio::select! {
            ctl = ctl_rx.recv() => match ctl {
                // Drop the socket without a close handshake, as a crashing
                // broker would.
                Some(SessionCtl::Kill) => break,
                None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
            frame = ws.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    _ => break,
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Ping(payload) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                        continue;
                    }
                    Message::Close(_) => break,
                    _ => continue,
                };
                let parsed = match Frame::parse(&text) {
                    Ok(Some(parsed)) => parsed,
                    _ => continue, // heart-beat or junk
                };
                match parsed.command {
                    Command::Connect => {
                        state.connect_count.fetch_add(1, Ordering::SeqCst);
                        let rejected = state.reject_auth.load(Ordering::SeqCst)
                            || !token_accepted(&state, &parsed);
                        if rejected {
                            let error = Frame::error("Unauthorized: invalid credentials");
                            let _ = ws.send(Message::Text(error.encode().into())).await;
                            let _ = ws.close(None).await;
                            break;
                        }
                        let connected = Frame::connected(&HeartBeat::DISABLED);
                        let _ = ws.send(Message::Text(connected.encode().into())).await;
                    }
                    Command::Subscribe => {
                        let id = parsed.header_value("id").unwrap_or_default().to_string();
                        let destination = parsed
                            .header_value("destination")
                            .unwrap_or_default()
                            .to_string();
                        state.subscribes.lock().unwrap().push(destination.clone());
                        subs.insert(id, destination);
                    }
                    Command::Unsubscribe => {
                        let id = parsed.header_value("id").unwrap_or_default().to_string();
                        state.unsubscribes.lock().unwrap().push(id.clone());
                        subs.remove(&id);
                    }
                    Command::Send => {
                        let body: Value = match serde_json::from_str(&parsed.body) {
                            Ok(body) => body,
                            Err(_) => continue,
                        };
                        state.publishes.lock().unwrap().push(body.clone());

                        let room = body["roomId"].as_str().unwrap_or_default().to_string();
                        let suffix = format!("/{}", room);
                        let target = subs
                            .iter()
                            .find(|(_, destination)| destination.ends_with(&suffix))
                            .map(|(id, destination)| (id.clone(), destination.clone()));
                        if let Some((sub_id, destination)) = target {
                            message_seq += 1;
                            let message_id = format!("m-{}", message_seq);
                            let delivery = json!({
                                "messageId": message_id,
                                "clientMessageId": body.get("clientMessageId").cloned().unwrap_or(Value::Null),
                                "type": body.get("type").cloned().unwrap_or_else(|| json!("TALK")),
                                "roomId": room,
                                "senderId": body.get("senderId").cloned().unwrap_or_else(|| json!("unknown")),
                                "message": body.get("message").cloned().unwrap_or_else(|| json!("")),
                                "timestamp": body.get("timestamp").cloned().unwrap_or_else(|| json!(0)),
                            });
                            let frame = Frame::message(
                                &destination,
                                &message_id,
                                &sub_id,
                                &delivery.to_string(),
                            );
                            let _ = ws.send(Message::Text(frame.encode().into())).await;
                        }
                    }
                    Command::Disconnect => {
                        // The client closes the socket right after; nothing
                        // to do.
                    }
                    _ => {}
                }
            }
        }
    }

    state.sessions.lock().unwrap().remove(&session_id);
    Ok(())
}

fn token_accepted(state: &BrokerState, connect: &Frame) -> bool {
    let required = state.required_token.lock().unwrap().clone();
    match required {
        Some(token) => {
            let expected = format!("Bearer {}", token);
            connect.header_value("Authorization") == Some(expected.as_str())
        }
        None => true,
    }
}
