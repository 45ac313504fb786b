/// `/ws/updates` endpoint: an actix actor per connection, heartbeat via
/// `ctx.run_interval`, with a background task forwarding `Notify` wakeups
/// into the actor mailbox via `addr.do_send` whenever the broker has
/// buffered a new frame for this connection.
use super::broker::ConnId;
use super::AppState;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { symbols: Vec<String> },
    Unsubscribe { symbols: Vec<String> },
    Ping,
    Stats,
}

/// Tells the session a new frame is waiting in the broker's queue for it.
#[derive(Message)]
#[rtype(result = "()")]
struct Flush;

struct WsSession {
    id: ConnId,
    hb: Instant,
    state: web::Data<AppState>,
    notify: Arc<tokio::sync::Notify>,
}

impl WsSession {
    fn drain_and_send(&self, ctx: &mut ws::WebsocketContext<Self>) {
        while let Some(frame) = self.state.broker.pop(self.id) {
            ctx.text(frame);
        }
    }

    fn send_json(&self, ctx: &mut ws::WebsocketContext<Self>, value: serde_json::Value) {
        if let Ok(text) = serde_json::to_string(&value) {
            ctx.text(text);
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });

        let notify = Arc::clone(&self.notify);
        let addr = ctx.address();
        tokio::spawn(async move {
            loop {
                notify.notified().await;
                addr.do_send(Flush);
            }
        });

        self.send_json(
            ctx,
            serde_json::json!({
                "type": "connected",
                "message": "subscribed to candle-forecast push updates",
                "timestamp": Utc::now().timestamp_millis(),
            }),
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.state.broker.unregister(self.id);
    }
}

impl Handler<Flush> for WsSession {
    type Result = ();

    fn handle(&mut self, _msg: Flush, ctx: &mut Self::Context) {
        self.drain_and_send(ctx);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => return,
        };
        match msg {
            ws::Message::Text(text) => {
                self.hb = Instant::now();
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Subscribe { symbols }) => {
                        let symbols: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
                        self.state.broker.subscribe(self.id, &symbols);
                        self.send_json(
                            ctx,
                            serde_json::json!({
                                "type": "subscribed",
                                "symbols": symbols,
                                "timestamp": Utc::now().timestamp_millis(),
                            }),
                        );
                    }
                    Ok(ClientMessage::Unsubscribe { symbols }) => {
                        let symbols: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
                        self.state.broker.unsubscribe(self.id, &symbols);
                        self.send_json(
                            ctx,
                            serde_json::json!({
                                "type": "unsubscribed",
                                "symbols": symbols,
                                "timestamp": Utc::now().timestamp_millis(),
                            }),
                        );
                    }
                    Ok(ClientMessage::Ping) => {
                        self.send_json(
                            ctx,
                            serde_json::json!({
                                "type": "pong",
                                "timestamp": Utc::now().timestamp_millis(),
                            }),
                        );
                    }
                    Ok(ClientMessage::Stats) => {
                        let stats = self.state.broker.stats();
                        self.send_json(
                            ctx,
                            serde_json::json!({
                                "type": "stats",
                                "data": stats,
                                "timestamp": Utc::now().timestamp_millis(),
                            }),
                        );
                    }
                    Err(e) => {
                        self.send_json(
                            ctx,
                            serde_json::json!({
                                "type": "error",
                                "message": format!("malformed frame: {e}"),
                                "timestamp": Utc::now().timestamp_millis(),
                            }),
                        );
                    }
                }
            }
            ws::Message::Ping(bytes) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            ws::Message::Pong(_) => {
                self.hb = Instant::now();
            }
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => {}
        }
    }
}

pub async fn ws_updates(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (id, notify) = state.broker.register();
    let session = WsSession {
        id,
        hb: Instant::now(),
        state,
        notify,
    };
    ws::start(session, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::ClientMessage;

    #[test]
    fn parses_subscribe_and_unsubscribe() {
        let msg: ClientMessage = serde_json::from_str(r#"{"action":"subscribe","symbols":["btcusdt","ethusdt"]}"#).unwrap();
        match msg {
            ClientMessage::Subscribe { symbols } => assert_eq!(symbols, vec!["btcusdt", "ethusdt"]),
            other => panic!("expected Subscribe, got {other:?}"),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"action":"unsubscribe","symbols":["solusdt"]}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unsubscribe { .. }));
    }

    #[test]
    fn parses_ping_and_stats_with_no_payload() {
        assert!(matches!(serde_json::from_str::<ClientMessage>(r#"{"action":"ping"}"#).unwrap(), ClientMessage::Ping));
        assert!(matches!(serde_json::from_str::<ClientMessage>(r#"{"action":"stats"}"#).unwrap(), ClientMessage::Stats));
    }

    #[test]
    fn unknown_action_is_a_deserialize_error_not_a_panic() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }
}
