use crate::error::AppError;
use crate::middleware::auth::extract_token;
use crate::services::presence_service::PresenceService;
use crate::state::AppState;
use crate::websocket::handlers::handle_inbound;
use crate::websocket::message_types::InboundEvent;
use crate::websocket::ConnectionId;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

// WebSocket Actor
struct WsSession {
    user_id: Uuid,
    connection: ConnectionId,
    state: AppState,
    rx: Option<UnboundedReceiver<String>>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    fn new(
        user_id: Uuid,
        connection: ConnectionId,
        rx: UnboundedReceiver<String>,
        state: AppState,
    ) -> Self {
        let heartbeat_interval = state.config.ws_heartbeat_interval;
        let client_timeout = state.config.ws_client_timeout;
        Self {
            user_id,
            connection,
            state,
            rx: Some(rx),
            hb: Instant::now(),
            heartbeat_interval,
            client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let client_timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > client_timeout {
                tracing::warn!(user_id = %act.user_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user_id, connection = ?self.connection, "WebSocket session started");

        self.hb(ctx);

        // frames published to this connection arrive on the registry channel
        if let Some(rx) = self.rx.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }

        let state = self.state.clone();
        let connection = self.connection;
        actix::spawn(async move {
            PresenceService::register(state.store.as_ref(), &state.registry, connection).await;
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user_id, connection = ?self.connection, "WebSocket session stopped");

        let state = self.state.clone();
        let connection = self.connection;
        actix::spawn(async move {
            PresenceService::disconnect(state.store.as_ref(), &state.registry, connection).await;
        });
    }
}

// Outbound frames from the registry
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // channel closes when the registry pruned this connection; keep the socket
        tracing::debug!(connection = ?self.connection, "Registry channel closed");
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<InboundEvent>(&text) {
                    Ok(event) => {
                        let state = self.state.clone();
                        let connection = self.connection;
                        let user_id = self.user_id;
                        actix::spawn(async move {
                            if let Err(e) = handle_inbound(&state, connection, user_id, event).await
                            {
                                tracing::warn!(user_id = %user_id, error = %e, "Realtime event rejected");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse WS message: {:?}", e);
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("WebSocket close message received: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!("WebSocket protocol error: {:?}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

// HTTP handler
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let token = extract_token(&req).ok_or_else(|| {
        tracing::warn!("WebSocket connection rejected: no token provided");
        AppError::Unauthorized
    })?;
    let user_id = state.auth.verify(&token)?;

    let (connection, rx) = state.registry.connect(user_id).await;
    let session = WsSession::new(user_id, connection, rx, state.get_ref().clone());

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            // handshake failed before the actor started
            state.registry.disconnect(connection).await;
            Err(e)
        }
    }
}
