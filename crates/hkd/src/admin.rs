//! Admin command service.
//!
//! Operators connect over TCP and send length-delimited JSON `AdminRequest`s.
//! Connection tasks never touch daemon state: each request is forwarded to
//! the main loop as an `AdminCall` and answered from its oneshot reply.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use hk_core::admin::{commands, AdminRequest, AdminResponse, Kick, SendMessage, SetMaintenance};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::daemon::Hub;

/// Default text sent with a kick when the operator gives none.
const DEFAULT_KICK_REASON: &str = "You have been kicked from the server.";

/// One admin request waiting for the main loop.
#[derive(Debug)]
pub struct AdminCall {
    pub request: AdminRequest,
    pub reply: oneshot::Sender<Result<Value>>,
}

type Handler = Box<dyn Fn(&mut Hub, &AdminRequest) -> Result<Value> + Send + Sync>;

/// Wrap a typed handler so it takes and returns JSON.
fn typed<P, R>(f: fn(&mut Hub, P) -> Result<R>) -> Handler
where
    P: DeserializeOwned + 'static,
    R: Serialize + 'static,
{
    Box::new(move |hub, req| {
        let args: P = req.payload_as()?;
        let out = f(hub, args)?;
        Ok(serde_json::to_value(out)?)
    })
}

/// Command name to handler.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl CommandRegistry {
    pub fn register(&mut self, name: &'static str, handler: Handler) -> Result<()> {
        if self.handlers.contains_key(name) {
            anyhow::bail!("admin command registered twice: {name}");
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Every known command has a handler and nothing else does.
    pub fn validate(&self) -> Result<()> {
        for name in commands::ALL {
            if !self.handlers.contains_key(name) {
                anyhow::bail!("admin command has no handler: {name}");
            }
        }
        for name in self.handlers.keys() {
            if !commands::ALL.contains(name) {
                anyhow::bail!("handler for unknown admin command: {name}");
            }
        }
        Ok(())
    }

    pub fn standard() -> Result<Self> {
        let mut reg = Self::default();
        reg.register(commands::STATUS, typed(status))?;
        reg.register(commands::PLAYER_LIST, typed(player_list))?;
        reg.register(commands::SEND_MESSAGE, typed(send_message))?;
        reg.register(commands::KICK, typed(kick))?;
        reg.register(commands::MAINTENANCE, typed(maintenance))?;
        reg.validate()?;
        Ok(reg)
    }

    pub fn dispatch(&self, hub: &mut Hub, req: &AdminRequest) -> Result<Value> {
        let handler = self
            .handlers
            .get(req.command.as_str())
            .with_context(|| format!("unknown command: {}", req.command))?;
        handler(hub, req)
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("CommandRegistry").field("commands", &names).finish()
    }
}

fn status(hub: &mut Hub, _: ()) -> Result<hk_core::admin::StatusReport> {
    Ok(hub.status())
}

fn player_list(hub: &mut Hub, _: ()) -> Result<Vec<hk_core::admin::PlayerEntry>> {
    hub.player_list()
}

fn send_message(hub: &mut Hub, args: SendMessage) -> Result<Value> {
    let delivered = hub.send_message(args.identity.as_deref(), &args.text);
    Ok(json!({ "delivered": delivered }))
}

fn kick(hub: &mut Hub, args: Kick) -> Result<Value> {
    let reason = args.reason.as_deref().unwrap_or(DEFAULT_KICK_REASON);
    let kicked = hub.kick(&args.identity, reason);
    if kicked == 0 {
        anyhow::bail!("no connected peer with identity {}", args.identity);
    }
    Ok(json!({ "kicked": kicked }))
}

fn maintenance(hub: &mut Hub, args: SetMaintenance) -> Result<Value> {
    hub.set_maintenance(args.enabled);
    Ok(json!({ "maintenance": args.enabled }))
}

/// Ask the main loop to run an admin command.
pub async fn call(tx: &mpsc::Sender<AdminCall>, request: AdminRequest) -> Result<Value> {
    let (reply, rx) = oneshot::channel();
    tx.send(AdminCall { request, reply })
        .await
        .map_err(|_| anyhow::anyhow!("daemon is shutting down"))?;
    rx.await
        .map_err(|_| anyhow::anyhow!("daemon dropped the request"))?
}

pub async fn serve(addr: String, tx: mpsc::Sender<AdminCall>, max_frame_bytes: usize) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("admin bind {addr}"))?;
    info!(addr = %addr, "admin service: listening");
    serve_listener(listener, tx, max_frame_bytes).await
}

async fn serve_listener(
    listener: TcpListener,
    tx: mpsc::Sender<AdminCall>,
    max_frame_bytes: usize,
) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!(addr = %addr, "admin client connected");
        let tx = tx.clone();
        tokio::spawn(async move {
            let framed = Framed::new(stream, hk_sync::frame_codec(max_frame_bytes));
            if let Err(e) = handle_client(framed, tx).await {
                warn!(addr = %addr, "admin client error: {e}");
            }
        });
    }
}

async fn handle_client(
    mut framed: Framed<TcpStream, LengthDelimitedCodec>,
    tx: mpsc::Sender<AdminCall>,
) -> Result<()> {
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let response = match AdminRequest::from_bytes(&frame) {
            Ok(req) => {
                info!(command = %req.command, key = %req.key, "admin command");
                let key = req.key.clone();
                match call(&tx, req).await {
                    Ok(result) => AdminResponse::ok(key, result),
                    Err(e) => AdminResponse::err(key, format!("{e:#}")),
                }
            }
            Err(e) => AdminResponse::err("", e.to_string()),
        };
        framed.send(Bytes::from(response.to_bytes()?)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::tests::{hub, join};
    use hk_core::admin::StatusReport;
    use hk_core::types::events;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn standard_registry_covers_every_command() {
        let reg = CommandRegistry::standard().unwrap();
        reg.validate().unwrap();
        assert!(format!("{reg:?}").contains("player-list"));
    }

    #[test]
    fn duplicate_and_missing_commands_are_caught() {
        let mut reg = CommandRegistry::default();
        reg.register(commands::STATUS, typed(status)).unwrap();
        assert!(reg.register(commands::STATUS, typed(status)).is_err());
        assert!(reg.validate().is_err());

        let mut reg = CommandRegistry::standard().unwrap();
        reg.register("reboot", typed(status)).unwrap();
        assert!(reg.validate().is_err());
    }

    fn req(command: &str, payload: Value) -> AdminRequest {
        AdminRequest::new("t", command, payload)
    }

    #[tokio::test]
    async fn dispatch_runs_typed_handlers() {
        let dir = TempDir::new().unwrap();
        let (mut hub, _kicks) = hub(&dir, Duration::from_secs(30));
        let reg = CommandRegistry::standard().unwrap();

        let out = reg
            .dispatch(&mut hub, &req(commands::MAINTENANCE, json!({"enabled": true})))
            .unwrap();
        assert_eq!(out, json!({"maintenance": true}));

        let status: StatusReport =
            serde_json::from_value(reg.dispatch(&mut hub, &req(commands::STATUS, Value::Null)).unwrap())
                .unwrap();
        assert!(status.maintenance);
        assert_eq!(status.connected_peers, 0);

        assert!(reg.dispatch(&mut hub, &req("reboot", Value::Null)).is_err());
        let err = reg
            .dispatch(&mut hub, &req(commands::MAINTENANCE, json!({"on": 1})))
            .unwrap_err();
        assert!(err.to_string().contains("bad payload for maintenance"));
    }

    #[tokio::test]
    async fn message_and_kick_reach_the_peer() {
        let dir = TempDir::new().unwrap();
        let (mut hub, _kicks) = hub(&dir, Duration::from_secs(30));
        let reg = CommandRegistry::standard().unwrap();
        let link = join(&mut hub, 1, "10.0.0.7", "Sigrid");
        link.take_sent();

        let out = reg
            .dispatch(&mut hub, &req(commands::SEND_MESSAGE, json!({"text": "restart in 5"})))
            .unwrap();
        assert_eq!(out, json!({"delivered": 1}));

        let out = reg
            .dispatch(&mut hub, &req(commands::KICK, json!({"identity": "10.0.0.7"})))
            .unwrap();
        assert_eq!(out, json!({"kicked": 1}));

        let sent: Vec<_> = link
            .take_sent()
            .into_iter()
            .map(|(e, _)| e)
            .filter(|e| e.as_str() != events::PROFILE)
            .collect();
        assert_eq!(sent, vec![events::MESSAGE, events::KICK_MESSAGE]);

        assert!(reg
            .dispatch(&mut hub, &req(commands::KICK, json!({"identity": "10.9.9.9"})))
            .is_err());
    }

    #[tokio::test]
    async fn tcp_requests_are_answered_by_the_main_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel::<AdminCall>(4);
        tokio::spawn(serve_listener(listener, tx, 64 * 1024));

        // Stand-in main loop
        tokio::spawn(async move {
            while let Some(call) = rx.recv().await {
                let result = match call.request.command.as_str() {
                    commands::STATUS => Ok(json!({"up": true})),
                    other => Err(anyhow::anyhow!("unknown command: {other}")),
                };
                let _ = call.reply.send(result);
            }
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Framed::new(stream, hk_sync::frame_codec(64 * 1024));

        let req = AdminRequest::new("a1", commands::STATUS, Value::Null);
        client.send(Bytes::from(req.to_bytes().unwrap())).await.unwrap();
        let resp = AdminResponse::from_bytes(&client.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp.key, "a1");
        assert!(resp.ok);
        assert_eq!(resp.result, Some(json!({"up": true})));

        let req = AdminRequest::new("a2", "reboot", Value::Null);
        client.send(Bytes::from(req.to_bytes().unwrap())).await.unwrap();
        let resp = AdminResponse::from_bytes(&client.next().await.unwrap().unwrap()).unwrap();
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("unknown command"));

        client.send(Bytes::from_static(b"not json")).await.unwrap();
        let resp = AdminResponse::from_bytes(&client.next().await.unwrap().unwrap()).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.key, "");
    }
}
