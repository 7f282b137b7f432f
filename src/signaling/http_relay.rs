use anyhow::Result;
use hyper::client::HttpConnector;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Client, Method, Request, Response, StatusCode,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{InProcessBus, SignalingBus, Subscription, SubscriptionId};
use crate::internal::data_types::ParticipantId;
use crate::internal::events::SignalingMessage;

// signals for participants in other processes are POSTed as JSON to the relay serving them.
// each relay runs a small hyper server which hands inbound signals to its local subscribers

/// a `SignalingBus` spanning several processes on a LAN
#[derive(Clone)]
pub struct HttpRelay {
    local: InProcessBus,
    inner: Arc<Mutex<Routes>>,
}

#[derive(Default)]
struct Routes {
    /// where remote participants can be reached
    by_participant: HashMap<ParticipantId, SocketAddr>,
    /// one sender task per remote relay keeps per-recipient order
    outbound: HashMap<SocketAddr, mpsc::UnboundedSender<SignalingMessage>>,
}

impl Default for HttpRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRelay {
    pub fn new() -> Self {
        Self {
            local: InProcessBus::new(),
            inner: Arc::new(Mutex::new(Routes::default())),
        }
    }

    /// signals for `participant` are sent to the relay listening on `addr`
    pub fn add_route(&self, participant: &str, addr: SocketAddr) {
        log::debug!("routing signals for {} to {}", participant, addr);
        self.lock()
            .by_participant
            .insert(participant.to_string(), addr);
    }

    /// accepts `POST /signal` on `addr`. returns the bound address, useful when binding to port 0
    pub fn spawn_server(&self, addr: SocketAddr) -> Result<(SocketAddr, JoinHandle<()>)> {
        let bus = self.local.clone();
        let service = make_service_fn(move |_| {
            let bus = bus.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |req| remote_handler(bus.clone(), req)))
            }
        });
        let server = hyper::Server::try_bind(&addr)?.serve(service);
        let local_addr = server.local_addr();
        log::info!("signaling relay listening on {}", local_addr);

        let join = tokio::spawn(async move {
            if let Err(e) = server.await {
                log::error!("server error: {}", e);
            }
        });
        Ok((local_addr, join))
    }

    fn lock(&self) -> MutexGuard<'_, Routes> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn forward(&self, addr: SocketAddr, message: SignalingMessage) {
        let mut routes = self.lock();
        let message = match routes.outbound.get(&addr) {
            Some(tx) => match tx.send(message) {
                Ok(_) => return,
                // the sender task died. a new one is started below
                Err(e) => e.0,
            },
            None => message,
        };
        routes.outbound.remove(&addr);
        start_sender(&mut routes, addr, message);
    }
}

fn start_sender(routes: &mut Routes, addr: SocketAddr, first: SignalingMessage) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        log::error!("no runtime to send signals to {}. dropping {:?}", addr, first.kind);
        return;
    };
    let (tx, mut rx) = mpsc::unbounded_channel::<SignalingMessage>();
    let _ = tx.send(first);
    routes.outbound.insert(addr, tx);

    runtime.spawn(async move {
        let client = Client::builder().build::<_, Body>(HttpConnector::new());
        while let Some(message) = rx.recv().await {
            if let Err(e) = send_signal(&client, addr, &message).await {
                log::error!(
                    "failed to relay {:?} for {} to {}: {}",
                    message.kind,
                    message.to_id,
                    addr,
                    e
                );
            }
        }
    });
}

impl SignalingBus for HttpRelay {
    fn send(&self, message: SignalingMessage) {
        if self.local.has_subscriber(&message.to_id) {
            return self.local.send(message);
        }
        let addr = self.lock().by_participant.get(&message.to_id).copied();
        match addr {
            Some(addr) => self.forward(addr, message),
            None => log::debug!(
                "dropping {:?} from {}: no route to {}",
                message.kind,
                message.from_id,
                message.to_id
            ),
        }
    }

    fn subscribe(&self, participant: &str) -> Subscription {
        self.local.subscribe(participant)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.local.unsubscribe(id)
    }
}

async fn send_signal(
    client: &Client<HttpConnector>,
    addr: SocketAddr,
    message: &SignalingMessage,
) -> Result<()> {
    let req = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{}/signal", addr))
        .header("content-type", "application/json; charset=utf-8")
        .body(Body::from(message.to_json()?))?;
    let response = client.request(req).await?;
    if !response.status().is_success() {
        anyhow::bail!("relay answered {}", response.status());
    }
    Ok(())
}

async fn remote_handler(bus: InProcessBus, req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/signal") => {
            let body = hyper::body::to_bytes(req.into_body()).await?;
            let message = match serde_json::from_slice::<SignalingMessage>(&body) {
                Ok(m) => m,
                Err(err) => {
                    log::error!("deserialize error: {}", err);
                    *response.status_mut() = StatusCode::BAD_REQUEST;
                    return Ok(response);
                }
            };
            bus.send(message);
            Ok(response)
        }
        // Return the 404 Not Found for other routes.
        _ => {
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok(response)
        }
    }
}
