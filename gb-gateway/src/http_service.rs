use anyhow::Result;
use gb_core::sdp::SessionDescription;
use gb_core::{GatewayMessage, ManagerHandle, Ssrc};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::oneshot;

enum Route {
    Sdp,
    Stop(Ssrc),
    Publishers,
}

fn route(method: &Method, path: &str) -> Option<Route> {
    match (method, path) {
        (&Method::POST, "/sdp") => Some(Route::Sdp),
        (&Method::GET, "/publishers") => Some(Route::Publishers),
        (&Method::POST, _) => path
            .strip_prefix("/streams/")
            .and_then(|rest| rest.strip_suffix("/stop"))
            .and_then(|ssrc| ssrc.parse().ok())
            .map(Route::Stop),
        _ => None,
    }
}

fn reply(status: StatusCode, body: serde_json::Value) -> Result<Response<Body>> {
    let mut res = Response::new(Body::from(body.to_string()));
    *res.status_mut() = status;
    res.headers_mut()
        .insert("Access-Control-Allow-Origin", "*".parse()?);
    res.headers_mut()
        .insert("Content-Type", "application/json".parse()?);
    Ok(res)
}

async fn control(handle: ManagerHandle, req: Request<Body>) -> Result<Response<Body>> {
    let route = match route(req.method(), req.uri().path()) {
        Some(route) => route,
        None => {
            return Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::empty())?)
        }
    };

    match route {
        Route::Sdp => {
            let body = hyper::body::to_bytes(req.into_body()).await?;
            let sdp: SessionDescription = match serde_json::from_slice(&body) {
                Ok(sdp) => sdp,
                Err(e) => {
                    return reply(StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }))
                }
            };
            handle
                .send(GatewayMessage::SdpReceived(sdp))
                .map_err(|_| anyhow::anyhow!("ManagerSendFailed"))?;
            reply(StatusCode::ACCEPTED, json!({}))
        }
        Route::Stop(ssrc) => {
            handle
                .send(GatewayMessage::StopStream(ssrc))
                .map_err(|_| anyhow::anyhow!("ManagerSendFailed"))?;
            reply(StatusCode::OK, json!({ "stopped": ssrc }))
        }
        Route::Publishers => {
            let (request, receiver) = oneshot::channel();
            handle
                .send(GatewayMessage::Snapshot(request))
                .map_err(|_| anyhow::anyhow!("ManagerSendFailed"))?;
            let snapshot = receiver.await?;
            reply(StatusCode::OK, serde_json::to_value(snapshot)?)
        }
    }
}

/// Control and monitor endpoints:
/// `POST /sdp`, `POST /streams/<ssrc>/stop` and `GET /publishers`.
pub struct Service {
    handle: ManagerHandle,
    addr: SocketAddr,
}

impl Service {
    pub fn new(handle: ManagerHandle, addr: SocketAddr) -> Self {
        Self { handle, addr }
    }

    pub async fn run(&self) -> Result<()> {
        let handle_cp = self.handle.clone();
        let make_service = make_service_fn(move |_| {
            let handle_cp = handle_cp.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| control(handle_cp.clone(), req))) }
        });
        let server = Server::try_bind(&self.addr)?.serve(make_service);
        log::info!("control http service Listening on http://{}", self.addr);
        server.await?;
        Ok(())
    }
}
