//! HTTP control plane for the live delay configuration.
//!
//! # Routes
//!
//! | Method   | Path                 | Effect                                |
//! |----------|----------------------|---------------------------------------|
//! | `GET`    | `/config`            | full table                            |
//! | `PUT`    | `/config`            | replace the table                     |
//! | `DELETE` | `/config`            | reset every category to the no-op     |
//! | `GET`    | `/config/{category}` | one delay model                       |
//! | `PUT`    | `/config/{category}` | replace one delay model               |
//! | `GET`    | `/status`            | `{"enabled": bool}`                   |
//! | `POST`   | `/enable`            | resume injection                      |
//! | `POST`   | `/disable`           | pause injection, keep the table       |
//!
//! Rejected requests carry `{"error": "<description>"}`. There is no
//! authentication; bind to loopback unless the network is trusted.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{ALLOW, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::delay::{ConfigStore, ConfigTable, DelayModel, OperationCategory};
use crate::error::Result;

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Body of `/status`, `/enable` and `/disable` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub enabled: bool,
}

/// Body of every rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

type HttpResponse = Response<Full<Bytes>>;

fn response(status: StatusCode, body: Vec<u8>) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => response(status, body),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn error(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    let body = ErrorBody {
        error: message.into(),
    };
    if status.is_client_error() {
        tracing::warn!(%status, error = %body.error, "control request rejected");
    }
    response(status, serde_json::to_vec(&body).unwrap_or_default())
}

fn method_not_allowed(allow: &'static str) -> HttpResponse {
    let mut response = error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(allow));
    response
}

/// Request router over a shared [`ConfigStore`].
#[derive(Clone)]
pub struct ControlApi {
    store: Arc<ConfigStore>,
}

impl ControlApi {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    /// Handle one request. Independent of the HTTP transport.
    pub fn respond(&self, method: &Method, path: &str, body: &[u8]) -> HttpResponse {
        if body.len() > MAX_BODY_BYTES {
            return error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["config"] => match method {
                &Method::GET => json(StatusCode::OK, &*self.store.snapshot()),
                &Method::PUT => self.put_table(body),
                &Method::DELETE => {
                    self.store.reset();
                    json(StatusCode::OK, &ConfigTable::default())
                }
                _ => method_not_allowed("GET, PUT, DELETE"),
            },
            ["config", name] => {
                let Ok(category) = name.parse::<OperationCategory>() else {
                    return error(
                        StatusCode::NOT_FOUND,
                        format!("unknown operation category: {name}"),
                    );
                };
                match method {
                    &Method::GET => json(StatusCode::OK, &self.store.get(category)),
                    &Method::PUT => self.put_category(category, body),
                    _ => method_not_allowed("GET, PUT"),
                }
            }
            ["status"] => match method {
                &Method::GET => self.status(),
                _ => method_not_allowed("GET"),
            },
            [switch @ ("enable" | "disable")] => match method {
                &Method::POST => {
                    self.store.set_enabled(*switch == "enable");
                    self.status()
                }
                _ => method_not_allowed("POST"),
            },
            _ => error(StatusCode::NOT_FOUND, format!("no such resource: {path}")),
        }
    }

    fn status(&self) -> HttpResponse {
        json(
            StatusCode::OK,
            &Status {
                enabled: self.store.is_enabled(),
            },
        )
    }

    fn put_category(&self, category: OperationCategory, body: &[u8]) -> HttpResponse {
        let model: DelayModel = match serde_json::from_slice(body) {
            Ok(model) => model,
            Err(e) => {
                return error(StatusCode::BAD_REQUEST, format!("malformed delay model: {e}"));
            }
        };
        match self.store.set_category(category, model) {
            Ok(()) => json(StatusCode::OK, &model),
            Err(e) => error(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }

    fn put_table(&self, body: &[u8]) -> HttpResponse {
        // Respond with what this request stored.
        let result = std::str::from_utf8(body)
            .map_err(|e| crate::Error::invalid_config(format!("body is not UTF-8: {e}")))
            .and_then(ConfigTable::from_json)
            .and_then(|table| self.store.set_all(table).map(|()| table));
        match result {
            Ok(table) => json(StatusCode::OK, &table),
            Err(e) => error(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }

    async fn handle(self, request: Request<Incoming>) -> std::result::Result<HttpResponse, Infallible> {
        let (parts, body) = request.into_parts();
        let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Ok(error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large"));
            }
            Err(e) => {
                return Ok(error(StatusCode::BAD_REQUEST, format!("failed to read body: {e}")));
            }
        };
        tracing::debug!(method = %parts.method, path = %parts.uri.path(), "control request");
        Ok(self.respond(&parts.method, parts.uri.path(), &body))
    }

    /// Serve HTTP/1.1 on `listener` until `shutdown` resolves.
    ///
    /// Each connection runs on its own task. Connections still open at
    /// shutdown are left to finish on their own.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "control server listening");
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "control accept failed");
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };

            let api = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |request| api.clone().handle(request));
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    tracing::debug!(%peer, error = %e, "control connection error");
                }
            });
        }

        tracing::info!(%addr, "control server stopped");
        Ok(())
    }
}
