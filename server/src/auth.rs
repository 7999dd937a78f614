//! Shared-token authentication for push-channel sessions.
//!
//! When a token is configured, subscribe requests must carry it in the
//! `x-auth-token` header. The comparison runs in constant time. Requests that
//! fail are rejected with 401 before the handler runs, so no session state is
//! created for them.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use webhook_relay_server::auth::require_token;
//!
//! let app = Router::new().route(
//!     "/subscribe/:channel",
//!     get(subscribe).route_layer(require_token(Some("secret".into()))),
//! );
//! ```

use crate::error::AppError;
use axum::{
    extract::Request,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

pub use webhook_relay_core::event::AUTH_TOKEN_HEADER;

/// Create a layer that rejects requests without the expected token.
///
/// `None` lets every request through.
#[must_use]
pub const fn require_token(token: Option<Arc<str>>) -> RequireTokenLayer {
    RequireTokenLayer { token }
}

/// Whether `headers` satisfy `expected`.
#[must_use]
pub fn is_authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers.get(AUTH_TOKEN_HEADER).is_some_and(|value| {
        constant_time_eq::constant_time_eq(value.as_bytes(), expected.as_bytes())
    })
}

/// Layer for shared-token checks.
#[derive(Clone, Debug)]
pub struct RequireTokenLayer {
    token: Option<Arc<str>>,
}

impl<S> Layer<S> for RequireTokenLayer {
    type Service = RequireToken<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireToken {
            inner,
            token: self.token.clone(),
        }
    }
}

/// Middleware service for shared-token checks.
#[derive(Clone, Debug)]
pub struct RequireToken<S> {
    inner: S,
    token: Option<Arc<str>>,
}

impl<S> Service<Request> for RequireToken<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        if !is_authorized(req.headers(), self.token.as_deref()) {
            tracing::warn!(
                uri = %req.uri(),
                "Rejected subscribe request with missing or invalid token"
            );
            let response = AppError::unauthorized("Missing or invalid auth token").into_response();
            return Box::pin(async move { Ok(response) });
        }

        let fut = self.inner.call(req);
        Box::pin(fut)
    }
}
