//! axum adapter for the callback broker.
//!
//! Translates axum's request/response types into the transport-agnostic
//! [`BrokerRequest`]/[`BrokerResponse`] pair. All decision logic lives in
//! [`CallbackBroker`]; this layer only shuttles data across the boundary.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Method, Response, StatusCode};
use axum::response::IntoResponse;

use crate::broker::{BrokerRequest, BrokerResponse, CallbackBroker};

/// ANY /api/callback — OAuth provider redirect target.
///
/// Registered for every method; the broker itself answers 405 for anything
/// but GET so the error body stays in the same JSON shape as the rest.
pub async fn callback(
    State(broker): State<Arc<CallbackBroker>>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
) -> Response<Body> {
    let request = BrokerRequest {
        method: method.as_str().to_string(),
        code: params.get("code").cloned(),
        state: params.get("state").cloned(),
    };

    into_http(broker.handle(&request))
}

/// Lower a [`BrokerResponse`] descriptor into a concrete HTTP response.
fn into_http(response: BrokerResponse) -> Response<Body> {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(*name, value);
    }
    let body = match response.body {
        Some(json) => Body::from(json.to_string()),
        None => Body::empty(),
    };

    builder.body(body).unwrap_or_else(|e| {
        // Only reachable if a header value is not valid HTTP header text.
        tracing::error!("failed to build response: {e}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}
