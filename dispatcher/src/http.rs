use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;

use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::lifecycle::ShutdownSignal;
use crate::message::PaymentIntake;
use crate::pipeline::Dispatcher;
use crate::queue::SendOutcome;
use crate::store::PaymentRepository;

pub type HttpBody = BoxBody<Bytes, hyper::Error>;

fn empty() -> HttpBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn full<T: Into<Bytes>>(chunk: T) -> HttpBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn status(code: StatusCode) -> Response<HttpBody> {
    let mut res = Response::new(empty());
    *res.status_mut() = code;
    res
}

/// Shared state for every connection.
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn PaymentRepository>,
}

/// Accepts connections until `shutdown` fires, then lets open connections
/// finish their current request before returning.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, mut shutdown: ShutdownSignal) {
    let mut connections = JoinSet::new();

    loop {
        let stream = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);
        let mut signal = shutdown.clone();

        connections.spawn(async move {
            let service = service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(route(req, &state).await) }
            });

            let conn = http1::Builder::new().serve_connection(io, service);
            tokio::pin!(conn);

            let result = tokio::select! {
                res = conn.as_mut() => res,
                _ = signal.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };
            if let Err(err) = result {
                tracing::debug!(error = %err, "Error serving connection");
            }
        });

        while connections.try_join_next().is_some() {}
    }

    while connections.join_next().await.is_some() {}
    tracing::info!("HTTP server stopped");
}

/// Dispatches one request. Generic over the body so it can be driven
/// without a socket.
pub async fn route<B>(req: Request<B>, state: &AppState) -> Response<HttpBody>
where
    B: Body,
    B::Error: Display,
{
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => Response::new(full("OK")),
        (&Method::POST, "/payments") => accept_payment(req, &state.dispatcher).await,
        (&Method::GET, "/payments-summary") => {
            let params = parse_query_params(&req);
            let (from, to) = match (parse_instant(&params, "from"), parse_instant(&params, "to")) {
                (Ok(from), Ok(to)) => (from, to),
                _ => return status(StatusCode::BAD_REQUEST),
            };
            payments_summary(state.store.as_ref(), from, to).await
        }
        (&Method::POST, "/purge-payments") => match state.store.purge_all().await {
            Ok(()) => status(StatusCode::OK),
            Err(e) => {
                tracing::error!(error = %e, "Failed to purge payments");
                status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },
        _ => status(StatusCode::NOT_FOUND),
    }
}

async fn accept_payment<B>(req: Request<B>, dispatcher: &Dispatcher) -> Response<HttpBody>
where
    B: Body,
    B::Error: Display,
{
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            return status(StatusCode::BAD_REQUEST);
        }
    };

    let intake: PaymentIntake = match serde_json::from_slice(&body) {
        Ok(intake) => intake,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected malformed payment");
            return status(StatusCode::BAD_REQUEST);
        }
    };

    match dispatcher.submit(intake.correlation_id, intake.amount) {
        SendOutcome::Queued | SendOutcome::Overflowed => status(StatusCode::ACCEPTED),
        SendOutcome::Closed => status(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn payments_summary(
    store: &dyn PaymentRepository,
    from: Option<OffsetDateTime>,
    to: Option<OffsetDateTime>,
) -> Response<HttpBody> {
    let summary = match store.summary(from, to).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load payments summary");
            return status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    match serde_json::to_vec(&summary) {
        Ok(json) => {
            let mut ok = Response::new(full(json));
            ok.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            ok
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode payments summary");
            status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn parse_query_params<B>(req: &Request<B>) -> HashMap<String, String> {
    let query = req.uri().query().unwrap_or("");
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn parse_instant(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<Option<OffsetDateTime>, time::error::Parse> {
    params
        .get(key)
        .map(|s| OffsetDateTime::parse(s, &Rfc3339))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn request(uri: &str) -> Request<Empty<Bytes>> {
        Request::builder().uri(uri).body(Empty::new()).unwrap()
    }

    #[test]
    fn query_params_are_decoded() {
        let req = request("/payments-summary?from=2025-07-10T12%3A34%3A56.000Z&to=x");
        let params = parse_query_params(&req);

        assert_eq!(params.get("from").unwrap(), "2025-07-10T12:34:56.000Z");
        assert_eq!(params.get("to").unwrap(), "x");
    }

    #[test]
    fn instants_are_optional_but_must_be_rfc3339() {
        let mut params = HashMap::new();
        assert_eq!(parse_instant(&params, "from").unwrap(), None);

        params.insert("from".to_string(), "2025-07-10T12:34:56.000Z".to_string());
        assert_eq!(
            parse_instant(&params, "from").unwrap(),
            Some(datetime!(2025-07-10 12:34:56 UTC))
        );

        params.insert("to".to_string(), "yesterday".to_string());
        assert!(parse_instant(&params, "to").is_err());
    }
}
