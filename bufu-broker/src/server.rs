//! HTTP request server
//!
//! Translates `/popfile`, `/stats`, `/html/stats`, `/index.html` and
//! `/restart` requests into [`FileBroker`] calls. Replies are plain text,
//! each starting with a `version="…"` line.

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use bufu_broker_core::{BrokerError, FileBroker, ServerConfig, VERSION};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, warn};

type Params = HashMap<String, String>;

/// Why the server stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    Interrupted,
    /// A request hit an error the broker cannot recover from
    Fatal(String),
}

#[derive(Clone)]
pub struct AppState {
    broker: Arc<FileBroker>,
    fatal_tx: mpsc::UnboundedSender<String>,
}

impl AppState {
    /// State for the router, and the receiving end of fatal error reports
    pub fn new(broker: Arc<FileBroker>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        (Self { broker, fatal_tx }, fatal_rx)
    }

    fn report_fatal(&self, message: String) {
        // Receiver is gone once shutdown is under way
        let _ = self.fatal_tx.send(message);
    }

    /// Status and body of a text reply, version line included
    fn text_reply(&self, result: Result<String, ApiError>) -> (StatusCode, String) {
        let mut body = format!("version=\"{VERSION}\"\n");
        let status = match result {
            Ok(content) => {
                body.push_str(&content);
                StatusCode::OK
            }
            Err(ApiError::BadRequest(message)) => {
                body.push_str(&message);
                StatusCode::BAD_REQUEST
            }
            Err(ApiError::Broker(e)) => {
                error!("Request failed: {}", e);
                body.push_str(&format!("ERROR: {e}"));
                if e.is_fatal() {
                    self.report_fatal(e.to_string());
                }
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Err(ApiError::Task(e)) => {
                error!("Request task failed: {}", e);
                body.push_str(&format!("ERROR: {e}"));
                self.report_fatal(e.to_string());
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, body)
    }

    fn plain(&self, result: Result<String, ApiError>) -> Response {
        let (status, body) = self.text_reply(result);
        (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
    }
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Broker(BrokerError),
    Task(tokio::task::JoinError),
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        Self::Broker(e)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e)
    }
}

/// Run a broker call on the blocking pool; pops rename files and restarts join threads
async fn blocking<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&FileBroker) -> bufu_broker_core::Result<T> + Send + 'static,
{
    let broker = Arc::clone(&state.broker);
    Ok(tokio::task::spawn_blocking(move || call(&*broker)).await??)
}

fn optional_param(params: &Params, key: &str) -> Result<Option<u32>, ApiError> {
    let Some(value) = params.get(key) else {
        return Ok(None);
    };
    match value.parse::<u32>() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) if value.parse::<i64>().is_ok_and(|v| v < 0) => Err(ApiError::BadRequest(format!(
            "ERROR: Negative value present in the query parameter: '{key}={value}'"
        ))),
        Err(_) => Err(ApiError::BadRequest(format!(
            "ERROR: Cannot parse query parameter: '{key}={value}'"
        ))),
    }
}

fn required_param(params: &Params, key: &str) -> Result<u32, ApiError> {
    optional_param(params, key)?.ok_or_else(|| {
        ApiError::BadRequest(format!("ERROR: Parameter '{key}' was not found in the query."))
    })
}

async fn next_file(state: &AppState, params: &Params) -> Result<String, ApiError> {
    let run_number = required_param(params, "runnumber")?;
    let stop_ls = optional_param(params, "stopls")?;
    let reply = blocking(state, move |broker| broker.pop_run_file(run_number, stop_ls)).await?;
    Ok(reply.to_string())
}

async fn pop_file(State(state): State<AppState>, Query(params): Query<Params>) -> Response {
    let result = next_file(&state, &params).await;
    state.plain(result)
}

async fn run_stats(state: &AppState, params: &Params) -> Result<String, ApiError> {
    let run_number = optional_param(params, "runnumber")?;
    blocking(state, move |broker| broker.stats(run_number)).await
}

async fn stats(State(state): State<AppState>, Query(params): Query<Params>) -> Response {
    let result = run_stats(&state, &params).await;
    state.plain(result)
}

async fn html_stats(State(state): State<AppState>, Query(params): Query<Params>) -> Response {
    let result = run_stats(&state, &params).await;
    let (status, body) = state.text_reply(result);
    let page = format!(
        "<html>\n<head>\n<title>BUFU File Broker</title>\
         <meta http-equiv=\"refresh\" content=\"1\" /></head>\n\
         <body>\n<pre>\n{body}</pre>\n</body>\n</html>\n"
    );
    (status, Html(page)).into_response()
}

async fn index_page() -> Html<String> {
    let now = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
    Html(format!(
        "<html>\n<head><title>BUFU File Broker</title></head>\n<body>\n\
         <h1>BUFU File Broker is alive!</h1>\n<p>v{VERSION}</p>\n<p>{now}</p>\n\
         </body>\n</html>\n"
    ))
}

async fn restart_run(state: &AppState, params: &Params) -> Result<String, ApiError> {
    let run_number = required_param(params, "runnumber")?;
    info!("Restart requested for run {}", run_number);
    blocking(state, move |broker| broker.restart(run_number)).await
}

async fn restart(State(state): State<AppState>, Query(params): Query<Params>) -> Response {
    let result = restart_run(&state, &params).await;
    state.plain(result)
}

/// Build the router, with request tracing when asked for
pub fn router(state: AppState, debug_http_requests: bool) -> Router {
    let app = Router::new()
        .route("/popfile", get(pop_file))
        .route("/stats", get(stats))
        .route("/html/stats", get(html_stats))
        .route("/index.html", get(index_page))
        .route("/restart", get(restart))
        .with_state(state);

    if debug_http_requests {
        app.layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
    } else {
        app
    }
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Interrupted, shutting down");
}

/// Serve until interrupted or until a request fails fatally
pub async fn run(broker: Arc<FileBroker>, config: &ServerConfig) -> Result<Shutdown> {
    let (state, mut fatal_rx) = AppState::new(broker);
    let app = router(state, config.debug_http_requests);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener =
        TcpListener::bind(&addr).await.with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        "Starting HTTP server with {} thread(s) at {}",
        config.threads,
        listener.local_addr().context("Listener has no local address")?
    );

    let (reason_tx, reason_rx) = oneshot::channel();
    let signal = async move {
        let reason = tokio::select! {
            _ = interrupted() => Shutdown::Interrupted,
            Some(message) = fatal_rx.recv() => {
                error!("Fatal error, shutting down: {}", message);
                Shutdown::Fatal(message)
            }
        };
        let _ = reason_tx.send(reason);
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(signal)
        .await
        .context("HTTP server failed")?;

    info!("HTTP server finished");
    Ok(reason_rx.await.unwrap_or(Shutdown::Interrupted))
}
