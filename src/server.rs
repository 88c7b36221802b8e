use std::convert::Infallible;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;

use crate::db::Database;
use crate::error::Error;
use crate::models::QuestionView;
use crate::session::{QuizOptions, SessionId, SessionManager};

/// Everything the request handlers need. The database connection is behind a
/// mutex because rusqlite connections are not `Sync`; contention is a
/// non-issue for a single local user.
pub struct AppState {
    db: Mutex<Database>,
    sessions: SessionManager,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db), sessions: SessionManager::new() }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Accept loop. Runs until the listener errors or the caller drops the
/// future (graceful shutdown selects against this).
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        log::trace!("accepted connection from {addr}");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(handle(req, &state).await) }
            });
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                log::error!("connection error from {addr}: {err}");
            }
        });
    }
}

#[derive(Deserialize)]
struct AnswerRequest {
    choice: String,
}

#[derive(Serialize)]
struct StartResponse {
    session_id: String,
    total: usize,
    question: QuestionView,
}

/// Routes a single request. Generic over the body type so tests can call it
/// with `Full<Bytes>` instead of a live connection's `Incoming`.
pub async fn handle<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_owned();
    log::info!("{} {}", parts.method, path);

    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            log::warn!("failed to read request body: {err}");
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match (&parts.method, segments.as_slice()) {
        (&Method::GET, ["api", "domains"]) => domains(state),
        (&Method::GET, ["api", "stats"]) => stats(state),
        (&Method::POST, ["api", "quiz"]) => start_quiz(state, &bytes),
        (&Method::GET, ["api", "quiz", sid]) => match parse_sid(sid) {
            Some(sid) => current_question(state, sid),
            None => unknown_session(),
        },
        (&Method::POST, ["api", "quiz", sid, "answer"]) => match parse_sid(sid) {
            Some(sid) => submit_answer(state, sid, &bytes),
            None => unknown_session(),
        },
        (&Method::GET, ["api", "quiz", sid, "results"]) => match parse_sid(sid) {
            Some(sid) => results(state, sid),
            None => unknown_session(),
        },
        (&Method::DELETE, ["api", "quiz", sid]) => match parse_sid(sid) {
            Some(sid) => discard(state, sid),
            None => unknown_session(),
        },
        (&Method::POST, ["api", "progress", "clear"]) => clear_progress(state),
        _ => error_response(StatusCode::NOT_FOUND, "no such route"),
    }
}

fn domains(state: &AppState) -> Response<Full<Bytes>> {
    match state.db().domain_counts() {
        Ok(domains) => json_response(StatusCode::OK, &json!({ "domains": domains })),
        Err(err) => error_from(err),
    }
}

fn stats(state: &AppState) -> Response<Full<Bytes>> {
    match state.db().stats() {
        Ok(stats) => json_response(StatusCode::OK, &stats),
        Err(err) => error_from(err),
    }
}

fn start_quiz(state: &AppState, body: &Bytes) -> Response<Full<Bytes>> {
    let opts: QuizOptions = if body.is_empty() {
        QuizOptions::default()
    } else {
        match serde_json::from_slice(body) {
            Ok(opts) => opts,
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("invalid request body: {err}"),
                )
            }
        }
    };
    if opts.count == Some(0) {
        return error_response(StatusCode::BAD_REQUEST, "count must be at least 1");
    }

    let db = state.db();
    match state.sessions.start_session(&db, &opts) {
        Ok(started) => json_response(
            StatusCode::CREATED,
            &StartResponse {
                session_id: format!("{:016x}", started.session_id),
                total: started.total,
                question: started.question,
            },
        ),
        Err(err) => error_from(err),
    }
}

fn current_question(state: &AppState, sid: SessionId) -> Response<Full<Bytes>> {
    let db = state.db();
    match state.sessions.current_question(&db, sid) {
        Ok(view) => json_response(StatusCode::OK, &view),
        Err(err) => error_from(err),
    }
}

fn submit_answer(state: &AppState, sid: SessionId, body: &Bytes) -> Response<Full<Bytes>> {
    let request: AnswerRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {err}"),
            )
        }
    };

    let db = state.db();
    match state.sessions.submit_answer(&db, sid, &request.choice) {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(err) => error_from(err),
    }
}

fn results(state: &AppState, sid: SessionId) -> Response<Full<Bytes>> {
    match state.sessions.summary(sid) {
        Ok(summary) => json_response(StatusCode::OK, &summary),
        Err(err) => error_from(err),
    }
}

fn discard(state: &AppState, sid: SessionId) -> Response<Full<Bytes>> {
    if state.sessions.discard(sid) {
        empty_response(StatusCode::NO_CONTENT)
    } else {
        unknown_session()
    }
}

fn clear_progress(state: &AppState) -> Response<Full<Bytes>> {
    match state.db().clear_progress() {
        Ok(cleared) => {
            log::info!("cleared progress on {cleared} questions");
            json_response(StatusCode::OK, &json!({ "cleared": cleared }))
        }
        Err(err) => error_from(err),
    }
}

fn parse_sid(raw: &str) -> Option<SessionId> {
    SessionId::from_str_radix(raw, 16).ok()
}

fn unknown_session() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "unknown or expired quiz session")
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::QuestionNotFound(_) | Error::SessionNotStarted => StatusCode::NOT_FOUND,
        Error::EmptyPool
        | Error::SessionComplete
        | Error::SessionInProgress
        | Error::InvalidChoice(_)
        | Error::InvalidQuestion(_) => StatusCode::BAD_REQUEST,
        Error::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_from(err: Error) -> Response<Full<Bytes>> {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        log::error!("request failed: {err}");
    } else {
        log::warn!("request rejected: {err}");
    }
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "error": message }))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(err) => {
            log::error!("failed to serialize response: {err}");
            return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
