//! `foxyblox-server`: a thin HTTP front end exposing `POST /upload/` over
//! the engine's `add` operation.
//!
//! Grounded on the dependency stack pulled in for this purpose (axum +
//! tokio, not present in the teacher crate) — see DESIGN.md.

use std::io::{Seek, SeekFrom, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tracing_subscriber::EnvFilter;

use foxyblox::config::Config;
use foxyblox::error::FoxyError;
use foxyblox::System;

struct AppState {
    system: System,
}

impl IntoResponse for FoxyErrorResponse {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FoxyError::NotFound(_) => StatusCode::NOT_FOUND,
            FoxyError::InputInvalid(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

struct FoxyErrorResponse(FoxyError);

impl From<FoxyError> for FoxyErrorResponse {
    fn from(e: FoxyError) -> Self {
        FoxyErrorResponse(e)
    }
}

/// `POST /upload/` accepts a multipart form with a `user`, `filename`, and
/// `file` field and stores the upload via [`System::add`].
async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<&'static str, FoxyErrorResponse> {
    let mut user: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        FoxyErrorResponse(FoxyError::input(format!("malformed multipart body: {e}")))
    })? {
        match field.name().unwrap_or_default() {
            "user" => {
                user = Some(field.text().await.map_err(|e| {
                    FoxyErrorResponse(FoxyError::input(format!("bad user field: {e}")))
                })?);
            }
            "filename" => {
                filename = Some(field.text().await.map_err(|e| {
                    FoxyErrorResponse(FoxyError::input(format!("bad filename field: {e}")))
                })?);
            }
            "file" => {
                let data = field.bytes().await.map_err(|e| {
                    FoxyErrorResponse(FoxyError::input(format!("bad file field: {e}")))
                })?;
                bytes = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let user = user.ok_or_else(|| FoxyErrorResponse(FoxyError::input("missing 'user' field")))?;
    let filename =
        filename.ok_or_else(|| FoxyErrorResponse(FoxyError::input("missing 'filename' field")))?;
    let bytes = bytes.ok_or_else(|| FoxyErrorResponse(FoxyError::input("missing 'file' field")))?;

    let mut tmp = tempfile::tempfile().map_err(|e| FoxyErrorResponse(FoxyError::io("upload tmp", e)))?;
    tmp.write_all(&bytes).map_err(|e| FoxyErrorResponse(FoxyError::io("upload tmp", e)))?;
    tmp.seek(SeekFrom::Start(0)).map_err(|e| FoxyErrorResponse(FoxyError::io("upload tmp", e)))?;

    // System::add does blocking file IO; run it off the async executor's
    // worker thread.
    tokio::task::spawn_blocking(move || state.system.add(&user, &filename, tmp))
        .await
        .map_err(|e| FoxyErrorResponse(FoxyError::unrecoverable(format!("upload task panicked: {e}"))))??;

    Ok("stored")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load_or_create(foxyblox::config::DEFAULT_CONFIG_PATH)?;
    config.init_local_dirs()?;
    let system = System::open(&config)?;
    let state = Arc::new(AppState { system });

    let app = Router::new().route("/upload/", post(upload)).with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 8080));
    tracing::info!(%addr, "foxyblox-server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
