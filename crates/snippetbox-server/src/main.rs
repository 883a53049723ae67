use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use snippetbox_web::{AppState, AppStateInner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snippetbox=debug,tower_http=info".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("SNIPPETBOX_DB_PATH").unwrap_or_else(|_| "snippetbox.db".into());
    let static_dir =
        std::env::var("SNIPPETBOX_STATIC_DIR").unwrap_or_else(|_| "ui/static".into());
    let host = std::env::var("SNIPPETBOX_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SNIPPETBOX_PORT")
        .unwrap_or_else(|_| "4000".into())
        .parse()?;

    let db = snippetbox_db::Database::open(&PathBuf::from(&db_path))?;

    let swept = db.delete_expired_sessions()?;
    if swept > 0 {
        info!("removed {swept} expired sessions");
    }

    let state: AppState = Arc::new(AppStateInner { db });
    let app = snippetbox_web::router(state, &PathBuf::from(&static_dir));

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
