//! psp-auth demo service
//!
//! Serves a few axum routes behind `AuthLayer`:
//!
//! - `GET /healthz` - unauthenticated
//! - `GET /me` - any valid token, echoes the caller's identity
//! - `GET /reports` - requires the `read` scope on this client
//! - `DELETE /reports` - requires the `admin` role on this client
//!
//! ```text
//! psp-auth-demo --discovery-url https://idp.example/realms/psp/.well-known/openid-configuration \
//!               --client-id myclient
//! psp-auth-demo --config auth.toml
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Logs go to stderr.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Extension, State};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use psp_auth::middleware::{AuthLayer, RequireLayer};
use psp_auth::{Auth, AuthConfig, Requirement, Token};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "psp-auth-demo", version, about = "Demo service protected by psp-auth")]
struct Args {
    /// Configuration file (TOML, YAML or JSON); overrides the flags below
    #[arg(long, env = "PSP_AUTH_CONFIG")]
    config: Option<PathBuf>,

    /// OpenID Connect discovery document URL
    #[arg(long, env = "PSP_AUTH_DISCOVERY_URL", required_unless_present = "config")]
    discovery_url: Option<String>,

    /// Client id tokens must be issued for
    #[arg(long, env = "PSP_AUTH_CLIENT_ID", required_unless_present = "config")]
    client_id: Option<String>,

    /// Client secret used for token introspection
    #[arg(long, env = "PSP_AUTH_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
}

impl Args {
    fn auth_config(&self) -> Result<AuthConfig> {
        if let Some(path) = &self.config {
            return AuthConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()));
        }

        let (Some(discovery_url), Some(client_id)) = (&self.discovery_url, &self.client_id) else {
            anyhow::bail!("--discovery-url and --client-id are required without --config");
        };
        let mut builder = AuthConfig::builder(discovery_url, client_id);
        if let Some(secret) = &self.client_secret {
            builder = builder.client_secret(secret);
        }
        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let auth = Arc::new(Auth::new(args.auth_config()?)?);

    let app = router(Arc::clone(&auth));
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(addr = %args.bind, client_id = auth.resource(), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

fn router(auth: Arc<Auth>) -> Router {
    let read = auth.require_scopes(["read"]);
    let admin = Requirement::resource_role(auth.resource(), "admin");

    Router::new()
        .route("/healthz", get(healthz))
        .route("/me", get(me))
        .route(
            "/reports",
            get(list_reports)
                .route_layer(RequireLayer::new(read))
                .merge(
                    axum::routing::delete(delete_reports).route_layer(RequireLayer::new(admin)),
                ),
        )
        .layer(AuthLayer::new(Arc::clone(&auth)).bypass_path("/healthz"))
        .with_state(auth)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn me(Extension(token): Extension<Token>) -> Json<Value> {
    let user = token.user();
    Json(json!({
        "sub": token.subject(),
        "username": user.username(),
        "name": user.full_name(),
        "email": user.email(),
        "scopes": token.scopes(),
    }))
}

async fn list_reports(State(auth): State<Arc<Auth>>) -> Json<Value> {
    Json(json!({
        "client": auth.resource(),
        "reports": ["daily", "weekly"],
    }))
}

async fn delete_reports(Extension(token): Extension<Token>) -> Json<Value> {
    info!(sub = token.subject().unwrap_or_default(), "Reports deleted");
    Json(json!({ "deleted": true }))
}
