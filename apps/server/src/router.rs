use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::middleware;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{is_loopback_host, ServerConfig};
use crate::handlers;
use crate::state::AppState;

const JSON_BODY_LIMIT: usize = 10 * 1024 * 1024;

fn origin_allowed(config: &ServerConfig, origin: &str) -> bool {
    if origin == "null" {
        return config.allow_null_origin;
    }
    if origin.starts_with("file://") {
        return config.allow_file_origin;
    }
    if config.client_origins.iter().any(|o| o == origin) {
        return true;
    }
    // Loopback origins are always welcome; the desktop client and the GUI
    // manager talk from the same box.
    reqwest::Url::parse(origin)
        .ok()
        .and_then(|url| url.host_str().map(is_loopback_host))
        .unwrap_or(false)
}

/// Builds the application router with all middleware and routes.
pub fn build_router(state: AppState) -> axum::Router {
    let cors_config = state.config.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| origin_allowed(&cors_config, o))
                .unwrap_or(false)
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-remus-admin-key"),
        ]);

    let guild_scoped = axum::Router::new()
        .nest("/{guild_id}/channels", handlers::channels::guild_routes())
        .nest("/{guild_id}/roles", handlers::roles::guild_routes())
        .nest("/{guild_id}/members", handlers::members::routes());

    let api = axum::Router::new()
        .route("/health", axum::routing::get(handlers::server::health))
        .route("/server/info", axum::routing::get(handlers::server::info))
        .route("/server/icon", axum::routing::get(handlers::server::icon))
        .nest("/guilds", handlers::guilds::routes().merge(guild_scoped))
        .nest("/channels/{channel_id}", handlers::channels::detail_routes())
        .nest(
            "/channels/{channel_id}/messages",
            handlers::messages::routes(),
        )
        .nest("/roles", handlers::roles::detail_routes())
        .nest(
            "/files",
            handlers::files::routes().layer(DefaultBodyLimit::max(
                state.config.file_limit_bytes() as usize + 1024 * 1024,
            )),
        )
        .nest("/admin", handlers::admin::routes());

    axum::Router::new()
        .nest("/api", api)
        .nest("/ws", handlers::ws::routes())
        .nest_service(
            "/uploads",
            ServeDir::new(state.config.uploads_path()).append_index_html_on_directories(false),
        )
        .nest_service(
            "/role-icons",
            ServeDir::new(state.config.role_icons_path()).append_index_html_on_directories(false),
        )
        .layer(middleware::from_fn(security_headers))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Security headers on every response; HSTS only when the request arrived
/// over TLS (terminated upstream).
async fn security_headers(
    request: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    let tls = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|proto| proto.eq_ignore_ascii_case("https"))
        .unwrap_or(false);

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-XSS-Protection",
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static(
            "default-src 'self'; img-src 'self' data: blob:; media-src 'self' blob:; \
             connect-src 'self' ws: wss:; object-src 'none'; frame-ancestors 'none'",
        ),
    );
    if tls {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(origins: &[&str], allow_null: bool, allow_file: bool) -> ServerConfig {
        ServerConfig {
            client_origins: origins.iter().map(|s| s.to_string()).collect(),
            allow_null_origin: allow_null,
            allow_file_origin: allow_file,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn loopback_origins_are_always_allowed() {
        let config = config_with(&[], false, false);
        assert!(origin_allowed(&config, "http://localhost:1420"));
        assert!(origin_allowed(&config, "http://127.0.0.1:3000"));
        assert!(origin_allowed(&config, "http://[::1]:8080"));
    }

    #[test]
    fn configured_origins_are_allowed() {
        let config = config_with(&["https://chat.example.com"], false, false);
        assert!(origin_allowed(&config, "https://chat.example.com"));
        assert!(!origin_allowed(&config, "https://evil.example.com"));
    }

    #[test]
    fn null_and_file_origins_are_opt_in() {
        let closed = config_with(&[], false, false);
        assert!(!origin_allowed(&closed, "null"));
        assert!(!origin_allowed(&closed, "file://"));

        let open = config_with(&[], true, true);
        assert!(origin_allowed(&open, "null"));
        assert!(origin_allowed(&open, "file://"));
    }
}
