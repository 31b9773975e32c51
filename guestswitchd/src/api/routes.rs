use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::protocol::API_PREFIX;
use shared::types::AccessoryContext;
use crate::accessory::{GuestAccessory, Readiness, SetupOutcome};
use crate::host::BridgeHost;
use crate::identity::AccessoryId;
use crate::platform::Platform;

#[derive(Clone)]
pub struct AppState {
    pub platform: Arc<Platform>,
    pub host: Arc<BridgeHost>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessoryView {
    pub id: String,
    pub display_name: String,
    pub context: AccessoryContext,
    pub readiness: Readiness,
    pub on: bool,
    pub responding: bool,
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct PowerRequest {
    pub on: bool,
}

#[derive(Serialize)]
pub struct RebindResponse {
    pub outcome: &'static str,
    pub readiness: Readiness,
}

#[derive(Serialize)]
pub struct ServerView {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// False until the node list has been fetched successfully
    pub connected: bool,
    pub nodes: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/accessories", get(list_accessories))
        .route("/accessories/:id", get(get_accessory))
        .route("/accessories/:id/power", put(set_power))
        .route("/accessories/:id/rebind", post(rebind))
        .route("/servers", get(list_servers));

    Router::new()
        .nest(API_PREFIX, v1)
        .with_state(state)
}

fn view(state: &AppState, accessory: &GuestAccessory, on: bool) -> AccessoryView {
    let observed = state.host.observed(accessory.id());
    AccessoryView {
        id: accessory.id().to_string(),
        display_name: accessory.name().to_string(),
        context: accessory.context().clone(),
        readiness: accessory.readiness(),
        on,
        responding: observed.map(|o| o.responding).unwrap_or(true),
        observed_at: observed.map(|o| o.updated_at),
    }
}

fn find(state: &AppState, id: String) -> Result<Arc<GuestAccessory>, StatusCode> {
    state
        .platform
        .get(&AccessoryId::from(id))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_accessories(State(state): State<AppState>) -> Json<Vec<AccessoryView>> {
    let views = state
        .platform
        .accessories()
        .iter()
        .map(|a| view(&state, a, a.cached_power()))
        .collect();
    Json(views)
}

/// Answers from cache immediately; a not-responding accessory is a 503.
async fn get_accessory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<AccessoryView>), StatusCode> {
    let accessory = find(&state, id)?;
    let on = accessory.get_power();
    let view = view(&state, &accessory, on);

    let status = if view.responding {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(view)))
}

async fn set_power(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PowerRequest>,
) -> Result<Json<AccessoryView>, StatusCode> {
    let accessory = find(&state, id)?;
    accessory.set_power(request.on).await;
    Ok(Json(view(&state, &accessory, accessory.cached_power())))
}

async fn rebind(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RebindResponse>, StatusCode> {
    let id = AccessoryId::from(id);
    let outcome = state
        .platform
        .rebind(&id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    let (outcome, readiness) = match outcome {
        SetupOutcome::Ready => ("ready", Readiness::Ready),
        SetupOutcome::NotFound => ("not_found", Readiness::Unreachable),
        SetupOutcome::NodeUnreachable => ("node_unreachable", Readiness::Unreachable),
        SetupOutcome::ServerMissing => return Err(StatusCode::GONE),
    };
    Ok(Json(RebindResponse { outcome, readiness }))
}

async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerView>> {
    let servers = state
        .platform
        .registry()
        .connections()
        .iter()
        .map(|c| ServerView {
            name: c.server.name.clone(),
            host: c.server.host.clone(),
            port: c.server.port,
            connected: c.node_count() > 0,
            nodes: c.nodes().into_iter().map(|n| n.node).collect(),
        })
        .collect();
    Json(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use shared::types::{AccessoryType, GuestKind};
    use tower::ServiceExt;
    use crate::config::Config;
    use crate::pve::fake::{FakeConnector, FakePve};
    use crate::platform::PlatformOptions;
    use crate::registry::ServerRegistry;
    use crate::store::db::AccessoryDb;
    use crate::store_manager::StoreHandle;

    async fn app() -> (Router, Arc<FakePve>, String) {
        let api = FakePve::new();
        api.add_node("pve1");
        api.add_guest("pve1", GuestKind::Lxc, 200, "dns", "stopped");

        let config = Config::parse(
            r#"
            [[servers]]
            name = "home"
            host = "a"
            password = "pw"
            "#,
        )
        .unwrap();
        let registry = Arc::new(ServerRegistry::connect(
            &config.servers,
            &FakeConnector::default().with("home", api.clone()),
        ));
        let host = Arc::new(BridgeHost::new(StoreHandle::spawn(AccessoryDb::open(":memory:").unwrap())));
        let platform = Arc::new(Platform::new(
            registry,
            host.clone(),
            PlatformOptions {
                accessory_type: AccessoryType::Switch,
                polling_interval: None,
            },
        ));
        platform.start().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let id = platform.accessories()[0].id().to_string();
        (router(AppState { platform, host }), api, id)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let (app, _api, id) = app().await;

        let response = app
            .clone()
            .oneshot(Request::get("/v1/accessories").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let views: Vec<AccessoryView> = body_json(response).await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].display_name, "dns");
        assert_eq!(views[0].readiness, Readiness::Ready);

        let response = app
            .clone()
            .oneshot(Request::get(format!("/v1/accessories/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/v1/accessories/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_power_starts_guest() {
        let (app, api, id) = app().await;

        let response = app
            .oneshot(
                Request::put(format!("/v1/accessories/{}/power", id))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"on":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view: AccessoryView = body_json(response).await;
        assert!(view.on);
        assert!(view.responding);
        assert_eq!(api.count("start:200"), 1);
    }

    #[tokio::test]
    async fn test_not_responding_after_failed_refresh() {
        let (app, api, id) = app().await;
        api.fail_status(200, true);

        // First read kicks off the refresh that fails
        let response = app
            .clone()
            .oneshot(Request::get(format!("/v1/accessories/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let response = app
            .oneshot(Request::get(format!("/v1/accessories/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let view: AccessoryView = body_json(response).await;
        assert_eq!(view.readiness, Readiness::Unreachable);
        assert!(!view.responding);
    }

    #[tokio::test]
    async fn test_servers_listing() {
        let (app, _api, _id) = app().await;
        let response = app
            .oneshot(Request::get("/v1/servers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let servers: serde_json::Value = body_json(response).await;
        assert_eq!(servers[0]["name"], "home");
        assert_eq!(servers[0]["connected"], true);
        assert_eq!(servers[0]["nodes"][0], "pve1");
    }
}
