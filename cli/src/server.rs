use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use larder_core::SyncError;
use larder_core::models::{
    Entity, EntityKind, FoodItem, MealLine, NewRecipe, Nutrients, Recipe, ServingSize,
    Visibility,
};
use larder_core::service::LarderService;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    service: Arc<LarderService>,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    kind: Option<String>,
    locale: Option<String>,
}

#[derive(Deserialize)]
struct RecipeParams {
    servings: Option<f64>,
}

#[derive(Deserialize)]
struct ListRecipesParams {
    visibility: Option<String>,
}

#[derive(Deserialize)]
struct CreateFoodRequest {
    name: String,
    brand: Option<String>,
    calories: f64,
    #[serde(default)]
    carbohydrates: f64,
    #[serde(default)]
    protein: f64,
    #[serde(default)]
    fat: f64,
    #[serde(default = "default_servings")]
    servings: u32,
    #[serde(default = "default_serving_size")]
    serving_size: ServingSize,
}

fn default_servings() -> u32 {
    1
}

fn default_serving_size() -> ServingSize {
    ServingSize::HundredGrams
}

#[derive(Deserialize)]
struct AddIngredientRequest {
    food_id: String,
    quantity_g: f64,
}

#[derive(Deserialize)]
struct MealTotalsRequest {
    lines: Vec<MealLine>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    Sync(SyncError),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Sync(err @ (SyncError::Storage(_) | SyncError::StaleReference { .. })) => {
                tracing::error!("Internal server error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Self::Sync(err) => {
                let status = StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                (status, err.to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self::Sync(err)
    }
}

fn parse_kind(kind: &str) -> Result<EntityKind, ApiError> {
    kind.parse()
        .map_err(|e: SyncError| ApiError::BadRequest(e.to_string()))
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Entity>>, ApiError> {
    let kind = match params.kind.as_deref() {
        Some(kind) => parse_kind(kind)?,
        None => EntityKind::FoodItem,
    };
    let locale = params.locale.unwrap_or_default();
    let results = state.service.search(&params.q, kind, &locale).await?;
    Ok(Json(results))
}

async fn get_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Entity>, ApiError> {
    let kind = parse_kind(&kind)?;
    let entity = state.service.lookup(kind, &id).await?;
    Ok(Json(entity))
}

async fn create_food(
    State(state): State<AppState>,
    Json(req): Json<CreateFoodRequest>,
) -> Result<(StatusCode, Json<FoodItem>), ApiError> {
    let food = state.service.save_food(FoodItem {
        id: String::new(),
        name: req.name,
        brand: req.brand,
        nutrients: Nutrients::new(req.calories, req.carbohydrates, req.protein, req.fat),
        servings: req.servings,
        serving_size: req.serving_size,
        source: String::new(),
        created_at: String::new(),
        updated_at: String::new(),
    })?;
    Ok((StatusCode::CREATED, Json(food)))
}

async fn create_recipe(
    State(state): State<AppState>,
    Json(req): Json<NewRecipe>,
) -> Result<(StatusCode, Json<Recipe>), ApiError> {
    let recipe = state.service.create_recipe(&req)?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

async fn list_recipes(
    State(state): State<AppState>,
    Query(params): Query<ListRecipesParams>,
) -> Result<Json<Vec<Recipe>>, ApiError> {
    let visibility = params
        .visibility
        .as_deref()
        .map(str::parse::<Visibility>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.service.list_recipes(visibility)?))
}

/// Recipe detail, or totals scaled to `?servings=` when given. Unknown ids
/// are fetched from the remote first.
async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RecipeParams>,
) -> Result<Response, ApiError> {
    state.service.lookup(EntityKind::Recipe, &id).await?;
    match params.servings {
        Some(servings) => Ok(Json(state.service.scale_recipe(&id, servings)?).into_response()),
        None => Ok(Json(state.service.recipe_detail(&id)?).into_response()),
    }
}

async fn add_ingredient(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AddIngredientRequest>,
) -> Result<Json<Recipe>, ApiError> {
    let recipe = state
        .service
        .add_ingredient(&id, &req.food_id, req.quantity_g)?;
    Ok(Json(recipe))
}

async fn meal_totals(
    State(state): State<AppState>,
    Json(req): Json<MealTotalsRequest>,
) -> Result<Json<Nutrients>, ApiError> {
    if req.lines.is_empty() {
        return Err(ApiError::BadRequest(
            "A meal needs at least one line".to_string(),
        ));
    }
    Ok(Json(state.service.meal_totals(&req.lines)?))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", get(search))
        .route("/api/foods", post(create_food))
        .route("/api/recipes", post(create_recipe).get(list_recipes))
        .route("/api/recipes/{id}", get(get_recipe))
        .route("/api/recipes/{id}/ingredients", post(add_ingredient))
        .route("/api/meals/totals", post(meal_totals))
        .route("/api/{kind}/{id}", get(get_entity))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(service: LarderService, port: u16, bind: &str) -> anyhow::Result<()> {
    let state = AppState {
        service: Arc::new(service),
    };
    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        eprintln!(
            "Warning: Listening on {bind}. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    eprintln!("Listening on http://{bind}:{port}");
    tracing::info!(%bind, port, "api server started");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use larder_core::config::SyncConfig;
    use larder_core::error::SyncResult;
    use larder_core::remote::{Ack, RemoteLookupService};
    use larder_core::wire::{WireEntity, WireFoodItem};
    use tower::ServiceExt;

    struct MockRemote {
        fail_with: Option<u16>,
    }

    fn wire_food(id: &str, name: &str) -> WireFoodItem {
        WireFoodItem {
            id: id.to_string(),
            name: name.to_string(),
            brand: None,
            calories: 200.0,
            carbohydrates: 30.0,
            protein: 8.0,
            fat: 4.0,
            servings: Some(1),
            serving_size_g: Some(100.0),
            source: Some("remote".to_string()),
        }
    }

    #[async_trait]
    impl RemoteLookupService for MockRemote {
        async fn search(
            &self,
            query: &str,
            kind: EntityKind,
            _locale: &str,
        ) -> SyncResult<Vec<WireEntity>> {
            if let Some(code) = self.fail_with {
                return Err(SyncError::remote(code, "upstream down"));
            }
            if kind == EntityKind::Recipe {
                return Ok(Vec::new());
            }
            Ok(vec![WireEntity::FoodItem(wire_food(
                &format!("r:{query}"),
                &format!("Remote {query}"),
            ))])
        }

        async fn fetch_by_id(&self, kind: EntityKind, id: &str) -> SyncResult<WireEntity> {
            if kind == EntityKind::FoodItem && id == "r:bread" {
                return Ok(WireEntity::FoodItem(wire_food(id, "Remote bread")));
            }
            Err(SyncError::remote(404, "Not Found"))
        }

        async fn upload(&self, entity: &WireEntity) -> SyncResult<WireEntity> {
            Ok(entity.clone())
        }

        async fn report(&self, _kind: EntityKind, _id: &str, _reason: &str) -> SyncResult<Ack> {
            Ok(Ack {
                accepted: true,
                message: None,
            })
        }
    }

    fn test_app_with(remote: MockRemote) -> (Router, Arc<LarderService>) {
        let service =
            Arc::new(LarderService::open_in_memory(Arc::new(remote), SyncConfig::default()).unwrap());
        let app = build_router(AppState {
            service: service.clone(),
        });
        (app, service)
    }

    fn test_app() -> (Router, Arc<LarderService>) {
        test_app_with(MockRemote { fail_with: None })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::post(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn search_returns_remote_results() {
        let (app, service) = test_app();

        let response = app.oneshot(get("/api/search?q=bread")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["kind"], "food_item");
        assert_eq!(json[0]["name"], "Remote bread");

        // Persisted locally as a side effect
        assert_eq!(service.get_food("r:bread").unwrap().name, "Remote bread");
    }

    #[tokio::test]
    async fn search_blank_query_is_empty() {
        let (app, _) = test_app();

        let response = app.oneshot(get("/api/search?q=%20%20")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn search_unknown_kind_returns_400() {
        let (app, _) = test_app();

        let response = app
            .oneshot(get("/api/search?q=bread&kind=drink"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_remote_failure_keeps_status() {
        let (app, _) = test_app_with(MockRemote {
            fail_with: Some(503),
        });

        let response = app.oneshot(get("/api/search?q=bread")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("upstream down"));
    }

    #[tokio::test]
    async fn get_entity_fetches_remote() {
        let (app, _) = test_app();

        let response = app.oneshot(get("/api/food/r:bread")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["id"], "r:bread");
    }

    #[tokio::test]
    async fn get_entity_not_found_returns_404() {
        let (app, _) = test_app();

        let response = app.oneshot(get("/api/food/r:nothing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn recipe_detail_and_scaling() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/foods",
                &serde_json::json!({ "name": "Rice", "calories": 360.0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let food_id = body_json(response).await["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/recipes",
                &serde_json::json!({ "name": "Rice bowl", "servings": 2.0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let recipe = body_json(response).await;
        assert_eq!(recipe["visibility"], "owner");
        let recipe_id = recipe["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/recipes/{recipe_id}/ingredients"),
                &serde_json::json!({ "food_id": food_id, "quantity_g": 300.0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get(&format!("/api/recipes/{recipe_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let detail = body_json(response).await;
        assert!((detail["total_weight_g"].as_f64().unwrap() - 300.0).abs() < 1e-9);
        assert!((detail["per_serving"]["calories"].as_f64().unwrap() - 540.0).abs() < 1e-9);

        let response = app
            .oneshot(get(&format!("/api/recipes/{recipe_id}?servings=4")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let scaled = body_json(response).await;
        assert!((scaled["totals"]["calories"].as_f64().unwrap() - 2160.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn create_food_rejects_negative_nutrients() {
        let (app, _) = test_app();

        let response = app
            .oneshot(post_json(
                "/api/foods",
                &serde_json::json!({ "name": "Ghost", "calories": -1.0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn meal_totals_sums_lines() {
        let (app, service) = test_app();
        service
            .lookup(EntityKind::FoodItem, "r:bread")
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/meals/totals",
                &serde_json::json!({
                    "lines": [{ "kind": "food_item", "id": "r:bread", "quantity": 50.0 }]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let totals = body_json(response).await;
        assert!((totals["calories"].as_f64().unwrap() - 100.0).abs() < 1e-9);

        let response = app
            .oneshot(post_json(
                "/api/meals/totals",
                &serde_json::json!({ "lines": [] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn security_headers_present() {
        let (app, _) = test_app();

        let response = app.oneshot(get("/api/recipes")).await.unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn security_headers_on_error() {
        let (app, _) = test_app();

        let response = app.oneshot(get("/api/recipe/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let (app, _) = test_app();

        let big = "x".repeat(BODY_LIMIT + 1);
        let response = app
            .oneshot(
                axum::http::Request::post("/api/foods")
                    .header("Content-Type", "application/json")
                    .header("Content-Length", big.len().to_string())
                    .body(Body::from(big))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
