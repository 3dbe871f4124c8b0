use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts, Request, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use macrotrack_core::error::NutritionError;
use macrotrack_core::models::{
    GoalTargets, IntakeFields, IntakeUpdate, NewFavorite, NutritionGoals, convert_to_grams,
    parse_date, parse_intake_time,
};
use macrotrack_core::service::{BarcodeIntake, NutritionService};
use macrotrack_core::summary::week_start_for;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB
const DEFAULT_TOP_LIMIT: i64 = 10;
const DEFAULT_PRODUCT_QUANTITY: f64 = 100.0;

#[derive(Clone)]
struct AppState {
    service: NutritionService,
}

// --- Request / Response types ---

/// Clients send `user_id` either as a JSON number or as a numeric string.
fn user_id_from_any<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(id) => Ok(id),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid user_id '{s}'"))),
    }
}

fn default_unit() -> String {
    "g".to_string()
}

#[derive(Deserialize)]
struct AddIntakeRequest {
    #[serde(deserialize_with = "user_id_from_any")]
    user_id: i64,
    product_name: String,
    #[serde(alias = "quantity_grams")]
    quantity: f64,
    #[serde(default = "default_unit")]
    unit: String,
    carbs: f64,
    protein: f64,
    fat: f64,
    #[serde(default)]
    fiber: f64,
    #[serde(default)]
    sugar: f64,
    #[serde(default)]
    sodium: f64,
    meal_type: Option<String>,
    intake_date: Option<String>,
    intake_time: Option<String>,
    barcode: Option<String>,
}

#[derive(Deserialize)]
struct BarcodeIntakeRequest {
    #[serde(deserialize_with = "user_id_from_any")]
    user_id: i64,
    barcode: String,
    #[serde(alias = "quantity_grams")]
    quantity: f64,
    #[serde(default = "default_unit")]
    unit: String,
    meal_type: Option<String>,
    intake_date: Option<String>,
    intake_time: Option<String>,
}

#[derive(Deserialize)]
struct UpdateIntakeRequest {
    #[serde(deserialize_with = "user_id_from_any")]
    user_id: i64,
    product_name: Option<String>,
    #[serde(alias = "quantity_grams")]
    quantity: Option<f64>,
    unit: Option<String>,
    carbs: Option<f64>,
    protein: Option<f64>,
    fat: Option<f64>,
    fiber: Option<f64>,
    sugar: Option<f64>,
    sodium: Option<f64>,
    intake_date: Option<String>,
    meal_type: Option<String>,
    intake_time: Option<String>,
}

#[derive(Deserialize)]
struct GoalsRequest {
    #[serde(deserialize_with = "user_id_from_any")]
    user_id: i64,
    #[serde(flatten)]
    targets: GoalTargets,
}

#[derive(Deserialize)]
struct AddFavoriteRequest {
    #[serde(deserialize_with = "user_id_from_any")]
    user_id: i64,
    product_name: String,
    barcode: Option<String>,
    default_quantity: f64,
    #[serde(default = "default_unit")]
    unit: String,
    #[serde(default)]
    calories: f64,
    #[serde(default)]
    carbs: f64,
    #[serde(default)]
    protein: f64,
    #[serde(default)]
    fat: f64,
}

#[derive(Deserialize)]
struct BarcodeFavoriteRequest {
    #[serde(deserialize_with = "user_id_from_any")]
    user_id: i64,
    barcode: String,
    default_quantity: f64,
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[derive(Deserialize)]
struct DailyQuery {
    intake_date: Option<String>,
}

#[derive(Deserialize)]
struct ClearDateQuery {
    intake_date: String,
}

#[derive(Deserialize)]
struct RangeQuery {
    start_date: String,
    end_date: String,
}

#[derive(Deserialize)]
struct WeekQuery {
    week_date: Option<String>,
}

#[derive(Deserialize)]
struct MonthQuery {
    year: Option<i32>,
    month: Option<u32>,
}

#[derive(Deserialize)]
struct IntakeSearchQuery {
    q: String,
}

#[derive(Deserialize)]
struct TopQuery {
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct ProgressQuery {
    date: Option<String>,
}

#[derive(Deserialize)]
struct ProductSearchQuery {
    query: String,
    quantity: Option<f64>,
    page_size: Option<u32>,
    page: Option<u32>,
}

#[derive(Deserialize)]
struct ProductQuery {
    quantity: Option<f64>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Extractors ---

/// `axum::Json` whose rejections use the `{ "error": ... }` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct JsonBody<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
struct PathParam<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
struct QueryParams<T>(T);

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    PayloadTooLarge(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn rejected(status: StatusCode, message: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(message)
        } else {
            Self::BadRequest(message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            Self::Internal(err) => {
                error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<NutritionError> for ApiError {
    fn from(err: NutritionError) -> Self {
        match err {
            NutritionError::Validation(msg) => Self::BadRequest(msg),
            NutritionError::NotFound(msg) => Self::NotFound(msg),
            e @ NutritionError::ProductUnavailable(_) => Self::NotFound(e.to_string()),
            e @ (NutritionError::Storage(_) | NutritionError::Pool(_)) => {
                Self::Internal(anyhow::Error::new(e))
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::rejected(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::rejected(rejection.status(), rejection.body_text())
    }
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

// --- Helpers ---

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn date_or_today(date: Option<&str>) -> Result<NaiveDate, ApiError> {
    date.map_or_else(|| Ok(today()), |d| Ok(parse_date(d)?))
}

fn to_grams(quantity: f64, unit: &str) -> Result<f64, ApiError> {
    convert_to_grams(quantity, unit)
        .map(|(grams, _)| grams)
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unknown unit '{unit}'. Supported: g, kg, lb, oz, tbsp, tsp, ml, l"
            ))
        })
}

// --- Intake handlers ---

async fn add_intake(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<AddIntakeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let fields = IntakeFields {
        product_name: req.product_name,
        carbs: req.carbs,
        protein: req.protein,
        fat: req.fat,
        fiber: req.fiber,
        sugar: req.sugar,
        sodium: req.sodium,
        quantity_grams: to_grams(req.quantity, &req.unit)?,
        intake_date: date_or_today(req.intake_date.as_deref())?,
        meal_type: req.meal_type,
        intake_time: req.intake_time.as_deref().map(parse_intake_time).transpose()?,
        barcode: req.barcode,
    };
    let record = state.service.add_intake(req.user_id, &fields)?;
    Ok((StatusCode::CREATED, Json(json!(record))))
}

async fn add_intake_from_barcode(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<BarcodeIntakeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let intake = BarcodeIntake {
        user_id: req.user_id,
        barcode: req.barcode,
        quantity_grams: to_grams(req.quantity, &req.unit)?,
        intake_date: date_or_today(req.intake_date.as_deref())?,
        meal_type: req.meal_type,
        intake_time: req.intake_time.as_deref().map(parse_intake_time).transpose()?,
    };
    let record = state.service.add_intake_from_barcode(&intake).await?;
    Ok((StatusCode::CREATED, Json(json!(record))))
}

async fn get_daily_intake(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
    QueryParams(q): QueryParams<DailyQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = date_or_today(q.intake_date.as_deref())?;
    let summary = state.service.db().daily_summary(user_id, date)?;
    Ok(Json(json!(summary)))
}

async fn get_intake_range(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
    QueryParams(q): QueryParams<RangeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start = parse_date(&q.start_date)?;
    let end = parse_date(&q.end_date)?;
    let range = state.service.db().intake_range(user_id, start, end)?;
    Ok(Json(json!(range)))
}

async fn get_weekly_summary(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
    QueryParams(q): QueryParams<WeekQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let anchor = date_or_today(q.week_date.as_deref())?;
    let summary = state
        .service
        .db()
        .weekly_summary(user_id, week_start_for(anchor)?)?;
    Ok(Json(json!(summary)))
}

async fn get_monthly_summary(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
    QueryParams(q): QueryParams<MonthQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let now = today();
    let year = q.year.unwrap_or_else(|| now.year());
    let month = q.month.unwrap_or_else(|| now.month());
    let summary = state.service.db().monthly_summary(user_id, year, month)?;
    Ok(Json(json!(summary)))
}

async fn get_all_intake(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = state.service.db().get_all_intake(user_id)?;
    Ok(Json(json!(records)))
}

async fn search_intake(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
    QueryParams(q): QueryParams<IntakeSearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = state.service.db().search_intake(user_id, &q.q)?;
    Ok(Json(json!(records)))
}

async fn top_products(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
    QueryParams(q): QueryParams<TopQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_TOP_LIMIT);
    let stats = state.service.db().most_consumed(user_id, limit)?;
    Ok(Json(json!(stats)))
}

async fn get_intake_record(
    State(state): State<AppState>,
    PathParam(record_id): PathParam<i64>,
    QueryParams(q): QueryParams<UserQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.service.db().get_intake(record_id, q.user_id)?;
    Ok(Json(json!(record)))
}

async fn update_intake(
    State(state): State<AppState>,
    PathParam(record_id): PathParam<i64>,
    JsonBody(req): JsonBody<UpdateIntakeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let quantity_grams = match (req.quantity, req.unit.as_deref()) {
        (Some(q), unit) => Some(to_grams(q, unit.unwrap_or("g"))?),
        (None, Some(_)) => {
            return Err(ApiError::BadRequest(
                "unit requires quantity".to_string(),
            ));
        }
        (None, None) => None,
    };
    let update = IntakeUpdate {
        product_name: req.product_name,
        carbs: req.carbs,
        protein: req.protein,
        fat: req.fat,
        fiber: req.fiber,
        sugar: req.sugar,
        sodium: req.sodium,
        quantity_grams,
        intake_date: req.intake_date.as_deref().map(parse_date).transpose()?,
        meal_type: req.meal_type,
        intake_time: req.intake_time.as_deref().map(parse_intake_time).transpose()?,
    };
    let record = state
        .service
        .db()
        .update_intake(record_id, req.user_id, &update)?;
    Ok(Json(json!(record)))
}

async fn delete_intake(
    State(state): State<AppState>,
    PathParam(record_id): PathParam<i64>,
    QueryParams(q): QueryParams<UserQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.service.db().delete_intake(record_id, q.user_id)? {
        Ok(Json(json!({ "deleted": record_id })))
    } else {
        Err(ApiError::NotFound(format!(
            "Intake record {record_id} not found"
        )))
    }
}

async fn delete_intake_for_date(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
    QueryParams(q): QueryParams<ClearDateQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = parse_date(&q.intake_date)?;
    let count = state.service.db().delete_intake_for_date(user_id, date)?;
    Ok(Json(json!({ "deleted_count": count })))
}

// --- Goals handlers ---

async fn get_goals(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let goals = state.service.db().get_goals(user_id)?;
    Ok(Json(json!(goals)))
}

async fn update_goals(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<GoalsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let goals = state.service.db().upsert_goals(req.user_id, &req.targets)?;
    Ok(Json(json!(goals)))
}

async fn reset_goals(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.service.db().reset_goals(user_id)? {
        Ok(Json(json!({
            "reset": true,
            "goals": NutritionGoals::defaults(user_id),
        })))
    } else {
        Err(ApiError::NotFound(format!(
            "No custom goals set for user {user_id}"
        )))
    }
}

async fn get_goal_progress(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
    QueryParams(q): QueryParams<ProgressQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = date_or_today(q.date.as_deref())?;
    let progress = state.service.db().goal_progress(user_id, date)?;
    Ok(Json(json!(progress)))
}

// --- Favorites handlers ---

async fn list_favorites(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let favorites = state.service.db().list_favorites(user_id)?;
    Ok(Json(json!({ "favorites": favorites })))
}

async fn add_favorite(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<AddFavoriteRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let favorite = state.service.db().add_favorite(&NewFavorite {
        user_id: req.user_id,
        product_name: req.product_name,
        barcode: req.barcode,
        default_quantity: req.default_quantity,
        unit: req.unit,
        calories: req.calories,
        carbs: req.carbs,
        protein: req.protein,
        fat: req.fat,
    })?;
    Ok((StatusCode::CREATED, Json(json!(favorite))))
}

async fn add_favorite_from_barcode(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<BarcodeFavoriteRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let favorite = state
        .service
        .add_favorite_from_barcode(req.user_id, &req.barcode, req.default_quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(json!(favorite))))
}

async fn get_favorite(
    State(state): State<AppState>,
    PathParam(favorite_id): PathParam<i64>,
    QueryParams(q): QueryParams<UserQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let favorite = state.service.db().get_favorite(favorite_id, q.user_id)?;
    Ok(Json(json!(favorite)))
}

async fn delete_favorite(
    State(state): State<AppState>,
    PathParam(favorite_id): PathParam<i64>,
    QueryParams(q): QueryParams<UserQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.service.db().delete_favorite(favorite_id, q.user_id)? {
        Ok(Json(json!({ "deleted": favorite_id })))
    } else {
        Err(ApiError::NotFound(format!(
            "Favorite {favorite_id} not found"
        )))
    }
}

// --- Catalog handlers ---

async fn search_products(
    State(state): State<AppState>,
    QueryParams(q): QueryParams<ProductSearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let results = state
        .service
        .search_products(
            &q.query,
            q.quantity.unwrap_or(DEFAULT_PRODUCT_QUANTITY),
            q.page_size.unwrap_or(10),
            q.page.unwrap_or(1),
        )
        .await?;
    Ok(Json(json!(results)))
}

async fn get_product(
    State(state): State<AppState>,
    PathParam(barcode): PathParam<String>,
    QueryParams(q): QueryParams<ProductQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let product = state
        .service
        .product_details(&barcode, q.quantity.unwrap_or(DEFAULT_PRODUCT_QUANTITY))
        .await?;
    Ok(Json(json!(product)))
}

// --- Router ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/intake/add", post(add_intake))
        .route("/intake/add-from-barcode", post(add_intake_from_barcode))
        .route("/intake/daily/{user_id}", get(get_daily_intake))
        .route("/intake/range/{user_id}", get(get_intake_range))
        .route("/intake/week/{user_id}", get(get_weekly_summary))
        .route("/intake/month/{user_id}", get(get_monthly_summary))
        .route("/intake/all/{user_id}", get(get_all_intake))
        .route("/intake/search/{user_id}", get(search_intake))
        .route("/intake/top/{user_id}", get(top_products))
        .route("/intake/record/{record_id}", get(get_intake_record))
        .route("/intake/update/{record_id}", put(update_intake))
        .route(
            "/intake/delete/{record_id}",
            axum::routing::delete(delete_intake),
        )
        .route(
            "/intake/date/{user_id}",
            axum::routing::delete(delete_intake_for_date),
        )
        .route("/goals/update", post(update_goals))
        .route("/goals/{user_id}", get(get_goals).delete(reset_goals))
        .route("/goals/{user_id}/progress", get(get_goal_progress))
        .route("/favorites/add", post(add_favorite))
        .route(
            "/favorites/add-from-barcode",
            post(add_favorite_from_barcode),
        )
        .route("/favorites/detail/{favorite_id}", get(get_favorite))
        // GET takes a user id, DELETE a favorite id; one pattern serves both
        .route("/favorites/{id}", get(list_favorites).delete(delete_favorite))
        .route("/search", get(search_products))
        .route("/product/{barcode}", get(get_product))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

pub async fn start_server(service: NutritionService, port: u16, bind: &str) -> anyhow::Result<()> {
    let app = build_router(AppState { service });

    if bind != "127.0.0.1" && bind != "localhost" {
        warn!("Listening on {bind} without authentication; any device on your network can access this API");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!("Listening on http://{bind}:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use macrotrack_core::db::Database;
    use macrotrack_core::openfoodfacts::{Nutrients, ProductFacts};
    use macrotrack_core::service::ProductLookup;
    use tower::ServiceExt;

    struct FakeCatalog;

    fn oats() -> ProductFacts {
        ProductFacts {
            barcode: Some("5000000000002".to_string()),
            product_name: "Rolled Oats".to_string(),
            brand: None,
            image_url: None,
            per_100g: Nutrients {
                calories: 389.0,
                protein: 16.9,
                carbs: 66.3,
                fat: 6.9,
                fiber: 10.6,
                sugar: 0.0,
                sodium: 0.0,
            },
        }
    }

    #[async_trait]
    impl ProductLookup for FakeCatalog {
        async fn search(
            &self,
            query: &str,
            _page_size: u32,
            _page: u32,
        ) -> anyhow::Result<Vec<ProductFacts>> {
            Ok(if query == "oats" { vec![oats()] } else { Vec::new() })
        }

        async fn lookup_barcode(&self, barcode: &str) -> anyhow::Result<Option<ProductFacts>> {
            Ok((barcode == "5000000000002").then(oats))
        }
    }

    fn test_state() -> AppState {
        AppState {
            service: NutritionService::new(
                Database::open_in_memory().unwrap(),
                Arc::new(FakeCatalog),
            ),
        }
    }

    fn test_app() -> Router {
        build_router(test_state())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    fn delete(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::delete(uri).body(Body::empty()).unwrap()
    }

    fn rice(user_id: serde_json::Value) -> serde_json::Value {
        json!({
            "user_id": user_id,
            "product_name": "Rice",
            "quantity": 150,
            "carbs": 10,
            "protein": 5,
            "fat": 2,
            "calories": 9999,
            "intake_date": "2024-03-04",
        })
    }

    #[tokio::test]
    async fn add_intake_merges_and_derives_calories() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(post_json("/intake/add", &rice(json!(1))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["calories"], 78.0);

        // numeric-string user id merges into the same row
        let response = app
            .clone()
            .oneshot(post_json("/intake/add", &rice(json!("1"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(get("/intake/daily/1?intake_date=2024-03-04"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["meal_count"], 1);
        assert_eq!(json["total_carbs"], 20.0);
        assert_eq!(json["total_calories"], 156.0);
        assert_eq!(json["items"][0]["quantity_grams"], 300.0);
    }

    #[tokio::test]
    async fn add_intake_converts_units() {
        let app = test_app();
        let mut body = rice(json!(1));
        body["quantity"] = json!(2);
        body["unit"] = json!("oz");

        let response = app.oneshot(post_json("/intake/add", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["quantity_grams"], 56.7);
    }

    #[tokio::test]
    async fn add_intake_rejects_bad_input() {
        let app = test_app();

        let mut body = rice(json!(1));
        body["carbs"] = json!(-1);
        let response = app
            .clone()
            .oneshot(post_json("/intake/add", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "carbs must not be negative");

        let mut body = rice(json!(1));
        body["unit"] = json!("cups");
        let response = app
            .clone()
            .oneshot(post_json("/intake/add", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let mut body = rice(json!(1));
        body["intake_date"] = json!("04/03/2024");
        let response = app.oneshot(post_json("/intake/add", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_day_summary_is_zero() {
        let app = test_app();
        let response = app
            .oneshot(get("/intake/daily/42?intake_date=2024-01-01"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["meal_count"], 0);
        assert_eq!(json["total_calories"], 0.0);
        assert_eq!(json["items"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn weekly_summary_anchors_to_monday() {
        let app = test_app();
        app.clone()
            .oneshot(post_json("/intake/add", &rice(json!(1))))
            .await
            .unwrap();

        // 2024-03-07 is a Thursday
        let response = app
            .oneshot(get("/intake/week/1?week_date=2024-03-07"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["week_start"], "2024-03-04");
        assert_eq!(json["week_end"], "2024-03-10");
        assert_eq!(json["daily_breakdown"].as_array().unwrap().len(), 7);
        assert_eq!(json["weekly_totals"]["daily_average_calories"], 11.14);
    }

    #[tokio::test]
    async fn monthly_summary_validates_month() {
        let app = test_app();
        let response = app
            .clone()
            .oneshot(get("/intake/month/1?year=2024&month=2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["end_date"], "2024-02-29");
        assert_eq!(json["daily_average_calories"], 0.0);

        let response = app
            .oneshot(get("/intake/month/1?year=2024&month=13"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn range_groups_by_date() {
        let app = test_app();
        app.clone()
            .oneshot(post_json("/intake/add", &rice(json!(1))))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(get(
                "/intake/range/1?start_date=2024-03-04&end_date=2024-03-04",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["total_records"], 1);
        assert_eq!(json["daily_totals"]["2024-03-04"]["total_calories"], 78.0);

        let response = app
            .oneshot(get(
                "/intake/range/1?start_date=2024-03-05&end_date=2024-03-04",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_and_delete_are_owner_scoped() {
        let app = test_app();
        let response = app
            .clone()
            .oneshot(post_json("/intake/add", &rice(json!(1))))
            .await
            .unwrap();
        let id = body_json(response).await["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(
                axum::http::Request::put(format!("/intake/update/{id}"))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"user_id": 2, "carbs": 50}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(
                axum::http::Request::put(format!("/intake/update/{id}"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"user_id": "1", "carbs": 50, "meal_type": "Lunch"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["carbs"], 50.0);
        assert_eq!(json["protein"], 5.0);
        assert_eq!(json["meal_type"], "lunch");

        let response = app
            .clone()
            .oneshot(delete(&format!("/intake/delete/{id}?user_id=2")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(delete(&format!("/intake/delete/{id}?user_id=1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["deleted"], id);

        let response = app
            .oneshot(get(&format!("/intake/record/{id}?user_id=1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_requires_a_field() {
        let app = test_app();
        let response = app
            .clone()
            .oneshot(post_json("/intake/add", &rice(json!(1))))
            .await
            .unwrap();
        let id = body_json(response).await["id"].as_i64().unwrap();

        let response = app
            .oneshot(
                axum::http::Request::put(format!("/intake/update/{id}"))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"user_id": 1}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn clear_date_reports_count() {
        let app = test_app();
        app.clone()
            .oneshot(post_json("/intake/add", &rice(json!(1))))
            .await
            .unwrap();
        let mut bread = rice(json!(1));
        bread["product_name"] = json!("Bread");
        app.clone()
            .oneshot(post_json("/intake/add", &bread))
            .await
            .unwrap();

        let response = app
            .oneshot(delete("/intake/date/1?intake_date=2024-03-04"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["deleted_count"], 2);
    }

    #[tokio::test]
    async fn search_and_top_products() {
        let app = test_app();
        app.clone()
            .oneshot(post_json("/intake/add", &rice(json!(1))))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(get("/intake/search/1?q=ric"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

        let response = app.clone().oneshot(get("/intake/top/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json[0]["product_name"], "Rice");
        assert_eq!(json[0]["times_consumed"], 1);

        let response = app.oneshot(get("/intake/top/1?limit=0")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn all_intake_lists_newest_date_first() {
        let app = test_app();
        for date in ["2024-03-01", "2024-03-05", "2024-03-03"] {
            let mut body = rice(json!(1));
            body["intake_date"] = json!(date);
            app.clone()
                .oneshot(post_json("/intake/add", &body))
                .await
                .unwrap();
        }
        app.clone()
            .oneshot(post_json("/intake/add", &rice(json!(2))))
            .await
            .unwrap();

        let response = app.clone().oneshot(get("/intake/all/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let dates: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["intake_date"].as_str().unwrap())
            .collect();
        assert_eq!(dates, ["2024-03-05", "2024-03-03", "2024-03-01"]);

        let response = app.oneshot(get("/intake/all/3")).await.unwrap();
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn goals_default_update_and_reset() {
        let app = test_app();

        let response = app.clone().oneshot(get("/goals/7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["calorie_goal"], 2000);
        assert_eq!(json["has_custom_goals"], false);

        let response = app.clone().oneshot(delete("/goals/7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(post_json(
                "/goals/update",
                &json!({
                    "user_id": "7",
                    "calorie_goal": 2500,
                    "carbs_goal": 250,
                    "protein_goal": 180,
                    "fat_goal": 70,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["calorie_goal"], 2500);
        assert_eq!(json["has_custom_goals"], true);

        let response = app
            .clone()
            .oneshot(get("/goals/7/progress?date=2024-03-04"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["calories"]["goal"], 2500.0);
        assert_eq!(json["calories"]["consumed"], 0.0);

        let response = app.clone().oneshot(delete("/goals/7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["reset"], true);
        assert_eq!(json["goals"]["calorie_goal"], 2000);

        let response = app
            .oneshot(post_json(
                "/goals/update",
                &json!({
                    "user_id": 7,
                    "calorie_goal": 0,
                    "carbs_goal": 250,
                    "protein_goal": 180,
                    "fat_goal": 70,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn barcode_intake_and_unknown_product() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/intake/add-from-barcode",
                &json!({
                    "user_id": 1,
                    "barcode": "5000000000002",
                    "quantity": 50,
                    "intake_date": "2024-03-04",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["product_name"], "Rolled Oats");
        assert_eq!(json["carbs"], 33.15);
        assert_eq!(json["barcode"], "5000000000002");

        let response = app
            .oneshot(post_json(
                "/intake/add-from-barcode",
                &json!({"user_id": 1, "barcode": "123", "quantity": 50}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().starts_with("OpenFoodFacts:"));
    }

    #[tokio::test]
    async fn favorites_lifecycle() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/favorites/add",
                &json!({
                    "user_id": 3,
                    "product_name": "Banana",
                    "default_quantity": 120,
                    "calories": 107,
                    "carbs": 27.6,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/favorites/add-from-barcode",
                &json!({"user_id": 3, "barcode": "5000000000002", "default_quantity": 40}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app.clone().oneshot(get("/favorites/3")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["favorites"].as_array().unwrap().len(), 2);

        let response = app
            .clone()
            .oneshot(get(&format!("/favorites/detail/{id}?user_id=4")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(delete(&format!("/favorites/{id}?user_id=3")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["deleted"], id);

        let response = app
            .oneshot(delete(&format!("/favorites/{id}?user_id=3")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn catalog_search_and_product() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(get("/search?query=oats&quantity=50"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json[0]["product_name"], "Rolled Oats");
        assert_eq!(json[0]["nutrients"]["calories"], 194.5);

        let response = app
            .clone()
            .oneshot(get("/search?query=tofu"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(get("/product/5000000000002"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["quantity_grams"], 100.0);
        assert_eq!(json["per_100g"]["protein"], 16.9);

        let response = app.oneshot(get("/product/abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app();
        let response = app.oneshot(get("/goals/1")).await.unwrap();

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
    async fn body_size_limit_rejects_oversized() {
        let app = test_app();

        let big_body = vec![0u8; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                axum::http::Request::post("/intake/add")
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn nutrition_errors_map_to_status() {
        let cases = [
            (NutritionError::validation("bad"), StatusCode::BAD_REQUEST),
            (NutritionError::not_found("gone"), StatusCode::NOT_FOUND),
            (
                NutritionError::ProductUnavailable("down".to_string()),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let pool = r2d2::Pool::builder()
            .connection_timeout(std::time::Duration::from_millis(50))
            .build_unchecked(r2d2_sqlite::SqliteConnectionManager::file(
                "/nonexistent-macrotrack-dir/intake.db",
            ));
        let pool_err = pool.get().err().unwrap();

        let cases = [
            NutritionError::Storage(rusqlite::Error::QueryReturnedNoRows),
            NutritionError::Storage(rusqlite::Error::InvalidColumnName(
                "secret_column".to_string(),
            )),
            NutritionError::Pool(pool_err),
        ];
        for err in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], br#"{"error":"Internal server error"}"#);
        }
    }

    async fn assert_json_bad_request(response: Response) -> String {
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let json = body_json(response).await;
        json["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn malformed_body_gets_json_error() {
        let app = test_app();

        let mut body = rice(json!(1));
        body["user_id"] = json!("abc");
        let response = app
            .clone()
            .oneshot(post_json("/intake/add", &body))
            .await
            .unwrap();
        let message = assert_json_bad_request(response).await;
        assert!(message.contains("user_id"), "{message}");

        let response = app
            .clone()
            .oneshot(
                axum::http::Request::post("/goals/update")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_json_bad_request(response).await;

        let response = app
            .oneshot(
                axum::http::Request::post("/intake/add")
                    .body(Body::from(rice(json!(1)).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let json = body_json(response).await;
        assert!(status.is_client_error());
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn malformed_path_and_query_get_json_errors() {
        let app = test_app();

        let response = app.clone().oneshot(get("/intake/daily/abc")).await.unwrap();
        assert_json_bad_request(response).await;

        let response = app.clone().oneshot(delete("/intake/delete/1")).await.unwrap();
        let message = assert_json_bad_request(response).await;
        assert!(message.contains("user_id"), "{message}");

        let response = app
            .clone()
            .oneshot(get("/intake/range/1?start_date=2024-03-01"))
            .await
            .unwrap();
        assert_json_bad_request(response).await;

        let response = app
            .oneshot(get("/intake/top/1?limit=many"))
            .await
            .unwrap();
        assert_json_bad_request(response).await;
    }

    #[tokio::test]
    async fn far_future_week_is_rejected() {
        let app = test_app();
        let response = app
            .oneshot(get("/intake/week/1?week_date=%2B262142-12-31"))
            .await
            .unwrap();
        assert_json_bad_request(response).await;
    }
}
