use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, get_service, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use crate::{
    custom_openai::CustomOpenAiProvider,
    db::{self, DbSettings},
    llm::{ProviderRegistry, DEFAULT_CHAT_TIMEOUT, DEFAULT_TEMPERATURE},
    models::{ChatResult, EndpointSettings, Message, ModelDescriptor, ValidationResult},
    telemetry,
};

type ApiError = (StatusCode, String);

/**
 * \brief 路由共享状态：设置存储与已注册的 Provider。
 */
#[derive(Clone)]
pub struct AppState {
    store: DbSettings,
    custom: Arc<CustomOpenAiProvider<DbSettings>>,
    registry: ProviderRegistry,
}

impl AppState {
    pub fn new(store: DbSettings) -> Self {
        let custom = Arc::new(CustomOpenAiProvider::new(store.clone()));
        let mut registry = ProviderRegistry::new();
        registry.register(custom.clone());
        Self {
            store,
            custom,
            registry,
        }
    }
}

/**
 * \brief 启动本地 HTTP 服务，提供静态前端与 API。
 * \param addr    监听地址，如 "127.0.0.1:5173"
 * \param db_path 设置数据库路径
 */
pub async fn run(addr: &str, db_path: PathBuf) -> Result<()> {
    let ui_root =
        std::env::var("COUNCIL_UI_DIR").unwrap_or_else(|_| "frontend/dist".to_string());
    let fallback_root =
        std::env::var("COUNCIL_UI_FALLBACK").unwrap_or_else(|_| "web".to_string());

    let static_handler = if std::path::Path::new(&ui_root).exists() {
        ServeDir::new(ui_root)
    } else {
        ServeDir::new(fallback_root)
    }
    .append_index_html_on_directories(true);

    let app = router(AppState::new(DbSettings::new(db_path)))
        .fallback_service(get_service(static_handler));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    telemetry::log_event("server", &format!("listening on http://{}", addr));
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief 构建 API 路由（不含静态资源）。
 */
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/settings",
            get(get_settings).post(set_settings).delete(clear_settings),
        )
        .route("/api/models", get(list_models))
        .route("/api/chat", post(chat))
        .route("/api/validate", post(validate_connection))
        .route("/api/validate/key", post(validate_key))
        .route("/api/health", get(health_check))
        .with_state(state)
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct SettingsView {
    name: String,
    url: String,
    has_api_key: bool,
    /** \brief 脱敏后的密钥，仅用于展示 */
    api_key_hint: String,
    telemetry_enabled: bool,
}

#[derive(Deserialize, Debug, Default)]
struct SettingsInput {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    telemetry_enabled: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct ChatRequest {
    /** \brief 模型 ID，通常带 "custom:" 前缀 */
    model: String,
    messages: Vec<Message>,
    /** \brief 超时秒数，缺省 120 */
    #[serde(default)]
    timeout: Option<f64>,
    #[serde(default)]
    temperature: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct ValidateRequest {
    url: String,
    #[serde(default)]
    api_key: String,
}

#[derive(Deserialize, Debug)]
struct ValidateKeyRequest {
    api_key: String,
}

#[derive(Serialize, Debug)]
struct ModelsResponse {
    models: Vec<ModelDescriptor>,
}

fn settings_view(state: &AppState) -> Result<SettingsView> {
    let conn = state.store.open()?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn)?;
    telemetry::set_enabled(telemetry_enabled);
    let cfg = state.custom.get_config();
    Ok(SettingsView {
        name: cfg.name,
        url: cfg.base_url,
        has_api_key: !cfg.api_key.is_empty(),
        api_key_hint: telemetry::redact_key(&cfg.api_key),
        telemetry_enabled,
    })
}

/**
 * \brief 获取当前自定义端点设置（密钥脱敏）。
 */
async fn get_settings(State(state): State<AppState>) -> Result<Json<SettingsView>, ApiError> {
    Ok(Json(settings_view(&state).map_err(internal_err)?))
}

/**
 * \brief 保存自定义端点设置。
 */
async fn set_settings(
    State(state): State<AppState>,
    Json(input): Json<SettingsInput>,
) -> Result<Json<SettingsView>, ApiError> {
    let conn = state.store.open().map_err(internal_err)?;
    db::save_endpoint_settings(
        &conn,
        &EndpointSettings {
            custom_endpoint_name: input.name,
            custom_endpoint_url: input.url,
            custom_endpoint_api_key: input.api_key,
        },
    )
    .map_err(internal_err)?;
    if let Some(enabled) = input.telemetry_enabled {
        db::set_telemetry_enabled(&conn, enabled).map_err(internal_err)?;
        telemetry::set_enabled(enabled);
    }
    drop(conn);
    let view = settings_view(&state).map_err(internal_err)?;
    telemetry::log_event(
        "server.settings",
        &format!("update name={} url={} key={}", view.name, view.url, view.api_key_hint),
    );
    Ok(Json(view))
}

/**
 * \brief 清除自定义端点设置，遥测开关保持不变。
 */
async fn clear_settings(State(state): State<AppState>) -> Result<Json<SettingsView>, ApiError> {
    let conn = state.store.open().map_err(internal_err)?;
    db::clear_endpoint_settings(&conn).map_err(internal_err)?;
    drop(conn);
    telemetry::log_event("server.settings", "cleared custom endpoint");
    Ok(Json(settings_view(&state).map_err(internal_err)?))
}

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.registry.list_models().await,
    })
}

/**
 * \brief 非流式对话补全；失败同样以 200 返回，错误信息放在结果中。
 */
async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResult>, ApiError> {
    let timeout = match req.timeout {
        Some(secs) => Duration::try_from_secs_f64(secs).map_err(bad_request)?,
        None => DEFAULT_CHAT_TIMEOUT,
    };
    let temperature = req.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    let result = state
        .registry
        .query(&req.model, &req.messages, timeout, temperature)
        .await;
    Ok(Json(result))
}

async fn validate_connection(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Json<ValidationResult> {
    Json(state.custom.validate_connection(&req.url, &req.api_key).await)
}

/**
 * \brief 使用已保存的地址校验新密钥。
 */
async fn validate_key(
    State(state): State<AppState>,
    Json(req): Json<ValidateKeyRequest>,
) -> Json<ValidationResult> {
    Json(state.custom.validate_key(&req.api_key).await)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

fn internal_err<E: std::fmt::Display>(e: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn bad_request<E: std::fmt::Display>(e: E) -> ApiError {
    (StatusCode::BAD_REQUEST, e.to_string())
}
