use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    StatusCode,
};
use serde_json::{json, Value};
use std::time::Duration;

use crate::{
    db::SettingsSource,
    error::TransportFault,
    llm::LlmProvider,
    models::{ChatResult, EndpointConfig, Message, ModelDescriptor, ValidationResult},
    telemetry,
};

/** \brief 本适配器发出的模型 ID 前缀 */
pub const MODEL_PREFIX: &str = "custom:";
/** \brief 未配置名称时的端点显示名 */
pub const DEFAULT_ENDPOINT_NAME: &str = "Custom";
/** \brief 列模型与连接校验的固定超时 */
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// 非对话模型家族，不出现在模型选择列表中
const NON_CHAT_MARKERS: [&str; 6] = ["embed", "whisper", "tts", "dall-e", "audio", "transcribe"];

/**
 * \brief 任意 OpenAI 兼容端点的适配器。
 * \details 不持有 HTTP 客户端，每次调用按本次超时新建并在返回时释放。
 */
pub struct CustomOpenAiProvider<S> {
    settings: S,
    probe_timeout: Duration,
}

impl<S: SettingsSource> CustomOpenAiProvider<S> {
    pub fn new(settings: S) -> Self {
        Self {
            settings,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /**
     * \brief 从设置源读取当前端点配置，缺失字段回落为默认值。
     */
    pub fn get_config(&self) -> EndpointConfig {
        let settings = match self.settings.endpoint_settings() {
            Ok(s) => s,
            Err(e) => {
                telemetry::log_error("adapter.config", &format!("load settings failed: {:#}", e));
                Default::default()
            }
        };
        EndpointConfig {
            name: settings
                .custom_endpoint_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_ENDPOINT_NAME.to_string()),
            base_url: settings.custom_endpoint_url.unwrap_or_default(),
            api_key: settings.custom_endpoint_api_key.unwrap_or_default(),
        }
    }

    /**
     * \brief 发送一次非流式对话补全。
     */
    pub async fn send_chat_completion(
        &self,
        model_id: &str,
        messages: &[Message],
        timeout: Duration,
        temperature: f64,
    ) -> ChatResult {
        let cfg = self.get_config();
        if cfg.base_url.is_empty() {
            return ChatResult::failure(format!("{} endpoint URL not configured", cfg.name));
        }

        let model = strip_model_prefix(model_id);
        telemetry::log_event(
            "adapter.chat",
            &format!(
                "endpoint={} model={} messages={} timeout={}s",
                cfg.name,
                model,
                messages.len(),
                timeout.as_secs_f64()
            ),
        );

        match chat_once(&cfg, model, messages, timeout, temperature).await {
            Ok(result) => {
                if let Some(err) = result.error_message() {
                    telemetry::log_error("adapter.chat", err);
                }
                result
            }
            Err(e) => {
                let message = format!("{:#}", e);
                telemetry::log_error("adapter.chat", &format!("request failed: {}", message));
                ChatResult::failure(message)
            }
        }
    }

    /**
     * \brief 列出端点上可用的对话模型；任何失败都视为没有模型。
     */
    pub async fn list_models(&self) -> Vec<ModelDescriptor> {
        let cfg = self.get_config();
        if cfg.base_url.is_empty() {
            return Vec::new();
        }
        match fetch_model_list(&cfg, self.probe_timeout).await {
            Ok(models) => models,
            Err(e) => {
                telemetry::log_warn(
                    "adapter.models",
                    &format!("list models from {} failed: {:#}", cfg.name, e),
                );
                Vec::new()
            }
        }
    }

    /**
     * \brief 使用给定地址与密钥探测 /models，返回面向用户的诊断信息。
     */
    pub async fn validate_connection(&self, url: &str, api_key: &str) -> ValidationResult {
        if url.is_empty() {
            return ValidationResult::fail("URL is required");
        }
        let base = normalize_base(url);
        telemetry::log_event(
            "adapter.validate",
            &format!("probe base={} key={}", base, telemetry::redact_key(api_key)),
        );

        let resp = match get_models(base, api_key, self.probe_timeout).await {
            Ok(resp) => resp,
            Err(fault) => return ValidationResult::fail(fault_message(fault)),
        };

        match resp.status() {
            StatusCode::OK => match resp.json::<Value>().await {
                Ok(body) => match count_models(&body) {
                    Ok(count) => ValidationResult::ok(format!(
                        "Connected successfully. Found {} models.",
                        count
                    )),
                    Err(e) => ValidationResult::fail(e.to_string()),
                },
                Err(e) => ValidationResult::fail(fault_message(TransportFault::from(e))),
            },
            StatusCode::UNAUTHORIZED => {
                ValidationResult::fail("Authentication failed. Check your API key.")
            }
            other => ValidationResult::fail(format!("API error: {}", other.as_u16())),
        }
    }

    /**
     * \brief 仅更换密钥，针对当前已保存的端点地址校验。
     */
    pub async fn validate_key(&self, api_key: &str) -> ValidationResult {
        let cfg = self.get_config();
        self.validate_connection(&cfg.base_url, api_key).await
    }
}

#[async_trait]
impl<S: SettingsSource> LlmProvider for CustomOpenAiProvider<S> {
    fn key(&self) -> &'static str {
        "custom"
    }

    async fn query(
        &self,
        model_id: &str,
        messages: &[Message],
        timeout: Duration,
        temperature: f64,
    ) -> ChatResult {
        self.send_chat_completion(model_id, messages, timeout, temperature)
            .await
    }

    async fn get_models(&self) -> Vec<ModelDescriptor> {
        self.list_models().await
    }

    async fn validate_connection(&self, url: &str, api_key: &str) -> ValidationResult {
        CustomOpenAiProvider::validate_connection(self, url, api_key).await
    }

    async fn validate_key(&self, api_key: &str) -> ValidationResult {
        CustomOpenAiProvider::validate_key(self, api_key).await
    }
}

async fn chat_once(
    cfg: &EndpointConfig,
    model: &str,
    messages: &[Message],
    timeout: Duration,
    temperature: f64,
) -> Result<ChatResult> {
    let url = format!("{}/chat/completions", normalize_base(&cfg.base_url));
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let mut headers = auth_headers(&cfg.api_key)?;
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let body = json!({
        "model": model,
        "messages": messages,
        "temperature": temperature
    });

    let resp = client.post(url).headers(headers).json(&body).send().await?;

    let status = resp.status();
    if status != StatusCode::OK {
        let text = resp.text().await?;
        return Ok(ChatResult::failure(format!(
            "{} API error: {} - {}",
            cfg.name,
            status.as_u16(),
            text
        )));
    }
    let v: Value = resp.json().await?;
    Ok(ChatResult::success(extract_message_content(&v)?))
}

async fn fetch_model_list(cfg: &EndpointConfig, timeout: Duration) -> Result<Vec<ModelDescriptor>> {
    let resp = get_models(normalize_base(&cfg.base_url), &cfg.api_key, timeout).await?;
    let status = resp.status();
    if status != StatusCode::OK {
        return Err(anyhow!("status {}", status.as_u16()));
    }
    let v: Value = resp.json().await?;
    parse_model_list(&v, &cfg.name)
}

async fn get_models(
    base: &str,
    api_key: &str,
    timeout: Duration,
) -> Result<reqwest::Response, TransportFault> {
    let headers = auth_headers(api_key).map_err(|e| TransportFault::Other(format!("{:#}", e)))?;
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let resp = client
        .get(format!("{}/models", base))
        .headers(headers)
        .send()
        .await?;
    Ok(resp)
}

fn auth_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if !api_key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))?,
        );
    }
    Ok(headers)
}

fn fault_message(fault: TransportFault) -> String {
    match fault {
        TransportFault::Timeout => "Connection timed out.".to_string(),
        TransportFault::Connect => "Connection failed. Check the URL.".to_string(),
        TransportFault::Other(msg) => msg,
    }
}

// 只去掉一个末尾斜杠
fn normalize_base(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}

fn strip_model_prefix(model_id: &str) -> &str {
    model_id.strip_prefix(MODEL_PREFIX).unwrap_or(model_id)
}

fn is_chat_model(model_id: &str) -> bool {
    let lowered = model_id.to_lowercase();
    !NON_CHAT_MARKERS.iter().any(|m| lowered.contains(m))
}

fn extract_message_content(v: &Value) -> Result<String> {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("unexpected completion payload: missing choices[0].message.content"))
}

// 对象缺少 data 时计为 0；其它形状视为异常载荷
fn count_models(v: &Value) -> Result<usize> {
    let obj = v
        .as_object()
        .ok_or_else(|| anyhow!("unexpected models payload: {}", v))?;
    match obj.get("data") {
        None => Ok(0),
        Some(Value::Array(arr)) => Ok(arr.len()),
        Some(other) => Err(anyhow!("unexpected models payload: {}", other)),
    }
}

fn parse_model_list(v: &Value, endpoint_name: &str) -> Result<Vec<ModelDescriptor>> {
    let entries = match v.get("data") {
        None => return Ok(Vec::new()),
        Some(Value::Array(arr)) => arr,
        Some(other) => return Err(anyhow!("unexpected models payload: {}", other)),
    };
    let mut models: Vec<ModelDescriptor> = entries
        .iter()
        .filter_map(|item| item.get("id").and_then(Value::as_str))
        .filter(|id| !id.is_empty() && is_chat_model(id))
        .map(|id| ModelDescriptor {
            id: format!("{}{}", MODEL_PREFIX, id),
            display_name: format!("{} [{}]", id, endpoint_name),
            provider_name: endpoint_name.to_string(),
        })
        .collect();
    models.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    Ok(models)
}
