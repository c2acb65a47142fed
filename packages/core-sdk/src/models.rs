use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/**
 * \brief 自定义端点配置，每次调用时从设置源重新解析。
 */
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointConfig {
    /** \brief 端点显示名称，未设置时为 "Custom" */
    pub name: String,
    /** \brief API 基地址，空字符串表示尚未配置 */
    pub base_url: String,
    /** \brief API Key，可为空 */
    pub api_key: String,
}

/**
 * \brief 设置存储中的原始字段，均可缺省。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub custom_endpoint_name: Option<String>,
    pub custom_endpoint_url: Option<String>,
    pub custom_endpoint_api_key: Option<String>,
}

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/**
 * \brief 单次对话补全的结果：成功携带回复正文，失败携带可展示的错误信息。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatResult {
    Success { content: String },
    Failure { error_message: String },
}

impl ChatResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self::Success {
            content: content.into(),
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self::Failure {
            error_message: error_message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Success { content } => Some(content),
            Self::Failure { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error_message } => Some(error_message),
        }
    }
}

// {"content": ..., "error": false} | {"error": true, "error_message": ...}
impl Serialize for ChatResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            Self::Success { content } => {
                map.serialize_entry("content", content)?;
                map.serialize_entry("error", &false)?;
            }
            Self::Failure { error_message } => {
                map.serialize_entry("error", &true)?;
                map.serialize_entry("error_message", error_message)?;
            }
        }
        map.end()
    }
}

/**
 * \brief 模型选择列表中的一项。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /** \brief 带 "custom:" 前缀的模型 ID */
    pub id: String,
    /** \brief 展示名称："<原始ID> [<端点名称>]" */
    #[serde(rename = "name")]
    pub display_name: String,
    /** \brief 所属端点名称 */
    #[serde(rename = "provider")]
    pub provider_name: String,
}

/**
 * \brief 连接或密钥校验结果。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    pub message: String,
}

impl ValidationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
