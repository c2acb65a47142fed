pub mod custom_openai;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod server;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::custom_openai::CustomOpenAiProvider;
    pub use crate::db::{DbSettings, SettingsSource, StaticSettings};
    pub use crate::llm::{LlmProvider, ProviderRegistry, DEFAULT_CHAT_TIMEOUT, DEFAULT_TEMPERATURE};
    pub use crate::models::{ChatResult, Message, ModelDescriptor, ValidationResult};
    pub use crate::{db, llm, models, server, telemetry};
}
