use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

use crate::models::{ChatResult, Message, ModelDescriptor, ValidationResult};

/** \brief 对话补全默认超时 */
pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(120);
/** \brief 默认采样温度 */
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/**
 * \brief 统一的 Provider 能力接口。所有方法自行吞掉故障，以结构化结果返回。
 */
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /** \brief 注册键，同时也是模型 ID 的前缀，如 "custom" */
    fn key(&self) -> &'static str;

    async fn query(
        &self,
        model_id: &str,
        messages: &[Message],
        timeout: Duration,
        temperature: f64,
    ) -> ChatResult;

    async fn get_models(&self) -> Vec<ModelDescriptor>;

    async fn validate_connection(&self, url: &str, api_key: &str) -> ValidationResult;

    async fn validate_key(&self, api_key: &str) -> ValidationResult;
}

/**
 * \brief 按注册键索引的 Provider 集合。
 */
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * \brief 注册 Provider；同一键重复注册时替换旧实例。
     */
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let key = provider.key();
        if let Some(slot) = self.providers.iter_mut().find(|p| p.key() == key) {
            *slot = provider;
        } else {
            self.providers.push(provider);
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.iter().find(|p| p.key() == key).cloned()
    }

    /**
     * \brief 根据模型 ID 的 "<key>:" 前缀选择 Provider。
     */
    pub fn resolve(&self, model_id: &str) -> Option<Arc<dyn LlmProvider>> {
        let (prefix, _) = model_id.split_once(':')?;
        self.get(prefix)
    }

    /**
     * \brief 汇总所有 Provider 的模型列表，按注册顺序拼接。
     */
    pub async fn list_models(&self) -> Vec<ModelDescriptor> {
        let mut all = Vec::new();
        for provider in &self.providers {
            all.extend(provider.get_models().await);
        }
        all
    }

    /**
     * \brief 将请求转发给对应 Provider；找不到时返回失败结果。
     */
    pub async fn query(
        &self,
        model_id: &str,
        messages: &[Message],
        timeout: Duration,
        temperature: f64,
    ) -> ChatResult {
        match self.resolve(model_id) {
            Some(provider) => {
                provider
                    .query(model_id, messages, timeout, temperature)
                    .await
            }
            None => ChatResult::failure(format!("unknown provider for model {}", model_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        key: &'static str,
        reply: &'static str,
    }

    #[async_trait]
    impl LlmProvider for Fixed {
        fn key(&self) -> &'static str {
            self.key
        }

        async fn query(
            &self,
            model_id: &str,
            _messages: &[Message],
            _timeout: Duration,
            _temperature: f64,
        ) -> ChatResult {
            ChatResult::success(format!("{}:{}", self.reply, model_id))
        }

        async fn get_models(&self) -> Vec<ModelDescriptor> {
            vec![ModelDescriptor {
                id: format!("{}:m", self.key),
                display_name: format!("m [{}]", self.key),
                provider_name: self.key.to_string(),
            }]
        }

        async fn validate_connection(&self, _url: &str, _api_key: &str) -> ValidationResult {
            ValidationResult::ok("fine")
        }

        async fn validate_key(&self, _api_key: &str) -> ValidationResult {
            ValidationResult::ok("fine")
        }
    }

    fn registry() -> ProviderRegistry {
        let mut r = ProviderRegistry::new();
        r.register(Arc::new(Fixed {
            key: "custom",
            reply: "a",
        }));
        r.register(Arc::new(Fixed {
            key: "other",
            reply: "b",
        }));
        r
    }

    #[tokio::test]
    async fn test_resolve_by_prefix() {
        let r = registry();
        let res = r
            .query("other:x", &[], DEFAULT_CHAT_TIMEOUT, DEFAULT_TEMPERATURE)
            .await;
        assert_eq!(res, ChatResult::success("b:other:x"));
        assert!(r.resolve("no-prefix").is_none());
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_failure() {
        let r = registry();
        let res = r
            .query("nope:x", &[], DEFAULT_CHAT_TIMEOUT, DEFAULT_TEMPERATURE)
            .await;
        assert_eq!(
            res.error_message(),
            Some("unknown provider for model nope:x")
        );
    }

    #[tokio::test]
    async fn test_register_replaces_same_key_and_lists_in_order() {
        let mut r = registry();
        r.register(Arc::new(Fixed {
            key: "custom",
            reply: "c",
        }));
        let models = r.list_models().await;
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["custom:m", "other:m"]);
        let res = r
            .query("custom:y", &[], DEFAULT_CHAT_TIMEOUT, DEFAULT_TEMPERATURE)
            .await;
        assert_eq!(res.content(), Some("c:custom:y"));
    }
}
