//! Generative language model client.
//!
//! Exposes the [`ChatModel`] capability consumed by the structurer and the
//! answer generator, plus the layered credential resolution the service
//! uses: a per-user model/key stored in the users table wins, otherwise the
//! process-wide default from `[llm]` config (key read from the environment
//! variable it names). No usable key is a typed [`LlmError::MissingCredential`]
//! raised before any network call.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::time::Duration;

use crate::config::LlmConfig;

#[derive(Debug)]
pub enum LlmError {
    MissingCredential,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::MissingCredential => write!(
                f,
                "no usable LLM credential: set a per-user key or the configured environment variable"
            ),
        }
    }
}

impl std::error::Error for LlmError {}

/// A prompt-in, completion-out language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Per-user LLM preference row. Both fields optional; absent fields fall
/// back to the system default.
#[derive(Debug, Clone, Default)]
pub struct UserLlmSettings {
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
}

pub async fn get_user_llm(pool: &SqlitePool, email: &str) -> Result<UserLlmSettings> {
    let row = sqlx::query("SELECT llm_model, llm_api_key FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    Ok(match row {
        Some(row) => UserLlmSettings {
            llm_model: row.get("llm_model"),
            llm_api_key: row.get("llm_api_key"),
        },
        None => UserLlmSettings::default(),
    })
}

/// Upsert a user's model/key preference. `None` leaves the stored value
/// unchanged.
pub async fn set_user_llm(
    pool: &SqlitePool,
    email: &str,
    llm_model: Option<&str>,
    llm_api_key: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (email, llm_model, llm_api_key) VALUES (?, ?, ?)
        ON CONFLICT(email) DO UPDATE SET
            llm_model = COALESCE(excluded.llm_model, users.llm_model),
            llm_api_key = COALESCE(excluded.llm_api_key, users.llm_api_key)
        "#,
    )
    .bind(email)
    .bind(llm_model)
    .bind(llm_api_key)
    .execute(pool)
    .await?;
    Ok(())
}

/// HTTP chat-completion client (OpenAI-compatible endpoint).
#[derive(Debug)]
pub struct GenerativeClient {
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    timeout_secs: u64,
}

impl GenerativeClient {
    /// Resolve model and credential for one owner: the user's stored
    /// preference first, then the configured default.
    pub async fn for_owner(pool: &SqlitePool, config: &LlmConfig, owner: &str) -> Result<Self> {
        let user = get_user_llm(pool, owner).await?;

        let model = user.llm_model.unwrap_or_else(|| config.model.clone());
        let api_key = match user.llm_api_key {
            Some(key) if !key.is_empty() => key,
            _ => std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or(LlmError::MissingCredential)?,
        };

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model,
            api_key,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatModel for GenerativeClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("LLM request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("LLM API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let content = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid LLM response: missing message content"))?;

        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn missing_credential_raised_before_any_call() {
        let pool = test_pool().await;
        let config = LlmConfig {
            // env var that cannot plausibly be set
            api_key_env: "DOCHAT_TEST_NO_SUCH_KEY_VAR".to_string(),
            ..LlmConfig::default()
        };
        let err = GenerativeClient::for_owner(&pool, &config, "a@b.c")
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<LlmError>().is_some());
    }

    #[tokio::test]
    async fn user_key_overrides_missing_default() {
        let pool = test_pool().await;
        set_user_llm(&pool, "a@b.c", Some("my-model"), Some("user-key"))
            .await
            .unwrap();
        let config = LlmConfig {
            api_key_env: "DOCHAT_TEST_NO_SUCH_KEY_VAR".to_string(),
            ..LlmConfig::default()
        };
        let client = GenerativeClient::for_owner(&pool, &config, "a@b.c")
            .await
            .unwrap();
        assert_eq!(client.model_name(), "my-model");
    }

    #[tokio::test]
    async fn partial_update_keeps_existing_fields() {
        let pool = test_pool().await;
        set_user_llm(&pool, "a@b.c", Some("model-1"), Some("key-1"))
            .await
            .unwrap();
        set_user_llm(&pool, "a@b.c", Some("model-2"), None)
            .await
            .unwrap();
        let settings = get_user_llm(&pool, "a@b.c").await.unwrap();
        assert_eq!(settings.llm_model.as_deref(), Some("model-2"));
        assert_eq!(settings.llm_api_key.as_deref(), Some("key-1"));
    }

    #[tokio::test]
    async fn unknown_user_gets_defaults() {
        let pool = test_pool().await;
        let settings = get_user_llm(&pool, "nobody@x.y").await.unwrap();
        assert!(settings.llm_model.is_none());
        assert!(settings.llm_api_key.is_none());
    }
}
