//! Grounded answer generation.
//!
//! Retrieves document groups for a question, feeds their merged texts to the
//! generative model under a prompt that forbids drawing on anything outside
//! those excerpts, and records the exchange in chat history. Questions may
//! carry `@file` mentions that restrict retrieval to the named documents.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

use crate::chat;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::llm::ChatModel;
use crate::retrieve::{self, RetrievedDocument};

/// Verbatim refusal the model is instructed to return when the excerpts do
/// not contain the answer.
pub const NOT_AVAILABLE: &str = "Not available in the provided context";

/// Maximum characters of each source surfaced in the response.
const EXCERPT_CHARS: usize = 300;

/// A retrieved document as surfaced to the caller, ranked by contribution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RankedSource {
    pub rank: usize,
    pub document_id: String,
    pub document_url: Option<String>,
    pub text_excerpt: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub ranked_documents: Vec<RankedSource>,
}

fn grounding_prompt(question: &str, context: &str) -> String {
    format!(
        r#"You are a helpful assistant that answers questions about documents.

The user asked: {question}

You are given excerpts (chunks) from documents.
Use **only** the information explicitly stated in these excerpts to answer the question.
If the answer is not contained in the provided excerpts, respond with "{NOT_AVAILABLE}".

Do not invent or assume any additional information. Focus strictly on what is present in the provided context.

Answer the question **in the same language it was asked**.

Excerpts:
{context}

Answer:
"#
    )
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

fn rank_sources(documents: &[RetrievedDocument]) -> Vec<RankedSource> {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| RankedSource {
            rank: i + 1,
            document_id: doc.document_id.clone(),
            document_url: doc.document_url.clone(),
            text_excerpt: excerpt(&doc.text),
        })
        .collect()
}

/// Answer a question from the owner's documents and record the exchange.
pub async fn generate_answer(
    pool: &SqlitePool,
    config: &Config,
    chat_model: &dyn ChatModel,
    embedder: &dyn Embedder,
    query: &str,
    owner: &str,
) -> Result<AnswerResponse> {
    let mentions = retrieve::extract_mentions(query);
    let doc_filter = retrieve::map_mentions_to_doc_ids(pool, owner, &mentions).await?;
    if !mentions.is_empty() {
        debug!(?mentions, matched = doc_filter.len(), "mention targeting");
    }

    let documents = retrieve::retrieve_documents(
        pool,
        config,
        embedder,
        query,
        owner,
        config.retrieval.k,
        &doc_filter,
    )
    .await?;

    let context = documents
        .iter()
        .map(|doc| doc.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let answer = chat_model
        .complete(&grounding_prompt(query, &context))
        .await?
        .trim()
        .to_string();

    let ranked_documents = rank_sources(&documents);

    let sources_json = serde_json::to_string(&ranked_documents)?;
    chat::append(pool, owner, query, &answer, &sources_json).await?;

    Ok(AnswerResponse {
        answer,
        ranked_documents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents;
    use crate::migrate;
    use crate::vectorstore;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Mutex;

    struct ScriptedChat {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
        }
    }

    struct FlatEmbedder;

    #[async_trait]
    impl Embedder for FlatEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_chunk(pool: &SqlitePool, owner: &str, doc_id: &str, text: &str) {
        vectorstore::upsert(
            pool,
            owner,
            &[format!("{doc_id}-c0")],
            &[text.to_string()],
            &[serde_json::json!({"doc_id": doc_id, "owner": owner})],
            &[vec![1.0, 0.0]],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn answer_uses_retrieved_context_and_records_history() {
        let pool = test_pool().await;
        let config = Config::default();
        seed_chunk(&pool, "a@b.c", "d1", "the rent is 950 euros").await;

        let chat_model = ScriptedChat::new(vec!["The rent is 950 euros."]);
        let response = generate_answer(
            &pool,
            &config,
            &chat_model,
            &FlatEmbedder,
            "how much is the rent?",
            "a@b.c",
        )
        .await
        .unwrap();

        assert_eq!(response.answer, "The rent is 950 euros.");
        assert_eq!(response.ranked_documents.len(), 1);
        assert_eq!(response.ranked_documents[0].rank, 1);
        assert_eq!(response.ranked_documents[0].document_id, "d1");

        let prompts = chat_model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("the rent is 950 euros"));
        assert!(prompts[0].contains("how much is the rent?"));
        drop(prompts);

        let history = chat::list(&pool, "a@b.c").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].answer, "The rent is 950 euros.");
        assert!(history[0].sources_json.contains("d1"));
    }

    #[tokio::test]
    async fn refusal_answer_still_recorded() {
        let pool = test_pool().await;
        let config = Config::default();

        let chat_model = ScriptedChat::new(vec![NOT_AVAILABLE]);
        let response = generate_answer(
            &pool,
            &config,
            &chat_model,
            &FlatEmbedder,
            "what color is the house?",
            "a@b.c",
        )
        .await
        .unwrap();

        assert_eq!(response.answer, NOT_AVAILABLE);
        assert!(response.ranked_documents.is_empty());

        let history = chat::list(&pool, "a@b.c").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].answer, NOT_AVAILABLE);
    }

    #[tokio::test]
    async fn excerpts_capped_at_300_chars() {
        let pool = test_pool().await;
        let config = Config::default();
        let long_text = "x".repeat(1000);
        seed_chunk(&pool, "a@b.c", "d1", &long_text).await;

        let chat_model = ScriptedChat::new(vec!["ok"]);
        let response = generate_answer(
            &pool, &config, &chat_model, &FlatEmbedder, "anything", "a@b.c",
        )
        .await
        .unwrap();

        assert_eq!(response.ranked_documents[0].text_excerpt.chars().count(), 300);
    }

    #[tokio::test]
    async fn excerpt_respects_char_boundaries() {
        // Multibyte text at the cut point must not panic or split a char.
        let text = "é".repeat(400);
        let cut = excerpt(&text);
        assert_eq!(cut.chars().count(), 300);
    }

    #[tokio::test]
    async fn mention_restricts_retrieval_to_named_document() {
        let pool = test_pool().await;
        let config = Config::default();
        seed_chunk(&pool, "a@b.c", "d1", "lease terms").await;
        seed_chunk(&pool, "a@b.c", "d2", "tax summary").await;
        documents::save_pending(
            &pool,
            "d2",
            "a@b.c",
            "taxes.pdf",
            b"x",
            "report",
            &std::collections::BTreeMap::new(),
        )
        .await
        .unwrap();
        documents::mark_committed(&pool, "d2", "a@b.c").await.unwrap();

        let chat_model = ScriptedChat::new(vec!["answer"]);
        let response = generate_answer(
            &pool,
            &config,
            &chat_model,
            &FlatEmbedder,
            "what do @taxes say?",
            "a@b.c",
        )
        .await
        .unwrap();

        assert_eq!(response.ranked_documents.len(), 1);
        assert_eq!(response.ranked_documents[0].document_id, "d2");

        let prompts = chat_model.prompts.lock().unwrap();
        assert!(prompts[0].contains("tax summary"));
        assert!(!prompts[0].contains("lease terms"));
    }
}
