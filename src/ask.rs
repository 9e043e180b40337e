//! Grounded question answering.
//!
//! Retrieves a balanced context for the question, renders it as one
//! `[source] text` line per passage, and asks the completion gateway to
//! answer from that context only.

use anyhow::{bail, Result};
use serde::Serialize;

use balanced_rag_core::embedding::Embedder;
use balanced_rag_core::error::RagError;
use balanced_rag_core::models::RetrievedPassage;
use balanced_rag_core::store::VectorStore;

use crate::completion::{create_completer, Completer};
use crate::config::{Config, RetrievalConfig};
use crate::embedding::create_embedder;
use crate::search::query_passages;
use crate::sqlite_store::SqliteStore;

pub const SYSTEM_PROMPT: &str = "\
You are a doctor's assistant specializing in mental health.
Use the provided CONTEXT to generate professional, evidence-based advice.
Always base your answer on the retrieved documents and never offer off-scope responses.
If the question is outside the mental health scope, reply that you cannot assist.
Avoid generic answers without support from the documents in the CONTEXT, such as \
\"Seek professional help\" or \"Talk to a doctor\", even when the dataset contains them; \
they lack the specificity and actionable guidance needed to help someone in crisis.
When you use information from a document, append its source name in brackets exactly \
as it appears in the CONTEXT.

Example:
CONTEXT:
[20200325_counsel_chat.csv] Cognitive Behavioral Therapy helps patients reframe negative thoughts.
[counselchat-data.csv] Deep breathing exercises can reduce acute anxiety symptoms.
USER QUESTION:
My patient has panic attacks when speaking in public. How can I help them manage this?
ASSISTANT RESPONSE:
Start with guided breathing for the acute episodes. For lasting change, use the reframing \
steps from [20200325_counsel_chat.csv] to challenge catastrophic thoughts: list the evidence \
for and against \"I will embarrass myself\", then compare outcomes.
";

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    /// Distinct sources of the context passages, in first-appearance order.
    pub sources: Vec<String>,
}

/// One `[source] text` line per passage.
pub fn build_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| format!("[{}] {}", p.source, p.text.replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_user_prompt(context: &str, question: &str) -> String {
    format!(
        "CONTEXT:\n{}\n\nQUESTION:\n{}\n\nINSTRUCTIONS:\n\
         - Base your response only on the CONTEXT.\n\
         - Give concise, professional, evidence-based advice.\n\
         - Cite documents by the source name shown in brackets.\n\
         - If the question is off-scope, say that you cannot assist.",
        context, question
    )
}

pub fn distinct_sources(passages: &[RetrievedPassage]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for passage in passages {
        if !sources.contains(&passage.source) {
            sources.push(passage.source.clone());
        }
    }
    sources
}

pub async fn answer_question(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    completer: &dyn Completer,
    retrieval: &RetrievalConfig,
    question: &str,
) -> Result<Answer, RagError> {
    let passages = query_passages(store, embedder, retrieval, question, None).await?;
    let context = build_context(&passages);
    tracing::debug!(passages = passages.len(), "built answer context");

    let answer = completer
        .complete(SYSTEM_PROMPT, &build_user_prompt(&context, question.trim()))
        .await?;

    Ok(Answer {
        answer,
        sources: distinct_sources(&passages),
    })
}

/// `brag ask`: answer one question and print the cited sources.
pub async fn run_ask(config: &Config, question: &str) -> Result<()> {
    if !config.embedding.is_enabled() || !config.completion.is_enabled() {
        bail!("Asking requires both [embedding] and [completion] providers in config.");
    }

    let store = SqliteStore::open(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    let completer = create_completer(&config.completion)?;

    let answer = answer_question(
        &store,
        embedder.as_ref(),
        completer.as_ref(),
        &config.retrieval,
        question,
    )
    .await?;

    println!("{}", answer.answer.trim());
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!("  - {}", source);
        }
    }

    store.pool().close().await;
    Ok(())
}
