//! Embedder and classifier backed by a local Ollama server

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use docflow_core::{ClassifierConfig, Classification, EmbeddingConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};

use super::{Classifier, CollaboratorError, Embedder};

/// the gpu is the bottleneck, more requests just queue on the server
const OLLAMA_MAX_CONCURRENT_REQUESTS: usize = 4;

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CollaboratorError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().await.unwrap_or_default();
  Err(CollaboratorError::from_status(status.as_u16(), &body))
}

// ============================================================================
// Embedder
// ============================================================================

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
  client: reqwest::Client,
  base_url: String,
  model: String,
  max_batch_size: usize,
  max_concurrent: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
  model: &'a str,
  input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
  embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
  pub fn new(config: &EmbeddingConfig) -> Self {
    info!(
      base_url = %config.ollama_url,
      model = %config.model,
      max_batch_size = config.max_batch_size,
      "Ollama embedder initialized"
    );
    Self {
      client: reqwest::Client::new(),
      base_url: config.ollama_url.trim_end_matches('/').to_string(),
      model: config.model.clone(),
      max_batch_size: config.max_batch_size.max(1),
      max_concurrent: OLLAMA_MAX_CONCURRENT_REQUESTS,
    }
  }

  fn embed_url(&self) -> String {
    format!("{}/api/embed", self.base_url)
  }

  #[tracing::instrument(level = "trace", skip(self, texts), fields(batch_size = texts.len()))]
  async fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
    let request = EmbedRequest {
      model: &self.model,
      input: texts,
    };
    let start = Instant::now();

    let response = self.client.post(self.embed_url()).json(&request).send().await?;
    let response = check_status(response).await.inspect_err(|e| {
      warn!(batch_size = texts.len(), model = %self.model, err = %e, "Ollama embedding failed");
    })?;

    let result: EmbedResponse = response.json().await?;
    trace!(
      embeddings = result.embeddings.len(),
      elapsed_ms = start.elapsed().as_millis() as u64,
      "Parsed embedding response"
    );

    if result.embeddings.len() != texts.len() {
      return Err(CollaboratorError::fatal(format!(
        "got {} embeddings for {} inputs",
        result.embeddings.len(),
        texts.len()
      )));
    }
    Ok(result.embeddings)
  }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
  /// Splits into sub-batches of `max_batch_size` and sends a few at a time.
  async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }
    let num_batches = texts.len().div_ceil(self.max_batch_size);
    if num_batches == 1 {
      return self.embed_single_batch(texts).await;
    }

    debug!(
      batch_size = texts.len(),
      sub_batches = num_batches,
      model = %self.model,
      "Embedding with concurrent sub-batches"
    );

    let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
    let futures = texts.chunks(self.max_batch_size).map(|chunk| {
      let semaphore = semaphore.clone();
      async move {
        let _permit = semaphore
          .acquire()
          .await
          .map_err(|_| CollaboratorError::fatal("semaphore closed"))?;
        self.embed_single_batch(chunk).await
      }
    });

    // join_all keeps input order
    let mut all = Vec::with_capacity(texts.len());
    for result in futures::future::join_all(futures).await {
      all.extend(result?);
    }
    Ok(all)
  }
}

// ============================================================================
// Classifier
// ============================================================================

const SYSTEM_PROMPT: &str = "You are an expert legal contract documents analysis assistant.";

fn classification_prompt(text: &str) -> String {
  let labels: Vec<&str> = Classification::ALL.iter().map(|c| c.as_str()).collect();
  format!(
    r#"Classify the following text into exactly one category: {labels}.

Rules:
1. Only return the category name, no explanation.
2. The category must be exactly one of the names above.

Guidelines:
PreambleBlock: introductory or background statements, parties and effective date
TermsandconditionsBlock: terms, conditions, obligations, disclaimers, duration or termination
SignatureBlock: signature lines or signatories
ServiceBlock: scope of services or the services provided
PricingBlock: fees, costs or pricing details
Other: no clear match above

Text: {text}"#,
    labels = labels.join(", "),
    text = text
  )
}

#[derive(Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
  temperature: f32,
  num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
  stream: bool,
  options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
  message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
  content: String,
}

#[derive(Debug, Clone)]
pub struct OllamaClassifier {
  client: reqwest::Client,
  base_url: String,
  model: String,
  max_concurrent: usize,
}

impl OllamaClassifier {
  pub fn new(config: &ClassifierConfig) -> Self {
    info!(base_url = %config.ollama_url, model = %config.model, "Ollama classifier initialized");
    Self {
      client: reqwest::Client::new(),
      base_url: config.ollama_url.trim_end_matches('/').to_string(),
      model: config.model.clone(),
      max_concurrent: OLLAMA_MAX_CONCURRENT_REQUESTS,
    }
  }

  fn chat_url(&self) -> String {
    format!("{}/api/chat", self.base_url)
  }

  async fn classify_one(&self, text: &str) -> Result<String, CollaboratorError> {
    let prompt = classification_prompt(text);
    let request = ChatRequest {
      model: &self.model,
      messages: vec![
        ChatMessage {
          role: "system",
          content: SYSTEM_PROMPT,
        },
        ChatMessage {
          role: "user",
          content: &prompt,
        },
      ],
      stream: false,
      options: ChatOptions {
        temperature: 0.0,
        num_predict: 10,
      },
    };

    let response = self.client.post(self.chat_url()).json(&request).send().await?;
    let response = check_status(response).await?;
    let result: ChatResponse = response.json().await?;
    Ok(result.message.content.trim().to_string())
  }
}

#[async_trait]
impl Classifier for OllamaClassifier {
  async fn classify(&self, texts: &[String]) -> Result<Vec<String>, CollaboratorError> {
    let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
    let futures = texts.iter().map(|text| {
      let semaphore = semaphore.clone();
      async move {
        let _permit = semaphore
          .acquire()
          .await
          .map_err(|_| CollaboratorError::fatal("semaphore closed"))?;
        self.classify_one(text).await
      }
    });
    futures::future::join_all(futures).await.into_iter().collect()
  }
}
