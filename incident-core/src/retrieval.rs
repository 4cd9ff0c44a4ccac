//! Knowledge retrieval: the similarity-search collaborator and the lazily
//! constructed, process-wide client handle the enrichment stage shares.

use crate::config::Settings;
use crate::error::RetrievalError;
use crate::model::DisabledReason;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument, warn};

/// A ranked document chunk returned by a similarity search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,
    pub similarity: f64,
    pub source_url: String,
}

/// Similarity search over an indexed corpus. Results are ranked by similarity,
/// highest first.
pub trait KnowledgeSearch: Send + Sync {
    fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<Snippet>, RetrievalError>;
}

pub type Connector =
    Box<dyn Fn() -> Result<Arc<dyn KnowledgeSearch>, RetrievalError> + Send + Sync>;

enum ClientState {
    Uninitialized,
    Ready(Arc<dyn KnowledgeSearch>),
    Disabled(String),
}

/// What the enrichment stage gets back when it asks for the retrieval client.
#[derive(Clone)]
pub enum Retrieval {
    Ready(Arc<dyn KnowledgeSearch>),
    Disabled(DisabledReason),
}

/// Process-wide retrieval client, constructed on first use.
///
/// Construction happens at most once: the state lock is held while the
/// connector runs, so concurrent first callers wait for the single attempt.
/// A failed attempt leaves the handle disabled for good.
pub struct LazyRetrieval {
    disabled_by_config: bool,
    connector: Connector,
    state: Mutex<ClientState>,
}

impl LazyRetrieval {
    pub fn new(connector: Connector) -> Self {
        Self {
            disabled_by_config: false,
            connector,
            state: Mutex::new(ClientState::Uninitialized),
        }
    }

    /// A handle that never constructs a client.
    pub fn disabled() -> Self {
        Self {
            disabled_by_config: true,
            connector: Box::new(|| -> Result<Arc<dyn KnowledgeSearch>, RetrievalError> {
                Err(RetrievalError::NotConfigured)
            }),
            state: Mutex::new(ClientState::Uninitialized),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        if settings.disable_retrieval {
            return Self::disabled();
        }
        let settings = settings.clone();
        Self::new(Box::new(move || -> Result<Arc<dyn KnowledgeSearch>, RetrievalError> {
            let client = HttpKnowledgeClient::connect(&settings)?;
            Ok(Arc::new(client) as Arc<dyn KnowledgeSearch>)
        }))
    }

    pub fn get(&self) -> Retrieval {
        if self.disabled_by_config {
            return Retrieval::Disabled(DisabledReason::Configuration);
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            ClientState::Ready(client) => return Retrieval::Ready(Arc::clone(client)),
            ClientState::Disabled(_) => {
                return Retrieval::Disabled(DisabledReason::InitializationFailed)
            }
            ClientState::Uninitialized => {}
        }

        match (self.connector)() {
            Ok(client) => {
                info!("knowledge retrieval client initialized");
                *state = ClientState::Ready(Arc::clone(&client));
                Retrieval::Ready(client)
            }
            Err(err) => {
                warn!(error = %err, "knowledge retrieval disabled for this process");
                *state = ClientState::Disabled(err.to_string());
                Retrieval::Disabled(DisabledReason::InitializationFailed)
            }
        }
    }

    /// Why construction failed, if it did.
    #[cfg(test)]
    pub(crate) fn failure(&self) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            ClientState::Disabled(reason) => Some(reason.clone()),
            _ => None,
        }
    }
}

/// Client for an HTTP similarity-search service that owns the embedding model
/// and the vector index.
#[derive(Debug, Clone)]
pub struct HttpKnowledgeClient {
    base_url: String,
    collection: String,
    model: String,
    http: reqwest::blocking::Client,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
    collection: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Snippet>,
}

impl HttpKnowledgeClient {
    /// Builds the client and checks the service is reachable.
    pub fn connect(settings: &Settings) -> Result<Self, RetrievalError> {
        let base_url = settings.knowledge_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(RetrievalError::NotConfigured);
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| RetrievalError::Initialization(e.to_string()))?;

        let client = Self {
            base_url: base_url.to_string(),
            collection: settings.knowledge_collection.clone(),
            model: settings.embed_model.clone(),
            http,
        };
        client.health_check()?;
        Ok(client)
    }

    fn health_check(&self) -> Result<(), RetrievalError> {
        let url = format!("{}/health", self.base_url);
        self.http
            .get(&url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| RetrievalError::Initialization(e.to_string()))?;
        debug!(url = %url, "knowledge service healthy");
        Ok(())
    }
}

impl KnowledgeSearch for HttpKnowledgeClient {
    #[instrument(skip(self), fields(collection = %self.collection))]
    fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<Snippet>, RetrievalError> {
        let url = format!("{}/search", self.base_url);
        let response: SearchResponse = self
            .http
            .post(&url)
            .json(&SearchRequest {
                query: query_text,
                top_k,
                collection: &self.collection,
                model: &self.model,
            })
            .send()?
            .error_for_status()?
            .json()?;

        let mut results = response.results;
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(top_k);
        Ok(results)
    }
}
