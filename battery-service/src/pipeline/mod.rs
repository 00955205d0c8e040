use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
    /// Registry page the record arrived on (1-based).
    pub page: u32,
}

impl<T> Envelope<T> {
    pub fn new(payload: T, page: u32) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
            page,
        }
    }

    pub fn map<U>(self, payload: U) -> Envelope<U> {
        Envelope {
            payload,
            received_at: self.received_at,
            page: self.page,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("registry rejected credentials: {0}")]
    Auth(String),
    #[error("fetching page {page} failed after {attempts} attempts: {message}")]
    TransientFetch {
        page: u32,
        attempts: u32,
        message: String,
    },
    #[error("source error: {0}")]
    Source(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("sink error: {0}")]
    Sink(String),
}

impl PipelineError {
    /// Record-level errors skip one item; everything else ends the run.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

/// Returning `Ok(None)` drops the record without it counting as an error.
#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Option<Envelope<O>>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    type Output: Send;

    async fn run<S>(&self, input: S) -> Result<Self::Output, PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

type MaybeStream<T> =
    Pin<Box<dyn Stream<Item = Result<Option<Envelope<T>>, PipelineError>> + Send>>;

/// Source of raw records `I`, one parsing step into `T`, then same-type
/// transforms in order, ending in a sink.
pub struct Pipeline<S, I, T, K> {
    pub source: S,
    pub parser: Arc<dyn Transform<I, T> + Send + Sync>,
    pub transforms: Vec<Arc<dyn Transform<T, T> + Send + Sync>>, // same-type transforms chain
    pub sink: K,
}

impl<S, I, T, K> Pipeline<S, I, T, K>
where
    I: Send + 'static,
    T: Send + 'static,
    S: Source<I> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<K::Output, PipelineError> {
        let parser = self.parser.clone();
        let mut stream: MaybeStream<T> = Box::pin(self.source.stream().await.then(move |item| {
            let p = parser.clone();
            async move {
                match item {
                    Ok(env) => p.apply(env).await,
                    Err(e) => Err(e),
                }
            }
        }));

        // Apply transforms in sequence (if any); dropped records stay dropped.
        for t in self.transforms {
            let t_arc = t.clone();
            stream = Box::pin(stream.then(move |item| {
                let t_inner = t_arc.clone();
                async move {
                    match item {
                        Ok(Some(env)) => t_inner.apply(env).await,
                        other => other,
                    }
                }
            }));
        }

        let kept = stream.filter_map(|item| async move { item.transpose() });
        self.sink.run(Box::pin(kept)).await
    }
}
