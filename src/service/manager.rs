use super::history::{HistoryEntry, HistoryLog};
use crate::credentials::CredentialStore;
use crate::error::GenerateError;
use crate::providers::{CallOptions, Provider, ProviderFailure, ProviderOutput, RestProvider};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Per-tool configuration point for the generic lifecycle engine.
///
/// A feature is only a model id plus the mapping between its typed
/// request/response and the provider payload. Everything else — readiness,
/// single-flight cancellation, classification, history — lives in
/// [`GenerationManager`].
#[async_trait]
pub trait Feature: Send + Sync + 'static {
    type Request: Clone + Send + Sync + 'static;
    type Response: Clone + Send + Sync + 'static;

    fn model(&self) -> &str;

    /// Build the provider payload. May do expensive work (base64-encoding a
    /// video, say); the manager re-checks cancellation right after it.
    async fn prepare(
        &self,
        request: &Self::Request,
    ) -> std::result::Result<Value, ProviderFailure>;

    /// Turn raw provider output into the feature's response type.
    fn parse(&self, output: ProviderOutput)
    -> std::result::Result<Self::Response, ProviderFailure>;
}

/// Builds a client handle from a credential token.
pub type ProviderFactory = Box<dyn Fn(&str) -> Arc<dyn Provider> + Send + Sync>;

/// Snapshot of a manager's externally visible state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub ready: bool,
    pub generating: bool,
    pub last_error: Option<GenerateError>,
}

struct Inner {
    provider: Option<Arc<dyn Provider>>,
    /// Token the current provider handle was built from.
    token: Option<String>,
    ready: bool,
    generating: bool,
    last_error: Option<GenerateError>,
    inflight: Option<CancellationToken>,
    /// Bumped on every new call and every teardown; a settling call whose
    /// epoch is stale was superseded and must not touch anything.
    epoch: u64,
}

/// Credential-reactive request lifecycle manager, one per feature.
///
/// Enforces the at-most-one-in-flight invariant: issuing a new call cancels
/// the previous one, and a superseded call's late resolution is discarded
/// whether it succeeded or failed.
pub struct GenerationManager<F: Feature> {
    feature: F,
    credentials: Arc<CredentialStore>,
    build_provider: ProviderFactory,
    options: CallOptions,
    inner: Mutex<Inner>,
    history: HistoryLog<F::Request, F::Response>,
}

impl<F: Feature> GenerationManager<F> {
    /// Manager backed by the default REST provider at `base_url`.
    pub fn new(
        feature: F,
        credentials: Arc<CredentialStore>,
        base_url: impl Into<String>,
        options: CallOptions,
    ) -> Arc<Self> {
        let base_url = base_url.into();
        Self::with_provider_factory(
            feature,
            credentials,
            Box::new(move |token| {
                Arc::new(RestProvider::new(base_url.clone(), token)) as Arc<dyn Provider>
            }),
            options,
        )
    }

    /// Manager with a custom client-handle factory (test doubles, alternate
    /// transports).
    pub fn with_provider_factory(
        feature: F,
        credentials: Arc<CredentialStore>,
        build_provider: ProviderFactory,
        options: CallOptions,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            feature,
            credentials,
            build_provider,
            options,
            inner: Mutex::new(Inner {
                provider: None,
                token: None,
                ready: false,
                generating: false,
                last_error: None,
                inflight: None,
                epoch: 0,
            }),
            history: HistoryLog::new(),
        });
        manager.refresh();
        manager
    }

    /// Re-apply the current credential: build or tear down the client handle.
    ///
    /// Called once at construction, then from the [`listen`](Self::listen)
    /// task on every credential change. Teardown cancels any in-flight call
    /// and bumps the epoch so its resolution is discarded.
    pub fn refresh(&self) {
        let credential = self.credentials.current();
        let mut inner = self.lock();

        if credential.is_usable() {
            if inner.token.as_deref() != Some(credential.token.as_str()) {
                inner.provider = Some((self.build_provider)(&credential.token));
                inner.token = Some(credential.token);
            }
            inner.ready = true;
            if inner.last_error == Some(GenerateError::CredentialMissing) {
                inner.last_error = None;
            }
            return;
        }

        if let Some(token) = inner.inflight.take() {
            token.cancel();
        }
        inner.epoch += 1;
        inner.provider = None;
        inner.token = None;
        inner.ready = false;
        inner.generating = false;
        if !credential.is_set() {
            inner.last_error = Some(GenerateError::CredentialMissing);
        }
    }

    /// Subscribe to credential changes for the lifetime of the store.
    ///
    /// Abort the returned handle to detach early.
    pub fn listen(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut rx = self.credentials.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                manager.refresh();
            }
        })
    }

    /// Run one generation. Cancels any previous in-flight call on this
    /// manager first.
    pub async fn invoke(
        &self,
        request: F::Request,
    ) -> std::result::Result<F::Response, GenerateError> {
        // Re-sync with the credential store first: a cleared or rejected
        // credential fails fast here even when no listener task is running,
        // and a token set since construction gets its handle built.
        self.refresh();

        let (provider, cancel, epoch) = {
            let mut inner = self.lock();
            let Some(provider) = inner.provider.clone() else {
                inner.last_error = Some(GenerateError::CredentialMissing);
                return Err(GenerateError::CredentialMissing);
            };
            if let Some(previous) = inner.inflight.take() {
                previous.cancel();
            }
            inner.epoch += 1;
            let cancel = CancellationToken::new();
            inner.inflight = Some(cancel.clone());
            inner.generating = true;
            // A retry clears the previous error before attempting.
            inner.last_error = None;
            (provider, cancel, inner.epoch)
        };

        let outcome = self.run(provider.as_ref(), &request, &cancel).await;
        self.settle(request, outcome, epoch)
    }

    /// Stop the in-flight call, if any. Idempotent.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if let Some(token) = inner.inflight.take() {
            token.cancel();
        }
    }

    /// Reset the error slot without touching readiness.
    pub fn clear_error(&self) {
        self.lock().last_error = None;
    }

    pub fn state(&self) -> ServiceState {
        let inner = self.lock();
        ServiceState {
            ready: inner.ready,
            generating: inner.generating,
            last_error: inner.last_error,
        }
    }

    pub fn history(&self) -> &HistoryLog<F::Request, F::Response> {
        &self.history
    }

    async fn run(
        &self,
        provider: &dyn Provider,
        request: &F::Request,
        cancel: &CancellationToken,
    ) -> std::result::Result<F::Response, GenerateError> {
        if cancel.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }

        let payload = tokio::select! {
            () = cancel.cancelled() => return Err(GenerateError::Cancelled),
            prepared = self.feature.prepare(request) => {
                prepared.map_err(|failure| self.classify(&failure))?
            }
        };

        if cancel.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }

        let output = tokio::select! {
            () = cancel.cancelled() => return Err(GenerateError::Cancelled),
            called = provider.call(self.feature.model(), payload, &self.options) => {
                called.map_err(|failure| self.classify(&failure))?
            }
        };

        if cancel.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }

        self.feature
            .parse(output)
            .map_err(|failure| self.classify(&failure))
    }

    /// Commit the outcome of a call, unless it was superseded meanwhile.
    fn settle(
        &self,
        request: F::Request,
        outcome: std::result::Result<F::Response, GenerateError>,
        epoch: u64,
    ) -> std::result::Result<F::Response, GenerateError> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            // A newer call owns the state now; this result is discarded.
            return Err(GenerateError::Cancelled);
        }

        inner.generating = false;
        inner.inflight = None;

        match outcome {
            Ok(response) => {
                // Appended while still holding the state lock, so a racing
                // invoke cannot slot its entry in first; the log's own mutex
                // is a leaf.
                self.history.append(HistoryEntry {
                    request,
                    response: response.clone(),
                    model: self.feature.model().to_string(),
                    timestamp: Utc::now(),
                });
                drop(inner);
                self.credentials.mark_valid();
                Ok(response)
            }
            // Swallowed: a cancelled call is not an error and never lands
            // in the error slot.
            Err(GenerateError::Cancelled) => Err(GenerateError::Cancelled),
            Err(kind) => {
                inner.last_error = Some(kind);
                drop(inner);
                if kind == GenerateError::CredentialRejected {
                    self.credentials.mark_invalid();
                }
                Err(kind)
            }
        }
    }

    fn classify(&self, failure: &ProviderFailure) -> GenerateError {
        let kind = failure.classify();
        tracing::warn!(
            model = self.feature.model(),
            ?kind,
            message = %failure.message,
            "provider call failed"
        );
        kind
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
