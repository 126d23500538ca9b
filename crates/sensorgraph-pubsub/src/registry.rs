//! Subscription registry.
//!
//! Subscriptions live in an immutable snapshot behind an `RwLock<Arc<_>>`.
//! Writers (subscribe/unsubscribe) serialize on a separate mutex, copy the
//! current snapshot, edit the copy, and swap it in. A match pass clones the
//! `Arc` once and iterates a view that no writer can change underneath it,
//! so each subscription is either wholly in or wholly out of that pass.

use crate::config::EngineConfig;
use crate::error::TopicError;
use crate::subscription::{Subscription, SubscriptionId, SubscriptionRequest};
use crate::topic::{TopicCompiler, TopicPattern};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use sensorgraph_query::PredicateCompiler;
use sensorgraph_schema::Registry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Consistent view of the active subscriptions.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    subscriptions: BTreeMap<SubscriptionId, Arc<Subscription>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Arc<Subscription>> {
        self.subscriptions.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        self.subscriptions.values()
    }
}

pub struct SubscriptionRegistry {
    schema: Arc<Registry>,
    config: EngineConfig,
    writer: Mutex<()>,
    current: RwLock<Arc<Snapshot>>,
}

impl SubscriptionRegistry {
    pub fn new(schema: Arc<Registry>, config: EngineConfig) -> Self {
        Self {
            schema,
            config,
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn schema(&self) -> &Registry {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile a topic without subscribing.
    pub fn compile_topic(&self, topic: &str) -> Result<TopicPattern, TopicError> {
        TopicCompiler::new(&self.schema, &self.config.topic_prefixes).compile(topic)
    }

    /// Validate and register a subscription. All compilation happens here;
    /// nothing about the topic or filter can fail at match time.
    pub fn subscribe(&self, request: SubscriptionRequest) -> Result<SubscriptionId, TopicError> {
        let pattern = self.compile_topic(&request.topic)?;
        let compiler = PredicateCompiler::with_config(&self.schema, &self.config.compiler);
        let wanted = compiler.resolver().entity(pattern.wanted_type())?;

        let filter = request
            .filter
            .as_ref()
            .map(|f| compiler.compile(&wanted.name, f))
            .transpose()?;

        let mut watched = BTreeSet::new();
        let requested = request.watched.iter().map(String::as_str);
        for property in pattern.property().into_iter().chain(requested) {
            watched.extend(compiler.resolver().storage_columns(wanted, property)?);
        }

        let subscription = Subscription {
            id: SubscriptionId::new(),
            connection: request.connection,
            topic: request.topic,
            pattern,
            filter,
            watched,
            created_at: Utc::now(),
        };
        let id = subscription.id;
        info!(
            subscription = %id,
            connection = %subscription.connection,
            topic = %subscription.topic,
            pattern = %subscription.pattern,
            "subscribed"
        );
        self.commit(|subs| {
            subs.insert(id, Arc::new(subscription));
        });
        Ok(id)
    }

    /// Remove one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let removed = self.commit(|subs| subs.remove(id).is_some());
        if removed {
            info!(subscription = %id, "unsubscribed");
        }
        removed
    }

    /// Remove every subscription owned by `connection` (transport
    /// disconnect). Returns how many were removed.
    pub fn unsubscribe_connection(&self, connection: &str) -> usize {
        let removed = self.commit(|subs| {
            let before = subs.len();
            subs.retain(|_, s| s.connection != connection);
            before - subs.len()
        });
        if removed > 0 {
            info!(connection, removed, "connection closed");
        }
        removed
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<Arc<Subscription>> {
        self.current.read().get(id).cloned()
    }

    fn commit<R>(
        &self,
        edit: impl FnOnce(&mut BTreeMap<SubscriptionId, Arc<Subscription>>) -> R,
    ) -> R {
        let _writer = self.writer.lock();
        let mut next = Snapshot::clone(&self.current.read());
        let result = edit(&mut next.subscriptions);
        debug!(subscriptions = next.len(), "registry snapshot swapped");
        *self.current.write() = Arc::new(next);
        result
    }
}
