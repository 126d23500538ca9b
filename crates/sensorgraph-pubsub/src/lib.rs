//! Sensorgraph subscriptions.
//!
//! A client subscribes with a topic (`v1.1/Things(52)/Locations`) and an
//! optional filter. Subscribing compiles both up front:
//!
//! - `topic`: topic path → `TopicPattern` (direct, related, or property).
//! - `registry`: copy-on-write set of active subscriptions.
//! - `matcher`: decides which subscriptions a committed `ChangeEvent`
//!   reaches, consulting an `EntityStateSource` only for filtered ones.
//!
//! Transport (MQTT framing, QoS, retained messages) is out of scope; a
//! subscription's `connection` is an opaque handle supplied by the caller.

pub mod config;
pub mod error;
pub mod event;
pub mod matcher;
pub mod registry;
pub mod state;
pub mod subscription;
pub mod topic;

pub use config::EngineConfig;
pub use error::{MatchFailure, StateError, TopicError};
pub use event::{ChangeEvent, Operation};
pub use matcher::{structural_match, MatchReport, MatchingEngine};
pub use registry::{Snapshot, SubscriptionRegistry};
pub use state::{EntityStateSource, SharedStore};
pub use subscription::{Subscription, SubscriptionId, SubscriptionRequest};
pub use topic::{Address, DirectAddress, RelatedAddress, TopicCompiler, TopicPattern};
