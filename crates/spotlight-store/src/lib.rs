//! # Spotlight Store
//!
//! In-memory state for a local telemetry session. Parsed envelopes go in;
//! events, per-trace span trees (with profile frames grafted into untraced
//! gaps), SDK identities and change notifications come out.
//!
//! ```text
//! ProcessedEnvelope
//!     ↓
//! Store::push_envelope ── classify, dedup, normalize
//!     ↓
//! Trace (trace.rs) ── group_spans (span_tree.rs) ── graft_profile_spans (grafting.rs)
//!     ↓
//! Subscription (subscription.rs)
//! ```

pub mod config;
pub mod context_lines;
pub mod error;
pub mod grafting;
pub mod locality;
pub mod span_tree;
pub mod store;
pub mod subscription;
pub mod trace;

pub use config::{ContextLinesConfig, StoreConfig};
pub use context_lines::{ContextLinesProvider, HttpContextLines};
pub use error::{ContextLinesError, StoreError};
pub use grafting::{graft_profile_spans, is_profile_span};
pub use locality::LocalTraces;
pub use span_tree::{group_spans, NestedSpan, NodeId, SpanNode, SpanTree};
pub use store::{Sdk, Store};
pub use subscription::{Notification, Subscription, SubscriptionKind};
pub use trace::{Trace, MISSING_ROOT_TRANSACTION, MULTIPLE_ROOT_TRANSACTIONS};
