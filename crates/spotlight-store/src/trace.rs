use indexmap::IndexMap;
use serde::Serialize;
use spotlight_core::{Event, Span, SpanId, TraceId};
use std::sync::Arc;

use crate::span_tree::{group_spans, SpanTree};

pub const MULTIPLE_ROOT_TRANSACTIONS: &str = "(multiple root transactions)";
pub const MISSING_ROOT_TRANSACTION: &str = "(missing root transaction)";
const UNNAMED_TRANSACTION: &str = "(unnamed transaction)";

/// Everything observed for one `trace_id`. Created on first reference and
/// only ever grows.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub trace_id: TraceId,
    /// Spans of every transaction, keyed by span id.
    pub spans: IndexMap<SpanId, Span>,
    pub span_tree: SpanTree,
    /// Transaction events, sorted by start timestamp.
    pub transactions: Vec<Arc<Event>>,
    pub errors: usize,
    pub start_timestamp: f64,
    pub timestamp: f64,
    pub status: String,
    pub root_transaction: Option<Arc<Event>>,
    pub root_transaction_name: String,
    /// Set once profile filler spans have been grafted into `span_tree`.
    pub profile_grafted: bool,
}

impl Trace {
    pub fn new(trace_id: impl Into<TraceId>, start_timestamp: f64, timestamp: f64) -> Self {
        Self {
            trace_id: trace_id.into(),
            spans: IndexMap::new(),
            span_tree: SpanTree::default(),
            transactions: Vec::new(),
            errors: 0,
            start_timestamp,
            timestamp,
            status: "unknown".to_string(),
            root_transaction: None,
            root_transaction_name: MISSING_ROOT_TRANSACTION.to_string(),
            profile_grafted: false,
        }
    }

    pub fn duration(&self) -> f64 {
        self.timestamp - self.start_timestamp
    }

    /// False while the trace is still a single-instant placeholder.
    pub fn has_time_range(&self) -> bool {
        self.start_timestamp < self.timestamp
    }

    pub(crate) fn extend_time_range(&mut self, event: &Event) {
        self.start_timestamp = self.start_timestamp.min(event.start_timestamp());
        self.timestamp = self.timestamp.max(event.timestamp());
    }

    /// Record a transaction and rebuild the span map and tree from scratch.
    /// Any previously grafted profile spans are discarded with the old tree.
    pub(crate) fn add_transaction(&mut self, event: Arc<Event>) {
        self.transactions.push(event);
        self.transactions
            .sort_by(|a, b| a.start_timestamp().total_cmp(&b.start_timestamp()));
        self.rebuild_spans();
        self.span_tree = group_spans(&self.spans);
        self.profile_grafted = false;
    }

    fn rebuild_spans(&mut self) {
        let mut spans = IndexMap::new();
        for transaction in self.transactions.iter().filter_map(|e| e.as_transaction()) {
            let children = transaction.spans.iter().cloned();
            for mut span in transaction.root_span().into_iter().chain(children) {
                span.normalize(&self.trace_id);
                spans.insert(span.span_id.clone(), span);
            }
        }
        self.spans = spans;
    }

    pub(crate) fn update_root(&mut self) {
        let mut roots = self.transactions.iter().filter(|event| {
            event
                .as_transaction()
                .is_some_and(|t| t.parent_span_id().is_none())
        });

        let (first, second) = (roots.next(), roots.next());
        match (first, second) {
            (Some(root), None) => {
                if let Some(transaction) = root.as_transaction() {
                    self.root_transaction_name = transaction
                        .transaction
                        .clone()
                        .unwrap_or_else(|| UNNAMED_TRANSACTION.to_string());
                }
                if let Some(status) = root.trace_context().and_then(|t| t.status.clone()) {
                    self.status = status;
                }
                self.root_transaction = Some(root.clone());
            }
            (Some(_), Some(_)) => {
                self.root_transaction = None;
                self.root_transaction_name = MULTIPLE_ROOT_TRANSACTIONS.to_string();
            }
            _ => {
                self.root_transaction = None;
                self.root_transaction_name = MISSING_ROOT_TRANSACTION.to_string();
            }
        }
    }
}

impl Serialize for SpanTree {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_nested().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spotlight_core::EventKind;

    fn transaction(value: serde_json::Value) -> Arc<Event> {
        Arc::new(Event::from_payload(EventKind::Transaction, value).unwrap().remove(0))
    }

    #[test]
    fn single_root_names_the_trace() {
        let mut trace = Trace::new("t1", 1000.0, 1000.0);
        trace.add_transaction(transaction(json!({
            "transaction": "GET /users",
            "start_timestamp": 1.0,
            "timestamp": 3.0,
            "contexts": {"trace": {"trace_id": "t1", "span_id": "root", "status": "ok"}},
            "spans": [{"span_id": "db", "parent_span_id": "root", "start_timestamp": 1.5, "timestamp": 2.0}]
        })));
        trace.update_root();

        assert_eq!(trace.root_transaction_name, "GET /users");
        assert_eq!(trace.status, "ok");
        assert!(trace.root_transaction.is_some());
        assert_eq!(trace.spans.len(), 2);
        assert_eq!(trace.spans["db"].trace_id, "t1");
        assert_eq!(trace.span_tree.len(), 2);
    }

    #[test]
    fn root_name_variants() {
        let mut trace = Trace::new("t1", 0.0, 0.0);
        trace.add_transaction(transaction(json!({
            "start_timestamp": 2.0,
            "timestamp": 3.0,
            "contexts": {"trace": {"trace_id": "t1", "span_id": "child", "parent_span_id": "upstream"}}
        })));
        trace.update_root();
        assert_eq!(trace.root_transaction_name, MISSING_ROOT_TRANSACTION);
        assert!(trace.root_transaction.is_none());

        for span_id in ["r1", "r2"] {
            trace.add_transaction(transaction(json!({
                "start_timestamp": 1.0,
                "timestamp": 3.0,
                "contexts": {"trace": {"trace_id": "t1", "span_id": span_id}}
            })));
        }
        trace.update_root();
        assert_eq!(trace.root_transaction_name, MULTIPLE_ROOT_TRANSACTIONS);
        assert!(trace.root_transaction.is_none());
    }

    #[test]
    fn transactions_stay_sorted() {
        let mut trace = Trace::new("t1", 0.0, 0.0);
        for (span_id, start) in [("late", 5.0), ("early", 1.0)] {
            trace.add_transaction(transaction(json!({
                "start_timestamp": start,
                "timestamp": start + 1.0,
                "contexts": {"trace": {"trace_id": "t1", "span_id": span_id, "parent_span_id": "x"}}
            })));
        }
        let starts: Vec<f64> = trace.transactions.iter().map(|e| e.start_timestamp()).collect();
        assert_eq!(starts, vec![1000.0, 5000.0]);
    }
}
