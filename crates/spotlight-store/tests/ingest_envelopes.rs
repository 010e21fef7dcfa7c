use bytes::Bytes;
use serde_json::json;
use spotlight_envelope::process_envelope;
use spotlight_store::{
    is_profile_span, Notification, Store, StoreConfig, SubscriptionKind, MULTIPLE_ROOT_TRANSACTIONS,
};

fn build_envelope(header: serde_json::Value, items: Vec<(serde_json::Value, String)>) -> Bytes {
    let mut raw = format!("{}\n", header);
    for (item_header, payload) in items {
        raw.push_str(&format!("{}\n{}\n", item_header, payload));
    }
    Bytes::from(raw)
}

fn transaction_payload() -> serde_json::Value {
    json!({
        "event_id": "a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6",
        "transaction": "GET /checkout",
        "platform": "javascript",
        "start_timestamp": "2024-05-01T10:00:00.000Z",
        "timestamp": "2024-05-01T10:00:02.000Z",
        "contexts": {"trace": {
            "trace_id": "4f1d2c3b4a5968778695a4b3c2d1e0f9",
            "span_id": "aaaaaaaaaaaaaaaa",
            "op": "http.server",
            "status": "ok"
        }},
        "spans": [
            {
                "span_id": "bbbbbbbbbbbbbbbb",
                "parent_span_id": "aaaaaaaaaaaaaaaa",
                "op": "db.query",
                "description": "SELECT * FROM carts",
                "start_timestamp": "2024-05-01T10:00:00.500Z",
                "timestamp": "2024-05-01T10:00:01.000Z"
            },
            {
                "span_id": "cccccccccccccccc",
                "parent_span_id": "ffffffffffffffff",
                "op": "http.client",
                "start_timestamp": "2024-05-01T10:00:01.200Z",
                "timestamp": "2024-05-01T10:00:01.400Z"
            }
        ]
    })
}

#[test]
fn length_prefixed_and_newline_items_are_ingested() {
    // Pretty-printed payload: newlines inside the length-delimited region.
    let transaction = serde_json::to_string_pretty(&transaction_payload()).unwrap();
    let error = json!({
        "event_id": "0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f",
        "timestamp": "2024-05-01T10:00:01.100Z",
        "exception": {"values": [{"type": "Error", "value": "cart is empty"}]},
        "contexts": {"trace": {"trace_id": "4f1d2c3b4a5968778695a4b3c2d1e0f9", "span_id": "bbbbbbbbbbbbbbbb"}}
    })
    .to_string();

    let data = build_envelope(
        json!({"sdk": {"name": "sentry.javascript.node", "version": "8.9.0"}}),
        vec![
            (json!({"type": "transaction", "length": transaction.len()}), transaction),
            (json!({"type": "event"}), error),
        ],
    );

    let processed = process_envelope(Some("application/x-sentry-envelope"), data).unwrap();
    assert_eq!(processed.envelope.len(), 2);

    let store = Store::new(StoreConfig::default()).unwrap();
    let mut traces = store.subscribe(SubscriptionKind::Trace);
    assert_eq!(store.push_envelope(processed), 1);

    let events = store.get_events();
    assert_eq!(events.len(), 2);

    let trace = store
        .get_trace_by_id("4f1d2c3b4a5968778695a4b3c2d1e0f9")
        .unwrap();
    assert_eq!(trace.root_transaction_name, "GET /checkout");
    assert_eq!(trace.errors, 1);
    assert_eq!(trace.duration(), 2000.0);
    assert_eq!(trace.spans.len(), 3);

    // Root span, the db query, an orphan for the unknown parent and its child.
    let tree = &trace.span_tree;
    assert_eq!(tree.roots().len(), 1);
    assert_eq!(tree.len(), 4);
    let root = tree.roots()[0];
    let children: Vec<_> = tree
        .children(root)
        .iter()
        .map(|&id| tree[id].span.op.clone().unwrap_or_default())
        .collect();
    assert_eq!(children, vec!["db.query", "orphan"]);

    let notification = tokio_test::block_on(traces.recv());
    assert!(matches!(notification, Some(Notification::Trace(_))));

    let sdks = store.get_sdks();
    assert_eq!(sdks.len(), 1);
    assert_eq!(sdks[0].version, "8.9.0");

    let envelopes = store.get_envelopes();
    let raw = envelopes[0].raw.as_ref().unwrap();
    assert_eq!(raw.content_type, "application/x-sentry-envelope");
}

#[test]
fn profile_in_a_separate_envelope_is_grafted() {
    let store = Store::new(StoreConfig::default()).unwrap();
    let transaction = transaction_payload().to_string();
    store.push_envelope(
        process_envelope(None, build_envelope(json!({}), vec![(json!({"type": "transaction"}), transaction)]))
            .unwrap(),
    );

    let profile = json!({
        "event_id": "9e9e9e9e9e9e9e9e9e9e9e9e9e9e9e9e",
        "version": "1",
        "platform": "javascript",
        "timestamp": "2024-05-01T10:00:00.000Z",
        "transactions": [{
            "id": "a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6",
            "trace_id": "4f1d2c3b4a5968778695a4b3c2d1e0f9",
            "name": "GET /checkout",
            "active_thread_id": 0
        }],
        "profile": {
            "samples": [
                {"stack_id": 0, "thread_id": 0, "elapsed_since_start_ns": 100000000},
                {"stack_id": 1, "thread_id": 0, "elapsed_since_start_ns": 1600000000}
            ],
            "stacks": [[0, 1], [2, 1]],
            "frames": [
                {"function": "loadCart", "module": "cart", "abs_path": "/app/cart.js", "lineno": 10},
                {"function": "handle", "module": "server", "abs_path": "/app/server.js", "lineno": 3},
                {"function": "render", "module": "view", "abs_path": "/app/view.js", "lineno": 7}
            ],
            "thread_metadata": {"0": {"name": "main"}}
        }
    })
    .to_string();
    store.push_envelope(
        process_envelope(None, build_envelope(json!({}), vec![(json!({"type": "profile"}), profile)]))
            .unwrap(),
    );

    let trace = store
        .get_trace_by_id("4f1d2c3b4a5968778695a4b3c2d1e0f9")
        .unwrap();
    assert!(trace.profile_grafted);

    let tree = &trace.span_tree;
    let root = tree.roots()[0];
    let filler: Vec<_> = tree
        .children(root)
        .iter()
        .map(|&id| &tree[id].span)
        .filter(|span| is_profile_span(span))
        .collect();
    assert_eq!(filler.len(), 2);
    // Leaf frames are sampled stacks reversed to root-first: handle > loadCart.
    assert_eq!(filler[0].description.as_deref(), Some("handle"));
    assert_eq!(filler[1].description.as_deref(), Some("handle"));
}

#[test]
fn separate_root_transactions_share_a_trace() {
    let store = Store::new(StoreConfig::default()).unwrap();
    for (event_id, span_id) in [
        ("11111111111111111111111111111111", "1111111111111111"),
        ("22222222222222222222222222222222", "2222222222222222"),
    ] {
        let payload = json!({
            "event_id": event_id,
            "start_timestamp": 1714557600.0,
            "timestamp": 1714557601.0,
            "contexts": {"trace": {"trace_id": "shared", "span_id": span_id}}
        })
        .to_string();
        store.push_envelope(
            process_envelope(None, build_envelope(json!({}), vec![(json!({"type": "transaction"}), payload)]))
                .unwrap(),
        );
    }

    let trace = store.get_trace_by_id("shared").unwrap();
    assert_eq!(trace.transactions.len(), 2);
    assert_eq!(trace.root_transaction_name, MULTIPLE_ROOT_TRANSACTIONS);
    assert_eq!(trace.span_tree.roots().len(), 2);
}
