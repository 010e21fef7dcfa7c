use spotlight_store::{is_profile_span, Trace};

/// Plain-text rendering of a trace: a header line followed by one indented
/// line per span.
pub fn render_trace(trace: &Trace) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {} [{}] {:.1}ms, {} transaction(s), {} error(s)",
        trace.trace_id,
        trace.root_transaction_name,
        trace.status,
        trace.duration(),
        trace.transactions.len(),
        trace.errors,
    )];

    let tree = &trace.span_tree;
    for (id, depth) in tree.iter() {
        let span = &tree[id].span;
        let marker = if is_profile_span(span) { " (profile)" } else { "" };
        lines.push(format!(
            "{}{} {} {:.1}ms{}",
            "  ".repeat(depth + 1),
            span.op.as_deref().unwrap_or("default"),
            span.description.as_deref().unwrap_or("-"),
            span.duration(),
            marker,
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use spotlight_envelope::process_envelope;
    use spotlight_store::{Store, StoreConfig};

    #[test]
    fn renders_indented_tree() {
        let store = Store::new(StoreConfig::default()).unwrap();
        let payload = serde_json::json!({
            "transaction": "GET /",
            "start_timestamp": 1.0,
            "timestamp": 2.0,
            "contexts": {"trace": {"trace_id": "t1", "span_id": "root", "op": "http.server", "status": "ok"}},
            "spans": [{
                "span_id": "db",
                "parent_span_id": "root",
                "op": "db",
                "description": "SELECT 1",
                "start_timestamp": 1.25,
                "timestamp": 1.5
            }]
        });
        let raw = format!("{{}}\n{{\"type\":\"transaction\"}}\n{}\n", payload);
        store.push_envelope(process_envelope(None, Bytes::from(raw)).unwrap());

        let trace = store.get_trace_by_id("t1").unwrap();
        assert_eq!(
            render_trace(&trace),
            vec![
                "t1 GET / [ok] 1000.0ms, 1 transaction(s), 0 error(s)".to_string(),
                "  http.server GET / 1000.0ms".to_string(),
                "    db SELECT 1 250.0ms".to_string(),
            ]
        );
    }
}
