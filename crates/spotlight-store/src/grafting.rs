//! Profile grafting
//!
//! Tracing instrumentation only sees the boundaries it was told about. When a
//! profile is available, the gaps between sibling spans (and between a parent's
//! bounds and its first and last child) are filled with spans reconstructed
//! from the stack samples taken during that window.
//!
//! Filler spans carry `tags.source = "profile"`. Levels that already contain
//! filler are never grafted again.

use serde_json::{Map, Value};
use spotlight_core::{Frame, Profile, ProfileSample, Span, SpanId};

use crate::span_tree::{NodeId, SpanTree};
use crate::trace::Trace;

pub const PROFILE_SOURCE: &str = "profile";
pub const THREAD_OP: &str = "Thread";

/// Graft filler spans from `profile` into the trace's span tree.
///
/// Returns `false` without touching the tree if the trace was already grafted.
pub fn graft_profile_spans(trace: &mut Trace, profile: &Profile) -> bool {
    if trace.profile_grafted {
        tracing::debug!("Trace {} already has profile spans", trace.trace_id);
        return false;
    }

    let grafter = Grafter {
        profile,
        trace_id: &trace.trace_id,
    };
    let bounds = Bounds {
        start: trace.start_timestamp,
        end: trace.timestamp,
        span_id: None,
        thread: None,
    };

    let mut tree = std::mem::take(&mut trace.span_tree);
    let roots = tree.roots().to_vec();
    let roots = grafter.graft_level(&mut tree, roots, &bounds);
    tree.set_roots(roots);

    trace.span_tree = tree;
    trace.profile_grafted = true;
    true
}

pub fn is_profile_span(span: &Span) -> bool {
    span.tag("source") == Some(PROFILE_SOURCE)
}

/// Frames belonging to the SDK or OpenTelemetry rather than to the
/// application. Everything up to the last such frame is dropped.
fn is_instrumentation_frame(platform: &str, frame: &Frame) -> bool {
    let fields = [
        frame.module.as_deref(),
        frame.filename.as_deref(),
        frame.abs_path.as_deref(),
    ];
    match platform {
        "javascript" | "node" => fields.iter().flatten().any(|value| {
            value.contains("@sentry/") || value.contains("@opentelemetry/")
        }),
        "python" => fields.iter().flatten().any(|value| {
            value.starts_with("sentry_sdk")
                || value.starts_with("opentelemetry")
                || value.contains("/sentry_sdk/")
                || value.contains("/opentelemetry/")
        }),
        _ => false,
    }
}

/// Time window and context of the node whose children are being filled.
struct Bounds {
    start: f64,
    end: f64,
    span_id: Option<SpanId>,
    thread: Option<String>,
}

/// A synthesized span before it is placed in the arena.
#[derive(Debug)]
struct Draft {
    span: Span,
    children: Vec<Draft>,
}

impl Draft {
    fn same_frame(&self, other: &Draft) -> bool {
        self.span.description == other.span.description && self.span.op == other.span.op
    }
}

struct Grafter<'a> {
    profile: &'a Profile,
    trace_id: &'a str,
}

impl Grafter<'_> {
    fn graft_level(&self, tree: &mut SpanTree, level: Vec<NodeId>, bounds: &Bounds) -> Vec<NodeId> {
        for &id in &level {
            let span = &tree[id].span;
            if is_profile_span(span) {
                continue;
            }
            let (start, end) = tree.extent(id);
            let child_bounds = Bounds {
                start,
                end,
                span_id: Some(span.span_id.clone()),
                thread: span.thread_id(),
            };
            let children = tree[id].children.clone();
            let children = self.graft_level(tree, children, &child_bounds);
            tree.node_mut(id).children = children;
        }

        if level.iter().any(|&id| is_profile_span(&tree[id].span)) {
            return level;
        }
        // Instantaneous spans have no window to fill.
        if bounds.end <= bounds.start {
            return level;
        }

        let mut grafted = Vec::with_capacity(level.len());
        let mut cursor = bounds.start;
        let mut previous_thread: Option<String> = None;

        // Siblings arrive ordered by start time, so a single cursor suffices.
        for &id in &level {
            let (start, end) = tree.extent(id);
            let thread = tree[id].span.thread_id();
            let threads = relevant_threads([&previous_thread, &thread, &bounds.thread]);
            grafted.extend(self.fill(tree, cursor, start, &threads, bounds.span_id.as_ref()));
            grafted.push(id);
            cursor = cursor.max(end);
            previous_thread = thread;
        }

        let threads = relevant_threads([&previous_thread, &None, &bounds.thread]);
        grafted.extend(self.fill(tree, cursor, bounds.end, &threads, bounds.span_id.as_ref()));
        grafted
    }

    /// Filler spans for `[start, end)`, already placed in the arena.
    fn fill(
        &self,
        tree: &mut SpanTree,
        start: f64,
        end: f64,
        threads: &[String],
        parent_span_id: Option<&SpanId>,
    ) -> Vec<NodeId> {
        if end <= start {
            return Vec::new();
        }

        let samples = &self.profile.samples;
        let lo = samples.partition_point(|s| s.start_timestamp < start);
        let hi = samples.partition_point(|s| s.start_timestamp < end);
        let in_window = samples[lo..hi]
            .iter()
            .filter(|s| threads.is_empty() || threads.contains(&s.thread_id));

        // Group per thread, keeping the order threads first appear in.
        let mut by_thread: Vec<(&str, Vec<&ProfileSample>)> = Vec::new();
        for sample in in_window {
            match by_thread.iter_mut().find(|(t, _)| *t == sample.thread_id) {
                Some((_, group)) => group.push(sample),
                None => by_thread.push((sample.thread_id.as_str(), vec![sample])),
            }
        }

        let mut wrappers = Vec::new();
        for (thread, group) in by_thread {
            let drafts: Vec<Draft> = group
                .iter()
                .enumerate()
                .filter_map(|(i, sample)| {
                    let sample_end = group.get(i + 1).map_or(end, |next| next.start_timestamp);
                    self.sample_chain(thread, sample, sample_end)
                })
                .collect();
            wrappers.extend(consolidate(drafts));
        }
        wrappers.sort_by(|a, b| a.span.start_timestamp.total_cmp(&b.span.start_timestamp));

        // A lone thread wrapper adds nothing; splice its frames directly.
        let drafts = if wrappers.len() == 1 && !wrappers[0].children.is_empty() {
            wrappers.pop().map(|w| w.children).unwrap_or_default()
        } else {
            wrappers
        };

        drafts
            .into_iter()
            .map(|draft| self.materialize(tree, draft, parent_span_id.cloned()))
            .collect()
    }

    /// Thread wrapper plus one nested span per application frame, root-first.
    fn sample_chain(&self, thread: &str, sample: &ProfileSample, end: f64) -> Option<Draft> {
        let Some(stack) = self.profile.stacks.get(sample.stack_id) else {
            tracing::debug!("Sample references unknown stack {}", sample.stack_id);
            return None;
        };
        let platform = self.profile.platform.as_str();
        let skip = stack
            .iter()
            .rposition(|&f| {
                self.profile
                    .frames
                    .get(f)
                    .is_some_and(|frame| is_instrumentation_frame(platform, frame))
            })
            .map_or(0, |i| i + 1);

        let thread_name = self.profile.thread_name(thread);
        let mut chain: Option<Draft> = None;
        for frame in stack[skip..].iter().rev().filter_map(|&f| self.profile.frames.get(f)) {
            let mut draft = Draft {
                span: self.frame_span(frame, thread, thread_name, sample.start_timestamp, end),
                children: Vec::new(),
            };
            draft.children.extend(chain.take());
            chain = Some(draft);
        }

        let mut wrapper = Draft {
            span: self.filler_span(
                THREAD_OP.to_string(),
                thread_name.unwrap_or(thread).to_string(),
                sample.start_timestamp,
                end,
                thread,
                thread_name,
            ),
            children: Vec::new(),
        };
        wrapper.children.extend(chain);
        Some(wrapper)
    }

    fn frame_span(
        &self,
        frame: &Frame,
        thread: &str,
        thread_name: Option<&str>,
        start: f64,
        end: f64,
    ) -> Span {
        let op = frame
            .module
            .as_deref()
            .or(frame.location())
            .unwrap_or("function")
            .to_string();
        let description = frame.function.as_deref().unwrap_or("<anonymous>").to_string();
        let mut span = self.filler_span(op, description, start, end, thread, thread_name);
        if let Some(data) = span.data.as_mut() {
            if let Some(location) = frame.location() {
                data.insert("code.filepath".to_string(), Value::from(location));
            }
            if let Some(lineno) = frame.lineno {
                data.insert("code.lineno".to_string(), Value::from(lineno));
            }
        }
        span
    }

    fn filler_span(
        &self,
        op: String,
        description: String,
        start: f64,
        end: f64,
        thread: &str,
        thread_name: Option<&str>,
    ) -> Span {
        let mut tags = Map::new();
        tags.insert("source".to_string(), Value::from(PROFILE_SOURCE));
        let mut data = Map::new();
        data.insert("thread.id".to_string(), Value::from(thread));
        if let Some(name) = thread_name {
            data.insert("thread.name".to_string(), Value::from(name));
        }
        Span {
            trace_id: self.trace_id.to_string(),
            span_id: new_span_id(),
            parent_span_id: None,
            op: Some(op),
            description: Some(description),
            start_timestamp: start,
            timestamp: end,
            status: None,
            tags: Some(tags),
            data: Some(data),
        }
    }

    fn materialize(&self, tree: &mut SpanTree, draft: Draft, parent_span_id: Option<SpanId>) -> NodeId {
        let mut span = draft.span;
        span.parent_span_id = parent_span_id;
        let span_id = span.span_id.clone();

        let id = tree.push(span);
        let children = draft
            .children
            .into_iter()
            .map(|child| self.materialize(tree, child, Some(span_id.clone())))
            .collect();
        tree.node_mut(id).children = children;
        id
    }
}

fn relevant_threads(candidates: [&Option<String>; 3]) -> Vec<String> {
    let mut threads: Vec<String> = Vec::new();
    for thread in candidates.into_iter().flatten() {
        if !threads.contains(thread) {
            threads.push(thread.clone());
        }
    }
    threads
}

/// Merge adjacent siblings for the same frame, then recurse into the merged
/// children. Spans left without any duration are dropped.
fn consolidate(drafts: Vec<Draft>) -> Vec<Draft> {
    let mut merged: Vec<Draft> = Vec::with_capacity(drafts.len());
    for draft in drafts {
        match merged.last_mut() {
            Some(last) if last.same_frame(&draft) => {
                last.span.timestamp = last.span.timestamp.max(draft.span.timestamp);
                last.children.extend(draft.children);
            }
            _ => merged.push(draft),
        }
    }

    merged
        .into_iter()
        .filter_map(|mut draft| {
            draft.children = consolidate(std::mem::take(&mut draft.children));
            (draft.span.duration() > 0.0).then_some(draft)
        })
        .collect()
}

fn new_span_id() -> SpanId {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}
