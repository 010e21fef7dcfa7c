use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use spotlight_core::{timestamp, Event, EventKind, Frame, Profile, ProfileEvent, SdkInfo, TraceId};
use spotlight_envelope::{classify, Envelope, ItemType, ProcessedEnvelope};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::context_lines::{ContextLinesProvider, HttpContextLines};
use crate::error::{ContextLinesError, StoreError};
use crate::grafting::graft_profile_spans;
use crate::locality::LocalTraces;
use crate::subscription::{Channel, Notification, Subscription, SubscriptionKind};
use crate::trace::Trace;

const DEFAULT_CONTEXT_LINES_TIMEOUT: Duration = Duration::from_millis(2000);

/// An SDK that has sent at least one envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sdk {
    pub name: String,
    pub version: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Default)]
struct StoreState {
    /// Bumped by `reset_data`; background writes from older generations are dropped.
    generation: u64,
    envelopes: Vec<Arc<ProcessedEnvelope>>,
    events: Vec<Arc<Event>>,
    seen: HashSet<String>,
    traces: IndexMap<TraceId, Arc<Trace>>,
    profiles: HashMap<TraceId, Arc<Profile>>,
    sdks: IndexMap<(String, String), Sdk>,
    local_traces: LocalTraces,
    online: bool,
}

struct Inner {
    state: RwLock<StoreState>,
    events: Channel,
    traces: Channel,
    online: Channel,
    context_lines: Option<Arc<dyn ContextLinesProvider>>,
    context_lines_timeout: Duration,
}

/// In-memory telemetry store.
///
/// Cloning is cheap and every clone refers to the same data. Writes
/// (`push_envelope`, `push_event`, `reset_data`) are serialized; readers get
/// `Arc` snapshots that later writes never modify.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Create a store. Context-line enrichment over HTTP is enabled when the
    /// config names an endpoint.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let provider = match &config.context_lines {
            Some(context_lines) => {
                let provider: Arc<dyn ContextLinesProvider> =
                    Arc::new(HttpContextLines::new(context_lines)?);
                Some(provider)
            }
            None => None,
        };
        Self::build(config, provider)
    }

    /// Create a store that enriches error frames through `provider`.
    pub fn with_context_lines(
        config: StoreConfig,
        provider: Arc<dyn ContextLinesProvider>,
    ) -> Result<Self, StoreError> {
        Self::build(config, Some(provider))
    }

    fn build(
        config: StoreConfig,
        context_lines: Option<Arc<dyn ContextLinesProvider>>,
    ) -> Result<Self, StoreError> {
        if config.channel_capacity == 0 {
            return Err(StoreError::InvalidConfig(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        let context_lines_timeout = config
            .context_lines
            .as_ref()
            .map_or(DEFAULT_CONTEXT_LINES_TIMEOUT, |c| Duration::from_millis(c.timeout_ms));

        Ok(Self {
            inner: Arc::new(Inner {
                state: RwLock::new(StoreState::default()),
                events: Channel::new(config.channel_capacity),
                traces: Channel::new(config.channel_capacity),
                online: Channel::new(config.channel_capacity),
                context_lines,
                context_lines_timeout,
            }),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ingest every recognized item of an envelope and record the envelope.
    /// Returns the number of envelopes received so far.
    pub fn push_envelope(&self, processed: ProcessedEnvelope) -> usize {
        let mut state = self.write_state();
        let envelope = &processed.envelope;

        let sdk = resolve_sdk(envelope);
        state.sdks.insert(
            (sdk.name.clone(), sdk.version.clone()),
            Sdk {
                name: sdk.name.clone(),
                version: sdk.version.clone(),
                last_seen: Utc::now(),
            },
        );
        let platform = sdk.platform().map(str::to_string);
        let shared_trace = envelope.header().trace_context();

        for item in envelope.items() {
            let kind = classify(item);
            if kind == EventKind::Unknown {
                debug!(
                    "Skipping {} item",
                    item.ty().map_or("untyped", ItemType::name)
                );
                continue;
            }
            let Some(payload) = item.payload.as_json().cloned() else {
                continue;
            };

            let events = match Event::from_payload(kind, payload) {
                Ok(events) => events,
                Err(e) => {
                    warn!("Dropping {} item: {}", kind, e);
                    continue;
                }
            };

            for mut event in events {
                let common = event.common_mut();
                if common.platform.is_none() {
                    common.platform = platform.clone();
                }
                if common.contexts.trace.is_none() {
                    common.contexts.trace = shared_trace.clone();
                }
                self.push_event_locked(&mut state, event);
            }
        }

        state.envelopes.push(Arc::new(processed));
        state.envelopes.len()
    }

    /// Ingest a single event. Returns `false` if an event with the same id was
    /// already stored.
    pub fn push_event(&self, event: Event) -> bool {
        let mut state = self.write_state();
        self.push_event_locked(&mut state, event)
    }

    fn push_event_locked(&self, state: &mut StoreState, mut event: Event) -> bool {
        let event_id = event.ensure_event_id().to_string();
        if !state.seen.insert(event_id.clone()) {
            debug!("Ignoring duplicate event {}", event_id);
            return false;
        }

        let now = timestamp::now_ms();
        if let Event::Profile(profile) = &event {
            self.store_profile(state, profile, now);
            return true;
        }

        event.normalize_timestamps(now);
        if let Event::Error(error) = &mut event {
            error.reverse_frames();
        }

        let event = Arc::new(event);
        state.events.push(Arc::clone(&event));
        self.inner.events.notify(Notification::Event(Arc::clone(&event)));

        if event.kind() == EventKind::Error {
            self.spawn_context_lines(state.generation, &event);
        }

        let trace_id = event
            .trace_context()
            .map(|t| t.trace_id.clone())
            .filter(|id| !id.is_empty());
        if let Some(trace_id) = trace_id {
            self.update_trace(state, trace_id, &event, now);
        }
        true
    }

    fn update_trace(&self, state: &mut StoreState, trace_id: TraceId, event: &Arc<Event>, now: f64) {
        let entry = state.traces.entry(trace_id.clone()).or_insert_with(|| {
            debug!("New trace {}", trace_id);
            Arc::new(Trace::new(
                trace_id.clone(),
                event.start_timestamp().min(now),
                event.timestamp(),
            ))
        });

        let trace = Arc::make_mut(entry);
        trace.extend_time_range(event);
        match event.kind() {
            EventKind::Transaction => {
                trace.add_transaction(Arc::clone(event));
                if let Some(profile) = state.profiles.get(&trace_id) {
                    graft_profile_spans(trace, profile);
                }
            }
            EventKind::Error => trace.errors += 1,
            _ => {}
        }
        trace.update_root();

        self.inner.traces.notify(Notification::Trace(Arc::clone(entry)));
    }

    fn store_profile(&self, state: &mut StoreState, profile: &ProfileEvent, now: f64) {
        let mut stored_any = false;
        for transaction in profile.profiled_transactions() {
            let trace_id = &transaction.trace_id;
            if trace_id.is_empty() {
                continue;
            }

            // Sample offsets are relative to the profile's own start. The trace
            // start can belong to an upstream service, so it is only a fallback
            // for profiles that carry no timestamp.
            let base = if profile.common.timestamp > 0.0 {
                profile.common.start_timestamp.unwrap_or(profile.common.timestamp)
            } else {
                state.traces.get(trace_id).map_or(now, |t| t.start_timestamp)
            };
            let stored = Arc::new(profile.to_profile(base, transaction));

            // A trace has a single profile slot, so a later profile for another
            // transaction of the same trace replaces the earlier one.
            state.profiles.insert(trace_id.clone(), Arc::clone(&stored));
            stored_any = true;

            if let Some(entry) = state.traces.get_mut(trace_id) {
                if !entry.has_time_range() {
                    debug!("Deferring profile grafting for trace {}", trace_id);
                    continue;
                }
                let trace = Arc::make_mut(entry);
                if graft_profile_spans(trace, &stored) {
                    self.inner.traces.notify(Notification::Trace(Arc::clone(entry)));
                }
            }
        }

        if !stored_any {
            debug!("Profile {} references no trace", profile.common.event_id);
        }
    }

    fn spawn_context_lines(&self, generation: u64, event: &Event) {
        let Some(provider) = self.inner.context_lines.clone() else {
            return;
        };
        let Some(error) = event.as_error() else {
            return;
        };

        let jobs: Vec<(usize, Vec<Frame>)> = error
            .exception
            .values
            .iter()
            .enumerate()
            .filter_map(|(index, exception)| {
                let frames = &exception.stacktrace.as_ref()?.frames;
                (!frames.is_empty()).then(|| (index, frames.clone()))
            })
            .collect();
        if jobs.is_empty() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, skipping context lines for {}", event.event_id());
            return;
        };

        let store = self.clone();
        let event_id = event.event_id().to_string();
        let timeout = self.inner.context_lines_timeout;
        handle.spawn(async move {
            for (index, frames) in jobs {
                let result = tokio::time::timeout(timeout, provider.enrich(frames))
                    .await
                    .unwrap_or(Err(ContextLinesError::Timeout));
                match result {
                    Ok(frames) => {
                        store.apply_context_lines(generation, &event_id, index, frames);
                    }
                    Err(e) => debug!("Context lines unavailable for event {}: {}", event_id, e),
                }
            }
        });
    }

    /// Write enriched frames back into a stored error event. Subscribers are
    /// not notified again.
    fn apply_context_lines(
        &self,
        generation: u64,
        event_id: &str,
        exception_index: usize,
        frames: Vec<Frame>,
    ) -> bool {
        let mut state = self.write_state();
        if state.generation != generation {
            debug!("Discarding context lines for cleared event {}", event_id);
            return false;
        }

        let Some(event) = state.events.iter_mut().rev().find(|e| e.event_id() == event_id) else {
            return false;
        };
        let Event::Error(error) = Arc::make_mut(event) else {
            return false;
        };
        let Some(stacktrace) = error
            .exception
            .values
            .get_mut(exception_index)
            .and_then(|exception| exception.stacktrace.as_mut())
        else {
            return false;
        };

        if stacktrace.frames.len() != frames.len() {
            debug!(
                "Context lines for event {} returned {} frames, expected {}",
                event_id,
                frames.len(),
                stacktrace.frames.len()
            );
            return false;
        }
        stacktrace.frames = frames;
        true
    }

    /// Drop all collected data. Session locality and the online flag survive.
    pub fn reset_data(&self) {
        let mut state = self.write_state();
        let generation = state.generation + 1;
        let local_traces = std::mem::take(&mut state.local_traces);
        let online = state.online;
        *state = StoreState {
            generation,
            local_traces,
            online,
            ..Default::default()
        };
        info!("Cleared store data");
    }

    pub fn track_local_trace(&self, trace_id: impl Into<String>) {
        self.write_state().local_traces.track(trace_id);
    }

    /// `None` while no trace has been marked local yet.
    pub fn is_trace_local(&self, trace_id: &str) -> Option<bool> {
        self.read_state().local_traces.is_local(trace_id)
    }

    pub fn set_online(&self, online: bool) {
        let mut state = self.write_state();
        if state.online != online {
            state.online = online;
            self.inner.online.notify(Notification::Online(online));
        }
    }

    pub fn is_online(&self) -> bool {
        self.read_state().online
    }

    pub fn subscribe(&self, kind: SubscriptionKind) -> Subscription {
        let channel = match kind {
            SubscriptionKind::Event => &self.inner.events,
            SubscriptionKind::Trace => &self.inner.traces,
            SubscriptionKind::Online => &self.inner.online,
        };
        channel.subscribe(kind)
    }

    pub fn get_events(&self) -> Vec<Arc<Event>> {
        self.read_state().events.clone()
    }

    pub fn get_traces(&self) -> Vec<Arc<Trace>> {
        self.read_state().traces.values().cloned().collect()
    }

    pub fn get_trace_by_id(&self, trace_id: &str) -> Option<Arc<Trace>> {
        self.read_state().traces.get(trace_id).cloned()
    }

    /// Events of a trace, optionally narrowed to those emitted from one span.
    pub fn get_events_by_trace(&self, trace_id: &str, span_id: Option<&str>) -> Vec<Arc<Event>> {
        self.read_state()
            .events
            .iter()
            .filter(|event| event.trace_id() == Some(trace_id))
            .filter(|event| {
                span_id.is_none()
                    || event.trace_context().and_then(|t| t.span_id.as_deref()) == span_id
            })
            .cloned()
            .collect()
    }

    pub fn get_profile_by_trace_id(&self, trace_id: &str) -> Option<Arc<Profile>> {
        self.read_state().profiles.get(trace_id).cloned()
    }

    pub fn get_sdks(&self) -> Vec<Sdk> {
        self.read_state().sdks.values().cloned().collect()
    }

    pub fn get_envelopes(&self) -> Vec<Arc<ProcessedEnvelope>> {
        self.read_state().envelopes.clone()
    }
}

/// SDK identity of an envelope: the header's `sdk`, else the first item's own
/// `sdk` or `platform`, else unknown.
fn resolve_sdk(envelope: &Envelope) -> SdkInfo {
    if let Some(sdk) = &envelope.header().sdk {
        return sdk.clone();
    }

    let Some(first) = envelope.items().next().and_then(|item| item.payload.as_object()) else {
        return SdkInfo::unknown();
    };
    if let Some(sdk) = first
        .get("sdk")
        .and_then(|sdk| serde_json::from_value::<SdkInfo>(sdk.clone()).ok())
    {
        return sdk;
    }
    match first.get("platform").and_then(Value::as_str) {
        Some(platform) => SdkInfo::from_platform(platform),
        None => SdkInfo::unknown(),
    }
}

#[cfg(test)]
mod tests {
    include!("store_tests.rs");
}
