//! # Spotlight Core
//!
//! Data model shared by the envelope parser and the data store: typed events,
//! spans, stack frames, profiles and SDK identity. All timestamps are epoch
//! milliseconds (see [`timestamp`]).

pub mod error;
pub mod event;
pub mod profile;
pub mod sdk;
pub mod span;
pub mod timestamp;

pub use error::EventError;
pub use event::{
    Contexts, ErrorEvent, Event, EventCommon, EventKind, Exception, ExceptionList, Frame,
    LogEvent, Stacktrace, TraceContext, TransactionEvent,
};
pub use profile::{
    Profile, ProfileData, ProfileEvent, ProfileSample, ProfileTransaction, ThreadMetadata,
    WireSample,
};
pub use sdk::{infer_platform, SdkInfo};
pub use span::{Span, SpanId, TraceId, ORPHAN_DESCRIPTION, ORPHAN_OP};
