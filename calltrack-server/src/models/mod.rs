//! Data models for the call-tracking server

pub mod call_log;
pub mod enums;
pub mod requests;
pub mod tracking_number;
pub mod transcript;
pub mod webhook;

pub use call_log::{CallLog, NewCallLog};
pub use enums::{
    CallDepartment, CallDirection, CallIntent, CallResult, CallStatus, RouteStatus, SpeakerRole,
    TrackingNumberStatus,
};
pub use requests::{AvailableNumberParams, Patch, ProvisionBody, ProvisionRequest, TrackingNumberPatch, UpdateBody};
pub use tracking_number::{NumberRoute, Tenant, TrackingNumber, TrackingNumberView};
pub use transcript::{TranscriptDocument, Turn};
pub use webhook::{RecordingReadyEvent, StatusChangeEvent, VoiceStartEvent, WebhookRequest};
