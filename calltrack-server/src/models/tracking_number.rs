//! Tenant, tracking number and route records

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::enums::{RouteStatus, TrackingNumberStatus};

/// Dealership business owning tracking numbers
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    /// IANA timezone used for local-day reporting
    pub timezone: String,
    pub max_tracking_numbers: i64,
    pub tracking_numbers_used_count: i64,
}

/// Leased phone number
#[derive(Debug, Clone)]
pub struct TrackingNumber {
    pub id: Uuid,
    /// E.164
    pub number: String,
    pub tenant_id: Uuid,
    pub marketing_source_id: Option<Uuid>,
    pub provider_number_id: Option<String>,
    pub status: TrackingNumberStatus,
    pub country: Option<String>,
    pub region: Option<String>,
    pub purchased_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Forwarding configuration of a tracking number
#[derive(Debug, Clone)]
pub struct NumberRoute {
    pub id: Uuid,
    pub tracking_number_id: Uuid,
    pub status: RouteStatus,
    pub forwarding_voice_number: Option<String>,
    pub recording_enabled: bool,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
    pub rules: Option<serde_json::Value>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// API view: a tracking number with its active forwarding target
///
/// `updated_at` doubles as the optimistic-concurrency token for updates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingNumberView {
    pub id: Uuid,
    pub number: String,
    pub status: TrackingNumberStatus,
    pub marketing_source_id: Option<Uuid>,
    pub forwarding_voice_number: Option<String>,
    pub recording_enabled: bool,
    pub country: Option<String>,
    pub region: Option<String>,
    pub purchased_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TrackingNumberView {
    pub fn new(number: &TrackingNumber, route: Option<&NumberRoute>) -> Self {
        Self {
            id: number.id,
            number: number.number.clone(),
            status: number.status,
            marketing_source_id: number.marketing_source_id,
            forwarding_voice_number: route.and_then(|r| r.forwarding_voice_number.clone()),
            recording_enabled: route.map(|r| r.recording_enabled).unwrap_or(true),
            country: number.country.clone(),
            region: number.region.clone(),
            purchased_at: number.purchased_at,
            updated_at: number.updated_at,
        }
    }
}
