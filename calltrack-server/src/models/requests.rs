//! Request bodies and their validated forms
//!
//! Handlers deserialize the raw bodies, then call `validate()` to obtain the
//! normalized structs the services accept.

use calltrack_common::{Error, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::clients::AvailableNumberQuery;

static E164_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").unwrap());

static AREA_CODE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{3}$").unwrap());

static COUNTRY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}$").unwrap());

pub const DEFAULT_AVAILABLE_LIMIT: u32 = 10;
pub const MAX_AVAILABLE_LIMIT: u32 = 50;

/// Normalize a phone number to E.164 (strips spaces, dashes, dots, parens)
pub fn normalize_e164(field: &str, value: &str) -> Result<String> {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    if E164_REGEX.is_match(&cleaned) {
        Ok(cleaned)
    } else {
        Err(Error::Validation(format!("{} must be an E.164 phone number", field)))
    }
}

fn normalize_country(value: Option<&str>) -> Result<String> {
    let country = value.unwrap_or("US").trim().to_ascii_uppercase();
    if COUNTRY_REGEX.is_match(&country) {
        Ok(country)
    } else {
        Err(Error::Validation("country must be an ISO 3166-1 alpha-2 code".into()))
    }
}

fn validate_area_code(value: Option<&str>) -> Result<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(code) if AREA_CODE_REGEX.is_match(code) => Ok(Some(code.to_string())),
        Some(_) => Err(Error::Validation("areaCode must be 3 digits".into())),
    }
}

/// Absent field deserializes to `None`, explicit null to `Some(None)`
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Tri-state patch field
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Patch<T> {
    #[default]
    Absent,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    fn from_double(value: Option<Option<T>>) -> Self {
        match value {
            None => Patch::Absent,
            Some(None) => Patch::Null,
            Some(Some(v)) => Patch::Value(v),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }
}

/// POST /tracking-numbers body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionBody {
    pub number: Option<String>,
    pub area_code: Option<String>,
    pub country: Option<String>,
    pub marketing_source_id: Option<Uuid>,
    pub forwarding_voice_number: Option<String>,
    pub recording_enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    /// Specific number to buy; otherwise search by area code
    pub number: Option<String>,
    pub area_code: Option<String>,
    pub country: String,
    pub marketing_source_id: Option<Uuid>,
    pub forwarding_voice_number: Option<String>,
    pub recording_enabled: bool,
}

impl ProvisionBody {
    pub fn validate(self) -> Result<ProvisionRequest> {
        let number = self
            .number
            .as_deref()
            .map(|n| normalize_e164("number", n))
            .transpose()?;
        let area_code = validate_area_code(self.area_code.as_deref())?;
        let forwarding_voice_number = self
            .forwarding_voice_number
            .as_deref()
            .map(|n| normalize_e164("forwardingVoiceNumber", n))
            .transpose()?;

        Ok(ProvisionRequest {
            number,
            area_code,
            country: normalize_country(self.country.as_deref())?,
            marketing_source_id: self.marketing_source_id,
            forwarding_voice_number,
            recording_enabled: self.recording_enabled.unwrap_or(true),
        })
    }
}

/// PATCH /tracking-numbers/:id body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBody {
    #[serde(default, deserialize_with = "double_option")]
    pub forwarding_voice_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub marketing_source_id: Option<Option<Uuid>>,
    /// Concurrency token from a previous read
    pub expected_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackingNumberPatch {
    pub forwarding_voice_number: Patch<String>,
    pub marketing_source_id: Patch<Uuid>,
    pub expected_updated_at: Option<DateTime<Utc>>,
}

impl UpdateBody {
    pub fn validate(self) -> Result<TrackingNumberPatch> {
        let forwarding_voice_number = match Patch::from_double(self.forwarding_voice_number) {
            Patch::Value(n) => Patch::Value(normalize_e164("forwardingVoiceNumber", &n)?),
            other => other,
        };
        let patch = TrackingNumberPatch {
            forwarding_voice_number,
            marketing_source_id: Patch::from_double(self.marketing_source_id),
            expected_updated_at: self.expected_updated_at,
        };
        if patch.forwarding_voice_number.is_absent() && patch.marketing_source_id.is_absent() {
            return Err(Error::Validation("Nothing to update".into()));
        }
        Ok(patch)
    }
}

/// GET /tracking-numbers/available query
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableNumberParams {
    pub country: Option<String>,
    pub area_code: Option<String>,
    pub region: Option<String>,
    pub limit: Option<u32>,
}

impl AvailableNumberParams {
    pub fn validate(self) -> Result<AvailableNumberQuery> {
        let limit = self.limit.unwrap_or(DEFAULT_AVAILABLE_LIMIT);
        if limit == 0 || limit > MAX_AVAILABLE_LIMIT {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {}",
                MAX_AVAILABLE_LIMIT
            )));
        }
        Ok(AvailableNumberQuery {
            country: normalize_country(self.country.as_deref())?,
            area_code: validate_area_code(self.area_code.as_deref())?,
            region: self.region.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            limit,
        })
    }
}
