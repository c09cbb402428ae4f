//! Tracking number provisioning saga
//!
//! reserve capacity -> purchase at the provider -> persist locally, with
//! compensation at each step. The tenant counter is changed only through
//! range-guarded UPDATEs so no lock is held across provider calls.

use std::sync::Arc;

use calltrack_common::pagination::{PageRequest, Paginated};
use calltrack_common::retry::jitter_between;
use calltrack_common::time::{next_stamp, now};
use calltrack_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::{
    AvailableNumber, AvailableNumberQuery, ClientError, NumberLookup, PurchaseRequest, PurchasedNumber,
    TelephonyProvider,
};
use crate::db::tracking_numbers::ReleaseClaim;
use crate::db::{routes, tenants, tracking_numbers};
use crate::models::{
    NumberRoute, Patch, ProvisionRequest, RouteStatus, TrackingNumber, TrackingNumberPatch,
    TrackingNumberStatus, TrackingNumberView,
};

/// Attempts for an optimistic-concurrency update
const UPDATE_ATTEMPTS: u32 = 3;

/// Outcome of a release; failures are reported, not raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResult {
    pub released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

enum UpdateAttempt {
    Done(TrackingNumberView),
    /// A concurrent writer moved a timestamp under us
    Raced,
    /// The caller's concurrency token is out of date
    Stale,
}

pub struct NumberProvisioner {
    db: SqlitePool,
    telephony: Arc<dyn TelephonyProvider>,
    public_base_url: String,
}

impl NumberProvisioner {
    pub fn new(db: SqlitePool, telephony: Arc<dyn TelephonyProvider>, public_base_url: &str) -> Self {
        Self {
            db,
            telephony,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn available_numbers(&self, query: &AvailableNumberQuery) -> Result<Vec<AvailableNumber>> {
        Ok(self.telephony.list_available_numbers(query).await?)
    }

    pub async fn list(&self, tenant_id: Uuid, page: PageRequest) -> Result<Paginated<TrackingNumberView>> {
        let (items, total) = tracking_numbers::list_for_tenant(&self.db, tenant_id, page).await?;
        Ok(Paginated::new(items, total, page))
    }

    /// Lease a new tracking number for the tenant
    pub async fn provision(&self, tenant_id: Uuid, request: ProvisionRequest) -> Result<TrackingNumberView> {
        if let Some(source_id) = request.marketing_source_id {
            tenants::find_owned_marketing_source(&self.db, tenant_id, source_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Marketing source {}", source_id)))?;
        }

        if !tenants::reserve_slot(&self.db, tenant_id).await? {
            return match tenants::get_tenant(&self.db, tenant_id).await? {
                None => Err(Error::NotFound(format!("Tenant {}", tenant_id))),
                Some(tenant) => Err(Error::CapacityExceeded(format!(
                    "Tenant has used {} of {} tracking numbers",
                    tenant.tracking_numbers_used_count, tenant.max_tracking_numbers
                ))),
            };
        }

        let purchase = PurchaseRequest {
            number: request.number.clone(),
            area_code: request.area_code.clone(),
            country: request.country.clone(),
            voice_url: format!("{}/twilio/voice", self.public_base_url),
            status_callback_url: format!("{}/twilio/call-status", self.public_base_url),
        };

        let purchased = match self.telephony.purchase_number(&purchase).await {
            Ok(purchased) => purchased,
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "Number purchase failed, returning reservation");
                self.rollback_reservation(tenant_id).await;
                return Err(err.into());
            }
        };

        match self.persist(tenant_id, &request, &purchased).await {
            Ok(view) => {
                info!(
                    tenant_id = %tenant_id,
                    tracking_number_id = %view.id,
                    number = %view.number,
                    "Tracking number provisioned"
                );
                Ok(view)
            }
            Err(err) => {
                error!(
                    tenant_id = %tenant_id,
                    number = %purchased.phone_number,
                    error = %err,
                    "Persisting purchased number failed, compensating"
                );
                if let Err(release_err) = self
                    .telephony
                    .release_number(&purchased.provider_number_id)
                    .await
                {
                    error!(
                        provider_number_id = %purchased.provider_number_id,
                        error = %release_err,
                        "Compensating release failed"
                    );
                }
                self.rollback_reservation(tenant_id).await;
                Err(err)
            }
        }
    }

    async fn persist(
        &self,
        tenant_id: Uuid,
        request: &ProvisionRequest,
        purchased: &PurchasedNumber,
    ) -> Result<TrackingNumberView> {
        let stamp = now();
        let number = TrackingNumber {
            id: Uuid::new_v4(),
            number: purchased.phone_number.clone(),
            tenant_id,
            marketing_source_id: request.marketing_source_id,
            provider_number_id: Some(purchased.provider_number_id.clone()),
            status: TrackingNumberStatus::Active,
            country: purchased.country.clone().or_else(|| Some(request.country.clone())),
            region: purchased.region.clone(),
            purchased_at: Some(stamp),
            released_at: None,
            created_at: stamp,
            updated_at: stamp,
        };

        let route = request
            .forwarding_voice_number
            .as_ref()
            .map(|forward| NumberRoute {
                id: Uuid::new_v4(),
                tracking_number_id: number.id,
                status: RouteStatus::Active,
                forwarding_voice_number: Some(forward.clone()),
                recording_enabled: request.recording_enabled,
                effective_from: Some(stamp),
                effective_to: None,
                rules: None,
                deleted_at: None,
                created_at: stamp,
                updated_at: stamp,
            });

        let mut tx = self.db.begin().await?;
        tracking_numbers::insert(&mut *tx, &number).await?;
        if let Some(route) = &route {
            routes::insert(&mut *tx, route).await?;
        }
        tx.commit().await?;

        Ok(TrackingNumberView::new(&number, route.as_ref()))
    }

    async fn rollback_reservation(&self, tenant_id: Uuid) {
        match tenants::release_slot(&self.db, tenant_id).await {
            Ok(true) => debug!(tenant_id = %tenant_id, "Reservation returned"),
            Ok(false) => warn!(tenant_id = %tenant_id, "Reservation rollback found no slot to return"),
            Err(e) => error!(tenant_id = %tenant_id, error = %e, "Reservation rollback failed"),
        }
    }

    /// Give a tracking number back to the provider
    pub async fn release(&self, tenant_id: Uuid, id: Uuid) -> Result<ReleaseResult> {
        tracking_numbers::find_owned(&self.db, tenant_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Tracking number {}", id)))?;

        let claim = tracking_numbers::begin_release(&self.db, tenant_id, id)
            .await?
            .ok_or_else(|| Error::Conflict("Tracking number is not active".into()))?;

        if let Err(reason) = self.release_at_provider(&claim).await {
            warn!(tracking_number_id = %id, reason = %reason, "Provider release failed, reverting");
            match tracking_numbers::revert_release(&self.db, id).await {
                Ok(true) => {}
                Ok(false) => warn!(tracking_number_id = %id, "Release revert found no releasing row"),
                Err(e) => error!(tracking_number_id = %id, error = %e, "Release revert failed"),
            }
            return Ok(ReleaseResult {
                released: false,
                reason: Some(reason),
            });
        }

        // The provider no longer holds the number; a failure here leaves the
        // row in `releasing` for an operator to finish
        let finalize = async {
            let mut tx = self.db.begin().await?;
            tracking_numbers::mark_released(&mut *tx, id).await?;
            routes::retire_active(&mut *tx, id).await?;
            if !tenants::release_slot(&mut *tx, tenant_id).await? {
                warn!(tenant_id = %tenant_id, "Tenant counter already at zero on release");
            }
            tx.commit().await?;
            Ok::<(), Error>(())
        };
        if let Err(e) = finalize.await {
            error!(
                tracking_number_id = %id,
                error = %e,
                "Number released at provider but local finalize failed"
            );
            return Err(e);
        }

        info!(tenant_id = %tenant_id, tracking_number_id = %id, "Tracking number released");
        Ok(ReleaseResult {
            released: true,
            reason: None,
        })
    }

    /// Release by stored provider id, else by looking the number up
    async fn release_at_provider(&self, claim: &ReleaseClaim) -> std::result::Result<(), String> {
        let provider_id = match &claim.provider_number_id {
            Some(id) => id.clone(),
            None => match self.telephony.find_number_id(&claim.number).await {
                Ok(NumberLookup::Found(id)) => id,
                Ok(NumberLookup::Missing) => return Ok(()),
                Ok(NumberLookup::Ambiguous(count)) => {
                    warn!(number = %claim.number, count, "Provider lookup matched several numbers");
                    return Err("multiple_matches".to_string());
                }
                Err(e) => {
                    warn!(number = %claim.number, error = %e, "Provider lookup failed");
                    return Err("lookup_failed".to_string());
                }
            },
        };

        match self.telephony.release_number(&provider_id).await {
            Ok(_) | Err(ClientError::NotFound(_)) => Ok(()),
            Err(e) => {
                warn!(provider_number_id = %provider_id, error = %e, "Provider release error");
                Err("provider_error".to_string())
            }
        }
    }

    /// Apply a patch with compare-and-swap on both the number and its route
    pub async fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        patch: TrackingNumberPatch,
    ) -> Result<TrackingNumberView> {
        for attempt in 1..=UPDATE_ATTEMPTS {
            match self.try_update(tenant_id, id, &patch).await {
                Ok(UpdateAttempt::Done(view)) => return Ok(view),
                Ok(UpdateAttempt::Stale) => {
                    return Err(Error::Conflict(
                        "Tracking number was modified since it was read".into(),
                    ))
                }
                Ok(UpdateAttempt::Raced) => {
                    debug!(tracking_number_id = %id, attempt, "Concurrent update, retrying");
                }
                Err(e) if e.is_retryable() => {
                    debug!(tracking_number_id = %id, attempt, error = %e, "Update attempt failed, retrying");
                }
                Err(e) => return Err(e),
            }
            if attempt < UPDATE_ATTEMPTS {
                tokio::time::sleep(jitter_between(15, 50)).await;
            }
        }

        warn!(tracking_number_id = %id, "Update gave up after concurrent modifications");
        Err(Error::Conflict("Concurrent update, please retry".into()))
    }

    async fn try_update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        patch: &TrackingNumberPatch,
    ) -> Result<UpdateAttempt> {
        let mut tx = self.db.begin().await?;

        let number = tracking_numbers::find_owned(&mut *tx, tenant_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Tracking number {}", id)))?;

        if let Some(expected) = patch.expected_updated_at {
            if expected != number.updated_at {
                return Ok(UpdateAttempt::Stale);
            }
        }
        if number.status != TrackingNumberStatus::Active {
            return Err(Error::Validation(format!(
                "Tracking number is {}, only active numbers can be updated",
                number.status
            )));
        }

        let marketing_source = match &patch.marketing_source_id {
            Patch::Absent => None,
            Patch::Null => Some(None),
            Patch::Value(source_id) => {
                tenants::find_owned_marketing_source(&mut *tx, tenant_id, *source_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Marketing source {}", source_id)))?;
                Some(Some(*source_id))
            }
        };

        let stamp = next_stamp(number.updated_at);
        let route = routes::find_active(&mut *tx, id).await?;

        match (&patch.forwarding_voice_number, &route) {
            (Patch::Absent, _) | (Patch::Null, None) => {}
            (Patch::Null, Some(route)) => {
                if !routes::cas_retire(&mut *tx, route.id, route.updated_at, next_stamp(route.updated_at))
                    .await?
                {
                    return Ok(UpdateAttempt::Raced);
                }
            }
            (Patch::Value(forward), Some(route)) => {
                if !routes::cas_update_forwarding(
                    &mut *tx,
                    route.id,
                    route.updated_at,
                    next_stamp(route.updated_at),
                    forward,
                )
                .await?
                {
                    return Ok(UpdateAttempt::Raced);
                }
            }
            (Patch::Value(forward), None) => {
                routes::upsert_active_forwarding(&mut *tx, id, forward, stamp).await?;
            }
        }

        if !tracking_numbers::cas_touch(&mut *tx, id, number.updated_at, stamp, marketing_source).await? {
            return Ok(UpdateAttempt::Raced);
        }

        let number = tracking_numbers::find_owned(&mut *tx, tenant_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Tracking number {}", id)))?;
        let route = routes::find_active(&mut *tx, id).await?;
        tx.commit().await?;

        debug!(tracking_number_id = %id, "Tracking number updated");
        Ok(UpdateAttempt::Done(TrackingNumberView::new(&number, route.as_ref())))
    }
}
