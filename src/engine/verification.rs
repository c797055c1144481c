use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::assignment::delivery_checkpoints;
use crate::engine::projector::delivery_complete;
use crate::engine::tokens::TokenGrant;
use crate::error::AppError;
use crate::models::principal::Principal;
use crate::models::verify::{VerificationEvent, Verify, VerifyStatus};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct Scan {
    pub delivery_id: Uuid,
    pub location_id: Uuid,
    pub company_id: Uuid,
    pub check_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub created: usize,
    pub verifications: Vec<Verify>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyUpdate {
    pub verification: Verify,
    pub delivery_completed: bool,
}

/// Opens a pending verification for each scanned checkpoint that has none
/// for this delivery yet. Re-scans return the existing rows untouched.
pub fn record_scan(
    state: &AppState,
    principal: &Principal,
    scan: Scan,
    now: DateTime<Utc>,
) -> Result<ScanOutcome, AppError> {
    let store = &state.store;

    if scan.check_ids.is_empty() {
        return Err(AppError::Validation("checkpoints must not be empty".to_string()));
    }
    let delivery = store
        .delivery(scan.delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", scan.delivery_id)))?;
    if delivery.start_timestamp.is_none() {
        return Err(AppError::Conflict(format!(
            "delivery {} has not been started",
            delivery.id
        )));
    }

    let on_route = delivery_checkpoints(state, scan.delivery_id)?;
    let check_ids: BTreeSet<Uuid> = scan.check_ids.iter().copied().collect();

    for check_id in &check_ids {
        let checkpoint = store
            .checkpoint(*check_id)
            .ok_or_else(|| AppError::NotFound(format!("checkpoint {check_id} not found")))?;

        if checkpoint.location_id != scan.location_id || checkpoint.company_id != scan.company_id {
            return Err(AppError::Validation(format!(
                "checkpoint {check_id} is not at location {} of company {}",
                scan.location_id, scan.company_id
            )));
        }
        if !on_route.contains(check_id) {
            return Err(AppError::Validation(format!(
                "checkpoint {check_id} is not on delivery {}",
                scan.delivery_id
            )));
        }
    }

    let mut created = 0;
    let mut verifications = Vec::with_capacity(check_ids.len());
    for check_id in check_ids {
        let (verify, inserted) = store.insert_verify_if_absent(Verify::pending(
            scan.delivery_id,
            check_id,
            principal.user_id,
            now,
        ));

        if inserted {
            created += 1;
            state
                .metrics
                .verifications_total
                .with_label_values(&[VerifyStatus::Pending.as_str()])
                .inc();
            publish(state, &verify, false);
        }
        verifications.push(verify);
    }

    info!(
        delivery_id = %scan.delivery_id,
        location_id = %scan.location_id,
        scanned_by = %principal.user_id,
        created,
        existing = verifications.len() - created,
        "checkpoint scan recorded"
    );

    Ok(ScanOutcome {
        created,
        verifications,
    })
}

/// Pending verifications for the granted delivery at the granted location.
pub fn pending_at_location(state: &AppState, grant: &TokenGrant) -> Result<Vec<Verify>, AppError> {
    let store = &state.store;

    let mut pending: Vec<Verify> = delivery_checkpoints(state, grant.delivery_id)?
        .into_iter()
        .filter(|check_id| {
            store
                .checkpoint(*check_id)
                .is_some_and(|c| c.location_id == grant.location_id)
        })
        .filter_map(|check_id| store.verify_for(grant.delivery_id, check_id))
        .filter(|verify| verify.status == VerifyStatus::Pending)
        .collect();

    pending.sort_by_key(|verify| verify.created_at);
    Ok(pending)
}

pub fn update_verification(
    state: &AppState,
    grant: &TokenGrant,
    principal: &Principal,
    verify_id: Uuid,
    status: VerifyStatus,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> Result<VerifyUpdate, AppError> {
    let store = &state.store;

    if !status.is_terminal() {
        return Err(AppError::Validation(
            "status must be complete or rejected".to_string(),
        ));
    }

    let current = store
        .verify(verify_id)
        .ok_or_else(|| AppError::NotFound(format!("verification {verify_id} not found")))?;
    let at_granted_location = store
        .checkpoint(current.check_id)
        .is_some_and(|c| c.location_id == grant.location_id);
    if current.delivery_id != grant.delivery_id || !at_granted_location {
        return Err(AppError::AccessDenied);
    }

    let verification = store.update_verify(verify_id, |verify| {
        if verify.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "verification {verify_id} is already {}",
                verify.status.as_str()
            )));
        }
        verify.status = status;
        verify.comment = comment;
        verify.verified_by = Some(principal.user_id);
        verify.updated_at = now;
        Ok(verify.clone())
    })?;

    state
        .metrics
        .verifications_total
        .with_label_values(&[status.as_str()])
        .inc();
    info!(
        verify_id = %verify_id,
        delivery_id = %verification.delivery_id,
        check_id = %verification.check_id,
        status = status.as_str(),
        verified_by = %principal.user_id,
        "verification updated"
    );

    let delivery_completed = match status {
        VerifyStatus::Complete => evaluate_delivery_completion(state, verification.delivery_id, now)?,
        _ => false,
    };

    publish(state, &verification, delivery_completed);

    Ok(VerifyUpdate {
        verification,
        delivery_completed,
    })
}

/// Closes the delivery once every checkpoint on its trips is verified
/// complete. Returns true only for the call that set `end_timestamp`.
pub fn evaluate_delivery_completion(
    state: &AppState,
    delivery_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let store = &state.store;

    let check_ids = delivery_checkpoints(state, delivery_id)?;
    let verifies: Vec<Verify> = check_ids
        .iter()
        .filter_map(|check_id| store.verify_for(delivery_id, *check_id))
        .collect();

    if !delivery_complete(delivery_id, &check_ids, &verifies) {
        debug!(
            delivery_id = %delivery_id,
            checkpoints = check_ids.len(),
            verified = verifies.iter().filter(|v| v.status == VerifyStatus::Complete).count(),
            "delivery not yet complete"
        );
        return Ok(false);
    }

    let closed = store.update_delivery(delivery_id, |delivery| {
        // Only a started, still open delivery can close.
        if delivery.start_timestamp.is_none() || delivery.end_timestamp.is_some() {
            return Ok(false);
        }
        delivery.end_timestamp = Some(now);
        Ok(true)
    })?;

    if closed {
        state.metrics.deliveries_completed_total.inc();
        state.metrics.deliveries_active.dec();
        info!(delivery_id = %delivery_id, checkpoints = check_ids.len(), "delivery completed");
    }

    Ok(closed)
}

fn publish(state: &AppState, verify: &Verify, delivery_completed: bool) {
    let _ = state.verification_events_tx.send(VerificationEvent {
        verify: verify.clone(),
        delivery_completed,
    });
}
