use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::assignment::delivery_locations;
use crate::error::AppError;
use crate::models::principal::Principal;
use crate::models::token::DeliveryLocationToken;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub ttl: Duration,
    pub length: usize,
}

impl TokenPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: Duration::minutes(config.token_ttl_minutes),
            length: config.token_length,
        }
    }
}

/// Proof that a caller presented a live token for this delivery and location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenGrant {
    pub delivery_id: Uuid,
    pub location_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct TokenIssue {
    pub token: DeliveryLocationToken,
    pub reused: bool,
}

fn draw_token(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub fn issue_or_refresh(
    state: &AppState,
    principal: &Principal,
    delivery_id: Uuid,
    location_id: Uuid,
    now: DateTime<Utc>,
) -> Result<TokenIssue, AppError> {
    if state.store.delivery(delivery_id).is_none() {
        return Err(AppError::NotFound(format!("delivery {delivery_id} not found")));
    }
    if state.store.location(location_id).is_none() {
        return Err(AppError::NotFound(format!("location {location_id} not found")));
    }
    if !delivery_locations(state, delivery_id)?.contains(&location_id) {
        return Err(AppError::Validation(format!(
            "delivery {delivery_id} does not stop at location {location_id}"
        )));
    }

    let policy = &state.token_policy;
    let (token, issued) = state.store.live_token_or_issue(
        delivery_id,
        location_id,
        principal.user_id,
        now,
        policy.ttl,
        || draw_token(policy.length),
    )?;

    let outcome = if issued { "issued" } else { "reused" };
    state
        .metrics
        .tokens_issued_total
        .with_label_values(&[outcome])
        .inc();

    if issued {
        info!(
            delivery_id = %delivery_id,
            location_id = %location_id,
            issued_by = %principal.user_id,
            expires_at = %token.expires_at,
            "delivery location token issued"
        );
    }

    Ok(TokenIssue {
        token,
        reused: !issued,
    })
}

/// Checks a presented token. Every failure is the same `AccessDenied`.
pub fn validate(
    state: &AppState,
    delivery_id: Uuid,
    location_id: Uuid,
    token: &str,
    now: DateTime<Utc>,
) -> Result<TokenGrant, AppError> {
    let granted = !token.is_empty()
        && state
            .store
            .token(delivery_id, location_id)
            .is_some_and(|stored| stored.token == token && stored.is_valid_at(now));

    let outcome = if granted { "granted" } else { "denied" };
    state
        .metrics
        .token_validations_total
        .with_label_values(&[outcome])
        .inc();

    if !granted {
        debug!(delivery_id = %delivery_id, location_id = %location_id, "token rejected");
        return Err(AppError::AccessDenied);
    }

    Ok(TokenGrant {
        delivery_id,
        location_id,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{draw_token, issue_or_refresh, validate};
    use crate::engine::assignment::{assign_delivery, AssignRequest};
    use crate::engine::fixtures::Scenario;
    use crate::engine::graph::record_payment;
    use crate::error::AppError;

    fn assigned(scenario: &Scenario) -> Uuid {
        let graph = record_payment(&scenario.state, scenario.order_id, Utc::now())
            .unwrap()
            .graph;
        let outcome = assign_delivery(
            &scenario.state,
            &scenario.dispatcher,
            AssignRequest {
                check_ids: graph.checkpoints.iter().map(|c| c.id).collect(),
                vehicle_id: scenario.vehicle_id,
                driver_user_id: scenario.driver.user_id,
                scheduled_date: Scenario::scheduled_date(),
            },
            Utc::now(),
        )
        .unwrap();
        outcome.delivery.id
    }

    #[test]
    fn drawn_tokens_are_alphanumeric_of_requested_length() {
        let token = draw_token(40);
        assert_eq!(token.len(), 40);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn reissue_before_expiry_returns_identical_token() {
        let scenario = Scenario::seeded();
        let delivery_id = assigned(&scenario);
        let now = Utc::now();

        let first = issue_or_refresh(
            &scenario.state,
            &scenario.driver,
            delivery_id,
            scenario.farm_location_id,
            now,
        )
        .unwrap();
        let second = issue_or_refresh(
            &scenario.state,
            &scenario.driver,
            delivery_id,
            scenario.farm_location_id,
            now + Duration::minutes(90),
        )
        .unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.token.token, second.token.token);
        assert_eq!(first.token.expires_at, now + Duration::hours(2));
    }

    #[test]
    fn expired_token_is_replaced_and_stops_validating() {
        let scenario = Scenario::seeded();
        let delivery_id = assigned(&scenario);
        let now = Utc::now();
        let location = scenario.farm_location_id;

        let old = issue_or_refresh(&scenario.state, &scenario.driver, delivery_id, location, now)
            .unwrap()
            .token;
        let later = now + Duration::hours(3);

        assert!(matches!(
            validate(&scenario.state, delivery_id, location, &old.token, later),
            Err(AppError::AccessDenied)
        ));

        let fresh = issue_or_refresh(&scenario.state, &scenario.driver, delivery_id, location, later)
            .unwrap();
        assert!(!fresh.reused);
        assert_ne!(fresh.token.token, old.token);
        assert!(validate(&scenario.state, delivery_id, location, &fresh.token.token, later).is_ok());
        assert!(validate(&scenario.state, delivery_id, location, &old.token, later).is_err());
    }

    #[test]
    fn token_expiring_exactly_now_is_denied() {
        let scenario = Scenario::seeded();
        let delivery_id = assigned(&scenario);
        let now = Utc::now();
        let location = scenario.farm_location_id;

        let issued = issue_or_refresh(&scenario.state, &scenario.driver, delivery_id, location, now)
            .unwrap()
            .token;

        assert!(validate(&scenario.state, delivery_id, location, &issued.token, issued.expires_at).is_err());
    }

    #[test]
    fn wrong_token_and_wrong_pair_are_denied_alike() {
        let scenario = Scenario::seeded();
        let delivery_id = assigned(&scenario);
        let now = Utc::now();

        let issued = issue_or_refresh(
            &scenario.state,
            &scenario.driver,
            delivery_id,
            scenario.farm_location_id,
            now,
        )
        .unwrap()
        .token;

        let attempts = [
            validate(&scenario.state, delivery_id, scenario.farm_location_id, "guess", now),
            validate(&scenario.state, delivery_id, scenario.farm_location_id, "", now),
            validate(&scenario.state, delivery_id, scenario.customer_location_id, &issued.token, now),
            validate(&scenario.state, Uuid::new_v4(), scenario.farm_location_id, &issued.token, now),
        ];

        for attempt in attempts {
            assert!(matches!(attempt, Err(AppError::AccessDenied)));
        }
    }

    #[test]
    fn tokens_are_unique_across_pairs() {
        let scenario = Scenario::seeded();
        let delivery_id = assigned(&scenario);
        let now = Utc::now();

        let locations = [
            scenario.farm_location_id,
            scenario.slaughterhouse_location_id,
            scenario.customer_location_id,
        ];
        let tokens: BTreeSet<String> = locations
            .iter()
            .map(|location| {
                issue_or_refresh(&scenario.state, &scenario.driver, delivery_id, *location, now)
                    .unwrap()
                    .token
                    .token
            })
            .collect();

        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn location_off_the_route_is_rejected() {
        let scenario = Scenario::seeded();
        let delivery_id = assigned(&scenario);
        let elsewhere = scenario.add_supplier("unrelated depot");

        let result = issue_or_refresh(
            &scenario.state,
            &scenario.driver,
            delivery_id,
            elsewhere.location_id,
            Utc::now(),
        );

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn concurrent_issuance_yields_one_token() {
        let scenario = Scenario::seeded();
        let delivery_id = assigned(&scenario);
        let now = Utc::now();
        let location = scenario.customer_location_id;

        let tokens: BTreeSet<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        issue_or_refresh(&scenario.state, &scenario.driver, delivery_id, location, now)
                            .unwrap()
                            .token
                            .token
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(tokens.len(), 1);
    }
}
