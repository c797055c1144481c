use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::checkpoint::{Arrange, Checkpoint};
use crate::models::order::{Order, OrderKind, OrderStatus};
use crate::models::verify::{Verify, VerifyStatus};

/// Derived status of a checkpoint or of a location.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Processing,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointNode {
    pub checkpoint_id: Uuid,
    pub arrange_number: Arrange,
    pub status: StageStatus,
    pub verifications: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationNode {
    pub location_id: Uuid,
    pub company_id: Uuid,
    pub status: StageStatus,
    pub checkpoints: Vec<CheckpointNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusTree {
    pub order_id: Uuid,
    pub kind: OrderKind,
    pub order_status: String,
    pub locations: Vec<LocationNode>,
}

pub fn checkpoint_status<'a, I>(verifies: I) -> StageStatus
where
    I: IntoIterator<Item = &'a Verify>,
{
    let mut seen = false;
    let mut all_complete = true;
    for verify in verifies {
        seen = true;
        all_complete &= verify.status == VerifyStatus::Complete;
    }

    match (seen, all_complete) {
        (false, _) => StageStatus::Pending,
        (true, true) => StageStatus::Complete,
        (true, false) => StageStatus::Processing,
    }
}

/// An empty location is pending.
pub fn location_status<I>(checkpoint_statuses: I) -> StageStatus
where
    I: IntoIterator<Item = StageStatus>,
{
    let statuses: Vec<StageStatus> = checkpoint_statuses.into_iter().collect();

    if statuses.is_empty() || statuses.contains(&StageStatus::Pending) {
        StageStatus::Pending
    } else if statuses.iter().all(|s| *s == StageStatus::Complete) {
        StageStatus::Complete
    } else {
        StageStatus::Processing
    }
}

fn verifies_by_check(verifies: &[Verify]) -> BTreeMap<Uuid, Vec<&Verify>> {
    let mut grouped: BTreeMap<Uuid, Vec<&Verify>> = BTreeMap::new();
    for verify in verifies {
        grouped.entry(verify.check_id).or_default().push(verify);
    }
    grouped
}

pub fn project_status(order: &Order, checkpoints: &[Checkpoint], verifies: &[Verify]) -> StatusTree {
    let grouped = verifies_by_check(verifies);

    let mut by_location: BTreeMap<Uuid, Vec<&Checkpoint>> = BTreeMap::new();
    for checkpoint in checkpoints.iter().filter(|c| c.order_id == order.id) {
        by_location.entry(checkpoint.location_id).or_default().push(checkpoint);
    }

    let mut started_locations = 0;
    let locations: Vec<LocationNode> = by_location
        .into_iter()
        .map(|(location_id, mut stage)| {
            stage.sort_by_key(|c| c.arrange);

            let nodes: Vec<CheckpointNode> = stage
                .iter()
                .map(|checkpoint| {
                    let rows = grouped.get(&checkpoint.id).map(Vec::as_slice).unwrap_or(&[]);
                    CheckpointNode {
                        checkpoint_id: checkpoint.id,
                        arrange_number: checkpoint.arrange,
                        status: checkpoint_status(rows.iter().copied()),
                        verifications: rows.len(),
                    }
                })
                .collect();

            if nodes.iter().any(|node| node.verifications > 0) {
                started_locations += 1;
            }

            LocationNode {
                location_id,
                company_id: stage[0].company_id,
                status: location_status(nodes.iter().map(|node| node.status)),
                checkpoints: nodes,
            }
        })
        .collect();

    let order_status = match order.kind {
        OrderKind::Sme => order.order_status.clone(),
        OrderKind::Broiler => {
            broiler_status(&locations, started_locations).as_str().to_string()
        }
    };

    StatusTree {
        order_id: order.id,
        kind: order.kind,
        order_status,
        locations,
    }
}

/// Stored status for SME orders, derived from the locations for broiler ones.
pub fn order_status(order: &Order, checkpoints: &[Checkpoint], verifies: &[Verify]) -> String {
    project_status(order, checkpoints, verifies).order_status
}

fn broiler_status(locations: &[LocationNode], started_locations: usize) -> OrderStatus {
    if locations.is_empty() || started_locations < locations.len() {
        OrderStatus::WaitingDelivery
    } else if locations.iter().all(|l| l.status == StageStatus::Complete) {
        OrderStatus::Complete
    } else {
        OrderStatus::Processing
    }
}

/// True when every checkpoint in `check_ids` has a verify row for the
/// delivery and all of those rows are complete. An empty set is never done.
pub fn delivery_complete(delivery_id: Uuid, check_ids: &BTreeSet<Uuid>, verifies: &[Verify]) -> bool {
    if check_ids.is_empty() {
        return false;
    }

    let complete: BTreeSet<Uuid> = verifies
        .iter()
        .filter(|v| v.delivery_id == delivery_id && v.status == VerifyStatus::Complete)
        .map(|v| v.check_id)
        .collect();

    check_ids.iter().all(|id| complete.contains(id))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use uuid::Uuid;

    use super::{
        checkpoint_status, delivery_complete, location_status, order_status, project_status, StageStatus,
    };
    use crate::models::checkpoint::{Arrange, Checkpoint, ItemRecord};
    use crate::models::order::{Order, OrderKind};
    use crate::models::verify::{Verify, VerifyStatus};

    fn checkpoint(order_id: Uuid, location_seed: u128, arrange: Arrange) -> Checkpoint {
        Checkpoint {
            id: Uuid::new_v4(),
            order_id,
            company_id: Uuid::from_u128(location_seed + 100),
            location_id: Uuid::from_u128(location_seed),
            arrange,
            item_record: ItemRecord::new(),
            created_at: Utc::now(),
        }
    }

    fn verify(delivery_id: Uuid, check_id: Uuid, status: VerifyStatus) -> Verify {
        let mut row = Verify::pending(delivery_id, check_id, Uuid::nil(), Utc::now());
        row.status = status;
        row
    }

    fn order(kind: OrderKind) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            kind,
            delivery_location_id: Uuid::from_u128(3),
            lines: Vec::new(),
            paid_at: Some(Utc::now()),
            order_status: "shipped".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn checkpoint_status_transitions() {
        let d = Uuid::new_v4();
        let c = Uuid::new_v4();

        let none: [Verify; 0] = [];
        assert_eq!(checkpoint_status(&none), StageStatus::Pending);
        assert_eq!(
            checkpoint_status(&[verify(d, c, VerifyStatus::Pending)]),
            StageStatus::Processing
        );
        assert_eq!(
            checkpoint_status(&[verify(d, c, VerifyStatus::Complete), verify(Uuid::new_v4(), c, VerifyStatus::Rejected)]),
            StageStatus::Processing
        );
        assert_eq!(
            checkpoint_status(&[verify(d, c, VerifyStatus::Complete)]),
            StageStatus::Complete
        );
    }

    #[test]
    fn location_status_rules() {
        use StageStatus::*;

        assert_eq!(location_status(Vec::<StageStatus>::new()), Pending);
        assert_eq!(location_status([Complete, Pending]), Pending);
        assert_eq!(location_status([Complete, Processing]), Processing);
        assert_eq!(location_status([Complete, Complete]), Complete);
    }

    #[test]
    fn broiler_order_moves_from_waiting_to_complete() {
        let order = order(OrderKind::Broiler);
        let d = Uuid::new_v4();
        let pickup = checkpoint(order.id, 1, Arrange::SupplierPickup);
        let customer = checkpoint(order.id, 3, Arrange::CustomerDelivery);
        let checkpoints = vec![pickup.clone(), customer.clone()];

        let tree = project_status(&order, &checkpoints, &[]);
        assert_eq!(tree.order_status, "waiting_delivery");

        let partial = vec![verify(d, pickup.id, VerifyStatus::Complete)];
        let tree = project_status(&order, &checkpoints, &partial);
        assert_eq!(tree.order_status, "waiting_delivery");

        let started = vec![
            verify(d, pickup.id, VerifyStatus::Complete),
            verify(d, customer.id, VerifyStatus::Pending),
        ];
        let tree = project_status(&order, &checkpoints, &started);
        assert_eq!(tree.order_status, "processing");

        let done = vec![
            verify(d, pickup.id, VerifyStatus::Complete),
            verify(d, customer.id, VerifyStatus::Complete),
        ];
        let tree = project_status(&order, &checkpoints, &done);
        assert_eq!(tree.order_status, "complete");
        assert!(tree.locations.iter().all(|l| l.status == StageStatus::Complete));
    }

    #[test]
    fn location_with_one_started_stage_counts_as_started_for_the_order() {
        let order = order(OrderKind::Broiler);
        let d = Uuid::new_v4();
        let intake = checkpoint(order.id, 2, Arrange::SlaughterhouseIntake);
        let dispatch = checkpoint(order.id, 2, Arrange::SlaughterhouseDispatch);
        let checkpoints = vec![dispatch.clone(), intake.clone()];

        let tree = project_status(&order, &checkpoints, &[verify(d, intake.id, VerifyStatus::Complete)]);

        assert_eq!(tree.locations.len(), 1);
        assert_eq!(tree.locations[0].status, StageStatus::Pending);
        assert_eq!(tree.locations[0].checkpoints[0].arrange_number, Arrange::SlaughterhouseIntake);
        assert_eq!(tree.order_status, "processing");
    }

    #[test]
    fn sme_orders_report_the_stored_status() {
        let order = order(OrderKind::Sme);
        let pickup = checkpoint(order.id, 1, Arrange::SupplierPickup);

        let checkpoints = [pickup.clone()];

        assert_eq!(order_status(&order, &checkpoints, &[]), "shipped");
        assert_eq!(
            order_status(&order, &checkpoints, &[verify(Uuid::new_v4(), pickup.id, VerifyStatus::Complete)]),
            "shipped"
        );
    }

    #[test]
    fn delivery_complete_requires_every_checkpoint() {
        let d = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let both: BTreeSet<Uuid> = [a, b].into_iter().collect();

        assert!(!delivery_complete(d, &BTreeSet::new(), &[]));
        assert!(!delivery_complete(d, &both, &[verify(d, a, VerifyStatus::Complete)]));
        assert!(!delivery_complete(
            d,
            &both,
            &[verify(d, a, VerifyStatus::Complete), verify(Uuid::new_v4(), b, VerifyStatus::Complete)]
        ));
        assert!(!delivery_complete(
            d,
            &both,
            &[verify(d, a, VerifyStatus::Complete), verify(d, b, VerifyStatus::Rejected)]
        ));
        assert!(delivery_complete(
            d,
            &both,
            &[verify(d, a, VerifyStatus::Complete), verify(d, b, VerifyStatus::Complete)]
        ));
    }
}
