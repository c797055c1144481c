use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::checkpoint::{Arrange, Checkpoint, ItemRecord};
use crate::models::directory::{Item, Location};
use crate::models::order::Order;
use crate::models::trip::Trip;
use crate::state::AppState;
use crate::store::GraphCommit;

#[derive(Debug, Clone)]
pub struct GraphPlan {
    pub checkpoints: Vec<Checkpoint>,
    pub trips: Vec<Trip>,
}

/// Accumulates checkpoints keyed by (location, arrange) so a stage is never
/// duplicated within one order.
struct Planner<'a> {
    order_id: Uuid,
    locations: &'a HashMap<Uuid, Location>,
    now: DateTime<Utc>,
    checkpoints: Vec<Checkpoint>,
    slots: BTreeMap<(Uuid, Arrange), usize>,
    edges: BTreeSet<(usize, usize)>,
}

impl<'a> Planner<'a> {
    fn company_of(&self, location_id: Uuid) -> Result<Uuid, AppError> {
        self.locations
            .get(&location_id)
            .map(|location| location.company_id)
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "order {} references unknown location {location_id}",
                    self.order_id
                ))
            })
    }

    fn checkpoint(
        &mut self,
        location_id: Uuid,
        arrange: Arrange,
        items: &ItemRecord,
    ) -> Result<usize, AppError> {
        if let Some(&slot) = self.slots.get(&(location_id, arrange)) {
            self.checkpoints[slot].item_record.merge(items);
            return Ok(slot);
        }

        let company_id = self.company_of(location_id)?;
        self.checkpoints.push(Checkpoint {
            id: Uuid::new_v4(),
            order_id: self.order_id,
            company_id,
            location_id,
            arrange,
            item_record: items.clone(),
            created_at: self.now,
        });

        let slot = self.checkpoints.len() - 1;
        self.slots.insert((location_id, arrange), slot);
        Ok(slot)
    }

    fn finish(self) -> GraphPlan {
        let trips = self
            .edges
            .iter()
            .map(|&(start, end)| Trip {
                id: Uuid::new_v4(),
                order_id: self.order_id,
                start_check_id: self.checkpoints[start].id,
                end_check_id: self.checkpoints[end].id,
                delivery_id: None,
                created_at: self.now,
            })
            .collect();

        GraphPlan {
            checkpoints: self.checkpoints,
            trips,
        }
    }
}

/// Lays out the stage graph of a paid order: supplier pickups, optional
/// slaughterhouse intake/dispatch pairs and one customer delivery.
pub fn plan_graph(
    order: &Order,
    items: &HashMap<Uuid, Item>,
    locations: &HashMap<Uuid, Location>,
    now: DateTime<Utc>,
) -> Result<GraphPlan, AppError> {
    let mut ordered: BTreeMap<Uuid, &Item> = BTreeMap::new();
    for line in &order.lines {
        let item = items.get(&line.item_id).ok_or_else(|| {
            AppError::Internal(format!(
                "order {} references unknown item {}",
                order.id, line.item_id
            ))
        })?;
        ordered.insert(item.id, item);
    }

    let mut by_company: BTreeMap<Uuid, BTreeMap<Uuid, Vec<&Item>>> = BTreeMap::new();
    for item in ordered.values() {
        by_company
            .entry(item.supplier_company_id)
            .or_default()
            .entry(item.location_id)
            .or_default()
            .push(item);
    }

    let mut planner = Planner {
        order_id: order.id,
        locations,
        now,
        checkpoints: Vec::new(),
        slots: BTreeMap::new(),
        edges: BTreeSet::new(),
    };
    let mut dispatches = BTreeSet::new();

    for supplier_locations in by_company.values() {
        for (&location_id, group) in supplier_locations {
            let record: ItemRecord = group.iter().map(|item| item.id).collect();
            let pickup = planner.checkpoint(location_id, Arrange::SupplierPickup, &record)?;

            let mut by_slaughterhouse: BTreeMap<Uuid, ItemRecord> = BTreeMap::new();
            for item in group {
                if let Some(slaughterhouse_id) = item.slaughterhouse_location_id {
                    by_slaughterhouse
                        .entry(slaughterhouse_id)
                        .or_default()
                        .insert(item.id);
                }
            }

            for (slaughterhouse_id, record) in &by_slaughterhouse {
                let intake = planner.checkpoint(
                    *slaughterhouse_id,
                    Arrange::SlaughterhouseIntake,
                    record,
                )?;
                let dispatch = planner.checkpoint(
                    *slaughterhouse_id,
                    Arrange::SlaughterhouseDispatch,
                    record,
                )?;
                planner.edges.insert((pickup, intake));
                dispatches.insert(dispatch);
            }
        }
    }

    let everything: ItemRecord = ordered.keys().copied().collect();
    let customer = planner.checkpoint(
        order.delivery_location_id,
        Arrange::CustomerDelivery,
        &everything,
    )?;
    for dispatch in dispatches {
        planner.edges.insert((dispatch, customer));
    }

    Ok(planner.finish())
}

/// Builds and commits the checkpoint graph for a paid order. Returns the
/// existing graph untouched when one was already built.
pub fn build_order_graph(
    state: &AppState,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<GraphCommit, AppError> {
    let start = Instant::now();
    let store = &state.store;

    let order = store
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    if !order.is_paid() {
        return Err(AppError::Conflict(format!("order {order_id} is not paid")));
    }

    let result = store.commit_graph(order_id, || {
        let (items, locations) = resolve_references(state, &order)?;
        let plan = plan_graph(&order, &items, &locations, now)?;
        Ok((plan.checkpoints, plan.trips))
    });

    match &result {
        Ok(commit) => {
            let outcome = if commit.created { "created" } else { "existing" };
            state
                .metrics
                .checkpoint_graphs_total
                .with_label_values(&[outcome])
                .inc();
            info!(
                order_id = %order_id,
                outcome,
                checkpoints = commit.graph.checkpoints.len(),
                trips = commit.graph.trips.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "checkpoint graph ready"
            );
        }
        Err(err) => {
            state
                .metrics
                .checkpoint_graphs_total
                .with_label_values(&["error"])
                .inc();
            error!(order_id = %order_id, error = %err, "checkpoint graph construction failed");
        }
    }

    result
}

/// Payment-callback boundary: marks the order paid and builds its graph.
/// Safe to call again for the same order.
pub fn record_payment(
    state: &AppState,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<GraphCommit, AppError> {
    state.store.mark_paid(order_id, now)?;
    build_order_graph(state, order_id, now)
}

fn resolve_references(
    state: &AppState,
    order: &Order,
) -> Result<(HashMap<Uuid, Item>, HashMap<Uuid, Location>), AppError> {
    let mut items = HashMap::new();
    let mut locations = HashMap::new();

    let mut remember_location = |location_id: Uuid| {
        if let Some(location) = state.store.location(location_id) {
            locations.insert(location_id, location);
        }
    };

    remember_location(order.delivery_location_id);
    for line in &order.lines {
        let Some(item) = state.store.item(line.item_id) else {
            continue;
        };
        remember_location(item.location_id);
        if let Some(slaughterhouse_id) = item.slaughterhouse_location_id {
            remember_location(slaughterhouse_id);
        }
        items.insert(item.id, item);
    }

    // Dangling references surface from plan_graph as internal errors.
    Ok((items, locations))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use uuid::Uuid;

    use super::{build_order_graph, plan_graph, record_payment};
    use crate::engine::fixtures::Scenario;
    use crate::error::AppError;
    use crate::models::checkpoint::{Arrange, Checkpoint, ItemRecord};

    fn by_arrange(checkpoints: &[Checkpoint], arrange: Arrange) -> Vec<&Checkpoint> {
        checkpoints.iter().filter(|c| c.arrange == arrange).collect()
    }

    #[test]
    fn two_items_one_slaughterhouse_scenario() {
        let scenario = Scenario::seeded();
        let commit = record_payment(&scenario.state, scenario.order_id, Utc::now()).unwrap();
        let graph = commit.graph;

        assert!(commit.created);
        assert_eq!(graph.checkpoints.len(), 4);
        assert_eq!(graph.trips.len(), 2);

        let both: ItemRecord = [scenario.chicken_id, scenario.eggs_id].into_iter().collect();
        let chicken_only: ItemRecord = [scenario.chicken_id].into_iter().collect();

        let pickup = by_arrange(&graph.checkpoints, Arrange::SupplierPickup);
        assert_eq!(pickup.len(), 1);
        assert_eq!(pickup[0].location_id, scenario.farm_location_id);
        assert_eq!(pickup[0].company_id, scenario.farm_company_id);
        assert_eq!(pickup[0].item_record, both);

        let intake = by_arrange(&graph.checkpoints, Arrange::SlaughterhouseIntake);
        let dispatch = by_arrange(&graph.checkpoints, Arrange::SlaughterhouseDispatch);
        assert_eq!(intake.len(), 1);
        assert_eq!(dispatch.len(), 1);
        assert_eq!(intake[0].location_id, scenario.slaughterhouse_location_id);
        assert_eq!(intake[0].item_record, chicken_only);
        assert_eq!(dispatch[0].item_record, chicken_only);

        let customer = by_arrange(&graph.checkpoints, Arrange::CustomerDelivery);
        assert_eq!(customer.len(), 1);
        assert_eq!(customer[0].location_id, scenario.customer_location_id);
        assert_eq!(customer[0].item_record, both);

        let edges: Vec<(Uuid, Uuid)> = graph
            .trips
            .iter()
            .map(|t| (t.start_check_id, t.end_check_id))
            .collect();
        assert!(edges.contains(&(pickup[0].id, intake[0].id)));
        assert!(edges.contains(&(dispatch[0].id, customer[0].id)));
    }

    #[test]
    fn building_twice_is_a_no_op() {
        let scenario = Scenario::seeded();
        let first = record_payment(&scenario.state, scenario.order_id, Utc::now()).unwrap();
        let second = record_payment(&scenario.state, scenario.order_id, Utc::now()).unwrap();

        assert!(first.created);
        assert!(!second.created);

        let ids = |commit: &crate::store::GraphCommit| {
            let mut checks: Vec<Uuid> = commit.graph.checkpoints.iter().map(|c| c.id).collect();
            let mut trips: Vec<Uuid> = commit.graph.trips.iter().map(|t| t.id).collect();
            checks.sort();
            trips.sort();
            (checks, trips)
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(scenario.state.store.counts().checkpoints, 4);
    }

    #[test]
    fn concurrent_payment_callbacks_commit_one_graph() {
        let scenario = Scenario::seeded();
        let now = Utc::now();

        let commits: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| record_payment(&scenario.state, scenario.order_id, now).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(commits.iter().filter(|c| c.created).count(), 1);
        let counts = scenario.state.store.counts();
        assert_eq!(counts.checkpoints, 4);
        assert_eq!(counts.trips, 2);

        let mut expected: Vec<Uuid> = commits[0].graph.checkpoints.iter().map(|c| c.id).collect();
        expected.sort();
        for commit in &commits {
            let mut seen: Vec<Uuid> = commit.graph.checkpoints.iter().map(|c| c.id).collect();
            seen.sort();
            assert_eq!(seen, expected);
            assert_eq!(commit.graph.trips.len(), 2);
        }
    }

    #[test]
    fn trips_span_adjacent_stages_of_the_same_order() {
        let scenario = Scenario::seeded();
        let graph = record_payment(&scenario.state, scenario.order_id, Utc::now())
            .unwrap()
            .graph;

        let lookup: HashMap<Uuid, &Checkpoint> =
            graph.checkpoints.iter().map(|c| (c.id, c)).collect();

        for trip in &graph.trips {
            let start = lookup[&trip.start_check_id];
            let end = lookup[&trip.end_check_id];
            assert_eq!(start.order_id, scenario.order_id);
            assert_eq!(end.order_id, scenario.order_id);
            assert!(start.arrange < end.arrange);
            assert!(trip.delivery_id.is_none());
        }
    }

    #[test]
    fn item_without_slaughterhouse_gets_no_intermediate_stage() {
        let scenario = Scenario::seeded();
        let order = scenario.state.store.order(scenario.order_id).unwrap();
        let mut items = HashMap::new();
        let eggs = scenario.state.store.item(scenario.eggs_id).unwrap();
        items.insert(eggs.id, eggs);

        let mut eggs_only = order.clone();
        eggs_only.lines.retain(|line| line.item_id == scenario.eggs_id);

        let plan = plan_graph(&eggs_only, &items, &scenario.locations(), Utc::now()).unwrap();

        assert_eq!(plan.checkpoints.len(), 2);
        assert!(plan.trips.is_empty());
    }

    #[test]
    fn suppliers_sharing_a_slaughterhouse_share_its_stage() {
        let scenario = Scenario::seeded();
        let second_farm = scenario.add_supplier("second farm");
        let duck = scenario.add_item("duck", second_farm, Some(scenario.slaughterhouse_location_id));
        scenario.add_line(duck);

        let graph = record_payment(&scenario.state, scenario.order_id, Utc::now())
            .unwrap()
            .graph;

        let intake = by_arrange(&graph.checkpoints, Arrange::SlaughterhouseIntake);
        assert_eq!(intake.len(), 1);
        assert!(intake[0].item_record.contains(&duck));
        assert!(intake[0].item_record.contains(&scenario.chicken_id));
        assert_eq!(by_arrange(&graph.checkpoints, Arrange::SupplierPickup).len(), 2);
        // two pickups into the shared intake, one dispatch to the customer
        assert_eq!(graph.trips.len(), 3);
    }

    #[test]
    fn unpaid_orders_are_rejected() {
        let scenario = Scenario::seeded();
        let result = build_order_graph(&scenario.state, scenario.order_id, Utc::now());
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(scenario.state.store.counts().checkpoints, 0);
    }

    #[test]
    fn dangling_location_commits_nothing() {
        let scenario = Scenario::seeded();
        scenario
            .state
            .store
            .locations
            .remove(&scenario.slaughterhouse_location_id);

        let result = record_payment(&scenario.state, scenario.order_id, Utc::now());

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert!(scenario.state.store.order_graph(scenario.order_id).is_none());
        assert_eq!(scenario.state.store.counts().trips, 0);
    }
}
