//! Route classification.
//!
//! Partitions a snapshot of routes into exit routes, failover groups and
//! plain routes. Everything here is a pure function of its input: the same
//! snapshot always yields the same classification, in input order.

use std::collections::BTreeMap;

use meshconsole_client::Route;

/// Prefixes that make a route an exit route.
pub const EXIT_PREFIXES: [&str; 2] = ["0.0.0.0/0", "::/0"];

/// Whether `prefix` is a default route.
#[must_use]
pub fn is_exit_prefix(prefix: &str) -> bool {
    EXIT_PREFIXES.contains(&prefix)
}

/// Display group of a single route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteGroup {
    Exit,
    Failover(String),
    Plain,
}

/// Routes sharing one non-exit prefix across several machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverGroup {
    pub prefix: String,
    /// Member route ids in input order.
    pub route_ids: Vec<u64>,
    /// At least two members are enabled at the same time.
    pub ha_enabled: bool,
    /// At least one member is enabled.
    pub any_enabled: bool,
    /// Position of this group among all groups; selects its palette colour.
    pub color_index: usize,
}

/// The exit routes advertised by one machine.
///
/// Usually an IPv4 and an IPv6 route, toggled together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPair {
    pub machine_id: u64,
    pub machine_name: String,
    pub route_ids: Vec<u64>,
    /// Any of the machine's exit routes is enabled.
    pub enabled: bool,
}

/// Aggregate counts for the overview page.
///
/// Routes not attached to a machine (id 0) are left out: upstream keeps
/// reporting routes of deleted machines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteCounts {
    pub total: usize,
    pub enabled: usize,
    pub exits_total: usize,
    pub exits_enabled: usize,
}

/// The result of [`classify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Exit route ids.
    pub exit: Vec<u64>,
    /// Exit routes grouped by machine.
    pub exit_pairs: Vec<ExitPair>,
    pub failover: Vec<FailoverGroup>,
    /// Ids of routes that are neither exit nor failover.
    pub plain: Vec<u64>,
}

impl Classification {
    /// Group of the route with `route_id`, if it was in the snapshot.
    #[must_use]
    pub fn group_of(&self, route_id: u64) -> Option<RouteGroup> {
        if self.exit.contains(&route_id) {
            return Some(RouteGroup::Exit);
        }
        if let Some(group) = self
            .failover
            .iter()
            .find(|g| g.route_ids.contains(&route_id))
        {
            return Some(RouteGroup::Failover(group.prefix.clone()));
        }
        self.plain
            .contains(&route_id)
            .then_some(RouteGroup::Plain)
    }

    /// Failover group for `prefix`.
    #[must_use]
    pub fn failover_group(&self, prefix: &str) -> Option<&FailoverGroup> {
        self.failover.iter().find(|g| g.prefix == prefix)
    }
}

/// Classify a route snapshot.
#[must_use]
pub fn classify(routes: &[Route]) -> Classification {
    let mut out = Classification::default();

    // Distinct machines per non-exit prefix.
    let mut machines_by_prefix: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for route in routes.iter().filter(|r| !is_exit_prefix(&r.prefix)) {
        let machines = machines_by_prefix.entry(route.prefix.as_str()).or_default();
        if !machines.contains(&route.machine_id) {
            machines.push(route.machine_id);
        }
    }
    let is_failover = |prefix: &str| machines_by_prefix.get(prefix).is_some_and(|m| m.len() >= 2);

    for route in routes {
        if is_exit_prefix(&route.prefix) {
            out.exit.push(route.id);
            match out
                .exit_pairs
                .iter_mut()
                .find(|p| p.machine_id == route.machine_id)
            {
                Some(pair) => {
                    pair.route_ids.push(route.id);
                    pair.enabled |= route.enabled;
                }
                None => out.exit_pairs.push(ExitPair {
                    machine_id: route.machine_id,
                    machine_name: route.machine_name.clone(),
                    route_ids: vec![route.id],
                    enabled: route.enabled,
                }),
            }
        } else if is_failover(&route.prefix) {
            let color_index = out.failover.len();
            match out.failover.iter_mut().find(|g| g.prefix == route.prefix) {
                Some(group) => {
                    if !group.route_ids.contains(&route.id) {
                        group.route_ids.push(route.id);
                    }
                }
                None => out.failover.push(FailoverGroup {
                    prefix: route.prefix.clone(),
                    route_ids: vec![route.id],
                    ha_enabled: false,
                    any_enabled: false,
                    color_index,
                }),
            }
        } else {
            out.plain.push(route.id);
        }
    }

    for group in &mut out.failover {
        let enabled = routes
            .iter()
            .filter(|r| group.route_ids.contains(&r.id) && r.enabled)
            .count();
        group.ha_enabled = enabled >= 2;
        group.any_enabled = enabled >= 1;
    }

    out
}

/// Count routes attached to a machine.
#[must_use]
pub fn count_routes(routes: &[Route]) -> RouteCounts {
    routes
        .iter()
        .filter(|r| r.machine_id != 0)
        .fold(RouteCounts::default(), |mut c, r| {
            c.total += 1;
            if r.enabled && r.advertised {
                c.enabled += 1;
            }
            if r.advertised && is_exit_prefix(&r.prefix) {
                c.exits_total += 1;
                if r.enabled {
                    c.exits_enabled += 1;
                }
            }
            c
        })
}

/// A failover route on one machine with its group colour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverMember {
    pub route: Route,
    pub color_index: usize,
}

/// Routes of one machine, arranged for its card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineRoutes {
    /// The machine advertises at least one route; otherwise no routes
    /// section is shown.
    pub has_advertised: bool,
    pub exit: Option<ExitPair>,
    pub failover: Vec<FailoverMember>,
    pub plain: Vec<Route>,
    /// One of this machine's failover routes is enabled together with
    /// another member of its group.
    pub ha_enabled: bool,
}

impl MachineRoutes {
    /// Select the routes of `machine_id` from the snapshot `routes` that
    /// produced `classification`.
    #[must_use]
    pub fn for_machine(machine_id: u64, routes: &[Route], classification: &Classification) -> Self {
        let mut view = Self {
            exit: classification
                .exit_pairs
                .iter()
                .find(|p| p.machine_id == machine_id)
                .cloned(),
            ..Self::default()
        };

        for route in routes.iter().filter(|r| r.machine_id == machine_id) {
            view.has_advertised |= route.advertised;
            if is_exit_prefix(&route.prefix) {
                continue;
            }
            match classification.failover_group(&route.prefix) {
                Some(group) => {
                    view.ha_enabled |= route.enabled && group.ha_enabled;
                    view.failover.push(FailoverMember {
                        route: route.clone(),
                        color_index: group.color_index,
                    });
                }
                None => view.plain.push(route.clone()),
            }
        }
        view
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn route(id: u64, prefix: &str, enabled: bool, machine_id: u64) -> Route {
        Route {
            id,
            prefix: prefix.to_owned(),
            advertised: true,
            enabled,
            is_primary: enabled,
            machine_id,
            machine_name: format!("machine-{machine_id}"),
        }
    }

    #[test]
    fn exit_and_failover_scenario() {
        let routes = vec![
            route(1, "10.0.0.0/8", true, 100),
            route(2, "10.0.0.0/8", false, 200),
            route(3, "0.0.0.0/0", true, 100),
        ];
        let c = classify(&routes);

        assert_eq!(c.exit, vec![3]);
        assert_eq!(c.failover.len(), 1);
        assert_eq!(c.failover[0].prefix, "10.0.0.0/8");
        assert_eq!(c.failover[0].route_ids, vec![1, 2]);
        assert!(!c.failover[0].ha_enabled);
        assert!(c.failover[0].any_enabled);
        assert!(c.plain.is_empty());
        assert_eq!(c.group_of(1), Some(RouteGroup::Failover("10.0.0.0/8".to_owned())));
        assert_eq!(c.group_of(3), Some(RouteGroup::Exit));
        assert_eq!(c.group_of(99), None);
    }

    #[test]
    fn exit_regardless_of_state() {
        let mut r4 = route(1, "0.0.0.0/0", false, 1);
        r4.advertised = false;
        let r6 = route(2, "::/0", false, 1);
        let c = classify(&[r4, r6]);
        assert_eq!(c.exit, vec![1, 2]);
        assert_eq!(c.exit_pairs.len(), 1);
        assert_eq!(c.exit_pairs[0].route_ids, vec![1, 2]);
        assert!(!c.exit_pairs[0].enabled);
    }

    #[test]
    fn ha_enabled_needs_two_enabled_members() {
        let both = classify(&[
            route(1, "192.168.1.0/24", true, 1),
            route(2, "192.168.1.0/24", true, 2),
        ]);
        assert!(both.failover[0].ha_enabled);

        let none = classify(&[
            route(1, "192.168.1.0/24", false, 1),
            route(2, "192.168.1.0/24", false, 2),
        ]);
        assert!(!none.failover[0].ha_enabled);
        assert!(!none.failover[0].any_enabled);
    }

    #[test]
    fn same_prefix_on_one_machine_is_plain() {
        let c = classify(&[
            route(1, "10.1.0.0/16", true, 7),
            route(2, "10.1.0.0/16", true, 7),
        ]);
        assert!(c.failover.is_empty());
        assert_eq!(c.plain, vec![1, 2]);
    }

    #[test]
    fn exit_prefixes_never_form_failover_groups() {
        let c = classify(&[
            route(1, "0.0.0.0/0", true, 1),
            route(2, "0.0.0.0/0", true, 2),
        ]);
        assert!(c.failover.is_empty());
        assert_eq!(c.exit_pairs.len(), 2);
    }

    #[test]
    fn color_index_follows_first_appearance() {
        let c = classify(&[
            route(1, "10.2.0.0/16", false, 1),
            route(2, "10.1.0.0/16", false, 1),
            route(3, "10.1.0.0/16", false, 2),
            route(4, "10.2.0.0/16", false, 2),
        ]);
        assert_eq!(c.failover_group("10.2.0.0/16").unwrap().color_index, 0);
        assert_eq!(c.failover_group("10.1.0.0/16").unwrap().color_index, 1);
    }

    #[test]
    fn classification_is_idempotent() {
        let routes = vec![
            route(1, "10.0.0.0/8", true, 1),
            route(2, "10.0.0.0/8", true, 2),
            route(3, "::/0", false, 1),
            route(4, "172.16.0.0/12", true, 3),
        ];
        assert_eq!(classify(&routes), classify(&routes));
    }

    #[test]
    fn counts_skip_orphaned_routes() {
        let mut not_advertised = route(4, "10.9.0.0/16", true, 2);
        not_advertised.advertised = false;
        let routes = vec![
            route(1, "10.0.0.0/8", true, 1),
            route(2, "0.0.0.0/0", true, 1),
            route(3, "::/0", false, 1),
            not_advertised,
            route(5, "10.0.0.0/8", true, 0),
            route(6, "0.0.0.0/0", true, 0),
        ];
        let counts = count_routes(&routes);
        assert_eq!(
            counts,
            RouteCounts {
                total: 4,
                enabled: 2,
                exits_total: 2,
                exits_enabled: 1,
            }
        );
    }

    #[test]
    fn machine_view_splits_routes() {
        let routes = vec![
            route(1, "10.0.0.0/8", true, 1),
            route(2, "10.0.0.0/8", true, 2),
            route(3, "0.0.0.0/0", true, 1),
            route(4, "::/0", true, 1),
            route(5, "192.168.0.0/24", false, 1),
            route(6, "172.16.0.0/12", false, 2),
        ];
        let c = classify(&routes);

        let one = MachineRoutes::for_machine(1, &routes, &c);
        assert!(one.has_advertised);
        assert!(one.ha_enabled);
        assert_eq!(one.exit.as_ref().map(|p| p.route_ids.clone()), Some(vec![3, 4]));
        assert_eq!(one.failover.len(), 1);
        assert_eq!(one.failover[0].color_index, 0);
        assert_eq!(one.plain.iter().map(|r| r.id).collect::<Vec<_>>(), vec![5]);

        let two = MachineRoutes::for_machine(2, &routes, &c);
        assert!(two.exit.is_none());
        assert_eq!(two.plain.iter().map(|r| r.id).collect::<Vec<_>>(), vec![6]);

        let none = MachineRoutes::for_machine(9, &routes, &c);
        assert!(!none.has_advertised);
    }
}
