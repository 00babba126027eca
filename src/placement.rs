//! `schedule()`: the single entry point that drives one scheduling cycle.

use crate::allocation::QueueEntry;
use crate::cell::Cell;
use crate::error::Result;
use crate::node::{NodeHandle, PlaceRequest, ServerState};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Before/after pair for one application's placement at the end of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementChange {
    pub app_name: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Run one full scheduling cycle against `cell`, mutating it in place and
/// returning the placement delta for every application touched or left
/// unchanged.
pub fn schedule(cell: &mut Cell) -> Result<Vec<PlacementChange>> {
    let now = cell.now();

    reconcile_identities(cell);
    let before: Vec<(String, Option<String>)> = snapshot(cell);

    apply_retention(cell, now)?;

    let queue = build_global_queue(cell)?;
    for entry in &queue {
        process_one(cell, entry, &queue)?;
    }

    recompute_next_event_at(cell);

    let after: HashMap<String, Option<String>> = snapshot(cell).into_iter().collect();
    let mut changes = Vec::with_capacity(before.len());
    for (name, before_server) in before {
        let after_server = after.get(&name).cloned().flatten();
        changes.push(PlacementChange {
            app_name: name,
            before: before_server,
            after: after_server,
        });
    }
    Ok(changes)
}

fn snapshot(cell: &mut Cell) -> Vec<(String, Option<String>)> {
    let mut out = Vec::new();
    for alloc in cell.allocations.values_mut() {
        alloc.for_each_app_mut(&mut |app| out.push((app.name().to_string(), app.server().map(str::to_string))));
    }
    out
}

/// Acquire identities for apps waiting on one, and strip apps whose held
/// identity fell out of range after a group shrink.
///
/// Freed and never-identified apps all compete for whatever ids a group
/// has available; which app wins must not depend on `HashMap` iteration
/// order, so candidates are gathered first and then acquired in
/// `sequence_no` order, the same tiebreaker the global placement queue
/// uses for determinism.
fn reconcile_identities(cell: &mut Cell) {
    let mut to_unplace = Vec::new();
    let mut waiting: Vec<(u64, String)> = Vec::new();
    for alloc in cell.allocations.values_mut() {
        alloc.for_each_app_mut(&mut |app| {
            if app.identity_group_ref.is_none() {
                return;
            }
            if app.is_unidentified_or_overcapacity() && app.identity().is_some() {
                app.release_identity();
                if let Some(server) = app.server.take() {
                    to_unplace.push((app.name().to_string(), server));
                }
            }
            if app.identity().is_none() {
                waiting.push((app.sequence_no, app.name().to_string()));
            }
        });
    }
    for (app_name, server_name) in to_unplace {
        let _ = cell.tree.vacate(&server_name, &app_name);
    }

    waiting.sort_by_key(|(sequence_no, _)| *sequence_no);
    for (_, app_name) in waiting {
        let Some(label) = cell.name_to_label.get(&app_name).cloned() else { continue };
        let Some(alloc) = cell.allocations.get_mut(&label) else { continue };
        if let Some(app) = alloc.find_app_mut(&app_name) {
            app.acquire_identity();
        }
    }
}

/// Apply data-retention handling for apps whose current server is no
/// longer up. Frees apps whose retention has elapsed (or is zero) so they
/// re-enter placement this same cycle; leaves the rest bound to their old,
/// unavailable server name.
fn apply_retention(cell: &mut Cell, now: f64) -> Result<()> {
    let down_servers: std::collections::HashSet<String> = {
        let mut set = std::collections::HashSet::new();
        for alloc in cell.allocations.values() {
            collect_down_servers(cell, alloc, &mut set);
        }
        set
    };

    let mut to_vacate: Vec<(String, String)> = Vec::new();
    for alloc in cell.allocations.values_mut() {
        alloc.for_each_app_mut(&mut |app| {
            let Some(server_name) = app.server.clone() else { return };
            if !down_servers.contains(&server_name) {
                app.placement_expiry = None;
                return;
            }
            if app.placement_expiry.is_none() {
                app.placement_expiry = Some(now + app.data_retention_timeout);
            }
            if now >= app.placement_expiry.unwrap() {
                app.server = None;
                app.placement_expiry = None;
                to_vacate.push((app.name().to_string(), server_name));
            }
        });
    }
    for (app_name, server_name) in to_vacate {
        if cell.tree.handle_of(&server_name).is_some() {
            cell.tree.vacate(&server_name, &app_name)?;
        }
    }
    Ok(())
}

fn collect_down_servers(cell: &Cell, alloc: &crate::allocation::Allocation, out: &mut std::collections::HashSet<String>) {
    for app in alloc.apps() {
        if let Some(name) = app.server() {
            let unavailable = match cell.server(name) {
                Ok(server) => server.state() != ServerState::Up,
                Err(_) => true,
            };
            if unavailable {
                out.insert(name.to_string());
            }
        }
    }
    for (_, sub) in alloc.sub_allocations() {
        collect_down_servers(cell, sub, out);
    }
}

fn build_global_queue(cell: &Cell) -> Result<Vec<QueueEntry>> {
    let parent_available = cell.root_available()?;
    let mut entries = Vec::new();
    for alloc in cell.allocations.values() {
        entries.extend(alloc.utilization_queue(&parent_available));
    }
    entries.sort_by_key(|e| (std::cmp::Reverse(e.rank), ordered_float::OrderedFloat(e.utilization), e.sequence_no));
    Ok(entries)
}

fn process_one(cell: &mut Cell, entry: &QueueEntry, queue: &[QueueEntry]) -> Result<()> {
    let label = match cell.name_to_label.get(&entry.app_name).cloned() {
        Some(label) => label,
        None => return Ok(()),
    };

    let (already_has_server, demand, trait_demand, affinity, affinity_limits) = {
        let alloc = cell.allocations.get_mut(&label).expect("label exists");
        let app = match alloc.find_app_mut(&entry.app_name) {
            Some(app) => app,
            None => return Ok(()),
        };
        if app.evicted() {
            return Ok(());
        }
        if app.identity_group_ref.is_some() && app.identity().is_none() {
            // Waiting on an identity; not eligible for placement this cycle.
            return Ok(());
        }
        (
            app.server.clone(),
            app.demand().clone(),
            app.trait_demand(),
            app.affinity().to_string(),
            app.affinity_limits().cloned(),
        )
    };

    if let Some(current) = &already_has_server {
        // Capacity is already reserved on `current`; only state/traits/label
        // can have changed since placement. If still up, keep it.
        if let Ok(server) = cell.server(current) {
            if server.has_app(&entry.app_name)
                && server.state() == ServerState::Up
                && server.can_host_traits_and_label(trait_demand, &label)
            {
                return Ok(());
            }
        }
        // Down, removed, or no longer eligible: retention owns this case
        // (it already ran this cycle), nothing further to do here.
        return Ok(());
    }

    let req = PlaceRequest {
        demand: &demand,
        trait_demand,
        label: &label,
        affinity: &affinity,
        affinity_limits: affinity_limits.as_ref(),
    };
    if let Some(server_handle) = cell.tree.try_place(cell.tree.root(), &req)? {
        commit_placement(cell, &label, &entry.app_name, server_handle, demand, &affinity)?;
        return Ok(());
    }

    if !cell.config().eviction_enabled {
        return Ok(());
    }

    try_evict_for(cell, &label, entry, &demand, trait_demand, &affinity, affinity_limits.as_ref(), queue)
}

fn commit_placement(
    cell: &mut Cell,
    label: &Option<String>,
    app_name: &str,
    server_handle: NodeHandle,
    demand: crate::resources::ResourceVector,
    affinity: &str,
) -> Result<()> {
    let server_name = cell.tree.occupy_at(server_handle, app_name, demand, affinity)?;
    let alloc = cell.allocations.get_mut(label).expect("label exists");
    if let Some(app) = alloc.find_app_mut(app_name) {
        app.server = Some(server_name);
        app.placement_expiry = None;
        app.ever_placed = true;
    }
    trace!(app = app_name, "placed");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn try_evict_for(
    cell: &mut Cell,
    label: &Option<String>,
    entry: &QueueEntry,
    demand: &crate::resources::ResourceVector,
    trait_demand: crate::traits::TraitMask,
    affinity: &str,
    affinity_limits: Option<&std::collections::HashMap<String, u32>>,
    queue: &[QueueEntry],
) -> Result<()> {
    for candidate in queue.iter().rev() {
        if candidate.app_name == entry.app_name {
            continue;
        }
        if candidate.rank >= entry.rank {
            continue;
        }
        let candidate_label = match cell.name_to_label.get(&candidate.app_name).cloned() {
            Some(l) => l,
            None => continue,
        };
        let candidate_server_name = {
            let alloc = cell.allocations.get_mut(&candidate_label).expect("label exists");
            match alloc.find_app_mut(&candidate.app_name).and_then(|a| a.server.clone()) {
                Some(name) => name,
                None => continue,
            }
        };

        let (candidate_demand, candidate_affinity, server_satisfies) = {
            let server = match cell.server(&candidate_server_name) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if !(server.can_host_traits_and_label(trait_demand, label)) {
                continue;
            }
            let occupant = match server.occupant(&candidate.app_name) {
                Some(o) => o,
                None => continue,
            };
            (occupant.demand.clone(), occupant.affinity.clone(), true)
        };
        if !server_satisfies {
            continue;
        }

        cell.tree.vacate(&candidate_server_name, &candidate.app_name)?;

        let req = PlaceRequest {
            demand,
            trait_demand,
            label,
            affinity,
            affinity_limits,
        };
        if let Some(server_handle) = cell.tree.try_place(cell.tree.root(), &req)? {
            commit_placement(cell, label, &entry.app_name, server_handle, demand.clone(), affinity)?;

            let alloc = cell.allocations.get_mut(&candidate_label).expect("label exists");
            if let Some(app) = alloc.find_app_mut(&candidate.app_name) {
                app.server = None;
                if app.schedule_once() && app.ever_placed {
                    app.evicted = true;
                }
            }
            debug!(evicted = candidate.app_name, winner = entry.app_name, "preempted");
            return Ok(());
        }

        // Roll back: A still didn't fit, restore B exactly.
        cell.tree.occupy_at(
            cell.tree.handle_of(&candidate_server_name).expect("server still exists"),
            &candidate.app_name,
            candidate_demand,
            &candidate_affinity,
        )?;
    }
    Ok(())
}

fn recompute_next_event_at(cell: &mut Cell) {
    let mut min_expiry = f64::INFINITY;
    for alloc in cell.allocations.values_mut() {
        alloc.for_each_app_mut(&mut |app| {
            if let Some(expiry) = app.placement_expiry() {
                if expiry < min_expiry {
                    min_expiry = expiry;
                }
            }
        });
    }
    cell.next_event_at = min_expiry;
}
