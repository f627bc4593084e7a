//! Proximity filter for the task board.
//!
//! The filter runs after the full candidate list has been fetched. Without a
//! viewer location it is the identity; tasks without a location are never
//! excluded.

use crate::geo::{distance_meters, Coordinate};
use crate::models::Task;

/// Tasks farther than this from the viewer are hidden.
pub const NEARBY_RADIUS_METERS: f64 = 50.0;

/// Boundary is inclusive.
pub fn within_radius(distance: f64) -> bool {
    distance <= NEARBY_RADIUS_METERS
}

pub fn is_visible(task: &Task, viewer: Option<Coordinate>) -> bool {
    match (viewer, task.location) {
        (Some(viewer), Some(at)) => within_radius(distance_meters(viewer, at)),
        _ => true,
    }
}

/// Keeps the tasks visible from `viewer`, preserving order.
pub fn filter_nearby(tasks: Vec<Task>, viewer: Option<Coordinate>) -> Vec<Task> {
    if viewer.is_none() {
        return tasks;
    }
    tasks.into_iter().filter(|t| is_visible(t, viewer)).collect()
}
