mod observation;
mod site;
mod sync_status;
pub mod timestamp;

pub use observation::{NewObservation, Observation, ObservationUpdate};
pub use site::{NewSite, Site, SiteUpdate};
pub use sync_status::SyncStatus;

pub(crate) use site::validate_coordinates;

/// Trims a free-text note; blank notes are stored as absent.
pub(crate) fn normalize_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}
