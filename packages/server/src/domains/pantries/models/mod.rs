pub mod pantry;
pub mod places_cache;

pub use pantry::{NearbyPantry, Pantry, PantryDraft, PantryStatus, OPEN_TO_ALL};
pub use places_cache::PlacesCacheEntry;
