// Pantry persistence: models own the SQL, store adapters satisfy the kernel
// traits.

pub mod models;
pub mod store;

pub use store::{PostgresPantryStore, PostgresPlacesCache};
