pub mod discovery;
pub mod health;
pub mod pantries;
pub mod stream;

pub use discovery::{job_status_handler, start_job_handler, stop_job_handler};
pub use health::health_handler;
pub use pantries::{
    ingest_pantry_handler, list_cities_handler, list_pantries_handler, nearby_pantries_handler,
};
pub use stream::stream_handler;
