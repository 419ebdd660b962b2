// Business domains
pub mod discovery;
pub mod pantries;
