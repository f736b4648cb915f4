pub mod analysis;
pub mod cache;
pub mod history;
