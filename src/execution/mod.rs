pub mod odds;
pub mod batch;
