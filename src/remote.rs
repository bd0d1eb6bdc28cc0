pub mod gate;
pub mod listing;
pub mod plan;
pub mod sink;
pub mod transfer;
