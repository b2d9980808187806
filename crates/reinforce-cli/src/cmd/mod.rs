pub mod batch_size;
pub mod config;
pub mod erase;
pub mod pending;
pub mod status;
pub mod track;
