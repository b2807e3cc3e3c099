pub mod config;
pub mod skeleton;
pub mod pose_cache;
pub mod track_store;
pub mod source;
pub mod live_source;
pub mod file_source;
pub mod pipeline;
pub mod form_processor;
pub mod rep_counter;
