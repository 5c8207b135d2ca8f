pub mod analysis;
pub mod lab_directory;
pub mod queue;
