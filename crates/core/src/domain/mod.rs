pub mod plan;
pub mod record;
pub mod resource;
