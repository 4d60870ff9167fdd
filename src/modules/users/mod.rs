pub mod model;
pub mod quota;
pub mod repository;
