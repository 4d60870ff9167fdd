pub mod db;
pub mod gemini;
pub mod queue;
pub mod redis;
pub mod youtube;
