pub mod content_worker;
