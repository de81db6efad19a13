// HTTP API
pub mod handlers;
pub mod models;
pub mod routes;

// Chat service over the primary store, cache and queue
pub mod chat;

// Durable task queue: envelope codec, broker seam, publisher, consumer
pub mod task_queue;

// Cache-aside layer
pub mod cache;

// LLM worker consuming the task queue
pub mod worker;

pub mod config;
pub mod telemetry;
