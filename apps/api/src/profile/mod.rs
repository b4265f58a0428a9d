// Candidate profile evolution engine.
// Builds append-only, versioned assessments from resume and interview evidence.
// Concurrent triggers for the same candidate and stage share one build.

pub mod aggregation;
pub mod budget;
pub mod builder;
pub mod coordinator;
pub mod error;
pub mod evidence;
pub mod handlers;
pub mod invoker;
pub mod models;
pub mod prompts;
pub mod service;
pub mod store;

#[cfg(test)]
pub mod test_support;
