//! Library root for the `inference_gateway` crate

// Error handling
pub mod api_errors;
pub mod errors;

// Traffic-split policy
pub mod policy;
pub mod policy_source;
pub mod policy_store;
pub mod variant_selector;

// Upstream collaborators
pub mod feature_store;
pub mod model_client;

// Request handling
pub mod input_validator;
pub mod orchestrator;

// Configuration & CLI
pub mod cli;
pub mod config_loader;
pub mod logging;

// Web server interface
pub mod app_state;
pub mod web;


pub use orchestrator::{Orchestrator, Prediction, TimeoutBudget};
pub use policy::Policy;
pub use policy_store::PolicyStore;
