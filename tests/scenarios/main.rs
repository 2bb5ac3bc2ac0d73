//! Scenario-based tests for stagerun

#[path = "../helpers.rs"]
mod helpers;

mod failure_handling;
mod gate_polling;
mod post_run_hooks;
mod success_chain;
mod variable_substitution;
