//! Integration tests for the deployment service

mod support;
mod test_api;
mod test_fsm;
mod test_pipeline;
mod test_provision;
mod test_store;
mod test_watchdog;
