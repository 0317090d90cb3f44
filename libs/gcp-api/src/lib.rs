//! Wire models for the Compute, Cloud Run and IAM REST APIs

pub mod models;
