//! Data models for test execution
//!
//! This module contains all data structures shared by the execution engine.

mod result;
mod test;

pub use result::{
    CheckEvent, CheckResult, FmfId, RawResult, ResultGuestData, ResultInterpret, ResultKey,
    ResultOutcome, TestResult,
};
pub use test::{CheckSpec, DiscoverPhase, Test, TestOrigin, DEFAULT_TEST_DURATION};
