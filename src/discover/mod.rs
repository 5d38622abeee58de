//! Test discovery
//!
//! Tests are declared directly in the plan, grouped into discover phases.

use std::sync::Arc;

use crate::models::{DiscoverPhase, Test, TestOrigin};

/// Source of discovered tests
pub trait Discover: Send + Sync {
    /// Discover phases in declaration order
    fn phases(&self) -> &[DiscoverPhase];

    /// Tests of one phase, or of all phases when `phase` is `None`.
    ///
    /// With `enabled`, disabled tests are left out.
    fn tests(&self, phase: Option<&str>, enabled: bool) -> Vec<TestOrigin>;
}

/// Tests listed in the plan file
#[derive(Clone, Debug, Default)]
pub struct StaticDiscover {
    phases: Vec<DiscoverPhase>,
    tests: Vec<TestOrigin>,
}

impl StaticDiscover {
    /// Assign serial numbers from 1, in declaration order across all phases
    pub fn new(phases: Vec<DiscoverPhase>) -> Self {
        let mut serial_number = 0;
        let mut tests = Vec::new();

        for phase in &phases {
            for test in &phase.tests {
                serial_number += 1;
                let test: Test = test.clone().with_serial_number(serial_number);
                tests.push(TestOrigin {
                    phase: phase.name.clone(),
                    test: Arc::new(test),
                });
            }
        }

        Self { phases, tests }
    }
}

impl Discover for StaticDiscover {
    fn phases(&self) -> &[DiscoverPhase] {
        &self.phases
    }

    fn tests(&self, phase: Option<&str>, enabled: bool) -> Vec<TestOrigin> {
        self.tests
            .iter()
            .filter(|origin| phase.map_or(true, |name| origin.phase == name))
            .filter(|origin| !enabled || origin.test.enabled)
            .cloned()
            .collect()
    }
}
