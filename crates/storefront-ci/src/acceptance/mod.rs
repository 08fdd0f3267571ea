//! Browser-level acceptance checks against a deployed storefront.
//!
//! Every scenario runs, each bounded by its own timeout; the suite passes
//! only when all of them pass.

mod http;
pub mod page;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpAcceptanceSuite;

/// The scenarios, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Root page answers 200 with the expected title.
    RootPage,
    /// Home page lists at least one product.
    ProductListing,
    /// First listed product opens a detail page with an add-to-cart control.
    ProductDetail,
    /// A collection page shows a product grid.
    CollectionListing,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::RootPage,
        Scenario::ProductListing,
        Scenario::ProductDetail,
        Scenario::CollectionListing,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::RootPage => "root_page",
            Scenario::ProductListing => "product_listing",
            Scenario::ProductDetail => "product_detail",
            Scenario::CollectionListing => "collection_listing",
        }
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub passed: bool,
    pub duration_ms: u64,
    /// Failure reason.
    pub detail: Option<String>,
}

/// Outcome of a full suite run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuiteReport {
    pub base_url: String,
    pub scenarios: Vec<ScenarioResult>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        !self.scenarios.is_empty() && self.scenarios.iter().all(|s| s.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioResult> {
        self.scenarios.iter().filter(|s| !s.passed)
    }

    /// One line per failed scenario.
    pub fn failure_summary(&self) -> String {
        self.failures()
            .map(|s| {
                format!(
                    "{}: {}",
                    s.scenario.name(),
                    s.detail.as_deref().unwrap_or("failed")
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Runs the acceptance scenarios against a base URL.
#[async_trait]
pub trait AcceptanceSuite: Send + Sync {
    async fn run(&self, base_url: &str) -> SuiteReport;
}
