use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use storefront_core::{AcceptanceConfig, PipelineError, Result};
use tracing::{debug, info, warn};

use super::page;
use super::{AcceptanceSuite, Scenario, ScenarioResult, SuiteReport};

/// A fetched page after redirects.
struct Page {
    status: StatusCode,
    url: Url,
    body: String,
}

/// Acceptance suite that drives the storefront over plain HTTP and inspects
/// the server-rendered HTML.
pub struct HttpAcceptanceSuite {
    client: reqwest::Client,
    title_marker: String,
    scenario_timeout: Duration,
    poll_interval: Duration,
}

impl HttpAcceptanceSuite {
    pub fn new(title_marker: impl Into<String>, scenario_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("storefront-ci/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            title_marker: title_marker.into(),
            scenario_timeout,
            poll_interval: Duration::from_millis(500),
        })
    }

    pub fn from_config(config: &AcceptanceConfig) -> Result<Self> {
        Ok(Self::new(
            config.title_marker.clone(),
            Duration::from_secs(config.scenario_timeout_secs),
        )?
        .with_poll_interval(Duration::from_millis(config.poll_interval_ms)))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn fetch(&self, url: Url) -> Result<Page> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PipelineError::Http(format!("GET {url} failed: {e}")))?;
        let status = response.status();
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::Http(format!("reading {final_url} failed: {e}")))?;
        Ok(Page {
            status,
            url: final_url,
            body,
        })
    }

    async fn timed<F>(&self, scenario: Scenario, limit: Duration, check: F) -> ScenarioResult
    where
        F: Future<Output = Result<()>>,
    {
        let start = Instant::now();
        let outcome = tokio::time::timeout(limit, check).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let detail = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {}ms", limit.as_millis())),
        };

        match &detail {
            None => info!(scenario = scenario.name(), duration_ms, "Scenario passed"),
            Some(reason) => {
                warn!(scenario = scenario.name(), duration_ms, reason = %reason, "Scenario failed")
            }
        }

        ScenarioResult {
            scenario,
            passed: detail.is_none(),
            duration_ms,
            detail,
        }
    }

    async fn root_page(&self, base: &Url) -> Result<()> {
        let scenario = Scenario::RootPage;
        let page = self.fetch(base.clone()).await?;
        expect_ok(scenario, &page)?;
        let title = page::title(&page.body).ok_or_else(|| fail(scenario, "page has no <title>"))?;
        if !title.contains(&self.title_marker) {
            return Err(fail(
                scenario,
                format!("title '{}' does not contain '{}'", title, self.title_marker),
            ));
        }
        Ok(())
    }

    async fn product_listing(&self, base: &Url) -> Result<()> {
        let scenario = Scenario::ProductListing;
        let deadline = Instant::now() + self.scenario_timeout;
        loop {
            let page = self.fetch(base.clone()).await?;
            expect_ok(scenario, &page)?;
            let count = page::product_links(&page.body).len();
            if count > 0 {
                debug!(count, "Products listed");
                return Ok(());
            }
            if Instant::now() + self.poll_interval >= deadline {
                return Err(fail(scenario, "home page lists 0 products"));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn product_detail(&self, base: &Url) -> Result<()> {
        let scenario = Scenario::ProductDetail;
        let home = self.fetch(base.clone()).await?;
        expect_ok(scenario, &home)?;
        let href = page::product_links(&home.body)
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::MissingUrl {
                scenario: scenario.name().to_string(),
            })?;

        let detail = self.fetch(join(base, &href)?).await?;
        expect_ok(scenario, &detail)?;
        if page::heading(&detail.body).is_none() {
            return Err(fail(scenario, format!("{} has no product heading", detail.url)));
        }
        if !page::has_add_to_cart(&detail.body) {
            return Err(fail(scenario, format!("{} has no add-to-cart control", detail.url)));
        }
        Ok(())
    }

    async fn collection_listing(&self, base: &Url) -> Result<()> {
        let scenario = Scenario::CollectionListing;
        let home = self.fetch(base.clone()).await?;
        expect_ok(scenario, &home)?;

        match page::collection_links(&home.body).into_iter().next() {
            Some(href) => {
                let collection = self.fetch(join(base, &href)?).await?;
                expect_ok(scenario, &collection)?;
                if page::product_links(&collection.body).is_empty() {
                    return Err(fail(
                        scenario,
                        format!("{} shows no product grid", collection.url),
                    ));
                }
            }
            None => {
                debug!("No collection link on home page, opening /collections");
                let index = self.fetch(join(base, "/collections")?).await?;
                expect_ok(scenario, &index)?;
                if !page::is_collections_path(index.url.path()) {
                    return Err(fail(
                        scenario,
                        format!("expected a /collections URL, landed on {}", index.url),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AcceptanceSuite for HttpAcceptanceSuite {
    async fn run(&self, base_url: &str) -> SuiteReport {
        info!(base_url = %base_url, "Running acceptance suite");

        let base = match Url::parse(base_url) {
            Ok(url) => url,
            Err(e) => {
                let detail = format!("invalid base URL '{base_url}': {e}");
                return SuiteReport {
                    base_url: base_url.to_string(),
                    scenarios: Scenario::ALL
                        .iter()
                        .map(|s| ScenarioResult {
                            scenario: *s,
                            passed: false,
                            duration_ms: 0,
                            detail: Some(detail.clone()),
                        })
                        .collect(),
                };
            }
        };

        let limit = self.scenario_timeout;
        let mut scenarios = Vec::with_capacity(Scenario::ALL.len());
        for scenario in Scenario::ALL {
            let result = match scenario {
                Scenario::RootPage => self.timed(scenario, limit, self.root_page(&base)).await,
                // Polling gives up on its own at `limit`; the hard stop only
                // catches a request that hangs.
                Scenario::ProductListing => {
                    self.timed(scenario, limit * 2, self.product_listing(&base))
                        .await
                }
                Scenario::ProductDetail => {
                    self.timed(scenario, limit, self.product_detail(&base)).await
                }
                Scenario::CollectionListing => {
                    self.timed(scenario, limit, self.collection_listing(&base))
                        .await
                }
            };
            scenarios.push(result);
        }

        SuiteReport {
            base_url: base_url.to_string(),
            scenarios,
        }
    }
}

fn fail(scenario: Scenario, detail: impl Into<String>) -> PipelineError {
    PipelineError::Acceptance {
        scenario: scenario.name().to_string(),
        detail: detail.into(),
    }
}

fn expect_ok(scenario: Scenario, page: &Page) -> Result<()> {
    if page.status != StatusCode::OK {
        return Err(fail(
            scenario,
            format!("{} returned {}", page.url, page.status.as_u16()),
        ));
    }
    Ok(())
}

fn join(base: &Url, href: &str) -> Result<Url> {
    base.join(href)
        .map_err(|e| PipelineError::Http(format!("cannot resolve '{href}' against {base}: {e}")))
}
