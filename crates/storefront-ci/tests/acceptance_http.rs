//! Acceptance suite against a local storefront served by axum.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::{Html, Redirect};
use axum::routing::get;
use axum::Router;
use storefront_ci::{AcceptanceSuite, HttpAcceptanceSuite, Scenario};

#[derive(Clone)]
struct Shop {
    title: &'static str,
    /// Home page requests served before products appear.
    products_after: usize,
    add_to_cart: bool,
    link_collections: bool,
    home_hits: Arc<AtomicUsize>,
}

impl Shop {
    fn healthy() -> Self {
        Self {
            title: "Hydrogen Demo Store",
            products_after: 0,
            add_to_cart: true,
            link_collections: true,
            home_hits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

async fn home(State(shop): State<Shop>) -> Html<String> {
    let hit = shop.home_hits.fetch_add(1, Ordering::SeqCst);
    let products = if hit >= shop.products_after {
        r#"<a href="/products/snowboard">Snowboard</a>
           <a class="card" href="/products/wax?variant=1">Wax</a>"#
    } else {
        "<p>Loading products</p>"
    };
    let collections = if shop.link_collections {
        r#"<a href="/collections/winter">Winter</a>"#
    } else {
        ""
    };
    Html(format!(
        "<html><head><title>{}</title></head><body><nav>{collections}</nav>{products}</body></html>",
        shop.title
    ))
}

async fn product(Path(handle): Path<String>, State(shop): State<Shop>) -> Html<String> {
    let form = if shop.add_to_cart {
        r#"<form method="post" action="/cart"><button type="submit">Add to cart</button></form>"#
    } else {
        "<p>Sold out</p>"
    };
    Html(format!(
        "<html><body><h1 class=\"title\"><span>{handle}</span></h1>{form}</body></html>"
    ))
}

async fn collection(Path(handle): Path<String>) -> Html<String> {
    Html(format!(
        r#"<html><body><h1>{handle}</h1><a href="/products/snowboard">Snowboard</a></body></html>"#
    ))
}

async fn collections_index() -> Redirect {
    Redirect::temporary("/collections/all")
}

async fn serve(shop: Shop) -> String {
    let app = Router::new()
        .route("/", get(home))
        .route("/products/:handle", get(product))
        .route("/collections", get(collections_index))
        .route("/collections/:handle", get(collection))
        .with_state(shop);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn suite(timeout: Duration) -> HttpAcceptanceSuite {
    HttpAcceptanceSuite::new("Hydrogen", timeout)
        .unwrap()
        .with_poll_interval(Duration::from_millis(20))
}

fn detail(report: &storefront_ci::SuiteReport, scenario: Scenario) -> Option<String> {
    report
        .scenarios
        .iter()
        .find(|s| s.scenario == scenario)
        .and_then(|s| s.detail.clone())
}

#[tokio::test]
async fn test_healthy_storefront_passes() {
    let base = serve(Shop::healthy()).await;
    let report = suite(Duration::from_secs(5)).run(&base).await;

    assert!(report.passed(), "{}", report.failure_summary());
    assert_eq!(report.scenarios.len(), 4);
    assert_eq!(report.base_url, base);
}

#[tokio::test]
async fn test_products_appearing_late_are_polled_for() {
    let shop = Shop {
        products_after: 3,
        ..Shop::healthy()
    };
    let hits = shop.home_hits.clone();
    let base = serve(shop).await;
    let report = suite(Duration::from_secs(5)).run(&base).await;

    assert!(report.passed(), "{}", report.failure_summary());
    assert!(hits.load(Ordering::SeqCst) >= 4);
}

#[tokio::test]
async fn test_wrong_title_fails_root_page_only() {
    let shop = Shop {
        title: "Some Other Shop",
        ..Shop::healthy()
    };
    let base = serve(shop).await;
    let report = suite(Duration::from_secs(5)).run(&base).await;

    assert!(!report.passed());
    let failed: Vec<Scenario> = report.failures().map(|s| s.scenario).collect();
    assert_eq!(failed, vec![Scenario::RootPage]);
    assert!(detail(&report, Scenario::RootPage)
        .unwrap()
        .contains("Some Other Shop"));
}

#[tokio::test]
async fn test_missing_add_to_cart_fails_product_detail() {
    let shop = Shop {
        add_to_cart: false,
        ..Shop::healthy()
    };
    let base = serve(shop).await;
    let report = suite(Duration::from_secs(5)).run(&base).await;

    let failed: Vec<Scenario> = report.failures().map(|s| s.scenario).collect();
    assert_eq!(failed, vec![Scenario::ProductDetail]);
    assert!(detail(&report, Scenario::ProductDetail)
        .unwrap()
        .contains("add-to-cart"));
}

#[tokio::test]
async fn test_empty_catalog_fails_listing_and_detail() {
    let shop = Shop {
        products_after: usize::MAX,
        link_collections: false,
        ..Shop::healthy()
    };
    let base = serve(shop).await;
    let report = suite(Duration::from_millis(500)).run(&base).await;

    let failed: Vec<Scenario> = report.failures().map(|s| s.scenario).collect();
    assert_eq!(
        failed,
        vec![Scenario::ProductListing, Scenario::ProductDetail]
    );
    assert!(detail(&report, Scenario::ProductListing)
        .unwrap()
        .contains("0 products"));
    assert!(detail(&report, Scenario::ProductDetail)
        .unwrap()
        .contains("no URL to follow"));
}

#[tokio::test]
async fn test_missing_page_is_reported_with_status() {
    let base = serve(Shop::healthy()).await;
    let report = suite(Duration::from_secs(5))
        .run(&format!("{base}missing/"))
        .await;

    assert!(!report.passed());
    assert!(detail(&report, Scenario::RootPage).unwrap().contains("404"));
}
