//! Integration tests for catalog construction and tool routing
//!
//! These tests build the catalog from fake providers and dispatch through a
//! real router, so collision handling and allow-lists are checked end to end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{FakeProvider, StubLocalTools};
use toolvisor::tools::{ArtifactStore, LocalToolExecutor};
use toolvisor::{Catalog, ToolCallRequest, ToolRouter};

fn router(catalog: Catalog, local: StubLocalTools, dir: &tempfile::TempDir) -> ToolRouter {
    ToolRouter::new(
        Arc::new(catalog),
        Arc::new(local),
        Arc::new(ArtifactStore::new(dir.path())),
        "session-1",
        "http://env.invalid",
        Duration::from_secs(5),
        16 * 1024,
    )
}

/// Catalog size is the sum of local and provider tools when names are unique
#[tokio::test]
async fn test_catalog_size_is_sum_of_sources() {
    let local = StubLocalTools::new(&["bash", "computer"]);
    let providers = vec![
        FakeProvider::new("shop", &["get_products", "get_orders", "refund"]).shared(),
        FakeProvider::new("docs", &["search_docs"]).shared(),
    ];

    let catalog = Catalog::build(&providers, local.descriptors(), None).await;

    assert_eq!(catalog.len(), 2 + 3 + 1);
    assert!(catalog.collisions().is_empty());
    assert!(catalog.unavailable_providers().is_empty());

    let sources: Vec<_> = catalog.descriptors().map(|d| d.source().to_string()).collect();
    assert_eq!(sources, vec!["local", "local", "shop", "shop", "shop", "docs"]);
}

/// The first registration of a name wins; later ones are never dispatchable
#[tokio::test]
async fn test_first_registered_wins() {
    let dir = tempfile::tempdir().unwrap();
    let local = StubLocalTools::new(&["bash"]);
    let providers = vec![
        FakeProvider::new("alpha", &["search", "bash"]).shared(),
        FakeProvider::new("beta", &["search", "summarize"]).shared(),
    ];

    let catalog = Catalog::build(&providers, local.descriptors(), None).await;

    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.collisions().len(), 2);
    assert_eq!(catalog.collisions()[0].kept_source, "local");
    assert_eq!(catalog.collisions()[0].dropped_source, "alpha");
    assert_eq!(catalog.collisions()[1].kept_source, "alpha");
    assert_eq!(catalog.collisions()[1].dropped_source, "beta");

    let router = router(catalog, local, &dir);

    let search = router
        .dispatch(&ToolCallRequest::new("c1", "search", json!({"tag": "q"})))
        .await;
    assert_eq!(search.payload, json!("alpha:search:q"));

    let bash = router
        .dispatch(&ToolCallRequest::new("c2", "bash", json!({})))
        .await;
    assert_eq!(bash.payload, json!("local:bash"));
}

/// A provider that fails discovery contributes nothing; the build still succeeds
#[tokio::test]
async fn test_partial_failure_build() {
    let providers = vec![
        FakeProvider::new("shop", &["get_products"]).shared(),
        FakeProvider::unreachable("flaky").shared(),
        FakeProvider::new("docs", &["search_docs"]).shared(),
    ];

    let catalog = Catalog::build(&providers, Vec::new(), None).await;

    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.unavailable_providers(), ["flaky".to_string()]);
    assert!(catalog.get("get_products").is_some());
    assert!(catalog.get("search_docs").is_some());
}

/// Allow-list keeps only the named tools; the rest report tool not found
#[tokio::test]
async fn test_allow_list_restricts_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let providers = vec![
        FakeProvider::new("a", &["get_products"]).shared(),
        FakeProvider::new("b", &["bash"]).shared(),
    ];
    let allow = vec!["bash".to_string()];

    let catalog = Catalog::build(&providers, Vec::new(), Some(&allow)).await;
    let names: Vec<_> = catalog.descriptors().map(|d| d.name.clone()).collect();
    assert_eq!(names, vec!["bash"]);

    let router = router(catalog, StubLocalTools::none(), &dir);
    let result = router
        .dispatch(&ToolCallRequest::new("c1", "get_products", json!({})))
        .await;

    assert!(result.is_error);
    assert_eq!(result.call_id, "c1");
    assert_eq!(result.as_model_text(), "tool not found: get_products");
}

/// A dispatch that exceeds the timeout becomes an error result, not a failure
#[tokio::test]
async fn test_dispatch_timeout_is_error_result() {
    let dir = tempfile::tempdir().unwrap();
    let providers = vec![FakeProvider::new("slow", &["crawl"])
        .with_delay("crawl", Duration::from_secs(10))
        .shared()];
    let catalog = Catalog::build(&providers, Vec::new(), None).await;

    let router = ToolRouter::new(
        Arc::new(catalog),
        Arc::new(StubLocalTools::none()),
        Arc::new(ArtifactStore::new(dir.path())),
        "session-1",
        "http://env.invalid",
        Duration::from_millis(50),
        1024,
    );

    let result = router
        .dispatch(&ToolCallRequest::new("c9", "crawl", json!({})))
        .await;
    assert!(result.is_error);
    assert_eq!(result.call_id, "c9");
    assert!(result.as_model_text().contains("timed out"));
}
