//! Execution Planning Tests
//!
//! Loading a tab's script through the storage manager and suppressing
//! duplicate automatic runs.

mod common;

use common::{TestStores, record};
use runjs_store::config::ExecutionConfig;
use runjs_store::{ExecutionTracker, ScriptRecord, plan_execution, plan_manual_execution};

#[tokio::test]
async fn test_plan_for_enabled_script() {
    let stores = TestStores::new();
    let script = ScriptRecord::new("document.title = 'x';", true, "jquery_3_3_1");
    assert!(stores.manager.save_script("example.com", &script).await);

    let tracker = ExecutionTracker::default();
    let plan = plan_execution(&stores.manager, &tracker, 7, "https://example.com:443/page?q=1")
        .await
        .expect("script should run");

    assert_eq!(plan.domain, "example.com");
    assert_eq!(plan.library, "jquery_3_3_1");
    assert_eq!(plan.code, "document.title = 'x';");
}

#[tokio::test]
async fn test_repeat_automatic_run_is_suppressed() {
    let stores = TestStores::new();
    assert!(stores.manager.save_script("example.com", &record("run()")).await);

    let tracker = ExecutionTracker::new(&ExecutionConfig::default());
    let url = "https://example.com/";

    assert!(plan_execution(&stores.manager, &tracker, 1, url).await.is_some());
    assert!(plan_execution(&stores.manager, &tracker, 1, url).await.is_none());

    // Another tab, or a manual run, is unaffected
    assert!(plan_execution(&stores.manager, &tracker, 2, url).await.is_some());
    assert!(plan_manual_execution(&stores.manager, url).await.is_some());
}

#[tokio::test]
async fn test_edited_script_runs_again() {
    let stores = TestStores::new();
    let tracker = ExecutionTracker::default();
    let url = "https://example.com/";

    assert!(stores.manager.save_script("example.com", &record("v1()")).await);
    assert!(plan_execution(&stores.manager, &tracker, 1, url).await.is_some());

    assert!(stores.manager.save_script("example.com", &record("v2()")).await);
    let plan = plan_execution(&stores.manager, &tracker, 1, url).await;
    assert_eq!(plan.map(|p| p.code).as_deref(), Some("v2()"));
}

#[tokio::test]
async fn test_nothing_to_run() {
    let stores = TestStores::new();
    let tracker = ExecutionTracker::default();

    // No script saved
    assert!(plan_execution(&stores.manager, &tracker, 1, "https://empty.com").await.is_none());

    // Disabled script
    assert!(
        stores
            .manager
            .save_script("off.com", &ScriptRecord::new("x()", false, ""))
            .await
    );
    assert!(plan_manual_execution(&stores.manager, "https://off.com").await.is_none());

    // No host
    assert!(plan_manual_execution(&stores.manager, "/settings").await.is_none());
    assert!(tracker.is_empty());
}
