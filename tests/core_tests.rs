//! End-to-end wiring through the `Core` root: factory-built agents over
//! shared collaborators, plus teardown.

mod common;

use common::{text_response, MockProvider};
use sam::cache::engine::CacheEngine;
use sam::circuit_breaker::reset_circuit_breakers;
use sam::context::RequestContext;
use sam::core::{Core, CoreAgentBuilder};
use sam::db::engine::DatabaseEngine;
use sam::factory::AgentFactory;
use std::sync::Arc;

#[tokio::test]
async fn test_core_factory_end_to_end() {
    reset_circuit_breakers();

    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite:///{}", dir.path().join("core.db").to_string_lossy());
    let core = Core::build(DatabaseEngine::new(url), CacheEngine::new(None))
        .await
        .expect("core");

    let provider = MockProvider::new(vec![text_response("wired"), text_response("cached agent")]);
    let builder = CoreAgentBuilder::new(Arc::clone(&core), provider)
        .with_system_prompt("You are SAM.")
        .with_max_iterations(3);
    let factory = AgentFactory::new(Arc::new(builder));

    let ctx = RequestContext::new("alice");
    let agent = factory.get_agent(&ctx).await.expect("agent");
    let reply = agent.run("hello", "s1", &ctx, true).await.expect("run");
    assert_eq!(reply, "wired");

    // Same identity: cached agent, shared memory store.
    let again = factory.get_agent(&ctx).await.expect("agent");
    assert!(Arc::ptr_eq(&agent, &again));
    let history = core.memory().load_messages("s1").await.expect("history");
    assert_eq!(history.len(), 3);

    factory.clear_all().await;
    core.close().await;
}

#[tokio::test]
async fn test_core_registry_is_shared() {
    reset_circuit_breakers();

    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite:///{}", dir.path().join("core2.db").to_string_lossy());
    let core = Core::build(DatabaseEngine::new(url), CacheEngine::new(None))
        .await
        .expect("core");

    assert!(core.registry().is_empty());
    core.registry().register(common::EchoTool::named("echo"));
    assert!(core.registry().has_tool("echo"));
    assert_eq!(core.registry().tool_definitions().len(), 1);

    core.close().await;
}
