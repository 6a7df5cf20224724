//! Linear research -> write pipeline with a flaky external search.
//!
//! Demonstrates:
//! - Steps calling (mock) external collaborators
//! - Opting a single step into retries with backoff
//! - Inspecting the compiled topology

use meguri::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn search_internal_policy(query: &str) -> String {
    println!("Searching internal policies for: {}", query);
    "Policy 101: invest in AI companies with >20% growth.".to_string()
}

// Fails the first two calls, like an overloaded API.
fn search_web(query: &str, calls: &AtomicU32) -> Result<String, StepError> {
    println!("Searching the web for: {}", query);
    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
        return Err(StepError::failed("server busy"));
    }
    Ok("Market news: AI stocks are up 5% today.".to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let schema = ChannelSchema::builder()
        .overwrite("query", ValueType::String)
        .overwrite("internal_data", ValueType::String)
        .overwrite("external_data", ValueType::String)
        .overwrite("final_report", ValueType::String)
        .append("steps", ValueType::String)
        .build()?;

    let calls = Arc::new(AtomicU32::new(0));
    let research = from_fn(move |state: &State| {
        let query = state.get_as::<String>("query").unwrap_or_default();
        let internal = search_internal_policy(&query);
        let external = search_web(&query, &calls)?;
        Ok(Update::new()
            .set("internal_data", internal)
            .set("external_data", external)
            .set("steps", "research_complete"))
    })
    .with_retry(RetryPolicy::exponential(3, Duration::from_millis(200)));

    let write = from_fn(|state: &State| {
        let internal = state.get_as::<String>("internal_data").unwrap_or_default();
        let external = state.get_as::<String>("external_data").unwrap_or_default();
        let report = format!(
            "# Market Report\nBased on internal policy '{}' and external news '{}', \
             the recommendation is to BUY.",
            internal, external
        );
        Ok(Update::new()
            .set("final_report", report)
            .set("steps", "writing_complete"))
    });

    let graph = StateGraph::new(schema)
        .add_step("research", research)
        .add_step("write", write)
        .add_edge("research", "write")
        .add_edge("write", END)
        .set_entry("research")
        .compile()?;

    println!("{}", serde_json::to_string_pretty(&graph.topology())?);

    let initial = graph
        .schema()
        .state([("query", json!("Should we invest in NVIDIA?"))])?;
    let outcome = graph.run(initial, 1).await;

    if let Some((step, cause)) = outcome.status.error() {
        eprintln!("Step {} failed: {}", step, cause);
        return Ok(());
    }

    println!(
        "{}",
        outcome
            .state
            .get_as::<String>("final_report")
            .unwrap_or_default()
    );
    println!("Steps: {}", outcome.state.to_json()["steps"]);

    Ok(())
}
