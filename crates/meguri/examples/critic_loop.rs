//! Generator/critic loop with a conditional route back to the generator.
//!
//! Demonstrates:
//! - Append vs overwrite channels
//! - A critic step that only reads state (empty update)
//! - Routing on the post-merge state, bounded by the iteration cap

use async_trait::async_trait;
use meguri::prelude::*;

// Stand-in for a model call: quality grows with each revision.
#[derive(Debug)]
struct Generator;

#[async_trait]
impl Step for Generator {
    async fn execute(&self, state: &State) -> Result<Update, StepError> {
        let revision = state.get_as::<i64>("iterations").unwrap_or(0) + 1;
        let quality = (0.3 * revision as f64).min(1.0);
        println!("[generator] drafting revision {}", revision);

        Ok(Update::new()
            .set("messages", format!("Draft content v{}", revision))
            .set("quality", quality)
            .set("iterations", revision))
    }
}

#[derive(Debug)]
struct Critic;

#[async_trait]
impl Step for Critic {
    async fn execute(&self, state: &State) -> Result<Update, StepError> {
        let score = state.get_as::<f64>("quality").unwrap_or(0.0);
        println!("[critic] reviewing quality: {:.2}", score);
        Ok(Update::new())
    }
}

fn should_continue(state: &State) -> &'static str {
    if state.get_as::<f64>("quality").unwrap_or(0.0) > 0.8 {
        "end"
    } else {
        "generator"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let schema = ChannelSchema::builder()
        .append("messages", ValueType::String)
        .overwrite("quality", ValueType::Number)
        .overwrite("iterations", ValueType::Integer)
        .build()?;

    let graph = StateGraph::new(schema)
        .add_step("generator", Generator)
        .add_step("critic", Critic)
        .add_edge("generator", "critic")
        .add_conditional_edge(
            "critic",
            should_continue,
            [("end", END), ("generator", "generator".into())],
        )
        .set_entry("generator")
        .compile()?;

    let initial = graph.schema().default_state();
    let outcome = graph.run(initial, 5).await;

    match &outcome.status {
        RunStatus::Completed => println!("Graph finished on its own"),
        RunStatus::MaxIterationsReached => println!("Stopped by the iteration cap"),
        RunStatus::Error { step, cause } => eprintln!("Step {} failed: {}", step, cause),
        _ => eprintln!("Unexpected status: {:?}", outcome.status),
    }

    let trace: Vec<&str> = outcome.trace.iter().map(|s| s.as_str()).collect();
    println!("Trace: {}", trace.join(" -> "));
    if let Some(messages) = outcome.state.get_as::<Vec<String>>("messages") {
        println!("Final content: {}", messages.last().map_or("", String::as_str));
    }
    println!("Total iterations: {}", outcome.iterations);

    Ok(())
}
