//! Routing Demo - Availability Checks and Fallback
//!
//! Starts two local mock upstreams: an OpenAI-compatible one whose health
//! endpoint fails and a text endpoint that answers. Requests for the OpenAI
//! provider fall back to the text provider, and a streamed request shows
//! incremental chunks.
//!
//! Run with: cargo run --example routing_demo

use futures::StreamExt;
use parley_core::config::ParleyConfig;
use parley_core::ChatTurn;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_upstreams() -> (MockServer, MockServer) {
    let openai = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&openai)
        .await;

    let text = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/text/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"text": "Hello from the fallback provider"})),
        )
        .mount(&text)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/text/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(concat!(
                    "data: {\"text\":\"Streaming \"}\n\n",
                    ": keepalive\n",
                    "data: {\"text\":\"works\"}\n\n",
                    "data: [DONE]\n\n",
                )),
        )
        .mount(&text)
        .await;

    (openai, text)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "parley_core=info".into()))
        .init();

    let (openai, text) = mock_upstreams().await;
    let yaml = format!(
        r#"
version: "0.1"
providers:
  - {{ id: openai, label: OpenAI, kind: openai_compat, base_url: "{}", api_key: sk-demo }}
  - {{ id: local, label: Local, kind: text, base_url: "{}" }}
routing:
  timeout_ms: 5000
  probe_timeout_ms: 1000
"#,
        openai.uri(),
        text.uri()
    );
    let config: ParleyConfig = serde_yaml::from_str(&yaml)?;
    let router = config.build_router()?;

    println!("Registered providers:");
    for descriptor in router.registry().list() {
        println!("  {} ({})", descriptor.id, descriptor.label);
    }

    let options = config
        .send_options("openai")
        .on_unavailable(|id| println!("! {} is unavailable", id))
        .on_fallback(|from, to| println!("! falling back from {} to {}", from, to));

    let reply = router
        .send("openai", &ChatTurn::fresh("Say hello"), &options)
        .await?;
    println!(
        "\nReply from {:?} (requested {:?}): {}",
        reply.provider_id, reply.fallback_from_provider_id, reply.content
    );

    let routed = router
        .stream("openai", &ChatTurn::fresh("Stream something"), &options)
        .await?;
    print!("\nStream from {}: ", routed.provider_id);
    let mut chunks = routed.chunks;
    while let Some(chunk) = chunks.next().await {
        print!("{}", chunk?.delta);
    }
    println!();

    Ok(())
}
