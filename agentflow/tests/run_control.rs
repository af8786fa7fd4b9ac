//! Concurrency, cancellation and deadline behaviour of the coordinator.

use agentflow::agents::requirements::{self, ANALYZER, EXTRACTOR};
use agentflow::agents::PipelineOptions;
use agentflow::cancellation::CancellationToken;
use agentflow::config::AgentflowConfig;
use agentflow::errors::RunFailureKind;
use agentflow::events::{CollectingEventSink, PIPELINE_CANCELLED, STAGE_COMPLETED};
use agentflow::parser::JsonMap;
use agentflow::pipeline::Coordinator;
use agentflow::retry::RetryConfig;
use agentflow::stages::{StageAgent, StageInput};
use agentflow::testing::{
    assert_run_failed_at, assert_run_succeeded, assert_stage_completed, assert_stage_degraded, requirements_client,
    requirements_input, RecordingStage, ScriptedLlmClient, SlowStage,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn concurrent_runs_share_nothing_but_the_client() -> anyhow::Result<()> {
    let llm = Arc::new(requirements_client());
    let config = AgentflowConfig::default().with_retry(RetryConfig::immediate(1));
    let pipeline = Arc::new(requirements::pipeline(llm.clone(), &config)?);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .run(StageInput::from_text(format!("system should support login #{i}")))
                    .await
            })
        })
        .collect();

    let mut run_ids = Vec::new();
    for handle in handles {
        let run = handle.await?;
        assert_run_succeeded(&run);
        assert_eq!(run.stages.len(), 4);
        run_ids.push(run.run_id);
    }

    run_ids.sort();
    run_ids.dedup();
    assert_eq!(run_ids.len(), 8);
    assert_eq!(llm.call_count(), 32);
    Ok(())
}

#[tokio::test]
async fn bindings_pass_payloads_and_initial_keys() -> anyhow::Result<()> {
    let first = Arc::new(RecordingStage::new("first"));
    let second = Arc::new(RecordingStage::new("second"));
    let coordinator = Coordinator::builder("recording")
        .stage(first.clone(), &[])?
        .stage(second.clone(), &[("upstream", "first")])?
        .build()?;

    let run = coordinator.run(StageInput::new().with("topic", "rust")).await;

    assert_run_succeeded(&run);
    assert_eq!(first.execution_count(), 1);
    let seen = &second.inputs()[0];
    assert_eq!(seen.get("topic"), Some(&json!("rust")));
    assert_eq!(seen.get("upstream"), Some(&json!({"topic": "rust"})));
    Ok(())
}

#[tokio::test]
async fn degraded_custom_payload_still_feeds_the_next_stage() -> anyhow::Result<()> {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .respond("Summarise", "Sorry, nothing to report.")
            .respond("Review", r#"{"verdict": "ok"}"#),
    );
    let summarise: StageAgent<JsonMap> = StageAgent::builder("summarise", llm.clone())
        .template("Summarise {text}")
        .required_keys(["text"])
        .retry(RetryConfig::immediate(1))
        .build()?;
    let review: StageAgent<JsonMap> = StageAgent::builder("review", llm.clone())
        .template("Review {summary}")
        .required_keys(["summary"])
        .retry(RetryConfig::immediate(1))
        .build()?;
    let coordinator = Coordinator::builder("custom")
        .stage(Arc::new(summarise), &[])?
        .stage(Arc::new(review), &[("summary", "summarise")])?
        .build()?;

    let run = coordinator.run_text("quarterly notes").await;

    assert_run_succeeded(&run);
    assert_stage_degraded(&run, "summarise");
    assert_stage_completed(&run, "review");
    assert_eq!(run.payload("summarise").map(|p| p.to_value()), Some(json!({})));
    assert_eq!(llm.call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn cancellation_stops_the_run_and_drops_the_stage_in_flight() -> anyhow::Result<()> {
    let sink = Arc::new(CollectingEventSink::new());
    let llm = Arc::new(requirements_client().with_delay(Duration::from_millis(300)));
    let config = AgentflowConfig::default().with_retry(RetryConfig::immediate(1));
    let options = PipelineOptions::new().with_sink(sink.clone());
    let pipeline = Arc::new(requirements::pipeline_with(llm.clone(), &config, &options)?);
    let token = CancellationToken::new();

    let handle = {
        let pipeline = pipeline.clone();
        let token = token.clone();
        tokio::spawn(async move { pipeline.run_with_cancellation(requirements_input(), &token).await })
    };

    // Extractor finishes at ~300ms, analyzer is in flight at 450ms.
    tokio::time::sleep(Duration::from_millis(450)).await;
    token.cancel("client disconnected");

    let run = tokio::time::timeout(Duration::from_secs(5), handle).await??;

    assert!(run.is_cancelled());
    assert_run_failed_at(&run, ANALYZER);
    assert_eq!(run.error_message(), Some("client disconnected"));
    assert_eq!(run.stage_names(), vec![EXTRACTOR]);
    assert_eq!(sink.events_of_type(STAGE_COMPLETED).len(), 1);
    assert_eq!(sink.events_of_type(PIPELINE_CANCELLED).len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deadline_fails_the_run_at_the_stage_in_flight() -> anyhow::Result<()> {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .default_response(r#"{"functional_requirements": ["login"], "technical_feasibility": []}"#)
            .with_delay(Duration::from_millis(400)),
    );
    let config = AgentflowConfig::default()
        .with_retry(RetryConfig::immediate(1))
        .with_deadline_ms(1000);
    let pipeline = requirements::pipeline(llm, &config)?;

    let run = pipeline.run(requirements_input()).await;

    assert_eq!(run.error.as_ref().map(|e| e.kind), Some(RunFailureKind::DeadlineExceeded));
    assert_run_failed_at(&run, "checker");
    assert_eq!(run.stage_names(), vec![EXTRACTOR, ANALYZER]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_llm_calls_time_out_and_degrade() -> anyhow::Result<()> {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .default_response(r#"{"issues": []}"#)
            .with_delay(Duration::from_secs(10)),
    );
    let mut config = AgentflowConfig::default().with_retry(RetryConfig::immediate(2));
    config.llm.timeout_ms = 50;
    let pipeline = requirements::pipeline(llm.clone(), &config)?;

    let run = pipeline.run(requirements_input()).await;

    assert_run_succeeded(&run);
    assert_eq!(run.metrics.degraded_stages.len(), 4);
    assert_eq!(llm.call_count(), 8);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_stage_alone_is_not_a_failure() -> anyhow::Result<()> {
    let coordinator = Coordinator::builder("slow")
        .stage(
            Arc::new(SlowStage::new("wait", Duration::from_secs(5), JsonMap::new())),
            &[],
        )?
        .build()?;

    let run = coordinator.run(StageInput::from_text("x")).await;

    assert_run_succeeded(&run);
    assert_eq!(run.stage_names(), vec!["wait"]);
    Ok(())
}
