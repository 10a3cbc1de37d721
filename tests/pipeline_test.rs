//! End-to-end pipeline behaviour with deterministic collaborators.

mod common;

use callsmith::embedding::HashingEmbedder;
use callsmith::pipeline::{
    CallOutcome, Orchestrator, PipelineSettings, Stage, TraceStatus, NO_MATCH_SUMMARY,
};
use callsmith::spec::HttpMethod;
use callsmith::{EndpointIndex, PipelineError};
use common::{
    client_engagement_index, empty_index, RecordingTransport, ScriptedGenerator, SleepingEmbedder,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const BASE_URL: &str = "http://engagements.test";

fn orchestrator(
    index: EndpointIndex,
    generator: Arc<ScriptedGenerator>,
    transport: Arc<RecordingTransport>,
    settings: PipelineSettings,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(index),
        Arc::new(HashingEmbedder::default()),
        generator,
        transport,
        BASE_URL,
        settings,
    )
}

fn list_engagements_reply() -> String {
    r#"Here is the call:
```json
{"endpoint": "/client-engagements", "method": "GET", "parameters": {}, "description": "List all client engagements."}
```"#
        .to_string()
}

#[tokio::test]
async fn test_empty_index_never_generates_or_calls_api() {
    let generator = Arc::new(ScriptedGenerator::new([list_engagements_reply()]));
    let transport = Arc::new(RecordingTransport::new(200, json!([])));
    let orch = orchestrator(
        empty_index(),
        generator.clone(),
        transport.clone(),
        PipelineSettings::default(),
    );

    let trace = orch.handle_query("list all active clients").await;

    assert!(trace.is_done());
    assert!(trace.retrieval.is_empty());
    assert!(trace.descriptor.is_none());
    assert!(trace.outcome.is_none());
    assert_eq!(trace.summary, NO_MATCH_SUMMARY);
    assert_eq!(generator.call_count(), 0);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_slow_generator_fails_synthesis_with_timeout() {
    let generator = Arc::new(
        ScriptedGenerator::new([list_engagements_reply()]).with_delay(Duration::from_millis(500)),
    );
    let transport = Arc::new(RecordingTransport::new(200, json!([])));
    let orch = orchestrator(
        client_engagement_index(),
        generator.clone(),
        transport.clone(),
        PipelineSettings {
            generation_timeout: Duration::from_millis(50),
            ..PipelineSettings::default()
        },
    );

    let trace = orch.handle_query("list all active clients").await;

    assert_eq!(
        trace.status,
        TraceStatus::Failed {
            stage: Stage::Synthesizing,
            error: PipelineError::Timeout,
        }
    );
    assert!(!trace.retrieval.is_empty());
    assert!(trace.descriptor.is_none());
    assert!(trace.outcome.is_none());
    assert_eq!(generator.call_count(), 1);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_slow_embedder_fails_retrieval_with_timeout() {
    let embedder = Arc::new(SleepingEmbedder::new(Duration::from_millis(300)));
    let generator = Arc::new(ScriptedGenerator::new([list_engagements_reply()]));
    let transport = Arc::new(RecordingTransport::new(200, json!([])));
    let orch = Orchestrator::new(
        Arc::new(client_engagement_index()),
        embedder.clone(),
        generator.clone(),
        transport.clone(),
        BASE_URL,
        PipelineSettings {
            embedding_timeout: Duration::from_millis(50),
            ..PipelineSettings::default()
        },
    );

    let trace = orch.handle_query("list all active clients").await;

    assert_eq!(
        trace.status,
        TraceStatus::Failed {
            stage: Stage::Retrieving,
            error: PipelineError::Timeout,
        }
    );
    assert!(trace.retrieval.is_empty());
    assert!(trace.descriptor.is_none());
    assert_eq!(generator.call_count(), 0);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_list_active_clients_end_to_end() {
    let generator = Arc::new(ScriptedGenerator::new([
        list_engagements_reply(),
        "There are two active clients: Acme and Globex.".to_string(),
    ]));
    let transport = Arc::new(RecordingTransport::new(
        200,
        json!([
            { "client_id": 1, "client_name": "Acme", "status": "active" },
            { "client_id": 2, "client_name": "Globex", "status": "active" }
        ]),
    ));
    let orch = orchestrator(
        client_engagement_index(),
        generator.clone(),
        transport.clone(),
        PipelineSettings::default(),
    );

    let trace = orch.handle_query("list all active clients").await;

    assert!(trace.is_done(), "unexpected status: {:?}", trace.status);
    assert_eq!(trace.retrieval[0].entry.record.path, "/client-engagements");
    assert_eq!(trace.retrieval[0].entry.record.method, HttpMethod::Get);

    let descriptor = trace.descriptor.as_ref().unwrap();
    assert_eq!(descriptor.endpoint.as_deref(), Some("/client-engagements"));
    assert_eq!(descriptor.method, Some(HttpMethod::Get));

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "http://engagements.test/client-engagements");
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert!(requests[0].body.is_none());

    match trace.outcome.as_ref().unwrap() {
        CallOutcome::Success { status_code, body } => {
            assert_eq!(*status_code, 200);
            assert_eq!(body[0]["client_name"], "Acme");
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(trace.summary, "There are two active clients: Acme and Globex.");
    assert_eq!(generator.call_count(), 2);

    // The synthesis prompt only offers retrieved candidates.
    let prompts = generator.prompts.lock().unwrap();
    assert!(prompts[0].contains("GET /client-engagements"));
}

#[tokio::test]
async fn test_path_parameter_is_substituted() {
    let generator = Arc::new(ScriptedGenerator::new([
        r#"{"endpoint": "/client-engagements/{client_id}", "method": "GET", "parameters": {"client_id": 7}, "description": "Fetch client 7."}"#.to_string(),
        "Client 7 is Acme.".to_string(),
    ]));
    let transport = Arc::new(RecordingTransport::new(200, json!({ "client_id": 7 })));
    let orch = orchestrator(
        client_engagement_index(),
        generator,
        transport.clone(),
        PipelineSettings {
            top_k: 4,
            ..PipelineSettings::default()
        },
    );

    let trace = orch
        .handle_query("retrieve the client engagement record with ID 7")
        .await;

    assert!(trace.is_done());
    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests[0].url, "http://engagements.test/client-engagements/7");
    assert!(requests[0].query.is_empty());
}

#[tokio::test]
async fn test_target_api_error_is_done_with_failure_summary() {
    let generator = Arc::new(ScriptedGenerator::new([list_engagements_reply()]));
    let transport = Arc::new(RecordingTransport::new(
        500,
        json!({ "detail": "database unavailable" }),
    ));
    let orch = orchestrator(
        client_engagement_index(),
        generator.clone(),
        transport,
        PipelineSettings::default(),
    );

    let trace = orch.handle_query("list all active clients").await;

    assert!(trace.is_done());
    match trace.outcome.as_ref().unwrap() {
        CallOutcome::Failure { reason } => {
            assert!(reason.contains("500"));
            assert!(reason.contains("database unavailable"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(trace.summary.starts_with("The API request failed: HTTP 500"));
    // Failures are summarized from the template, not by the model.
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn test_unrelated_query_below_threshold_is_no_match() {
    let generator = Arc::new(ScriptedGenerator::new([list_engagements_reply()]));
    let transport = Arc::new(RecordingTransport::new(200, json!([])));
    let orch = orchestrator(
        client_engagement_index(),
        generator.clone(),
        transport.clone(),
        PipelineSettings {
            score_threshold: Some(0.5),
            ..PipelineSettings::default()
        },
    );

    let trace = orch.handle_query("what's the weather").await;

    assert!(trace.is_done());
    assert!(trace.retrieval.is_empty());
    assert_eq!(trace.summary, NO_MATCH_SUMMARY);
    assert_eq!(generator.call_count(), 0);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_null_sentinel_is_done_without_call() {
    let generator = Arc::new(ScriptedGenerator::new([
        r#"```json
{"endpoint": null, "method": null, "parameters": {}, "description": "No relevant endpoint found."}
```"#,
    ]));
    let transport = Arc::new(RecordingTransport::new(200, json!([])));
    let orch = orchestrator(
        client_engagement_index(),
        generator,
        transport.clone(),
        PipelineSettings::default(),
    );

    let trace = orch.handle_query("list all active clients").await;

    assert!(trace.is_done());
    assert!(trace.descriptor.as_ref().unwrap().is_no_match());
    assert!(trace.outcome.is_none());
    assert_eq!(trace.summary, NO_MATCH_SUMMARY);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_invented_endpoint_fails_synthesis() {
    let generator = Arc::new(ScriptedGenerator::new([
        r#"{"endpoint": "/admin/users", "method": "GET", "parameters": {}}"#,
    ]));
    let transport = Arc::new(RecordingTransport::new(200, json!([])));
    let orch = orchestrator(
        client_engagement_index(),
        generator,
        transport.clone(),
        PipelineSettings::default(),
    );

    let trace = orch.handle_query("list all active clients").await;

    assert_eq!(trace.failed_stage(), Some(Stage::Synthesizing));
    assert!(matches!(
        trace.status,
        TraceStatus::Failed {
            error: PipelineError::SynthesisInvalid(_),
            ..
        }
    ));
    assert!(trace.descriptor.is_none());
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_garbled_output_fails_synthesis() {
    let generator = Arc::new(ScriptedGenerator::new([
        "I think you want the engagements endpoint, probably.",
    ]));
    let transport = Arc::new(RecordingTransport::new(200, json!([])));
    let orch = orchestrator(
        client_engagement_index(),
        generator,
        transport.clone(),
        PipelineSettings::default(),
    );

    let trace = orch.handle_query("list all active clients").await;

    assert!(matches!(
        trace.status,
        TraceStatus::Failed {
            stage: Stage::Synthesizing,
            error: PipelineError::SynthesisParseError(_),
        }
    ));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_generator_unavailable_fails_synthesis() {
    let generator = Arc::new(ScriptedGenerator::with_results([Err(
        PipelineError::GenerationUnavailable("connection refused".into()),
    )]));
    let transport = Arc::new(RecordingTransport::new(200, json!([])));
    let orch = orchestrator(
        client_engagement_index(),
        generator,
        transport,
        PipelineSettings::default(),
    );

    let trace = orch.handle_query("list all active clients").await;

    assert!(matches!(
        trace.status,
        TraceStatus::Failed {
            stage: Stage::Synthesizing,
            error: PipelineError::GenerationUnavailable(_),
        }
    ));
}

#[tokio::test]
async fn test_summary_generation_failure_falls_back() {
    let generator = Arc::new(ScriptedGenerator::with_results([
        Ok(list_engagements_reply()),
        Err(PipelineError::GenerationUnavailable("model unloaded".into())),
    ]));
    let transport = Arc::new(RecordingTransport::new(200, json!([{ "client_name": "Acme" }])));
    let orch = orchestrator(
        client_engagement_index(),
        generator,
        transport,
        PipelineSettings {
            generation_timeout: Duration::from_secs(1),
            ..PipelineSettings::default()
        },
    );

    let trace = orch.handle_query("list all active clients").await;

    assert!(trace.is_done());
    assert_eq!(
        trace.summary,
        "The request succeeded (HTTP 200), but a summary could not be generated. See the raw data for details."
    );
}

#[tokio::test]
async fn test_trace_serializes_for_http_surface() {
    let generator = Arc::new(ScriptedGenerator::new(["not json"]));
    let transport = Arc::new(RecordingTransport::new(200, json!([])));
    let orch = orchestrator(
        client_engagement_index(),
        generator,
        transport,
        PipelineSettings::default(),
    );

    let trace = orch.handle_query("list all active clients").await;
    let value = serde_json::to_value(&trace).unwrap();

    assert_eq!(value["query"], "list all active clients");
    assert_eq!(value["status"]["state"], "failed");
    assert_eq!(value["status"]["stage"], "synthesizing");
    assert_eq!(value["status"]["error"]["kind"], "SynthesisParseError");
    assert!(value["retrieval"].as_array().unwrap().len() <= 3);
    assert!(value["trace_id"].is_string());
}
