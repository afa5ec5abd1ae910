//! Streaming generation and cancellation

mod support;

use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use siumai_dsp::prelude::*;
use support::mock_service::{MockService, Reply, input, text_chunks};

async fn collect(
    generator: &Generator,
    service: &MockService,
    options: ForwardOptions,
    values: serde_json::Value,
) -> Vec<Result<ForwardEvent, LlmError>> {
    generator
        .streaming_forward(service, input(values), options)
        .collect()
        .await
}

#[tokio::test]
async fn text_answers_stream_as_deltas() {
    let generator = Generator::new(Signature::parse("question -> answer, score:number").unwrap());
    let service = MockService::new(
        ServiceCapabilities::text_only().with_streaming(true),
        [Reply::Chunks(text_chunks(&["Answer: Pa", "ris\nScore: 4", "2"]))],
    );

    let events = collect(&generator, &service, ForwardOptions::new(), json!({"question": "?"})).await;

    let events: Vec<ForwardEvent> = events.into_iter().map(Result::unwrap).collect();
    assert!(matches!(events.last(), Some(ForwardEvent::Done(_))));
    let deltas: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ForwardEvent::Delta { version, delta } => Some((*version, delta.clone())),
            ForwardEvent::Done(_) => None,
        })
        .collect();
    assert_eq!(deltas[0], (1, input(json!({"answer": "Pa"}))));
    assert!(deltas.iter().all(|(v, _)| *v == 1));
    assert!(deltas.iter().any(|(_, d)| d.get("answer") == Some(&json!("ris"))));

    let mut acc = DeltaAccumulator::new();
    for event in &events[..events.len() - 1] {
        acc.apply(event);
    }
    assert_eq!(acc.values(), &input(json!({"answer": "Paris", "score": 42})));
    acc.apply(events.last().unwrap());
    assert!(acc.is_done());
    assert_eq!(acc.values(), &input(json!({"answer": "Paris", "score": 42})));
    assert!(service.requests()[0].stream);
}

#[tokio::test]
async fn retries_start_a_new_version() {
    let generator = Generator::new(Signature::parse("question -> answer, score:number").unwrap());
    let service = MockService::new(
        ServiceCapabilities::text_only(),
        [
            Reply::Chunks(text_chunks(&["Answer: first\n", "Score: many"])),
            Reply::Chunks(text_chunks(&["Answer: second\n", "Score: 2"])),
        ],
    );

    let events = collect(&generator, &service, ForwardOptions::new(), json!({"question": "?"})).await;

    let events: Vec<ForwardEvent> = events.into_iter().map(Result::unwrap).collect();
    let versions: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            ForwardEvent::Delta { version, .. } => Some(*version),
            ForwardEvent::Done(_) => None,
        })
        .collect();
    assert_eq!(versions.first(), Some(&1));
    assert_eq!(versions.last(), Some(&2));

    let mut acc = DeltaAccumulator::new();
    for event in &events {
        acc.apply(event);
    }
    assert_eq!(acc.version(), Some(2));
    match events.last() {
        Some(ForwardEvent::Done(result)) => {
            assert_eq!(result.retries, 1);
            assert_eq!(result.output, input(json!({"answer": "second", "score": 2})));
        }
        other => panic!("expected done, got {other:?}"),
    }
}

#[tokio::test]
async fn json_answers_stream_from_partial_objects() {
    let sig = Signature::builder()
        .input(Field::string("question"))
        .output(Field::object("items", vec![Field::string("name")]).array())
        .build()
        .unwrap();
    let generator = Generator::new(sig);
    let service = MockService::new(
        ServiceCapabilities::text_only(),
        [Reply::Chunks(text_chunks(&[
            r#"{"items": [{"name": "ap"#,
            r#"ple"}, {"name": "pear"}"#,
            "]}",
        ]))],
    );

    let events = collect(&generator, &service, ForwardOptions::new(), json!({"question": "?"})).await;

    let events: Vec<ForwardEvent> = events.into_iter().map(Result::unwrap).collect();
    assert!(events.len() >= 2);
    let mut acc = DeltaAccumulator::new();
    for event in &events[..events.len() - 1] {
        acc.apply(event);
    }
    let expected = input(json!({"items": [{"name": "apple"}, {"name": "pear"}]}));
    assert_eq!(acc.values(), &expected);
    match events.last() {
        Some(ForwardEvent::Done(result)) => assert_eq!(result.output, expected),
        other => panic!("expected done, got {other:?}"),
    }
}

#[tokio::test]
async fn errors_end_the_stream() {
    let generator = Generator::builder(Signature::parse("q -> n:number").unwrap())
        .options(GeneratorOptions::default().with_max_retries(0))
        .build()
        .unwrap();
    let service = MockService::new(
        ServiceCapabilities::text_only(),
        [Reply::Chunks(text_chunks(&["N: none"]))],
    );

    let events = collect(&generator, &service, ForwardOptions::new(), json!({"q": "?"})).await;

    assert!(matches!(
        events.last(),
        Some(Err(LlmError::RetryBudgetExhausted { .. }))
    ));
}

#[tokio::test]
async fn cancelling_a_pending_call_aborts() {
    let generator = Generator::new(Signature::parse("q -> a").unwrap());
    let service = MockService::new(ServiceCapabilities::text_only(), [Reply::Hang]);
    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel_with_reason("user left");
    });

    let err = generator
        .forward(&service, input(json!({"q": "?"})), ForwardOptions::new().with_cancel(cancel))
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::Aborted(ref reason) if reason == "user left"));
}

#[tokio::test]
async fn cancelling_a_pending_stream_aborts() {
    let generator = Generator::new(Signature::parse("q -> a").unwrap());
    let service = MockService::new(ServiceCapabilities::text_only(), [Reply::Hang]);
    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let events = collect(
        &generator,
        &service,
        ForwardOptions::new().with_cancel(cancel),
        json!({"q": "?"}),
    )
    .await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Err(LlmError::Aborted(_))));
}

#[tokio::test]
async fn cancelled_before_start_makes_no_calls() {
    let generator = Generator::new(Signature::parse("q -> a").unwrap());
    let service = MockService::texts(["A: x"]);
    let cancel = CancelHandle::new();
    cancel.cancel();

    let err = generator
        .forward(&service, input(json!({"q": "?"})), ForwardOptions::new().with_cancel(cancel))
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::Aborted(_)));
    assert_eq!(service.call_count(), 0);
}
