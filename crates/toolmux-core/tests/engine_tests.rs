//! Conversation engine integration tests
//!
//! Providers run in-process; the model is a scripted backend.

mod common;

use std::sync::Arc;

use serde_json::{Value, json};

use toolmux_core::{
    ConversationEngine, Error, FALLBACK_MESSAGE, InProcessLauncher, Message, ModelError,
    ModelErrorKind, ModelParams, NO_DESCRIPTION, NoopAudit, ProviderConfig, Role, SessionRegistry,
};

use common::{
    EventLog, FakeProvider, ScriptedBackend, alpha_beta, end_turn, stopped, tool_results, tool_use,
};

fn params() -> ModelParams {
    ModelParams {
        model: "claude-test".to_string(),
        max_tokens: 1024,
        temperature: 0.0,
    }
}

async fn connected_registry(log: &EventLog) -> Arc<SessionRegistry> {
    let registry = Arc::new(SessionRegistry::new(Arc::new(alpha_beta(log))));
    let results = registry
        .connect_all(&[
            ProviderConfig::new("alpha", "unused"),
            ProviderConfig::new("beta", "unused"),
        ])
        .await;
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    registry
}

fn engine(backend: &Arc<ScriptedBackend>, registry: Arc<SessionRegistry>) -> ConversationEngine {
    ConversationEngine::new(backend.clone(), registry, Arc::new(NoopAudit), params())
}

fn error_payload(content: &str) -> Value {
    serde_json::from_str(content).expect("error payload should be JSON")
}

mod tool_loop_tests {
    use super::*;

    #[tokio::test]
    async fn test_two_providers_in_sequence() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(
            log.clone(),
            vec![
                Ok(tool_use(&[("t1", "alpha__search", json!({"q": "hotels"}))])),
                Ok(tool_use(&[("t2", "beta__book", json!({"q": "hotel-1"}))])),
                Ok(end_turn("Booked hotel-1.")),
            ],
        ));
        let mut engine = engine(&backend, registry);

        let reply = engine.chat("Find and book a hotel").await.unwrap();

        assert_eq!(reply, "Booked hotel-1.");
        assert_eq!(
            log.events(),
            vec!["model", "alpha:search", "model", "beta:book", "model"]
        );

        let history = engine.history();
        assert_eq!(history.len(), 6);
        assert_eq!(history[0], Message::user("Find and book a hotel"));
        assert_eq!(history[5], Message::assistant("Booked hotel-1."));

        let first = tool_results(&history[2]);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].0, "t1");
        assert_eq!(first[0].1, r#"alpha.search -> {"q":"hotels"}"#);
        assert!(!first[0].2);

        let second = tool_results(&history[4]);
        assert_eq!(second[0].0, "t2");
        assert!(second[0].1.starts_with("beta.book"));

        // The second model call already saw alpha's result
        let seen = backend.seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].messages.len(), 3);
        assert_eq!(seen[2].messages.len(), 5);
    }

    #[tokio::test]
    async fn test_one_result_per_request_in_order() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(
            log.clone(),
            vec![
                Ok(tool_use(&[
                    ("a", "beta__book", json!({})),
                    ("b", "alpha__search", json!({"q": "1"})),
                    ("c", "alpha__search", json!({"q": "2"})),
                ])),
                Ok(end_turn("done")),
            ],
        ));
        let mut engine = engine(&backend, registry);

        engine.chat("go").await.unwrap();

        assert_eq!(
            log.events(),
            vec!["model", "beta:book", "alpha:search", "alpha:search", "model"]
        );

        let results = tool_results(&engine.history()[2]);
        let ids: Vec<&str> = results.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results[1].1.ends_with(r#"{"q":"1"}"#));
        assert!(results[2].1.ends_with(r#"{"q":"2"}"#));
    }

    #[tokio::test]
    async fn test_malformed_name_is_fed_back_to_model() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(
            log.clone(),
            vec![Ok(tool_use(&[("t1", "ggg", json!({}))])), Ok(end_turn("Sorry about that."))],
        ));
        let mut engine = engine(&backend, registry);

        let reply = engine.chat("try it").await.unwrap();
        assert_eq!(reply, "Sorry about that.");
        // No provider was called
        assert_eq!(log.events(), vec!["model", "model"]);

        let results = tool_results(&engine.history()[2]);
        assert_eq!(results.len(), 1);
        assert!(results[0].2);
        assert_eq!(
            error_payload(&results[0].1),
            json!({"error": "Invalid tool name format: ggg"})
        );
    }

    #[tokio::test]
    async fn test_unknown_provider_is_fed_back_to_model() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(
            log.clone(),
            vec![Ok(tool_use(&[("t1", "gamma__x", json!({}))])), Ok(end_turn("ok"))],
        ));
        let mut engine = engine(&backend, registry);

        engine.chat("try it").await.unwrap();

        let results = tool_results(&engine.history()[2]);
        assert_eq!(
            error_payload(&results[0].1),
            json!({"error": "Provider 'gamma' not connected"})
        );
    }

    #[tokio::test]
    async fn test_failing_tool_does_not_stop_the_others() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(
            log.clone(),
            vec![
                Ok(tool_use(&[
                    ("t1", "alpha__broken", json!({})),
                    ("t2", "beta__book", json!({})),
                ])),
                Ok(end_turn("partly done")),
            ],
        ));
        let mut engine = engine(&backend, registry);

        assert_eq!(engine.chat("go").await.unwrap(), "partly done");

        let results = tool_results(&engine.history()[2]);
        assert!(results[0].2);
        let payload = error_payload(&results[0].1);
        assert!(payload["error"].as_str().unwrap().contains("something went wrong"));
        assert!(!results[1].2);
    }
}

mod termination_tests {
    use super::*;

    #[tokio::test]
    async fn test_iteration_budget_fallback() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::repeating(
            log.clone(),
            tool_use(&[("t", "alpha__search", json!({}))]),
            10,
        ));
        let mut engine = engine(&backend, registry).with_max_iterations(3);

        let reply = engine.chat("loop forever").await.unwrap();

        assert_eq!(reply, FALLBACK_MESSAGE);
        assert_eq!(backend.calls(), 3);
        assert_eq!(log.events().iter().filter(|e| *e == "alpha:search").count(), 3);

        // user, 3 x (assistant tool_use, user results), assistant fallback
        let history = engine.history();
        assert_eq!(history.len(), 8);
        assert_eq!(history.last(), Some(&Message::assistant(FALLBACK_MESSAGE)));
        for pair in history[1..7].chunks(2) {
            assert_eq!(pair[0].role, Role::Assistant);
            assert_eq!(pair[1].role, Role::User);
            assert_eq!(tool_results(&pair[1]).len(), 1);
        }
    }

    #[tokio::test]
    async fn test_default_budget_is_ten() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::repeating(
            log.clone(),
            tool_use(&[("t", "beta__book", json!({}))]),
            20,
        ));
        let mut engine = engine(&backend, registry);

        assert_eq!(engine.chat("loop").await.unwrap(), FALLBACK_MESSAGE);
        assert_eq!(backend.calls(), 10);
    }

    #[tokio::test]
    async fn test_unexpected_stop_reason() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(log.clone(), vec![Ok(stopped("max_tokens"))]));
        let mut engine = engine(&backend, registry);

        let reply = engine.chat("write a novel").await.unwrap();

        assert_eq!(reply, "Unexpected stop reason: max_tokens");
        assert_eq!(engine.history().len(), 2);
        assert_eq!(engine.history()[1], Message::assistant(reply));
    }

    #[tokio::test]
    async fn test_tool_use_without_requests_is_terminal() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(
            log.clone(),
            vec![Ok(tool_use(&[])), Ok(end_turn("never reached"))],
        ));
        let mut engine = engine(&backend, registry);

        let reply = engine.chat("hm").await.unwrap();
        assert_eq!(reply, "Unexpected stop reason: tool_use");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_model_error_is_returned_and_engine_recovers() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(
            log.clone(),
            vec![
                Err(ModelError::rate_limit("slow down")),
                Ok(end_turn("hello again")),
            ],
        ));
        let mut engine = engine(&backend, registry);

        let err = engine.chat("hi").await.unwrap_err();
        assert!(matches!(err, Error::Model(ref e) if e.kind == ModelErrorKind::RateLimit));
        assert!(engine.history().is_empty());

        assert_eq!(engine.chat("hi").await.unwrap(), "hello again");
        assert_eq!(engine.history().len(), 2);
    }
}

mod history_tests {
    use super::*;

    #[tokio::test]
    async fn test_clear_history_matches_fresh_engine() {
        let script = || {
            vec![
                Ok(tool_use(&[("t1", "alpha__search", json!({"q": "x"}))])),
                Ok(end_turn("answer")),
            ]
        };

        // Engine that has already talked, then cleared
        let used_log = EventLog::default();
        let used_backend = Arc::new(ScriptedBackend::new(used_log.clone(), {
            let mut s = vec![Ok(end_turn("warm up"))];
            s.extend(script());
            s
        }));
        let mut used = engine(&used_backend, connected_registry(&used_log).await);
        used.chat("earlier question").await.unwrap();
        used.clear_history();
        assert!(used.history().is_empty());
        let used_reply = used.chat("question").await.unwrap();

        let fresh_log = EventLog::default();
        let fresh_backend = Arc::new(ScriptedBackend::new(fresh_log.clone(), script()));
        let mut fresh = engine(&fresh_backend, connected_registry(&fresh_log).await);
        let fresh_reply = fresh.chat("question").await.unwrap();

        assert_eq!(used_reply, fresh_reply);
        assert_eq!(used.history(), fresh.history());

        let messages = |seen: &[common::SeenRequest]| -> Vec<Vec<Message>> {
            seen.iter().map(|s| s.messages.clone()).collect()
        };
        let used_seen = messages(&used_backend.seen()[1..]);
        let fresh_seen = messages(&fresh_backend.seen());
        assert_eq!(used_seen, fresh_seen);
    }

    #[tokio::test]
    async fn test_empty_reply_is_not_recorded() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(
            log.clone(),
            vec![
                Ok(tool_use(&[("t1", "alpha__search", json!({}))])),
                Ok(end_turn("")),
            ],
        ));
        let mut engine = engine(&backend, registry);

        assert_eq!(engine.chat("search quietly").await.unwrap(), "");

        let history = engine.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].role, Role::User);
        assert_eq!(tool_results(&history[2]).len(), 1);
    }

    #[tokio::test]
    async fn test_usage_accumulates_across_calls() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(
            log.clone(),
            vec![
                Ok(tool_use(&[("t1", "alpha__search", json!({}))])),
                Ok(end_turn("one")),
                Ok(end_turn("two")),
            ],
        ));
        let mut engine = engine(&backend, registry);

        engine.chat("a").await.unwrap();
        engine.chat("b").await.unwrap();

        let usage = engine.usage();
        assert_eq!(usage.input_tokens, 20 + 10 + 10);
        assert_eq!(usage.output_tokens, 8 + 5 + 5);
    }
}

mod catalog_tests {
    use super::*;

    #[tokio::test]
    async fn test_tools_the_model_cannot_call_are_skipped() {
        let log = EventLog::default();
        let launcher = InProcessLauncher::new().with_handler(
            "fs",
            FakeProvider::new("fs", &["read.file", "list-dir"], log.clone()),
        );
        let registry = Arc::new(SessionRegistry::new(Arc::new(launcher)));
        registry.connect(&ProviderConfig::new("fs", "unused")).await.unwrap();
        let backend = Arc::new(ScriptedBackend::new(log.clone(), vec![Ok(end_turn("hi"))]));
        let mut engine = engine(&backend, registry.clone());

        engine.chat("hello").await.unwrap();

        assert_eq!(backend.seen()[0].tools, vec!["fs__list-dir"]);
        // Still listed by the registry
        assert_eq!(registry.catalog().await.len(), 2);
    }

    #[tokio::test]
    async fn test_tools_are_namespaced_with_default_description() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        let backend = Arc::new(ScriptedBackend::new(log.clone(), vec![Ok(end_turn("hi"))]));
        let mut engine = engine(&backend, registry).with_system_prompt("be terse");

        engine.chat("hello").await.unwrap();

        let seen = &backend.seen()[0];
        assert_eq!(seen.system, "be terse");
        assert_eq!(
            seen.tools,
            vec!["alpha__search", "alpha__broken", "beta__book", "beta__cancel"]
        );
        assert_eq!(seen.descriptions[0], "search from alpha");
        assert_eq!(seen.descriptions[3], NO_DESCRIPTION);
    }

    #[tokio::test]
    async fn test_no_providers_means_no_tools() {
        let log = EventLog::default();
        let registry = Arc::new(SessionRegistry::new(Arc::new(alpha_beta(&log))));
        let backend =
            Arc::new(ScriptedBackend::new(log.clone(), vec![Ok(end_turn("plain answer"))]));
        let mut engine = engine(&backend, registry);

        assert_eq!(engine.chat("hello").await.unwrap(), "plain answer");
        assert!(backend.seen()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_provider_tools_disappear() {
        let log = EventLog::default();
        let registry = connected_registry(&log).await;
        registry.disconnect("alpha").await.unwrap();

        let backend = Arc::new(ScriptedBackend::new(
            log.clone(),
            vec![Ok(tool_use(&[("t1", "alpha__search", json!({}))])), Ok(end_turn("ok"))],
        ));
        let mut engine = engine(&backend, registry);
        engine.chat("search").await.unwrap();

        assert_eq!(backend.seen()[0].tools, vec!["beta__book", "beta__cancel"]);
        let results = tool_results(&engine.history()[2]);
        assert_eq!(
            error_payload(&results[0].1),
            json!({"error": "Provider 'alpha' not connected"})
        );
    }
}
