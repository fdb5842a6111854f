// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Full query cycles through the engine: retrieval, assembly, generation,
//! memory commit

use std::sync::Arc;

use castquery::prompts::INSUFFICIENT_CONTEXT_ANSWER;
use castquery::{derive_passage_id, QueryError, RetrieveOptions};

use super::common::{engine, make_passage, FlakyGeneration, ScriptedGeneration};

fn kunal_corpus() -> Vec<castquery::Passage> {
    vec![
        make_passage(
            "ep001",
            0,
            "Kunal Shah",
            "Kunal argues that credit products in India must be built on trust, \
             not just underwriting models.",
        ),
        make_passage(
            "ep002",
            0,
            "Nithin Kamath",
            "Nithin describes how Zerodha grew without outside capital.",
        ),
    ]
}

#[tokio::test]
async fn answer_returns_only_sources_above_threshold() {
    let hits = vec![
        (derive_passage_id("ep001", 0), 0.85),
        (derive_passage_id("ep002", 0), 0.30),
    ];
    let generation = Arc::new(ScriptedGeneration::whole(
        "Kunal Shah argues credit must be built on trust [1].",
    ));
    let engine = engine(kunal_corpus(), hits, generation);

    let response = engine
        .answer("What does Kunal say about credit?", "s1", RetrieveOptions::default())
        .await
        .unwrap();

    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].guest, "Kunal Shah");
    assert_eq!(response.sources[0].episode_id, "ep001");
    assert!(response.sources[0].relevance_score > 0.8);
    assert!(!response.truncated);
}

#[tokio::test]
async fn no_relevant_context_yields_canned_answer_and_empty_sources() {
    let hits = vec![
        (derive_passage_id("ep001", 0), 0.40),
        (derive_passage_id("ep002", 0), 0.20),
    ];
    let generation = Arc::new(ScriptedGeneration::whole("should never be called"));
    let engine = engine(kunal_corpus(), hits, generation);

    let response = engine
        .answer("Who won the cricket match yesterday?", "s1", RetrieveOptions::default())
        .await
        .unwrap();

    assert!(response.sources.is_empty());
    assert_eq!(response.answer_text, INSUFFICIENT_CONTEXT_ANSWER);
}

#[tokio::test]
async fn generation_failure_surfaces_error_and_commits_no_turn() {
    let hits = vec![(derive_passage_id("ep001", 0), 0.85)];
    // Two failures exhaust the single retry of the first cycle; the second
    // cycle succeeds.
    let generation = Arc::new(FlakyGeneration::failing(2, "Recovered answer [1]."));
    let engine = engine(kunal_corpus(), hits, generation);

    let err = engine
        .answer("What does Kunal say about credit?", "s1", RetrieveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::GenerationUnavailable(_)));

    // The failed cycle left no turn behind, so the follow-up's reference
    // marker resolves against empty history, i.e. unchanged.
    let follow_up = engine
        .answer("How does that compare?", "s1", RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(follow_up.resolved_query, "How does that compare?");
}

#[tokio::test]
async fn generation_retries_once_then_succeeds() {
    let hits = vec![(derive_passage_id("ep001", 0), 0.85)];
    let generation = Arc::new(FlakyGeneration::failing(1, "Second attempt answer [1]."));
    let engine = engine(kunal_corpus(), hits, generation);

    let response = engine
        .answer("What does Kunal say about credit?", "s1", RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(response.answer_text, "Second attempt answer [1].");
}

#[tokio::test]
async fn follow_up_resolves_against_previous_turn() {
    let hits = vec![(derive_passage_id("ep001", 0), 0.85)];
    let generation = Arc::new(ScriptedGeneration::whole("Trust is the moat [1]."));
    let engine = engine(kunal_corpus(), hits, generation);

    let first = engine
        .answer("What does Kunal say about credit?", "s1", RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(first.resolved_query, "What does Kunal say about credit?");

    let follow_up = engine
        .answer("How does that work in practice?", "s1", RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(
        follow_up.resolved_query,
        "Following up on 'What does Kunal say about credit?': How does that work in practice?"
    );
}

#[tokio::test]
async fn sessions_do_not_share_history() {
    let hits = vec![(derive_passage_id("ep001", 0), 0.85)];
    let generation = Arc::new(ScriptedGeneration::whole("Answer [1]."));
    let engine = engine(kunal_corpus(), hits, generation);

    engine
        .answer("What does Kunal say about credit?", "alpha", RetrieveOptions::default())
        .await
        .unwrap();

    // Same marker-bearing question in a fresh session resolves unchanged
    let other = engine
        .answer("How does that work in practice?", "beta", RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(other.resolved_query, "How does that work in practice?");
}

#[tokio::test]
async fn insufficient_context_still_commits_the_turn() {
    let hits = vec![(derive_passage_id("ep001", 0), 0.10)];
    let generation = Arc::new(ScriptedGeneration::whole("unused"));
    let engine = engine(kunal_corpus(), hits, generation);

    engine
        .answer("What does Kunal say about quantum physics?", "s1", RetrieveOptions::default())
        .await
        .unwrap();

    // The canned exchange is part of history: the follow-up resolves
    let follow_up = engine
        .answer("Why is that?", "s1", RetrieveOptions::default())
        .await
        .unwrap();
    assert!(follow_up
        .resolved_query
        .starts_with("Following up on 'What does Kunal say about quantum physics?'"));
}

#[tokio::test]
async fn clear_session_forgets_history() {
    let hits = vec![(derive_passage_id("ep001", 0), 0.85)];
    let generation = Arc::new(ScriptedGeneration::whole("Answer [1]."));
    let engine = engine(kunal_corpus(), hits, generation);

    engine
        .answer("What does Kunal say about credit?", "s1", RetrieveOptions::default())
        .await
        .unwrap();
    engine.clear_session("s1").await;

    let after = engine
        .answer("How does that work?", "s1", RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(after.resolved_query, "How does that work?");
}

#[tokio::test]
async fn cited_sources_are_ordered_by_first_reference() {
    let corpus = vec![
        make_passage("ep001", 0, "Kunal Shah", "Kunal on trust."),
        make_passage("ep002", 0, "Nithin Kamath", "Nithin on bootstrapping."),
    ];
    let hits = vec![
        (derive_passage_id("ep001", 0), 0.90),
        (derive_passage_id("ep002", 0), 0.80),
    ];
    // The answer cites the second excerpt first
    let generation = Arc::new(ScriptedGeneration::whole(
        "Nithin bootstrapped Zerodha [2], while Kunal emphasizes trust [1].",
    ));
    let engine = engine(corpus, hits, generation);

    let response = engine
        .answer("Compare their approaches to growth", "s1", RetrieveOptions::default())
        .await
        .unwrap();

    assert_eq!(response.sources.len(), 2);
    assert_eq!(response.sources[0].guest, "Nithin Kamath");
    assert_eq!(response.sources[1].guest, "Kunal Shah");
}
