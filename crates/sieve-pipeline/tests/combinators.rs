mod common;

use std::sync::Arc;

use serde_json::json;

use common::{doc, ids, list, scored, Broken, Fixed, OtherKey, Rescore, Rogue, Short};
use sieve_core::{Error, Key, Normalization, Query, Ranked, ResultList, ScoredItem, Stage};
use sieve_embed::hash::HashEmbedder;
use sieve_pipeline::{chain, leaf, mapping, top_k, union, vote, DocumentMap, Pipeline};
use sieve_text::{KeywordRetriever, LexicalRetriever};
use sieve_vector::{EncoderRanker, EncoderRetriever};

fn similarities(list: &ResultList) -> Vec<f32> { list.iter().filter_map(|i| i.similarity).collect() }

fn keys(values: &[i64]) -> Vec<Key> { values.iter().copied().map(Key::from).collect() }

#[test]
fn union_of_two_keyword_branches_keeps_branch_order() {
    let docs = vec![
        doc(json!({"id": 0, "t": "Paris is the capital of France"})),
        doc(json!({"id": 1, "t": "Paris hosts tennis"})),
    ];
    let capital = KeywordRetriever::new("id", vec!["t".into()], None).with_keywords(["capital"]);
    let tennis = KeywordRetriever::new("id", vec!["t".into()], None).with_keywords(["tennis"]);
    let mut pipeline = union([leaf(capital), leaf(tennis)]);
    pipeline.add(&docs).expect("add");

    let out = pipeline.search("capital tennis", None).expect("search");
    assert_eq!(out.to_json(), json!([{"id": 0}, {"id": 1}]));
}

#[test]
fn chain_returns_the_reranker_order_over_upstream_candidates_only() {
    let retriever = Fixed::new("a").answer("q", scored(&[(0, 0.9), (1, 0.4)]));
    let reranker = Rescore::new(&[(1, 0.8), (0, 0.3), (7, 1.0)]);
    let pipeline = chain([leaf(retriever), leaf(reranker)]);

    let out = pipeline.search("q", None).expect("search");
    assert_eq!(ids(&out), keys(&[1, 0]));
    assert_eq!(similarities(&out), vec![0.8, 0.3]);
}

#[test]
fn mapping_fills_known_keys_and_passes_unknown_ones_through() {
    let retriever = Fixed::new("a").answer("q", list(&[(0, None)])).answer("r", list(&[(2, None)]));
    let table = vec![doc(json!({"id": 0, "title": "Paris"}))];
    let pipeline = chain([leaf(retriever), mapping("id", &table).expect("mapping")]);

    assert_eq!(pipeline.search("q", None).expect("search").to_json(), json!([{"id": 0, "title": "Paris"}]));
    assert_eq!(pipeline.search("r", None).expect("search").to_json(), json!([{"id": 2}]));
}

#[test]
fn mapping_never_overwrites_item_fields_or_similarity() {
    let map = DocumentMap::new("id", &[doc(json!({"id": 0, "title": "Paris", "lang": "fr", "similarity": 0.1}))]).expect("map");
    let mut item = ScoredItem::new("id", Key::from(0)).with_similarity(0.7);
    item.fields.insert("title".into(), json!("Paris, France"));
    let out = map.apply(&[item].into_iter().collect());

    let first = &out.items()[0];
    assert_eq!(first.fields["title"], json!("Paris, France"));
    assert_eq!(first.fields["lang"], json!("fr"));
    assert_eq!(first.similarity, Some(0.7));
    assert!(!first.fields.contains_key("similarity"));
}

#[test]
fn mapping_rebind_swaps_the_table() {
    let mut map = DocumentMap::new("id", &[doc(json!({"id": 0, "title": "old"}))]).expect("map");
    map.rebind(&[doc(json!({"id": 0, "title": "new"})), doc(json!({"id": 1}))]).expect("rebind");
    assert_eq!(map.len(), 2);
    assert_eq!(map.apply(&list(&[(0, None)])).to_json(), json!([{"id": 0, "title": "new"}]));

    let err = map.rebind(&[doc(json!({"title": "keyless"}))]).expect_err("missing key");
    assert!(matches!(err, Error::Schema { .. }));
    assert_eq!(map.len(), 2);
}

#[test]
fn chain_skips_stages_once_candidates_run_out() {
    let first = Fixed::new("a").answer("p", list(&[(3, None)]));
    let second = Fixed::new("b").answer("p", list(&[(3, None), (4, None)])).answer("q", list(&[(5, None)]));
    let second_calls = Arc::clone(&second.calls);
    let pipeline = chain([leaf(first), leaf(second)]);

    assert!(pipeline.search("q", None).expect("search").is_empty());
    assert_eq!(second_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    // only the position with candidates reaches the second stage
    let out = pipeline.search_batch(&["q".into(), "p".into()], None).expect("batch");
    assert_eq!(out.len(), 2);
    assert!(out[0].is_empty());
    assert_eq!(ids(&out[1]), keys(&[3]));
    assert_eq!(second_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn chain_pairs_candidates_with_their_own_position() {
    let first = Fixed::new("a").answer("p", list(&[(0, None), (1, None)])).answer("q", list(&[(2, None)]));
    let everything = list(&[(2, None), (1, None), (0, None)]);
    let second = Fixed::new("b").answer("p", everything.clone()).answer("q", everything);
    let pipeline = chain([leaf(first), leaf(second)]);

    let out = pipeline.search_batch(&["p".into(), "q".into()], None).expect("batch");
    assert_eq!(ids(&out[0]), keys(&[1, 0]));
    assert_eq!(ids(&out[1]), keys(&[2]));
}

#[test]
fn keys_outside_the_candidates_are_dropped() {
    let first = Fixed::new("a").answer("q", list(&[(0, None), (1, None)]));
    let pipeline = chain([leaf(first), leaf(Rogue(list(&[(5, None), (1, None), (0, None)])))]);
    assert_eq!(ids(&pipeline.search("q", None).expect("search")), keys(&[1, 0]));
}

#[test]
fn intermediate_stages_use_their_own_cap_and_the_call_cap_hits_the_last() {
    let first = Fixed::new("a").with_k(3).answer("q", list(&[(0, None), (1, None), (2, None), (3, None)]));
    let second = Fixed::new("b").answer("q", list(&[(3, None), (2, None), (1, None), (0, None)]));
    let pipeline = chain([leaf(first), leaf(second)]);

    assert_eq!(ids(&pipeline.search("q", None).expect("search")), keys(&[2, 1, 0]));
    assert_eq!(ids(&pipeline.search("q", Some(1)).expect("search")), keys(&[2]));
}

#[test]
fn union_first_occurrence_wins_and_respects_k() {
    let a = Fixed::new("a").answer("q", scored(&[(0, 0.2), (1, 0.1)]));
    let b = Fixed::new("b").answer("q", scored(&[(1, 0.9), (2, 0.8)]));
    let pipeline = union([leaf(a), leaf(b)]);

    let out = pipeline.search("q", None).expect("search");
    assert_eq!(ids(&out), keys(&[0, 1, 2]));
    assert_eq!(similarities(&out), vec![0.2, 0.1, 0.8]);

    let capped = pipeline.with_k(2);
    assert_eq!(capped.search("q", None).expect("search").len(), 2);
    assert_eq!(capped.search("q", Some(1)).expect("search").len(), 1);
}

#[test]
fn union_with_empty_branch_contributes_nothing() {
    let a = Fixed::new("a");
    let b = Fixed::new("b").answer("q", list(&[(4, None)]));
    let out = union([leaf(a), leaf(b)]).search("q", None).expect("search");
    assert_eq!(ids(&out), keys(&[4]));
}

#[test]
fn vote_mixes_scored_and_ordered_branches() {
    let a = Fixed::new("a").answer("q", scored(&[(0, 1.0), (1, 0.5)]));
    let b = Fixed::new("b").answer("q", list(&[(1, None), (2, None)]));
    let out = vote([leaf(a), leaf(b)]).search("q", None).expect("search");

    assert_eq!(ids(&out), keys(&[0, 1, 2]));
    assert_eq!(similarities(&out), vec![1.0, 0.75, 0.5]);
}

#[test]
fn vote_partial_coverage_is_not_penalised() {
    let a = Fixed::new("a").answer("q", scored(&[(0, 0.4), (1, 0.8)]));
    let b = Fixed::new("b").answer("q", scored(&[(0, 2.0)]));
    let out = vote([leaf(a), leaf(b)]).search("q", None).expect("search");
    // key 1 only appears in branch a, its vote is a's normalised score
    assert_eq!(out.get(&Key::from(1)).and_then(|i| i.similarity), Some(1.0));
    assert_eq!(out.get(&Key::from(0)).and_then(|i| i.similarity), Some(0.75));
    assert_eq!(ids(&out), keys(&[1, 0]));
}

#[test]
fn vote_min_max_and_negative_score_fallback() {
    let a = Fixed::new("a").answer("q", scored(&[(0, 3.0), (1, 1.0), (2, 2.0)]));
    let out = vote([leaf(a)]).with_normalization(Normalization::MinMax).search("q", None).expect("search");
    assert_eq!(ids(&out), keys(&[0, 2, 1]));
    assert_eq!(similarities(&out), vec![1.0, 0.5, 0.0]);

    let negative = Fixed::new("n").answer("q", scored(&[(0, -1.0), (1, -3.0)]));
    let out = vote([leaf(negative)]).search("q", None).expect("search");
    assert_eq!(similarities(&out), vec![1.0, 0.0]);
}

#[test]
fn vote_ties_keep_first_appearance() {
    let a = Fixed::new("a").answer("q", scored(&[(3, 0.5)]));
    let b = Fixed::new("b").answer("q", scored(&[(1, 0.9)]));
    let out = vote([leaf(a), leaf(b)]).with_k(5).search("q", None).expect("search");
    assert_eq!(ids(&out), keys(&[3, 1]));
}

#[test]
fn top_k_truncates_without_reordering() {
    let a = Fixed::new("a").answer("q", scored(&[(0, 0.1), (1, 0.9), (2, 0.5)]));
    let pipeline = chain([leaf(a), top_k(2)]);
    let out = pipeline.search("q", None).expect("search");
    assert_eq!(ids(&out), keys(&[0, 1]));
    assert_eq!(similarities(&out), vec![0.1, 0.9]);
    assert_eq!(pipeline.search("q", Some(1)).expect("search").len(), 1);
}

#[test]
fn with_k_on_a_chain_appends_top_k() {
    let a = Fixed::new("a").answer("q", list(&[(0, None), (1, None), (2, None)]));
    let pipeline = leaf(a).with_k(2);
    assert_eq!(pipeline.to_string(), "a + top_k(2)");
    assert_eq!(pipeline.search("q", None).expect("search").len(), 2);
}

#[test]
fn display_renders_the_tree() {
    let pipeline = chain([leaf(Fixed::new("a")), union([leaf(Fixed::new("b")), leaf(Fixed::new("c"))])]);
    assert_eq!(pipeline.to_string(), "a + (b | c)");

    let nested = chain([chain([leaf(Fixed::new("a")), leaf(Fixed::new("b"))]), leaf(Fixed::new("c"))]);
    assert!(matches!(&nested, Pipeline::Sequential(stages) if stages.len() == 3));
    assert_eq!(vote([leaf(Fixed::new("x")), leaf(Fixed::new("y"))]).with_k(4).to_string(), "(x * y)[k=4]");
}

#[test]
fn run_mirrors_the_query_shape() {
    let a = Fixed::new("a").answer("p", list(&[(0, None)])).answer("q", list(&[(1, None)]));
    let pipeline = leaf(a);

    let single = pipeline.run("q", None).expect("run");
    assert!(matches!(&single, Ranked::Single(list) if ids(list) == keys(&[1])));

    let batch = pipeline.run(vec!["p", "q", "missing"], None).expect("run").into_batch();
    assert_eq!(batch.len(), 3);
    assert_eq!(ids(&batch[0]), keys(&[0]));
    assert!(batch[2].is_empty());

    let err = pipeline.run(Vec::<Query>::new(), None).expect_err("empty batch");
    assert!(matches!(err, Error::InvalidQuery(_)));
}

#[test]
fn branch_failures_propagate_unchanged() {
    let ok = || leaf(Fixed::new("a").answer("q", list(&[(0, None)])));
    for pipeline in [union([ok(), leaf(Broken)]), vote([leaf(Broken), ok()]), chain([ok(), leaf(Broken)])] {
        let err = pipeline.search("q", None).expect_err("failure");
        assert!(matches!(err, Error::Backend { .. }), "{pipeline}: {err}");
        assert_eq!(err.stage(), Some("broken"));
    }

    let mut pipeline = union([ok(), leaf(Broken)]);
    assert!(matches!(pipeline.add(&[doc(json!({"id": 1}))]), Err(Error::Backend { .. })));
}

#[test]
fn misaligned_batch_output_is_rejected() {
    let err = leaf(Short).search_batch(&["a".into(), "b".into()], None).expect_err("mismatch");
    assert!(matches!(err, Error::BatchMismatch { expected: 2, actual: 1, .. }));
    assert_eq!(err.stage(), Some("short"));
}

#[test]
fn stages_that_need_candidates_fail_at_the_root() {
    let table = vec![doc(json!({"id": 0}))];
    let root = mapping("id", &table).expect("mapping");
    assert!(root.needs_candidates());
    assert!(matches!(root.search("q", None), Err(Error::InvalidConfig(_))));
    assert!(matches!(top_k(3).search("q", None), Err(Error::InvalidConfig(_))));
    assert!(!chain([leaf(Fixed::new("a")), top_k(3)]).needs_candidates());
}

#[test]
fn a_root_needing_candidates_is_rejected_before_any_stage_runs() {
    let retriever = Fixed::new("a").answer("q", list(&[(0, None), (1, None)]));
    let calls = Arc::clone(&retriever.calls);
    let pipeline = union([leaf(retriever), top_k(1)]);
    assert!(pipeline.needs_candidates());
    assert!(matches!(pipeline.search("q", None), Err(Error::InvalidConfig(_))));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    // the same node is fine once something upstream feeds it
    let fed = chain([leaf(Fixed::new("b").answer("q", list(&[(0, None), (1, None)]))), pipeline]);
    assert!(!fed.needs_candidates());
    assert_eq!(ids(&fed.search("q", None).expect("search")), keys(&[0, 1]));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn inconsistent_key_fields_and_empty_combinators_are_rejected() {
    let mut pipeline = union([leaf(Fixed::new("a")), leaf(OtherKey)]);
    assert!(matches!(pipeline.validate(), Err(Error::InvalidConfig(_))));
    assert!(matches!(pipeline.search("q", None), Err(Error::InvalidConfig(_))));
    assert!(matches!(pipeline.add(&[doc(json!({"id": 0}))]), Err(Error::InvalidConfig(_))));

    assert!(matches!(union(Vec::new()).validate(), Err(Error::InvalidConfig(_))));
    assert!(matches!(chain([leaf(Fixed::new("a")), mapping("doc_id", &[]).expect("mapping")]).validate(), Err(Error::InvalidConfig(_))));
    assert_eq!(chain([top_k(1), leaf(OtherKey)]).key_field(), Some("doc_id"));
}

#[test]
fn add_reaches_every_leaf() {
    let a = Fixed::new("a");
    let b = Fixed::new("b");
    let c = Fixed::new("c");
    let counters = [Arc::clone(&a.added), Arc::clone(&b.added), Arc::clone(&c.added)];
    let mut pipeline = chain([union([leaf(a), leaf(b)]), mapping("id", &[]).expect("mapping"), leaf(c)]);

    let docs: Vec<_> = (0..3).map(|i| doc(json!({"id": i, "t": "text"}))).collect();
    pipeline.add(&docs).expect("add");
    for counter in &counters {
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    let err = pipeline.add(&[doc(json!({"t": "no key"}))]).expect_err("schema");
    assert!(matches!(err, Error::Schema { .. }));

    pipeline.rebind(&docs).expect("rebind");
}

#[test]
fn a_pipeline_can_be_nested_as_a_stage() {
    let inner = chain([leaf(Fixed::new("a").answer("q", list(&[(0, None), (1, None), (2, None)]))), top_k(2)]);
    assert_eq!(Stage::k(&inner), Some(2));
    assert_eq!(Stage::key_field(&inner), "id");

    let outer = union([leaf(inner), leaf(Fixed::new("b").answer("q", list(&[(9, None)])))]);
    assert_eq!(ids(&outer.search("q", None).expect("search")), keys(&[0, 1, 9]));

    // used as a stage directly, candidates restrict the nested pipeline
    let restricted = Stage::search(&outer, &Query::from("q"), Some(&list(&[(9, None), (1, None)])), None).expect("search");
    assert_eq!(ids(&restricted), keys(&[1, 9]));
}

#[test]
fn ranker_behind_a_bare_key_retriever_needs_a_mapping_stage() {
    let retriever = Fixed::new("a").answer("q", list(&[(0, None), (1, None)]));
    let ranker = EncoderRanker::new("id", vec!["t".into()], None, Arc::new(HashEmbedder::new(16)));
    let pipeline = chain([leaf(retriever), leaf(ranker)]);

    let err = pipeline.search("q", None).expect_err("bare keys carry no content");
    assert!(matches!(err, Error::Schema { .. }));
    assert_eq!(err.stage(), Some("ranker(t)"));

    // mapping the keys to their documents first gives the ranker something to embed
    let table = vec![doc(json!({"id": 0, "t": "flint and steel"})), doc(json!({"id": 1, "t": "dry tinder"}))];
    let retriever = Fixed::new("a").answer("q", list(&[(0, None), (1, None)]));
    let ranker = EncoderRanker::new("id", vec!["t".into()], None, Arc::new(HashEmbedder::new(16)));
    let mapped = chain([leaf(retriever), mapping("id", &table).expect("mapping"), leaf(ranker)]);
    let out = mapped.search("q", None).expect("search");
    assert_eq!(out.len(), 2);
    assert!(out.is_scored());
}

#[test]
fn lexical_and_dense_leaves_compose_end_to_end() {
    let corpus: Vec<_> = [
        json!({"id": 0, "title": "Paris", "t": "Paris is the capital of France"}),
        json!({"id": 1, "title": "Roland Garros", "t": "Paris hosts tennis every spring"}),
        json!({"id": 2, "title": "Flint", "t": "Strike flint on steel to start a fire"}),
        json!({"id": 3, "title": "Tinder", "t": "Dry tinder catches the fire quickly"}),
    ]
    .into_iter()
    .map(doc)
    .collect();
    let on = vec!["t".to_string()];
    let embedder = Arc::new(HashEmbedder::new(64));

    let lexical = LexicalRetriever::new("id", on.clone(), Some(3)).expect("lexical");
    let dense = EncoderRetriever::new("id", on.clone(), Some(3), embedder.clone());
    let ranker = EncoderRanker::new("id", on, Some(2), embedder);
    let mut pipeline = chain([union([leaf(lexical), leaf(dense)]), leaf(ranker), mapping("id", &corpus).expect("mapping")]);
    pipeline.add(&corpus).expect("add");

    let out = pipeline.search("fire", None).expect("search");
    assert_eq!(out.len(), 2);
    assert!(out.is_scored());
    for item in &out {
        assert!(item.fields.contains_key("title"));
        assert!(corpus.iter().any(|d| d["id"] == item.fields["id"]));
    }

    let batch = pipeline.search_batch(&["fire".into(), "tennis".into()], None).expect("batch");
    assert_eq!(batch[0], out);
    assert_eq!(batch.len(), 2);
}
