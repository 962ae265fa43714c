//! Pool and merger behaviour against scripted backends
//!
//! Every backend here is in-process: a closure decides what each call
//! returns, and every batch a client sees is recorded so rotation, padding
//! and splitting can be checked from the outside.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use gateway_core::envelope::{FATAL, UNEQUAL_PARAGRAPH_COUNT};
use gateway_core::{
    AskError, BackendPool, Gateway, PoolError, Service, TranslationBackend, TranslationConfig,
};

// =============================================================================
// Scripted Backend
// =============================================================================

type Script = Box<dyn Fn(&str, &[String]) -> Result<Vec<String>, AskError> + Send + Sync>;

struct Scripted {
    id: String,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<String>>>,
    script: Script,
}

impl Scripted {
    fn new(
        id: &str,
        script: impl Fn(&str, &[String]) -> Result<Vec<String>, AskError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            script: Box::new(script),
        })
    }

    fn echo(id: &str) -> Arc<Self> {
        Self::new(id, |_, batch| Ok(batch.to_vec()))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.seen.lock().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl TranslationBackend for Scripted {
    fn service(&self) -> Service {
        Service::Completion
    }

    fn source_id(&self) -> &str {
        &self.id
    }

    async fn ask(&self, paragraphs: &[String]) -> Result<Vec<String>, AskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(paragraphs.to_vec());
        (self.script)(&self.id, paragraphs)
    }
}

fn mismatch(id: &str, batch: &[String]) -> AskError {
    AskError::UnequalParagraphCount {
        expected: batch.len(),
        actual: batch.len() + 1,
        source_id: id.to_string(),
    }
}

fn broken(id: &str) -> AskError {
    AskError::Transport {
        source_id: id.to_string(),
        message: "connection reset".to_string(),
    }
}

fn pool(clients: &[Arc<Scripted>], max_split_depth: usize) -> BackendPool {
    BackendPool::new(
        "test",
        clients
            .iter()
            .map(|c| Arc::clone(c) as Arc<dyn TranslationBackend>)
            .collect(),
        max_split_depth,
    )
}

fn batch(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

// =============================================================================
// Rotation
// =============================================================================

#[tokio::test]
async fn test_next_visits_every_client_once_per_round() {
    let clients = [Scripted::echo("a"), Scripted::echo("b"), Scripted::echo("c")];
    let pool = pool(&clients, 1);

    // Skew the cursor first
    pool.ask(&batch(&["x"])).await.unwrap();

    let round = || -> Vec<String> {
        (0..3)
            .map(|_| pool.next().unwrap().source_id().to_string())
            .collect()
    };
    assert_eq!(round(), vec!["b", "c", "a"]);
    assert_eq!(round(), vec!["b", "c", "a"]);
}

#[tokio::test]
async fn test_rotation_advances_past_failures() {
    let clients = [
        Scripted::new("a", |id, _| Err(broken(id))),
        Scripted::echo("b"),
        Scripted::echo("c"),
    ];
    let pool = pool(&clients, 1);

    assert_eq!(pool.ask(&batch(&["one"])).await.unwrap(), batch(&["one"]));
    assert_eq!(pool.ask(&batch(&["two"])).await.unwrap(), batch(&["two"]));

    assert_eq!(clients[0].calls(), 1);
    assert_eq!(clients[1].calls(), 1);
    assert_eq!(clients[2].calls(), 1);
}

#[tokio::test]
async fn test_full_rotation_of_failures_is_fatal() {
    let clients = [
        Scripted::new("a", |id, _| Err(broken(id))),
        Scripted::new("b", |id, _| {
            Err(AskError::Timeout {
                source_id: id.to_string(),
                job: "delivery",
            })
        }),
        Scripted::new("c", |id, _| Err(broken(id))),
    ];
    let pool = pool(&clients, 1);

    let err = pool.ask(&batch(&["x", "y"])).await.unwrap_err();
    match err {
        PoolError::Fatal { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected fatal, got {other:?}"),
    }
    let total: usize = clients.iter().map(|c| c.calls()).sum();
    assert_eq!(total, 3);
    assert_eq!(pool.stats().fatal, 1);
}

// =============================================================================
// Padding
// =============================================================================

#[tokio::test]
async fn test_single_paragraph_mismatch_pads_instead_of_splitting() {
    let clients = [
        Scripted::new("a", |id, batch| Err(mismatch(id, batch))),
        Scripted::echo("b"),
    ];
    let pool = pool(&clients, 1);

    let out = pool.ask(&batch(&["Hello"])).await.unwrap();
    assert_eq!(out, batch(&["Hello"]));

    assert_eq!(clients[1].seen.lock()[0], batch(&["&nbsp;Hello&nbsp;"]));
    let stats = pool.stats();
    assert_eq!(stats.paddings, 1);
    assert_eq!(stats.splits, 0);
}

#[tokio::test]
async fn test_single_paragraph_mismatch_everywhere_is_structural() {
    let clients = [
        Scripted::new("a", |id, batch| Err(mismatch(id, batch))),
        Scripted::new("b", |id, batch| Err(mismatch(id, batch))),
    ];
    let pool = pool(&clients, 1);

    let err = pool.ask(&batch(&["Hello"])).await.unwrap_err();
    assert!(matches!(err, PoolError::UnequalParagraphCount { expected: 1, .. }));
    // Full rotation plus the one dispatch the padding adds
    assert_eq!(clients[0].calls() + clients[1].calls(), 3);
    // Padding is applied once, not stacked
    assert_eq!(clients[1].seen.lock()[0], batch(&["&nbsp;Hello&nbsp;"]));
    assert_eq!(clients[0].seen.lock()[1], batch(&["&nbsp;Hello&nbsp;"]));
}

#[tokio::test]
async fn test_single_client_retries_padded_paragraph() {
    let first = AtomicBool::new(true);
    let clients = [Scripted::new("solo", move |id, batch| {
        if first.swap(false, Ordering::SeqCst) {
            Err(mismatch(id, batch))
        } else {
            Ok(batch.to_vec())
        }
    })];
    let pool = pool(&clients, 1);

    assert_eq!(pool.ask(&batch(&["Hello"])).await.unwrap(), batch(&["Hello"]));
    assert_eq!(clients[0].calls(), 2);
    assert_eq!(clients[0].seen.lock()[1], batch(&["&nbsp;Hello&nbsp;"]));
    assert_eq!(pool.stats().paddings, 1);
}

// =============================================================================
// Splitting
// =============================================================================

#[tokio::test]
async fn test_mismatch_splits_into_halves() {
    let clients = [
        Scripted::new("a", |id, batch| {
            if batch.len() == 5 {
                Err(mismatch(id, batch))
            } else {
                Ok(batch.to_vec())
            }
        }),
        Scripted::echo("b"),
        Scripted::echo("c"),
    ];
    let pool = pool(&clients, 1);
    let input = batch(&["1", "2", "3", "4", "5"]);

    let out = pool.ask(&input).await.unwrap();
    assert_eq!(out, input);

    let mut half_sizes: Vec<usize> = clients[1]
        .batch_sizes()
        .into_iter()
        .chain(clients[2].batch_sizes())
        .collect();
    half_sizes.sort_unstable();
    assert_eq!(half_sizes, vec![2, 3]);
    assert_eq!(pool.stats().splits, 1);
}

#[tokio::test]
async fn test_half_fails_over_on_transport_error() {
    let clients = [
        Scripted::new("a", |id, batch| {
            if batch.len() == 4 {
                Err(mismatch(id, batch))
            } else {
                Err(broken(id))
            }
        }),
        Scripted::echo("b"),
    ];
    let pool = pool(&clients, 1);
    let input = batch(&["1", "2", "3", "4"]);

    assert_eq!(pool.ask(&input).await.unwrap(), input);
}

#[tokio::test]
async fn test_half_mismatch_propagates_at_depth_limit() {
    let clients = [
        Scripted::new("a", |id, batch| {
            if batch.len() > 1 {
                Err(mismatch(id, batch))
            } else {
                Ok(batch.to_vec())
            }
        }),
        Scripted::new("b", |id, batch| {
            if batch.len() > 1 {
                Err(mismatch(id, batch))
            } else {
                Ok(batch.to_vec())
            }
        }),
    ];
    let input = batch(&["1", "2", "3", "4"]);

    let shallow = pool(&clients, 1);
    let err = shallow.ask(&input).await.unwrap_err();
    assert!(matches!(err, PoolError::UnequalParagraphCount { expected: 2, .. }));

    let deep = pool(&clients, 2);
    assert_eq!(deep.ask(&input).await.unwrap(), input);
    assert_eq!(deep.stats().splits, 3);
}

// =============================================================================
// Merger
// =============================================================================

fn prefixed(id: &str, prefix: &'static str) -> Arc<Scripted> {
    Scripted::new(id, move |_, batch| {
        Ok(batch.iter().map(|p| format!("{prefix}{p}")).collect())
    })
}

fn gateway(deepl: &[Arc<Scripted>], text: &[Arc<Scripted>]) -> Gateway {
    Gateway::with_pools(
        &TranslationConfig::default(),
        Arc::new(pool(deepl, 1)),
        Arc::new(pool(text, 1)),
    )
    .unwrap()
}

fn content_of(body: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(body).unwrap();
    value["choices"][0]["message"]["content"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_marked_units_route_to_deepl_and_merge_in_order() {
    let deepl = [prefixed("deepl", "D:")];
    let text = [prefixed("text", "T:")];
    let gw = gateway(&deepl, &text);

    let marked = "<b1></b1>x<b2></b2>y<b3></b3>";
    let content = format!("plain one\n\n%%\n\n{marked}\n\n%%\n\nplain two");
    let body = gw.translate(&content).await;

    assert_eq!(
        content_of(&body),
        format!("T:plain one\n\n%%\n\nD:{marked}\n\n%%\n\nT:plain two")
    );
    assert_eq!(deepl[0].batch_sizes(), vec![1]);
    assert_eq!(text[0].batch_sizes(), vec![2]);
}

#[tokio::test]
async fn test_marked_units_fall_back_to_text_pool_without_deepl() {
    let text = [prefixed("text", "T:")];
    let gw = gateway(&[], &text);

    let body = gw
        .translate("<b1></b1><b2></b2><b3></b3>\n\n%%\n\nplain")
        .await;
    assert_eq!(
        content_of(&body),
        "T:<b1></b1><b2></b2><b3></b3>\n\n%%\n\nT:plain"
    );
}

#[tokio::test]
async fn test_pool_failures_become_sentinels() {
    let text = [Scripted::new("text", |id, batch| Err(mismatch(id, batch)))];
    let gw = gateway(&[], &text);
    assert_eq!(gw.translate("only one").await, UNEQUAL_PARAGRAPH_COUNT);

    let text = [Scripted::new("text", |id, _| Err(broken(id)))];
    let gw = gateway(&[], &text);
    assert_eq!(gw.translate("a\n\n%%\n\nb").await, FATAL);
}
