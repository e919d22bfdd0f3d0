use std::sync::Arc;

use report_embedder::db;
use report_embedder::migrate;
use report_embedder::sqlite_store::{NewBlock, SqliteMaterialStore};
use report_embedder_core::materializer::{BatchMaterializer, CancelFlag, MaterializerConfig, NoProgress};
use report_embedder_core::models::{BlockKind, VectorWrite};
use report_embedder_core::store::{MaterialStore, PendingQuery};
use tempfile::TempDir;

use report_embedder::config::EmbeddingConfig;
use report_embedder::embedding::HashVectorizer;

async fn open_store(tmp: &TempDir) -> SqliteMaterialStore {
    let pool = db::connect_path(&tmp.path().join("data/test.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    SqliteMaterialStore::new(pool).with_model("hash")
}

fn block(kind: BlockKind, path: Option<&str>, content: &str) -> NewBlock {
    NewBlock {
        kind,
        section_path: path.map(str::to_string),
        content: content.to_string(),
    }
}

fn write(block_id: i64) -> VectorWrite {
    VectorWrite {
        block_id,
        vector: vec![0.6, 0.8],
        context_injected: true,
    }
}

#[tokio::test]
async fn insert_report_is_unique_by_source_id() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let blocks = vec![block(BlockKind::Text, Some("I"), "a")];

    let first = store.insert_report("r-1", Some("R"), &blocks).await.unwrap();
    assert!(first.is_some());
    assert!(store.report_exists("r-1").await.unwrap());

    let second = store.insert_report("r-1", Some("R"), &blocks).await.unwrap();
    assert!(second.is_none());
    assert_eq!(store.counts().await.unwrap().blocks, 1);
}

#[tokio::test]
async fn pending_is_ordered_and_predecessor_is_immediate() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let report_b = store
        .insert_report(
            "b",
            None,
            &[
                block(BlockKind::Text, Some("I"), "b0"),
                block(BlockKind::Table, Some("I"), "b1"),
            ],
        )
        .await
        .unwrap()
        .unwrap();
    let report_a = store
        .insert_report(
            "a",
            None,
            &[
                block(BlockKind::Text, None, "a0"),
                block(BlockKind::Text, None, "a1"),
                block(BlockKind::Table, None, "a2"),
            ],
        )
        .await
        .unwrap()
        .unwrap();

    let pending = store.fetch_pending(&PendingQuery::all()).await.unwrap();
    let contents: Vec<_> = pending.iter().map(|b| b.raw_content.as_str()).collect();
    assert!(report_b < report_a);
    assert_eq!(contents, vec!["b0", "b1", "a0", "a1", "a2"]);

    let prev = store.fetch_predecessor(report_a, 2).await.unwrap().unwrap();
    assert_eq!(prev.raw_content, "a1");
    assert!(prev.section_path.is_none());
    assert!(store.fetch_predecessor(report_a, 0).await.unwrap().is_none());

    let limited = store
        .fetch_pending(&PendingQuery {
            document_id: Some(report_a),
            limit: Some(2),
            force: false,
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].raw_content, "a0");
}

#[tokio::test]
async fn batch_rollback_leaves_no_vectors() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store
        .insert_report(
            "r",
            None,
            &[
                block(BlockKind::Text, None, "x"),
                block(BlockKind::Table, None, "y"),
            ],
        )
        .await
        .unwrap();
    let pending = store.fetch_pending(&PendingQuery::all()).await.unwrap();

    let mut tx = store.begin_batch().await.unwrap();
    tx.write_vector(&write(pending[0].id)).await.unwrap();
    assert!(tx.write_vector(&write(9_999)).await.is_err());
    tx.rollback().await.unwrap();

    assert!(store.vector(pending[0].id).await.unwrap().is_none());
    assert_eq!(store.fetch_pending(&PendingQuery::all()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn committed_batch_sets_vector_and_flag_together() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store
        .insert_report("r", None, &[block(BlockKind::Table, None, "y")])
        .await
        .unwrap();
    let pending = store.fetch_pending(&PendingQuery::all()).await.unwrap();
    let id = pending[0].id;

    store.write_vector(&write(id)).await.unwrap();

    assert_eq!(store.vector(id).await.unwrap(), Some(vec![0.6, 0.8]));
    assert_eq!(store.context_injected(id).await.unwrap(), Some(true));
    assert!(store.fetch_pending(&PendingQuery::all()).await.unwrap().is_empty());
    let counts = store.counts().await.unwrap();
    assert_eq!(counts.embedded, 1);
    assert_eq!(counts.context_injected, 1);
    assert_eq!(counts.table_blocks, 1);
}

#[tokio::test]
async fn materializer_over_sqlite_injects_context() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store
        .insert_report(
            "r",
            None,
            &[
                block(BlockKind::Text, Some("II > 1"), "Unit: KRW million"),
                block(BlockKind::Table, Some("II > 1"), "| year | revenue |"),
                block(BlockKind::Text, Some("II > 2"), "Products"),
                block(BlockKind::Table, Some("II > 3"), "| product | share |"),
            ],
        )
        .await
        .unwrap();
    let ids: Vec<i64> = store
        .fetch_pending(&PendingQuery::all())
        .await
        .unwrap()
        .iter()
        .map(|b| b.id)
        .collect();

    let vectorizer = HashVectorizer::new(&EmbeddingConfig {
        provider: "hash".to_string(),
        dims: Some(16),
        ..Default::default()
    })
    .unwrap();
    let store = Arc::new(store);
    let materializer = BatchMaterializer::new(
        store.clone(),
        Arc::new(vectorizer),
        MaterializerConfig {
            batch_size: 3,
            batch_pause: std::time::Duration::ZERO,
            ..Default::default()
        },
    );
    let stats = materializer
        .run(&PendingQuery::all(), &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(stats.processed, 4);
    assert_eq!(stats.table_with_context, 1);
    assert_eq!(store.context_injected(ids[1]).await.unwrap(), Some(true));
    assert_eq!(store.context_injected(ids[3]).await.unwrap(), Some(false));
    assert_eq!(store.vector(ids[0]).await.unwrap().unwrap().len(), 16);
}
