use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use imembed::error::{QueryError, UpsertError};
use imembed::index::{Datapoint, IndexClient, MemoryStore, Neighbor, QueryTarget, VectorStore};
use imembed::retry::RetryPolicy;
use rstest::*;

const INDEX: &str = "projects/p/locations/us-central1/indexes/flowers";
const DIM: usize = 4;

fn target() -> QueryTarget {
    QueryTarget::new("projects/p/locations/us-central1/indexEndpoints/e", "deployed_flowers")
}

fn dp(id: &str, embedding: [f32; DIM]) -> Datapoint {
    Datapoint { id: id.to_string(), embedding: embedding.to_vec() }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy { max_retries: 3, base_delay: Duration::from_millis(1) }
}

#[fixture]
async fn store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.create_index(INDEX, DIM).await.unwrap();
    store.deploy(target(), INDEX).await.unwrap();
    store
}

fn client(store: &Arc<MemoryStore>) -> IndexClient {
    IndexClient::new(store.clone(), DIM).with_retry(fast_retry())
}

#[rstest]
#[tokio::test]
async fn upsert_is_idempotent(#[future] store: Arc<MemoryStore>) {
    let store = store.await;
    let client = client(&store);

    client.upsert(INDEX, &[dp("daisy/a.jpg", [1., 0., 0., 0.])]).await.unwrap();
    client.upsert(INDEX, &[dp("daisy/a.jpg", [1., 0., 0., 0.])]).await.unwrap();
    assert_eq!(store.len(INDEX).await, Some(1));

    // 同一 id 再次写入，向量被替换
    client.upsert(INDEX, &[dp("daisy/a.jpg", [0., 1., 0., 0.])]).await.unwrap();
    assert_eq!(store.len(INDEX).await, Some(1));
    assert_eq!(store.get(INDEX, "daisy/a.jpg").await, Some(vec![0., 1., 0., 0.]));

    let result = client.query(&target(), &[0., 1., 0., 0.], 5).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, "daisy/a.jpg");
}

#[rstest]
#[tokio::test]
async fn overwrite_reuses_capacity(#[future] store: Arc<MemoryStore>) {
    let store = store.await;
    let client = client(&store);
    client.upsert(INDEX, &[dp("b", [0., 0., 1., 0.])]).await.unwrap();
    client.upsert(INDEX, &[dp("a", [1., 0., 0., 0.])]).await.unwrap();
    let capacity = store.capacity(INDEX).await.unwrap();

    for i in 0..200 {
        client.upsert(INDEX, &[dp("a", [1., i as f32, 0., 0.])]).await.unwrap();
    }
    assert_eq!(store.capacity(INDEX).await, Some(capacity));
    assert_eq!(store.len(INDEX).await, Some(2));
    assert_eq!(store.get(INDEX, "a").await, Some(vec![1., 199., 0., 0.]));

    let result = client.query(&target(), &[1., 199., 0., 0.], 5).await.unwrap();
    let ids: Vec<_> = result.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
    assert!(result[0].distance.abs() < 1e-3);
}

#[rstest]
#[tokio::test]
async fn query_returns_stored_vector_first(#[future] store: Arc<MemoryStore>) {
    let store = store.await;
    let client = client(&store);
    client
        .upsert(
            INDEX,
            &[
                dp("a", [1., 0., 0., 0.]),
                dp("b", [0., 1., 0., 0.]),
                dp("c", [0., 0., 1., 0.]),
                dp("d", [0.9, 0.1, 0., 0.]),
            ],
        )
        .await
        .unwrap();

    let result = client.query(&target(), &[1., 0., 0., 0.], 3).await.unwrap();
    assert_eq!(result.len(), 3);
    assert_eq!(result[0].id, "a");
    assert!(result[0].distance.abs() < 1e-6);
    assert_eq!(result[1].id, "d");
    assert!(result.windows(2).all(|w| w[0].distance <= w[1].distance));

    let result = client.query(&target(), &[1., 0., 0., 0.], 1).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, "a");
}

#[rstest]
#[case::fewer_than_k(2, 5, 2)]
#[case::more_than_k(6, 5, 5)]
#[case::exactly_k(5, 5, 5)]
#[tokio::test]
async fn result_size_is_min_of_k_and_count(
    #[future] store: Arc<MemoryStore>,
    #[case] count: usize,
    #[case] k: usize,
    #[case] expected: usize,
) {
    let store = store.await;
    let client = client(&store);
    let datapoints: Vec<_> = (0..count)
        .map(|i| Datapoint { id: format!("p{i}"), embedding: vec![i as f32, 1., 0., 0.] })
        .collect();
    client.upsert(INDEX, &datapoints).await.unwrap();

    let result = client.query(&target(), &[0., 1., 0., 0.], k).await.unwrap();
    assert_eq!(result.len(), expected);
    assert_eq!(result[0].id, "p0");
}

/// 记录调用次数的存储，用于确认校验发生在远程调用之前
#[derive(Default)]
struct CountingStore {
    upserts: AtomicUsize,
    queries: AtomicUsize,
    /// 前 n 次调用返回暂时性错误
    flaky: usize,
}

#[async_trait]
impl VectorStore for CountingStore {
    async fn upsert(&self, _index: &str, _datapoints: &[Datapoint]) -> Result<(), UpsertError> {
        let n = self.upserts.fetch_add(1, Ordering::SeqCst);
        if n < self.flaky {
            return Err(UpsertError::Transient("503".to_string()));
        }
        Ok(())
    }

    async fn query(
        &self,
        _target: &QueryTarget,
        _vector: &[f32],
        _k: usize,
    ) -> Result<Vec<Neighbor>, QueryError> {
        let n = self.queries.fetch_add(1, Ordering::SeqCst);
        if n < self.flaky {
            return Err(QueryError::Transient("503".to_string()));
        }
        Ok(vec![
            Neighbor { id: "far".to_string(), distance: 3. },
            Neighbor { id: "near".to_string(), distance: 0.5 },
        ])
    }
}

#[tokio::test]
async fn dimension_mismatch_never_reaches_store() {
    let store = Arc::new(CountingStore::default());
    let client = IndexClient::new(store.clone(), DIM).with_retry(fast_retry());

    let bad = Datapoint { id: "x".to_string(), embedding: vec![1.; DIM + 1] };
    let err = client.upsert(INDEX, &[bad]).await.unwrap_err();
    assert!(matches!(err, UpsertError::DimensionMismatch { expected: DIM, actual: 5, .. }));

    let err = client.query(&target(), &[1.; DIM - 1], 5).await.unwrap_err();
    assert!(matches!(err, QueryError::DimensionMismatch { .. }));

    assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
    assert_eq!(store.queries.load(Ordering::SeqCst), 0);
}

#[rstest]
#[case::empty_batch(vec![])]
#[case::empty_id(vec![Datapoint { id: String::new(), embedding: vec![0.; DIM] }])]
#[case::duplicate_ids(vec![
    Datapoint { id: "a".to_string(), embedding: vec![0.; DIM] },
    Datapoint { id: "a".to_string(), embedding: vec![1.; DIM] },
])]
#[tokio::test]
async fn invalid_batches_are_rejected(#[case] datapoints: Vec<Datapoint>) {
    let store = Arc::new(CountingStore::default());
    let client = IndexClient::new(store.clone(), DIM);
    let err = client.upsert(INDEX, &datapoints).await.unwrap_err();
    assert!(matches!(err, UpsertError::Invalid(_)));
    assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let store = Arc::new(CountingStore { flaky: 2, ..Default::default() });
    let client = IndexClient::new(store.clone(), DIM).with_retry(fast_retry());

    client.upsert(INDEX, &[dp("a", [0.; DIM])]).await.unwrap();
    assert_eq!(store.upserts.load(Ordering::SeqCst), 3);

    let result = client.query(&target(), &[0.; DIM], 1).await.unwrap();
    assert_eq!(store.queries.load(Ordering::SeqCst), 3);
    // 结果重新按距离排序并截断
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, "near");
}

#[tokio::test]
async fn retries_are_bounded() {
    let store = Arc::new(CountingStore { flaky: usize::MAX, ..Default::default() });
    let client = IndexClient::new(store.clone(), DIM).with_retry(fast_retry());

    let err = client.upsert(INDEX, &[dp("a", [0.; DIM])]).await.unwrap_err();
    assert!(matches!(err, UpsertError::Transient(_)));
    assert_eq!(store.upserts.load(Ordering::SeqCst), 4);
}

#[rstest]
#[tokio::test]
async fn unknown_index_and_deployment(#[future] store: Arc<MemoryStore>) {
    let store = store.await;
    let client = client(&store);

    let err = client.upsert("projects/p/indexes/missing", &[dp("a", [0.; DIM])]).await;
    assert!(matches!(err, Err(UpsertError::UnknownIndex(_))));

    let other = QueryTarget::new("projects/p/locations/l/indexEndpoints/e", "nope");
    let err = client.query(&other, &[0.; DIM], 5).await;
    assert!(matches!(err, Err(QueryError::Misconfigured(_))));
}

#[rstest]
#[tokio::test]
async fn zero_k_is_invalid(#[future] store: Arc<MemoryStore>) {
    let store = store.await;
    let err = client(&store).query(&target(), &[0.; DIM], 0).await;
    assert!(matches!(err, Err(QueryError::Invalid(_))));
}
