use crate::db::*;
use crate::types::RetrievalJobId;
use tempfile::NamedTempFile;

/// Querying after the pool is closed returns an error instead of hanging.
#[tokio::test]
async fn test_get_retrieval_job_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let result = db.get_retrieval_job(RetrievalJobId::new()).await;
    assert!(
        result.is_err(),
        "get_retrieval_job after pool close should return an error, got: {:?}",
        result
    );
}
