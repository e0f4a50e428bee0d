use cardvault_core::Error;
use cardvault_store::{bump_usn, Store};

#[tokio::test]
async fn create_and_reopen_collection_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("collection.anki2");
    {
        let store = Store::open(&path).await.unwrap();
        assert_eq!(store.usn().await.unwrap(), 0);
        store.close().await;
    }
    let store = Store::open(&path).await.unwrap();
    let crt: i64 = store.scalar("SELECT crt FROM col").await.unwrap();
    assert!(crt > 0);
    store.close().await;
}

#[tokio::test]
async fn random_bytes_surface_as_corrupt_and_file_survives() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("collection.anki2");
    let garbage: Vec<u8> = (0..4096u64).map(|i| (i * 2654435761 % 251) as u8).collect();
    std::fs::write(&path, &garbage).unwrap();

    let err = Store::open(&path).await.unwrap_err();
    assert!(
        matches!(err, Error::CorruptDatabase(_)),
        "expected CorruptDatabase, got {err:?}"
    );
    // The damaged file must be left in place for the caller to restore.
    assert_eq!(std::fs::read(&path).unwrap(), garbage);
}

#[tokio::test]
async fn transaction_rolls_back_on_error() {
    let store = Store::open_memory().await.unwrap();
    let result: Result<(), Error> = store
        .transaction(|conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO graves (usn, oid, type) VALUES (1, 42, 0)")
                    .execute(&mut *conn)
                    .await
                    .map_err(cardvault_store::db_err)?;
                Err(Error::Invalid("forced failure"))
            })
        })
        .await;
    assert!(result.is_err());
    let count: i64 = store.scalar("SELECT count(*) FROM graves").await.unwrap();
    assert_eq!(count, 0, "failed transaction must leave no writes behind");
}

#[tokio::test]
async fn transaction_commits_and_bumps_usn_once() {
    let store = Store::open_memory().await.unwrap();
    store
        .transaction(|conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO graves (usn, oid, type) VALUES (1, 42, 0)")
                    .execute(&mut *conn)
                    .await
                    .map_err(cardvault_store::db_err)?;
                bump_usn(conn).await?;
                Ok(())
            })
        })
        .await
        .unwrap();
    assert_eq!(store.usn().await.unwrap(), 1);
    let count: i64 = store.scalar("SELECT count(*) FROM graves").await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn constraint_violation_keeps_handle_usable() {
    let store = Store::open_memory().await.unwrap();
    let dup = store
        .transaction(|conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO media (fname, csum, mtime, dirty) VALUES ('a.jpg', 'x', 1, 0)")
                    .execute(&mut *conn)
                    .await
                    .map_err(cardvault_store::db_err)?;
                sqlx::query("INSERT INTO media (fname, csum, mtime, dirty) VALUES ('a.jpg', 'y', 2, 0)")
                    .execute(&mut *conn)
                    .await
                    .map_err(cardvault_store::db_err)?;
                Ok(())
            })
        })
        .await;
    assert!(matches!(dup, Err(Error::ConstraintViolation(_))));
    // The handle is still good for ordinary work.
    assert_eq!(store.usn().await.unwrap(), 0);
}
