use crate::schema::{SCHEMA, SCHEMA_VERSION};
use cardvault_core::{CollectionConfig, Deck, Error, Result, DEFAULT_DECK_ID};
use chrono::Utc;
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;

/// Owner of the database handle. All mutating access goes through
/// [`Store::transaction`], which holds the single write slot; read-only
/// queries run directly against the pool and may overlap each other.
#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    write_slot: Mutex<()>,
}

impl Store {
    /// Open or create the collection file at `path`.
    ///
    /// A structurally damaged file surfaces as
    /// [`Error::CorruptDatabase`] and is left on disk untouched; whether
    /// to restore from backup is the caller's decision, never ours.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening collection store");
        let opts = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            path.to_string_lossy()
        ))
        .map_err(db_err)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(db_err)?;
        let store = Self { pool, write_slot: Mutex::new(()) };
        store.probe_integrity().await?;
        store.ensure_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self { pool, write_slot: Mutex::new(()) };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Release the handle. Pending reads fail afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// A structural read over the whole file. Damaged pages come back as
    /// `SQLITE_CORRUPT`/`SQLITE_NOTADB`, which `db_err` maps to the
    /// distinguishable corruption condition.
    async fn probe_integrity(&self) -> Result<()> {
        let verdict: String = sqlx::query_scalar("PRAGMA quick_check(1)")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        if verdict != "ok" {
            return Err(Error::CorruptDatabase(verdict));
        }
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        // Execute statements one by one for compatibility.
        for chunk in SCHEMA.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql).execute(&self.pool).await.map_err(db_err)?;
        }
        let have_col: i64 = sqlx::query_scalar("SELECT count(*) FROM col")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        if have_col == 0 {
            self.init_col_row().await?;
        }
        let have_meta: i64 = sqlx::query_scalar("SELECT count(*) FROM media_meta")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        if have_meta == 0 {
            sqlx::query("INSERT INTO media_meta (dir_mod) VALUES (0)")
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    /// First-open initialization: creation timestamp anchored at the
    /// start of today so review due-days stay stable across clock
    /// changes, a default deck, and default config.
    async fn init_col_row(&self) -> Result<()> {
        let now = Utc::now();
        let crt = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap_or_else(|| now.naive_utc())
            .and_utc()
            .timestamp();
        let mut default_deck = Deck::new("Default");
        default_deck.id = DEFAULT_DECK_ID;
        default_deck.usn = 0;
        let mut decks = HashMap::new();
        decks.insert(DEFAULT_DECK_ID.to_string(), default_deck);
        let conf = serde_json::to_string(&CollectionConfig::default())?;
        sqlx::query(
            "INSERT INTO col (id, crt, mod, scm, ver, dty, usn, ls, conf, models, decks, dconf, tags)
             VALUES (1, ?, ?, ?, ?, 0, 0, 0, ?, '{}', ?, '{}', '{}')",
        )
        .bind(crt)
        .bind(now.timestamp())
        .bind(now.timestamp_millis())
        .bind(SCHEMA_VERSION)
        .bind(conf)
        .bind(serde_json::to_string(&decks)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Run `f` inside a single atomic write transaction.
    ///
    /// The write slot is acquired with `try_lock`, so a nested (or
    /// concurrent) `transaction` call fails fast with
    /// [`Error::NestedTransaction`] instead of deadlocking. On any error
    /// from `f` every write is rolled back and the error propagates; on
    /// success the transaction commits exactly once.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let _slot = self
            .write_slot
            .try_lock()
            .map_err(|_| Error::NestedTransaction)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        match f(&mut *tx).await {
            Ok(value) => {
                tx.commit().await.map_err(db_err)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Read a single scalar value.
    pub async fn scalar<T>(&self, sql: &str) -> Result<T>
    where
        T: Send + Unpin + for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    /// Read a list of rows mapped through `f`.
    pub async fn list<T, F>(&self, sql: &str, f: F) -> Result<Vec<T>>
    where
        F: Fn(SqliteRow) -> Result<T>,
    {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(f).collect()
    }

    /// Current update sequence number.
    pub async fn usn(&self) -> Result<i64> {
        self.scalar("SELECT usn FROM col").await
    }
}

/// Bump the collection's USN inside an open transaction. Called exactly
/// once per logical mutating operation.
pub async fn bump_usn(conn: &mut SqliteConnection) -> Result<i64> {
    sqlx::query("UPDATE col SET usn = usn + 1, mod = ?")
        .bind(Utc::now().timestamp())
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    let usn: i64 = sqlx::query_scalar("SELECT usn FROM col")
        .fetch_one(conn)
        .await
        .map_err(db_err)?;
    Ok(usn)
}

/// Map driver errors into the workspace taxonomy. Corruption
/// (`SQLITE_CORRUPT` 11, `SQLITE_NOTADB` 26) is fatal to the handle;
/// constraint violations are recoverable and reported to the caller.
pub fn db_err(e: sqlx::Error) -> Error {
    if let sqlx::Error::Database(ref dbe) = e {
        let code = dbe.code().map(|c| c.into_owned()).unwrap_or_default();
        let msg = dbe.message().to_string();
        if code == "11"
            || code == "26"
            || msg.contains("malformed")
            || msg.contains("not a database")
        {
            return Error::CorruptDatabase(msg);
        }
        use sqlx::error::ErrorKind;
        match dbe.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => return Error::ConstraintViolation(msg),
            _ => {}
        }
        if code == "19" {
            return Error::ConstraintViolation(msg);
        }
    }
    Error::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_with_default_deck_and_usn_zero() {
        let store = Store::open_memory().await.unwrap();
        assert_eq!(store.usn().await.unwrap(), 0);
        let decks: String = store.scalar("SELECT decks FROM col").await.unwrap();
        assert!(decks.contains("Default"));
    }

    #[tokio::test]
    async fn nested_transaction_fails_fast() {
        let store = Store::open_memory().await.unwrap();
        let _slot = store.write_slot.try_lock().unwrap();
        let err = store
            .transaction(|_conn| Box::pin(async { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NestedTransaction));
    }
}
