//! Database module for scene and routine persistence.
//!
//! Uses SQLx with SQLite for lightweight, embedded storage. Full CRUD for
//! scenes/routines is out of scope (spec §1) — this module only exposes
//! what the scheduler needs to read, plus minimal inserts for seeding.
//!
//! # Example
//!
//! ```ignore
//! use garden_music::db::{init_db, list_routines};
//!
//! let pool = init_db("sqlite:garden_music.db").await?;
//! let routines = list_routines(&pool).await?;
//! ```

use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::Result;
use crate::model::{Routine, Scene};

/// Build a SQLite database URL from a path.
pub fn db_url(path: &std::path::Path) -> String {
    format!("sqlite:{}", path.display())
}

/// Initialize the database connection pool and run migrations.
pub async fn init_db(db_url: &str) -> Result<SqlitePool> {
    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| crate::error::Error::config(format!("migration failed: {e}")))?;

    Ok(pool)
}

/// List all routines, ordered by id.
///
/// Enumeration order is unspecified by the data model (spec §4.3, §9 open
/// question 3); this crate stabilizes it as `ORDER BY id ASC` so that
/// overlapping routines resolve deterministically and callers can reason
/// about "first match wins" in terms of creation order.
pub async fn list_routines(pool: &SqlitePool) -> Result<Vec<Routine>> {
    sqlx::query_as::<_, Routine>(
        "SELECT id, scene_id, start_time, end_time, weekdays, months, volume \
         FROM routines ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

/// Fetch a scene by id.
pub async fn get_scene(pool: &SqlitePool, scene_id: i64) -> Result<Option<Scene>> {
    sqlx::query_as::<_, Scene>("SELECT id, name, path FROM scenes WHERE id = ?")
        .bind(scene_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
}

/// Insert a scene, returning its id. Used by the CLI's `seed` command and
/// by tests; there is no update/delete surface here by design (spec §1).
pub async fn insert_scene(pool: &SqlitePool, name: &str, path: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO scenes (name, path) VALUES (?, ?)")
        .bind(name)
        .bind(path)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Insert a routine, returning its id.
#[allow(clippy::too_many_arguments)]
pub async fn insert_routine(
    pool: &SqlitePool,
    scene_id: i64,
    start_time: &str,
    end_time: &str,
    weekdays: Option<&str>,
    months: Option<&str>,
    volume: i64,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO routines (scene_id, start_time, end_time, weekdays, months, volume) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(scene_id)
    .bind(start_time)
    .bind(end_time)
    .bind(weekdays)
    .bind(months)
    .bind(volume)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        init_db("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_list_routines_in_id_order() {
        let pool = memory_pool().await;
        let scene_id = insert_scene(&pool, "patio", "/music/patio").await.unwrap();
        insert_routine(&pool, scene_id, "08:00", "10:00", None, None, 50)
            .await
            .unwrap();
        insert_routine(&pool, scene_id, "10:00", "12:00", Some("mon,tue"), None, 70)
            .await
            .unwrap();

        let routines = list_routines(&pool).await.unwrap();
        assert_eq!(routines.len(), 2);
        assert!(routines[0].id < routines[1].id);
        assert_eq!(routines[1].weekdays.as_deref(), Some("mon,tue"));
    }

    #[tokio::test]
    async fn get_scene_roundtrip() {
        let pool = memory_pool().await;
        let id = insert_scene(&pool, "hall", "/music/hall").await.unwrap();
        let scene = get_scene(&pool, id).await.unwrap().unwrap();
        assert_eq!(scene.name, "hall");
        assert_eq!(scene.path, "/music/hall");
    }
}
