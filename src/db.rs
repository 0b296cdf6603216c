//! Player persistence
//!
//! SQLite through `sqlx`. Only the player table lives here: display name,
//! colour and the best score ever reached.

use rand::Rng;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

/// Persisted player row
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PlayerRecord {
    pub id: i64,
    pub name: String,
    pub best_score: i64,
    pub color: i32,
}

/// Connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (creating if missing) the database at `url`
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let in_memory = url.contains(":memory:");
        let url = if in_memory || url.contains("mode=") {
            url.to_string()
        } else if url.contains('?') {
            format!("{}&mode=rwc", url)
        } else {
            format!("{}?mode=rwc", url)
        };

        // Every pooled connection to an in-memory database would get its own
        // empty database, so keep exactly one alive forever
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(&url).await?;
        Ok(Self { pool })
    }

    /// Database file under the server's data directory
    pub fn url_for_data_dir(data_dir: &std::path::Path) -> String {
        format!("sqlite:{}", data_dir.join("db.sqlite").display())
    }

    /// Create the schema if it does not exist yet
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS players (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                best_score INTEGER NOT NULL DEFAULT 0,
                color INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_players_best_score ON players(best_score DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Load the player called `name`, creating it with a random colour on
    /// first sight
    pub async fn get_or_create_player(&self, name: &str) -> Result<PlayerRecord, sqlx::Error> {
        let color = random_color();

        sqlx::query("INSERT INTO players (name, best_score, color) VALUES (?, 0, ?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .bind(color)
            .execute(&self.pool)
            .await?;

        sqlx::query_as::<_, PlayerRecord>(
            "SELECT id, name, best_score, color FROM players WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_player(&self, id: i64) -> Result<Option<PlayerRecord>, sqlx::Error> {
        sqlx::query_as::<_, PlayerRecord>(
            "SELECT id, name, best_score, color FROM players WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Raise a player's best score. Lower or equal scores leave the row
    /// untouched, so repeating a call is harmless. Returns whether the row
    /// changed.
    pub async fn update_player_best_score(&self, id: i64, best_score: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE players SET best_score = ? WHERE id = ? AND best_score < ?")
            .bind(best_score)
            .bind(id)
            .bind(best_score)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Highest best scores first
    pub async fn top_scores(&self, limit: i64) -> Result<Vec<PlayerRecord>, sqlx::Error> {
        sqlx::query_as::<_, PlayerRecord>(
            "SELECT id, name, best_score, color FROM players ORDER BY best_score DESC, id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

/// Random opaque RGB colour
fn random_color() -> i32 {
    rand::thread_rng().gen_range(0..=0xff_ffff)
}
