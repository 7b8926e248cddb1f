//! SQLite persistence for users, preferences, portfolios and instruments.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{Instrument, InstrumentType, Portfolio, UserPreferences, UserProfile};

/// Cloneable handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Partial update for user preferences; absent fields keep their value.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    pub language: Option<String>,
    pub theme: Option<String>,
    pub dashboard_order: Option<Vec<String>>,
    pub market_indexes: Option<Vec<String>>,
}

impl Database {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // WAL for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id TEXT PRIMARY KEY,
                language TEXT NOT NULL DEFAULT 'en',
                theme TEXT NOT NULL DEFAULT 'light',
                dashboard_order TEXT NOT NULL DEFAULT '[]',
                market_indexes TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS portfolios (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                use_custom_weights INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS instruments (
                id TEXT PRIMARY KEY,
                portfolio_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                name TEXT NOT NULL,
                instrument_type TEXT NOT NULL,
                sector TEXT,
                weight REAL,
                added_at TEXT NOT NULL,
                UNIQUE(portfolio_id, symbol),
                FOREIGN KEY (portfolio_id) REFERENCES portfolios(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_portfolios_user ON portfolios(user_id);
            CREATE INDEX IF NOT EXISTS idx_instruments_portfolio ON instruments(portfolio_id);
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ── Users ────────────────────────────────────────────────────────────

    pub fn create_user(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<UserProfile> {
        let now = Utc::now();
        let user = UserProfile {
            id: Uuid::new_v4().to_string(),
            email: email.to_lowercase(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            created_at: now,
            updated_at: now,
        };
        let password_hash = hash_password(password)?;

        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, first_name, last_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.email,
                password_hash,
                user.first_name,
                user.last_name,
                user.created_at,
                user.updated_at
            ],
        )?;
        // Every user gets a preferences row up front
        let prefs = UserPreferences::default();
        conn.execute(
            "INSERT OR IGNORE INTO user_preferences (user_id, language, theme, dashboard_order, market_indexes, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id,
                prefs.language,
                prefs.theme,
                serde_json::to_string(&prefs.dashboard_order)?,
                serde_json::to_string(&prefs.market_indexes)?,
                prefs.updated_at
            ],
        )?;

        Ok(user)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        let conn = self.lock();
        let user = conn
            .query_row(
                "SELECT id, email, first_name, last_name, created_at, updated_at
                 FROM users WHERE email = ?1",
                [email.to_lowercase()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserProfile>> {
        let conn = self.lock();
        let user = conn
            .query_row(
                "SELECT id, email, first_name, last_name, created_at, updated_at
                 FROM users WHERE id = ?1",
                [id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Verify credentials; returns the user on success, None on mismatch.
    pub fn verify_password(&self, email: &str, password: &str) -> Result<Option<UserProfile>> {
        let stored: Option<(String, String)> = {
            let conn = self.lock();
            conn.query_row(
                "SELECT id, password_hash FROM users WHERE email = ?1",
                [email.to_lowercase()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let Some((id, hash)) = stored else {
            return Ok(None);
        };
        if !verify_password(password, &hash)? {
            return Ok(None);
        }
        self.get_user(&id)
    }

    pub fn update_profile(
        &self,
        user_id: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<Option<UserProfile>> {
        {
            let conn = self.lock();
            conn.execute(
                "UPDATE users SET
                    first_name = COALESCE(?2, first_name),
                    last_name = COALESCE(?3, last_name),
                    updated_at = ?4
                 WHERE id = ?1",
                params![user_id, first_name, last_name, Utc::now()],
            )?;
        }
        self.get_user(user_id)
    }

    // ── Preferences ──────────────────────────────────────────────────────

    pub fn get_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        let conn = self.lock();
        let prefs = conn
            .query_row(
                "SELECT language, theme, dashboard_order, market_indexes, updated_at
                 FROM user_preferences WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, DateTime<Utc>>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(prefs.map(|(language, theme, order, indexes, updated_at)| UserPreferences {
            language,
            theme,
            dashboard_order: serde_json::from_str(&order).unwrap_or_default(),
            market_indexes: serde_json::from_str(&indexes).unwrap_or_default(),
            updated_at,
        }))
    }

    pub fn update_preferences(
        &self,
        user_id: &str,
        update: &PreferencesUpdate,
    ) -> Result<Option<UserPreferences>> {
        let dashboard_order = update
            .dashboard_order
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let market_indexes = update
            .market_indexes
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        {
            let conn = self.lock();
            conn.execute(
                "UPDATE user_preferences SET
                    language = COALESCE(?2, language),
                    theme = COALESCE(?3, theme),
                    dashboard_order = COALESCE(?4, dashboard_order),
                    market_indexes = COALESCE(?5, market_indexes),
                    updated_at = ?6
                 WHERE user_id = ?1",
                params![
                    user_id,
                    update.language,
                    update.theme,
                    dashboard_order,
                    market_indexes,
                    Utc::now()
                ],
            )?;
        }
        self.get_preferences(user_id)
    }

    // ── Portfolios ───────────────────────────────────────────────────────

    pub fn create_portfolio(&self, user_id: &str, name: &str, is_active: bool) -> Result<Portfolio> {
        let mut portfolio = Portfolio::new(user_id, name.to_string());
        portfolio.is_active = is_active;

        let conn = self.lock();
        conn.execute(
            "INSERT INTO portfolios (id, user_id, name, is_active, use_custom_weights, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                portfolio.id,
                portfolio.user_id,
                portfolio.name,
                portfolio.is_active,
                portfolio.use_custom_weights,
                portfolio.created_at,
                portfolio.updated_at
            ],
        )?;
        Ok(portfolio)
    }

    pub fn list_portfolios(&self, user_id: &str) -> Result<Vec<Portfolio>> {
        let mut portfolios = {
            let conn = self.lock();
            let mut stmt = conn.prepare(
                "SELECT id, user_id, name, is_active, use_custom_weights, created_at, updated_at
                 FROM portfolios WHERE user_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map([user_id], row_to_portfolio)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        for portfolio in &mut portfolios {
            portfolio.instruments = self.list_instruments(&portfolio.id)?;
        }
        Ok(portfolios)
    }

    pub fn get_portfolio(&self, id: &str) -> Result<Option<Portfolio>> {
        let portfolio = {
            let conn = self.lock();
            conn.query_row(
                "SELECT id, user_id, name, is_active, use_custom_weights, created_at, updated_at
                 FROM portfolios WHERE id = ?1",
                [id],
                row_to_portfolio,
            )
            .optional()?
        };

        match portfolio {
            Some(mut p) => {
                p.instruments = self.list_instruments(&p.id)?;
                Ok(Some(p))
            }
            None => Ok(None),
        }
    }

    pub fn update_portfolio(
        &self,
        id: &str,
        name: Option<&str>,
        use_custom_weights: Option<bool>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE portfolios SET
                name = COALESCE(?2, name),
                use_custom_weights = COALESCE(?3, use_custom_weights),
                updated_at = ?4
             WHERE id = ?1",
            params![id, name, use_custom_weights, Utc::now()],
        )?;
        Ok(())
    }

    pub fn delete_portfolio(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        let affected = conn.execute("DELETE FROM portfolios WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    /// Deactivate all of the user's portfolios, then activate the given one.
    /// Last write wins.
    pub fn set_active_portfolio(&self, user_id: &str, portfolio_id: Option<&str>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE portfolios SET is_active = 0 WHERE user_id = ?1",
            [user_id],
        )?;
        if let Some(id) = portfolio_id {
            conn.execute(
                "UPDATE portfolios SET is_active = 1 WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
        }
        Ok(())
    }

    // ── Instruments ──────────────────────────────────────────────────────

    pub fn list_instruments(&self, portfolio_id: &str) -> Result<Vec<Instrument>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol, name, instrument_type, sector, weight, added_at
             FROM instruments WHERE portfolio_id = ?1 ORDER BY added_at",
        )?;
        let rows = stmt.query_map([portfolio_id], row_to_instrument)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Insert an instrument; returns false when the symbol is already present.
    pub fn add_instrument(&self, portfolio_id: &str, instrument: &Instrument) -> Result<bool> {
        let conn = self.lock();
        let result = conn.execute(
            "INSERT OR IGNORE INTO instruments
                (id, portfolio_id, symbol, name, instrument_type, sector, weight, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Uuid::new_v4().to_string(),
                portfolio_id,
                instrument.symbol,
                instrument.name,
                instrument.instrument_type.as_str(),
                instrument.sector,
                instrument.weight,
                instrument.added_at
            ],
        )?;
        if result > 0 {
            conn.execute(
                "UPDATE portfolios SET updated_at = ?2 WHERE id = ?1",
                params![portfolio_id, Utc::now()],
            )?;
        }
        Ok(result > 0)
    }

    pub fn remove_instrument(&self, portfolio_id: &str, symbol: &str) -> Result<bool> {
        let conn = self.lock();
        let affected = conn.execute(
            "DELETE FROM instruments WHERE portfolio_id = ?1 AND symbol = ?2",
            params![portfolio_id, symbol],
        )?;
        Ok(affected > 0)
    }

    pub fn update_instrument_weight(
        &self,
        portfolio_id: &str,
        symbol: &str,
        weight: Option<f64>,
    ) -> Result<bool> {
        let conn = self.lock();
        let affected = conn.execute(
            "UPDATE instruments SET weight = ?3 WHERE portfolio_id = ?1 AND symbol = ?2",
            params![portfolio_id, symbol, weight],
        )?;
        Ok(affected > 0)
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_portfolio(row: &rusqlite::Row<'_>) -> rusqlite::Result<Portfolio> {
    Ok(Portfolio {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        is_active: row.get(3)?,
        use_custom_weights: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        instruments: vec![],
    })
}

fn row_to_instrument(row: &rusqlite::Row<'_>) -> rusqlite::Result<Instrument> {
    let type_str: String = row.get(2)?;
    Ok(Instrument {
        symbol: row.get(0)?,
        name: row.get(1)?,
        instrument_type: InstrumentType::from_str(&type_str).unwrap_or(InstrumentType::Stock),
        sector: row.get(3)?,
        weight: row.get(4)?,
        added_at: row.get(5)?,
    })
}

// ── Password hashing ─────────────────────────────────────────────────────

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("invalid password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn sample_instrument(symbol: &str) -> Instrument {
        Instrument {
            symbol: symbol.to_string(),
            name: format!("{} Inc.", symbol),
            instrument_type: InstrumentType::Stock,
            sector: Some("Technology".to_string()),
            weight: None,
            added_at: Utc::now(),
        }
    }

    #[test]
    fn user_roundtrip_and_password_verification() {
        let db = test_db();
        let user = db
            .create_user("Alice@Example.com", "hunter22", "Alice", "Smith")
            .unwrap();
        assert_eq!(user.email, "alice@example.com");

        // preferences created alongside the user
        let prefs = db.get_preferences(&user.id).unwrap().unwrap();
        assert_eq!(prefs.language, "en");

        assert!(db.verify_password("alice@example.com", "hunter22").unwrap().is_some());
        assert!(db.verify_password("alice@example.com", "wrong").unwrap().is_none());
        assert!(db.verify_password("nobody@example.com", "hunter22").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_rejected() {
        let db = test_db();
        db.create_user("a@b.c", "pw", "A", "B").unwrap();
        assert!(db.create_user("a@b.c", "pw", "A", "B").is_err());
    }

    #[test]
    fn portfolio_crud_and_instrument_uniqueness() {
        let db = test_db();
        let user = db.create_user("a@b.c", "pw", "A", "B").unwrap();
        let portfolio = db.create_portfolio(&user.id, "Growth", true).unwrap();

        assert!(db.add_instrument(&portfolio.id, &sample_instrument("AAPL")).unwrap());
        assert!(db.add_instrument(&portfolio.id, &sample_instrument("MSFT")).unwrap());
        // same symbol twice is a no-op
        assert!(!db.add_instrument(&portfolio.id, &sample_instrument("AAPL")).unwrap());

        let loaded = db.get_portfolio(&portfolio.id).unwrap().unwrap();
        assert_eq!(loaded.instruments.len(), 2);

        assert!(db.update_instrument_weight(&portfolio.id, "AAPL", Some(60.0)).unwrap());
        assert!(db.remove_instrument(&portfolio.id, "MSFT").unwrap());
        assert!(!db.remove_instrument(&portfolio.id, "MSFT").unwrap());

        // cascade delete removes instruments
        assert!(db.delete_portfolio(&portfolio.id).unwrap());
        assert!(db.get_portfolio(&portfolio.id).unwrap().is_none());
    }

    #[test]
    fn only_one_active_portfolio() {
        let db = test_db();
        let user = db.create_user("a@b.c", "pw", "A", "B").unwrap();
        let first = db.create_portfolio(&user.id, "First", true).unwrap();
        let second = db.create_portfolio(&user.id, "Second", false).unwrap();

        db.set_active_portfolio(&user.id, Some(&second.id)).unwrap();

        let portfolios = db.list_portfolios(&user.id).unwrap();
        let active: Vec<_> = portfolios.iter().filter(|p| p.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert!(!portfolios.iter().find(|p| p.id == first.id).unwrap().is_active);
    }

    #[test]
    fn preferences_partial_update() {
        let db = test_db();
        let user = db.create_user("a@b.c", "pw", "A", "B").unwrap();

        let update = PreferencesUpdate {
            theme: Some("dark".to_string()),
            dashboard_order: Some(vec!["chart".into(), "metrics".into()]),
            ..Default::default()
        };
        let prefs = db.update_preferences(&user.id, &update).unwrap().unwrap();
        assert_eq!(prefs.theme, "dark");
        assert_eq!(prefs.language, "en"); // untouched
        assert_eq!(prefs.dashboard_order, vec!["chart", "metrics"]);
    }
}
