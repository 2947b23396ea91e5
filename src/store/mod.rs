//! SQLite-backed storage for named parameter sets and their saved series.
//!
//! The engine never touches storage; the API layer loads parameters from here, runs the
//! optimizer and writes the resulting series back.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::core::{OptimizationParameters, PeriodState};
use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = include_str!("schema.sql");

const ESTIMATOR_COLUMNS: &str = "id, user_id, name, initial_capital, annual_return, discount_rate, \
     risk_aversion, life_expectancy, current_age, inheritance_target, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorDraft {
    pub name: Option<String>,
    pub params: OptimizationParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimator {
    pub id: String,
    pub user_id: String,
    pub name: Option<String>,
    #[serde(flatten)]
    pub params: OptimizationParameters,
    pub created_at: String,
    pub updated_at: String,
}

/// One saved row of an optimization series. Infeasible utility is stored as NULL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub period: u32,
    pub age: u32,
    pub capital: f64,
    pub consumption: f64,
    pub utility: Option<f64>,
}

impl From<&PeriodState> for SeriesPoint {
    fn from(p: &PeriodState) -> Self {
        Self {
            period: p.period,
            age: p.age,
            capital: p.wealth,
            consumption: p.consumption,
            utility: p.utility.is_finite().then_some(p.utility),
        }
    }
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        tracing::info!("database initialized at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn create_profile(
        &self,
        id: &str,
        email: &str,
        full_name: Option<&str>,
    ) -> StoreResult<Profile> {
        let profile = Profile {
            id: id.to_string(),
            email: email.to_string(),
            full_name: full_name.map(str::to_string),
            created_at: now(),
        };
        self.lock()?
            .execute(
                "INSERT INTO profiles (id, email, full_name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![profile.id, profile.email, profile.full_name, profile.created_at],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("profile {id} already exists"))
                }
                other => other,
            })?;
        Ok(profile)
    }

    pub fn get_profile(&self, id: &str) -> StoreResult<Profile> {
        self.lock()?
            .query_row(
                "SELECT id, email, full_name, created_at FROM profiles WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Profile {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        full_name: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("profile {id}")))
    }

    pub fn create_estimator(&self, user_id: &str, draft: &EstimatorDraft) -> StoreResult<Estimator> {
        let created_at = now();
        let estimator = Estimator {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: draft.name.clone(),
            params: draft.params,
            updated_at: created_at.clone(),
            created_at,
        };
        let p = &estimator.params;
        self.lock()?.execute(
            &format!(
                "INSERT INTO estimators ({ESTIMATOR_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                estimator.id,
                estimator.user_id,
                estimator.name,
                p.initial_capital,
                p.annual_return,
                p.discount_rate,
                p.risk_aversion,
                p.life_expectancy,
                p.current_age,
                p.inheritance_target,
                estimator.created_at,
                estimator.updated_at,
            ],
        )?;
        tracing::debug!(id = %estimator.id, user_id, "estimator created");
        Ok(estimator)
    }

    /// Newest first.
    pub fn list_estimators(&self, user_id: &str) -> StoreResult<Vec<Estimator>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ESTIMATOR_COLUMNS} FROM estimators WHERE user_id = ?1 \
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], estimator_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_estimator(&self, id: &str) -> StoreResult<Estimator> {
        self.lock()?
            .query_row(
                &format!("SELECT {ESTIMATOR_COLUMNS} FROM estimators WHERE id = ?1"),
                params![id],
                estimator_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("estimator {id}")))
    }

    pub fn update_estimator(&self, id: &str, draft: &EstimatorDraft) -> StoreResult<Estimator> {
        let p = &draft.params;
        let changed = self.lock()?.execute(
            "UPDATE estimators SET name = ?1, initial_capital = ?2, annual_return = ?3, \
             discount_rate = ?4, risk_aversion = ?5, life_expectancy = ?6, current_age = ?7, \
             inheritance_target = ?8, updated_at = ?9 WHERE id = ?10",
            params![
                draft.name,
                p.initial_capital,
                p.annual_return,
                p.discount_rate,
                p.risk_aversion,
                p.life_expectancy,
                p.current_age,
                p.inheritance_target,
                now(),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("estimator {id}")));
        }
        self.get_estimator(id)
    }

    /// Saved series rows go with it through the `ON DELETE CASCADE` foreign key.
    pub fn delete_estimator(&self, id: &str) -> StoreResult<()> {
        let removed = self
            .lock()?
            .execute("DELETE FROM estimators WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!("estimator {id}")));
        }
        Ok(())
    }

    /// Replaces any previously saved series for the estimator.
    pub fn save_series(&self, estimator_id: &str, periods: &[PeriodState]) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM optimization_series WHERE estimator_id = ?1",
            params![estimator_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO optimization_series \
                 (estimator_id, period, age, capital, consumption, utility) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for point in periods.iter().map(SeriesPoint::from) {
                stmt.execute(params![
                    estimator_id,
                    point.period,
                    point.age,
                    point.capital,
                    point.consumption,
                    point.utility,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(estimator_id, rows = periods.len(), "series saved");
        Ok(periods.len())
    }

    pub fn load_series(&self, estimator_id: &str) -> StoreResult<Vec<SeriesPoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT period, age, capital, consumption, utility FROM optimization_series \
             WHERE estimator_id = ?1 ORDER BY period",
        )?;
        let rows = stmt.query_map(params![estimator_id], |row| {
            Ok(SeriesPoint {
                period: row.get(0)?,
                age: row.get(1)?,
                capital: row.get(2)?,
                consumption: row.get(3)?,
                utility: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn estimator_from_row(row: &Row<'_>) -> rusqlite::Result<Estimator> {
    Ok(Estimator {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        params: OptimizationParameters {
            initial_capital: row.get(3)?,
            annual_return: row.get(4)?,
            discount_rate: row.get(5)?,
            risk_aversion: row.get(6)?,
            life_expectancy: row.get(7)?,
            current_age: row.get(8)?,
            inheritance_target: row.get(9)?,
        },
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

enum StoreLocation {
    File(PathBuf),
    Memory,
}

/// Lazily opened store shared by request handlers.
///
/// The first `get` opens the database under the slot lock, so concurrent first calls
/// never open it twice. `reset` drops the open store; the next `get` reopens it.
pub struct StoreHandle {
    location: StoreLocation,
    slot: Mutex<Option<Store>>,
}

impl StoreHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            slot: Mutex::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::Memory,
            slot: Mutex::new(None),
        }
    }

    pub fn get(&self) -> StoreResult<Store> {
        let mut slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }
        let store = match &self.location {
            StoreLocation::File(path) => Store::open(path)?,
            StoreLocation::Memory => Store::open_in_memory()?,
        };
        *slot = Some(store.clone());
        Ok(store)
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    pub fn reset(&self) {
        match self.slot.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}
