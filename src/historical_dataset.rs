//! Historical game-state tables for the nearest-neighbor estimator, read
//! from SQLite or from JSON record arrays.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde_json::{Map, Value};

use crate::error::SimError;
use crate::knn::{HistoricalRow, MetricsHandle, MetricsModel, MetricsOutcome, StateFeatures};

pub const DEFAULT_TABLE: &str = "historical_states";
const DB_PATH_ENV: &str = "METRICS_DB_PATH";

/// Accepted column names per field, in row order: seven features, then
/// seven outcomes.
const COLUMNS: [&[&str]; 14] = [
    &["qtr", "quarter"],
    &["down"],
    &["ydstogo", "distance"],
    &["yardline_100"],
    &["game_seconds_remaining", "seconds_remaining"],
    &["score_differential"],
    &["posteam_is_home", "possession_is_home"],
    &["wp", "win_prob"],
    &["ep", "expected_points"],
    &["epa"],
    &["td_prob"],
    &["fg_prob"],
    &["safety_prob"],
    &["no_score_prob"],
];

pub fn default_db_path() -> Option<PathBuf> {
    env::var(DB_PATH_ENV)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS historical_states (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            quarter REAL NOT NULL,
            down REAL NOT NULL,
            distance REAL NOT NULL,
            yardline_100 REAL NOT NULL,
            seconds_remaining REAL NOT NULL,
            score_differential REAL NOT NULL,
            possession_is_home REAL NOT NULL,
            win_prob REAL NULL,
            expected_points REAL NULL,
            epa REAL NULL,
            td_prob REAL NULL,
            fg_prob REAL NULL,
            safety_prob REAL NULL,
            no_score_prob REAL NULL
        );
        "#,
    )
    .context("init historical_states schema")?;
    Ok(())
}

pub fn insert_rows(conn: &mut Connection, rows: &[HistoricalRow]) -> Result<usize> {
    let tx = conn.transaction().context("begin historical insert")?;
    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO historical_states (
                quarter, down, distance, yardline_100, seconds_remaining,
                score_differential, possession_is_home,
                win_prob, expected_points, epa, td_prob, fg_prob, safety_prob, no_score_prob
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )?;
        for row in rows {
            let f = &row.features;
            let o = &row.outcome;
            stmt.execute(params![
                f.quarter,
                f.down,
                f.distance,
                f.yardline_100,
                f.seconds_remaining,
                f.score_differential,
                f.possession_is_home,
                o.win_prob,
                o.expected_points,
                o.epa,
                o.td_prob,
                o.fg_prob,
                o.safety_prob,
                o.no_score_prob,
            ])?;
        }
    }
    tx.commit().context("commit historical insert")?;
    Ok(rows.len())
}

/// Maps every field to the first of its accepted names present in
/// `available`, or fails naming the fields that are missing.
pub fn resolve_columns(available: &[String]) -> Result<[String; 14], SimError> {
    let mut resolved: [String; 14] = Default::default();
    let mut missing = Vec::new();
    for (slot, aliases) in resolved.iter_mut().zip(COLUMNS.iter()) {
        let hit = aliases
            .iter()
            .find(|alias| available.iter().any(|c| c.eq_ignore_ascii_case(alias)));
        match hit {
            Some(name) => *slot = (*name).to_string(),
            None => missing.push(aliases.join("|")),
        }
    }
    if !missing.is_empty() {
        return Err(SimError::data(format!(
            "historical table is missing columns: {}",
            missing.join(", ")
        )));
    }
    Ok(resolved)
}

pub fn load_rows(conn: &Connection, table: &str) -> Result<Vec<HistoricalRow>> {
    if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SimError::data(format!("invalid table name {table:?}")).into());
    }

    let mut info = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let available: Vec<String> = info
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<_>>()
        .with_context(|| format!("read columns of {table}"))?;
    if available.is_empty() {
        return Err(SimError::data(format!("table {table} not found")).into());
    }
    let columns = resolve_columns(&available)?;

    let sql = format!("SELECT {} FROM {table}", columns.join(", "));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let mut values = [f64::NAN; 14];
            for (i, slot) in values.iter_mut().enumerate() {
                *slot = row.get::<_, Option<f64>>(i).ok().flatten().unwrap_or(f64::NAN);
            }
            Ok(row_from_values(values))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("read rows of {table}"))?;
    Ok(rows)
}

/// Parses a JSON array of flat records keyed by any accepted column name.
pub fn rows_from_json(raw: &str) -> Result<Vec<HistoricalRow>> {
    let records: Vec<Map<String, Value>> =
        serde_json::from_str(raw).context("parse historical json")?;
    let Some(first) = records.first() else {
        return Ok(Vec::new());
    };
    let keys: Vec<String> = first.keys().cloned().collect();
    let columns = resolve_columns(&keys)?;

    Ok(records
        .iter()
        .map(|record| {
            let mut values = [f64::NAN; 14];
            for (slot, name) in values.iter_mut().zip(columns.iter()) {
                *slot = record
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .and_then(|(_, v)| json_number(v))
                    .unwrap_or(f64::NAN);
            }
            row_from_values(values)
        })
        .collect())
}

/// Loads and indexes a table; `.json` files are read as record arrays.
pub fn load_model(path: &Path) -> Result<MetricsModel> {
    let rows = if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read historical json {}", path.display()))?;
        rows_from_json(&raw)?
    } else {
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite db {}", path.display()))?;
        load_rows(&conn, DEFAULT_TABLE)?
    };
    Ok(MetricsModel::initialize(rows)?)
}

/// Loads the estimator off-thread and publishes it through `handle`.
/// Failures are logged and leave the handle empty.
pub fn spawn_background_load(handle: MetricsHandle, path: PathBuf) -> JoinHandle<()> {
    thread::spawn(move || {
        let started = Instant::now();
        match load_model(&path) {
            Ok(model) => {
                let rows = model.len();
                if handle.install(model) {
                    tracing::info!(
                        rows,
                        path = %path.display(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "historical estimator ready"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "historical estimator unavailable; using closed-form models"
                );
            }
        }
    })
}

fn row_from_values(v: [f64; 14]) -> HistoricalRow {
    HistoricalRow {
        features: StateFeatures {
            quarter: v[0],
            down: v[1],
            distance: v[2],
            yardline_100: v[3],
            seconds_remaining: v[4],
            score_differential: v[5],
            possession_is_home: v[6],
        },
        outcome: MetricsOutcome {
            win_prob: v[7],
            expected_points: v[8],
            epa: v[9],
            td_prob: v[10],
            fg_prob: v[11],
            safety_prob: v[12],
            no_score_prob: v[13],
        },
    }
}

fn json_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(quarter: f64, wp: f64) -> HistoricalRow {
        row_from_values([
            quarter, 1.0, 10.0, 75.0, 1800.0, 0.0, 1.0, wp, 0.8, 0.0, 0.2, 0.1, 0.0, 0.7,
        ])
    }

    #[test]
    fn aliases_resolve_in_either_vocabulary() {
        let cols: Vec<String> = [
            "qtr", "down", "ydstogo", "yardline_100", "game_seconds_remaining",
            "score_differential", "posteam_is_home", "wp", "ep", "epa", "td_prob", "fg_prob",
            "safety_prob", "no_score_prob",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let resolved = resolve_columns(&cols).unwrap();
        assert_eq!(resolved[0], "qtr");
        assert_eq!(resolved[7], "wp");
    }

    #[test]
    fn missing_columns_are_a_data_error() {
        let cols = vec!["quarter".to_string(), "down".to_string()];
        let err = resolve_columns(&cols).unwrap_err();
        match err {
            SimError::DataError(msg) => assert!(msg.contains("yardline_100")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sqlite_round_trip_through_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        insert_rows(&mut conn, &[sample(1.0, 0.6), sample(3.0, 0.4)]).unwrap();
        let rows = load_rows(&conn, DEFAULT_TABLE).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].features.quarter, 3.0);
        assert_eq!(rows[1].outcome.win_prob, 0.4);
    }

    #[test]
    fn sqlite_table_without_outcomes_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE historical_states (quarter REAL, down REAL);")
            .unwrap();
        let err = load_rows(&conn, DEFAULT_TABLE).unwrap_err();
        assert!(matches!(err.downcast_ref::<SimError>(), Some(SimError::DataError(_))));
    }

    #[test]
    fn json_records_accept_nulls_and_bools() {
        let raw = r#"[
            {"quarter": 2, "down": 3, "distance": 4, "yardline_100": 40,
             "seconds_remaining": 2000, "score_differential": -3, "possession_is_home": true,
             "win_prob": 0.45, "expected_points": 2.1, "epa": 0.1, "td_prob": 0.3,
             "fg_prob": 0.2, "safety_prob": 0.0, "no_score_prob": 0.5},
            {"quarter": 2, "down": null, "distance": 4, "yardline_100": 40,
             "seconds_remaining": 2000, "score_differential": -3, "possession_is_home": false,
             "win_prob": 0.45, "expected_points": 2.1, "epa": 0.1, "td_prob": 0.3,
             "fg_prob": 0.2, "safety_prob": 0.0, "no_score_prob": 0.5}
        ]"#;
        let rows = rows_from_json(raw).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].features.possession_is_home, 1.0);
        assert!(!rows[1].is_finite());
        let model = MetricsModel::initialize(rows).unwrap();
        assert_eq!(model.len(), 1);
    }
}
