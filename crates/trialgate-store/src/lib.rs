//! Persistence for trial runs and suite summaries: JSON documents on disk
//! as the source of truth, with a SQLite index for cross-suite queries.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use trialgate_types::{EvalRun, SuiteSummary};

/// Directory of per-run JSON documents plus suite summary directories.
///
/// Layout under the root:
///   runs/{run_id}.json
///   suites/{suite_id}/summary.json
///   suites/{suite_id}/README.md
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("runs"))
            .with_context(|| format!("creating run store at {}", root.display()))?;
        std::fs::create_dir_all(root.join("suites"))?;
        Ok(Self { root })
    }

    pub fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(format!("{run_id}.json"))
    }

    pub fn suite_dir(&self, suite_id: &str) -> PathBuf {
        self.root.join("suites").join(suite_id)
    }

    /// Write one run document. Saving the same run twice is a no-op
    /// payload-wise; the document is replaced atomically via a temp file.
    pub fn save_run(&self, run: &EvalRun) -> Result<PathBuf> {
        let path = self.run_path(&run.id);
        let payload = serde_json::to_string_pretty(run)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    pub fn load_run(&self, run_id: &str) -> Result<EvalRun> {
        let path = self.run_path(run_id);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading run {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing run {}", path.display()))
    }

    /// Every stored run, sorted by run id. Non-JSON files are skipped;
    /// a malformed run document is an error, not a silent drop.
    pub fn load_all_runs(&self) -> Result<Vec<EvalRun>> {
        let runs_dir = self.root.join("runs");
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&runs_dir)
            .with_context(|| format!("listing {}", runs_dir.display()))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut runs = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let run: EvalRun = serde_json::from_str(&content)
                .with_context(|| format!("parsing run {}", path.display()))?;
            runs.push(run);
        }
        Ok(runs)
    }

    /// Write the suite artifacts: machine-readable summary.json and the
    /// human-readable README rendered by the caller.
    pub fn persist_suite(&self, summary: &SuiteSummary, readme: &str) -> Result<PathBuf> {
        let dir = self.suite_dir(&summary.suite_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating suite dir {}", dir.display()))?;
        std::fs::write(
            dir.join("summary.json"),
            serde_json::to_string_pretty(summary)?,
        )?;
        std::fs::write(dir.join("README.md"), readme)?;
        Ok(dir)
    }

    pub fn load_suite(&self, suite_id: &str) -> Result<SuiteSummary> {
        let path = self.suite_dir(suite_id).join("summary.json");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading suite {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing suite {}", path.display()))
    }
}

/// SQLite index over stored runs for cross-suite queries. The JSON
/// documents stay authoritative; the index can be rebuilt from them.
#[derive(Debug)]
pub struct Index {
    conn: Arc<Mutex<Connection>>,
}

/// One row of the runs index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRow {
    pub run_id: String,
    pub timestamp: String,
    pub task_name: String,
    pub harness: String,
    pub model: String,
    pub rules_variant: String,
    pub voided: bool,
    pub composite_score: f64,
    pub diagnostic_score: f64,
    pub duration_sec: f64,
}

impl Index {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;

        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                task_name TEXT NOT NULL,
                harness TEXT NOT NULL,
                model TEXT NOT NULL,
                rules_variant TEXT NOT NULL,
                voided BOOLEAN NOT NULL,
                composite_score REAL NOT NULL,
                diagnostic_score REAL NOT NULL,
                duration_sec REAL NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Upsert one run into the index.
    pub fn index_run(&self, run: &EvalRun) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs (run_id, timestamp, task_name, harness, model,
                rules_variant, voided, composite_score, diagnostic_score, duration_sec)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(run_id) DO UPDATE SET
                timestamp = excluded.timestamp,
                voided = excluded.voided,
                composite_score = excluded.composite_score,
                diagnostic_score = excluded.diagnostic_score,
                duration_sec = excluded.duration_sec",
            params![
                run.id,
                run.timestamp,
                run.config.task_name,
                run.config.harness,
                run.config.model,
                run.config.rules_variant,
                run.scores.voided,
                run.scores.composite_score,
                run.scores.diagnostic_score,
                run.duration_sec,
            ],
        )?;
        Ok(())
    }

    /// Scored (non-void) runs for a task, best composite first.
    pub fn runs_for_task(&self, task_name: &str) -> Result<Vec<RunRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT run_id, timestamp, task_name, harness, model, rules_variant,
                    voided, composite_score, diagnostic_score, duration_sec
             FROM runs WHERE task_name = ?1 AND voided = 0
             ORDER BY composite_score DESC, run_id ASC",
        )?;
        let rows = stmt
            .query_map(params![task_name], |row| {
                Ok(RunRow {
                    run_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    task_name: row.get(2)?,
                    harness: row.get(3)?,
                    model: row.get(4)?,
                    rules_variant: row.get(5)?,
                    voided: row.get(6)?,
                    composite_score: row.get(7)?,
                    diagnostic_score: row.get(8)?,
                    duration_sec: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use trialgate_types::EvalConfig;

    use super::*;

    fn run(id: &str, composite: f64, voided: bool) -> EvalRun {
        let mut run = EvalRun {
            id: id.to_string(),
            timestamp: "2026-08-29T12:00:00Z".to_string(),
            config: EvalConfig {
                task_name: "landing".to_string(),
                harness: "pilot".to_string(),
                model: "sonnet".to_string(),
                rules_variant: "baseline".to_string(),
                ..Default::default()
            },
            duration_sec: 90.0,
            ..Default::default()
        };
        run.scores.composite_score = composite;
        run.scores.voided = voided;
        run
    }

    #[test]
    fn run_round_trips_through_json_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path()).unwrap();

        let original = run("run-01", 0.87, false);
        let path = store.save_run(&original).unwrap();
        assert!(path.ends_with("runs/run-01.json"));

        let loaded = store.load_run("run-01").unwrap();
        assert_eq!(loaded, original);

        // Saving again replaces the document without duplicating it.
        store.save_run(&original).unwrap();
        assert_eq!(store.load_all_runs().unwrap().len(), 1);
    }

    #[test]
    fn load_all_runs_sorted_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path()).unwrap();
        store.save_run(&run("run-02", 0.5, false)).unwrap();
        store.save_run(&run("run-01", 0.9, true)).unwrap();

        let runs = store.load_all_runs().unwrap();
        let ids: Vec<&str> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["run-01", "run-02"]);
    }

    #[test]
    fn missing_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path()).unwrap();
        assert!(store.load_run("nope").is_err());
    }

    #[test]
    fn suite_artifacts_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path()).unwrap();

        let summary = SuiteSummary {
            suite_id: "20260829-120000Z__landing__pilot__sonnet__x3".to_string(),
            ..Default::default()
        };
        let suite_dir = store.persist_suite(&summary, "# Suite\n").unwrap();
        assert!(suite_dir.join("summary.json").exists());
        assert!(suite_dir.join("README.md").exists());

        let loaded = store.load_suite(&summary.suite_id).unwrap();
        assert_eq!(loaded, summary);
    }

    #[test]
    fn index_upserts_and_filters_void_runs() {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::open(dir.path().join("index.db")).unwrap();

        index.index_run(&run("run-01", 0.4, false)).unwrap();
        index.index_run(&run("run-02", 0.9, false)).unwrap();
        index.index_run(&run("run-03", 0.0, true)).unwrap();
        // Re-index with a corrected score.
        index.index_run(&run("run-01", 0.6, false)).unwrap();

        let rows = index.runs_for_task("landing").unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, ["run-02", "run-01"]);
        assert_eq!(rows[1].composite_score, 0.6);
        assert!(index.runs_for_task("other").unwrap().is_empty());
    }
}
