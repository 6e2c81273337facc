//! Baseline storage, one pretty-printed JSON file per evaluation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::baseline::{Baseline, BaselineCheck, Threshold, compare};

#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<name>.json`; path separators in the name are flattened.
    pub fn path(&self, name: &str) -> PathBuf {
        let file = name.replace(['/', '\\'], "__");
        self.dir.join(format!("{file}.json"))
    }

    /// Load a stored baseline. A missing file is `Ok(None)`.
    pub fn load(&self, name: &str) -> Result<Option<Baseline>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("read baseline {}", path.display()))?;
        let baseline = serde_json::from_str(&contents)
            .with_context(|| format!("parse baseline {}", path.display()))?;
        Ok(Some(baseline))
    }

    /// Atomically write a baseline (temp file + rename).
    pub fn save(&self, name: &str, baseline: &Baseline) -> Result<()> {
        let path = self.path(name);
        debug!(path = %path.display(), "writing baseline");
        let mut buf = serde_json::to_string_pretty(baseline)?;
        buf.push('\n');
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create directory {}", self.dir.display()))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp baseline {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace baseline {}", path.display()))?;
        Ok(())
    }

    /// Record `current` when `record` is set; otherwise compare it against the stored baseline.
    pub fn check(
        &self,
        name: &str,
        current: &Baseline,
        record: bool,
        thresholds: &[Threshold],
    ) -> Result<BaselineCheck> {
        if record {
            self.save(name, current)?;
            info!(name, path = %self.path(name).display(), "baseline recorded");
            return Ok(BaselineCheck::Recorded);
        }
        match self.load(name)? {
            None => {
                warn!(name, "no baseline found, skipping regression check");
                Ok(BaselineCheck::Missing)
            }
            Some(baseline) => {
                let regressions = compare(&baseline, current, thresholds);
                for regression in &regressions {
                    warn!(name, %regression, "performance regression");
                }
                Ok(BaselineCheck::Compared(regressions))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::baseline::{DEFAULT_THRESHOLDS, Metric};
    use tempfile::tempdir;

    fn snapshot(input: u64, output: u64, time: u64) -> Baseline {
        Baseline {
            input_tokens: input,
            output_tokens: output,
            execution_time_ms: time,
            tools_used: vec!["Read".to_string()],
            ..Baseline::default()
        }
    }

    #[test]
    fn save_then_load() {
        let temp = tempdir().expect("tempdir");
        let store = BaselineStore::new(temp.path().join("baselines"));
        let baseline = snapshot(1000, 200, 3000);
        store.save("go_basic", &baseline).expect("save");

        let raw = fs::read_to_string(store.path("go_basic")).expect("read");
        assert!(raw.ends_with("}\n"));
        assert_eq!(store.load("go_basic").expect("load"), Some(baseline));
    }

    #[test]
    fn missing_baseline_loads_as_none() {
        let temp = tempdir().expect("tempdir");
        let store = BaselineStore::new(temp.path());
        assert_eq!(store.load("absent").expect("load"), None);
        let check = store
            .check("absent", &snapshot(1, 1, 1), false, &DEFAULT_THRESHOLDS)
            .expect("check");
        assert_eq!(check, BaselineCheck::Missing);
    }

    #[test]
    fn record_mode_overwrites() {
        let temp = tempdir().expect("tempdir");
        let store = BaselineStore::new(temp.path());
        store.save("case", &snapshot(10, 10, 10)).expect("save");
        let check = store
            .check("case", &snapshot(99, 99, 99), true, &DEFAULT_THRESHOLDS)
            .expect("check");
        assert_eq!(check, BaselineCheck::Recorded);
        assert_eq!(store.load("case").expect("load"), Some(snapshot(99, 99, 99)));
    }

    #[test]
    fn compare_mode_reports_regressions() {
        let temp = tempdir().expect("tempdir");
        let store = BaselineStore::new(temp.path());
        store.save("case", &snapshot(1000, 100, 1000)).expect("save");
        let check = store
            .check("case", &snapshot(1000, 150, 1000), false, &DEFAULT_THRESHOLDS)
            .expect("check");
        let regressions = check.regressions();
        assert_eq!(regressions.len(), 1);
        assert_eq!(regressions[0].metric, Metric::OutputTokens);
    }

    #[test]
    fn names_with_separators_stay_in_dir() {
        let store = BaselineStore::new("/b");
        assert_eq!(store.path("suite/case"), PathBuf::from("/b/suite__case.json"));
    }

    #[test]
    fn corrupt_baseline_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let store = BaselineStore::new(temp.path());
        fs::write(store.path("bad"), "{not json").expect("write");
        assert!(store.load("bad").is_err());
    }
}
