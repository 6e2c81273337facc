use std::path::PathBuf;

/// Well-known locations under `<repo>/eval/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalPaths {
    pub root: PathBuf,
    pub cases_dir: PathBuf,
    pub fixtures_dir: PathBuf,
    pub workspaces_dir: PathBuf,
    pub results_dir: PathBuf,
    pub baselines_dir: PathBuf,
}

impl EvalPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let eval_dir = root.join("eval");
        Self {
            root,
            cases_dir: eval_dir.join("cases"),
            fixtures_dir: eval_dir.join("fixtures").join("projects"),
            workspaces_dir: eval_dir.join("workspaces"),
            results_dir: eval_dir.join("results"),
            baselines_dir: eval_dir.join("baselines"),
        }
    }

    pub fn case_path(&self, case_id: &str) -> PathBuf {
        self.cases_dir.join(format!("{case_id}.toml"))
    }

    pub fn fixture_dir(&self, fixture: &str) -> PathBuf {
        self.fixtures_dir.join(fixture)
    }

    pub fn case_results_dir(&self, case_id: &str) -> PathBuf {
        self.results_dir.join(case_id)
    }
}
