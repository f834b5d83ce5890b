/// Problem catalog
///
/// Problems are authored as one JSON file per problem (`<dir>/*.json`) and
/// loaded once at startup. Fixture defects do not block loading: such
/// fixtures grade as `InternalError`, so they are only reported here.

use grader_common::config::DEFAULT_TOLERANCE;
use grader_common::evaluator::audit_problem;
use grader_common::types::ProblemSpec;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProblemStoreError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid problem file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate problem id '{0}'")]
    Duplicate(String),
}

#[derive(Debug, Default)]
pub struct ProblemStore {
    problems: HashMap<String, Arc<ProblemSpec>>,
}

impl ProblemStore {
    pub fn load_dir(dir: &Path) -> Result<Self, ProblemStoreError> {
        let io_error = |source| ProblemStoreError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(io_error)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut problems = Vec::with_capacity(paths.len());
        for path in paths {
            let content = fs::read_to_string(&path).map_err(|source| ProblemStoreError::Io {
                path: path.clone(),
                source,
            })?;
            let problem: ProblemSpec = serde_json::from_str(&content)
                .map_err(|source| ProblemStoreError::Parse { path: path.clone(), source })?;
            problems.push(problem);
        }

        let store = Self::from_problems(problems)?;
        info!(dir = %dir.display(), problems = store.len(), "Problem catalog loaded");
        Ok(store)
    }

    pub fn from_problems(
        problems: impl IntoIterator<Item = ProblemSpec>,
    ) -> Result<Self, ProblemStoreError> {
        let mut store = Self::default();
        for problem in problems {
            if problem.fixtures.is_empty() {
                warn!(problem_id = %problem.id, "Problem has no fixtures; every submission will be an internal error");
            }
            for (index, defect) in audit_problem(&problem, DEFAULT_TOLERANCE) {
                warn!(problem_id = %problem.id, fixture = index, error = %defect, "Fixture authoring defect");
            }

            if store.problems.contains_key(&problem.id) {
                return Err(ProblemStoreError::Duplicate(problem.id));
            }
            store.problems.insert(problem.id.clone(), Arc::new(problem));
        }
        Ok(store)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ProblemSpec>> {
        self.problems.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.problems.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }
}
