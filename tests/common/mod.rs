//! Shared test helpers for folio integration tests.
//!
//! Every test gets its own git repository and index cache in temp
//! directories via [`TestRepo::new`]. Files are committed through
//! [`commit::commit_buffer_writes`], so no `git` binary is needed.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use folio::buffer::BufferWrite;
use folio::commit;
use folio::object::SpecRegistry;
use folio::Worker;
use folio_git::{GitOid, GixRepo, Signature};
use tempfile::TempDir;

/// The dataset directory tests load.
pub const DATASET: &str = "data";

pub fn author() -> Signature {
    Signature::new("Test", "test@example.com")
}

/// A fresh repository plus a cache directory for its indexes.
pub struct TestRepo {
    pub dir: TempDir,
    pub cache: TempDir,
}

impl TestRepo {
    /// Initialize a repository and commit `files` (buffer path, content) as
    /// its first commit.
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let cache = TempDir::new().expect("failed to create cache dir");
        GixRepo::init(dir.path()).expect("failed to init repository");
        let repo = Self { dir, cache };
        repo.commit(files, "initial commit");
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn open(&self) -> GixRepo {
        GixRepo::open_at(self.path()).expect("failed to open repository")
    }

    /// Commit `files` on top of `HEAD`, returning the commit hash.
    pub fn commit(&self, files: &[(&str, &str)], message: &str) -> GitOid {
        let writes: Vec<BufferWrite> = files
            .iter()
            .map(|(path, content)| BufferWrite::put(*path, content.as_bytes()))
            .collect();
        commit::commit_buffer_writes(&self.open(), &writes, message, &author())
            .expect("failed to commit")
    }

    /// Commit the removal of `paths`.
    pub fn remove(&self, paths: &[&str], message: &str) -> GitOid {
        let writes: Vec<BufferWrite> = paths.iter().map(|p| BufferWrite::delete(*p)).collect();
        commit::commit_buffer_writes(&self.open(), &writes, message, &author())
            .expect("failed to commit removal")
    }

    /// Where `dataset_dir` keeps its indexes.
    pub fn cache_root(&self, dataset_dir: &str) -> PathBuf {
        self.cache.path().join(if dataset_dir.is_empty() {
            "@root"
        } else {
            dataset_dir
        })
    }

    /// A worker with [`DATASET`] loaded.
    pub fn loaded_worker(&self) -> Worker {
        let worker = Worker::default();
        worker
            .load(
                self.path(),
                DATASET,
                SpecRegistry::builtin(),
                &self.cache_root(DATASET),
            )
            .expect("failed to load dataset");
        worker
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.path().join(rel)).ok()
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path().join(rel);
        fs::create_dir_all(path.parent().expect("path has a parent")).expect("failed to mkdir");
        fs::write(path, content).expect("failed to write file");
    }
}

/// Run the folio binary in `dir` with a test author.
pub fn folio_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_folio"))
        .args(args)
        .current_dir(dir)
        .env("FOLIO_AUTHOR_NAME", "Test")
        .env("FOLIO_AUTHOR_EMAIL", "test@example.com")
        .env_remove("FOLIO_LOG")
        .output()
        .expect("failed to execute folio")
}

/// Run folio and assert it succeeds. Returns stdout as string.
pub fn folio_ok(dir: &Path, args: &[&str]) -> String {
    let out = folio_in(dir, args);
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        out.status.success(),
        "folio {} failed:\nstdout: {stdout}\nstderr: {stderr}",
        args.join(" ")
    );
    stdout.into_owned()
}
