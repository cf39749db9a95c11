//! Git repository access for inference.
//!
//! Thin wrapper over `git2` providing the primitives the ref and
//! build-directory heuristics need: clone-or-reuse, tag listing, commit
//! walks, and tree reads at arbitrary commits. Operations are blocking;
//! callers on the async path wrap them in `spawn_blocking` when the
//! repository is large enough to matter.

use std::path::{Path, PathBuf};

use git2::{ErrorClass, ErrorCode, Repository, TreeWalkMode, TreeWalkResult};
use tracing::{debug, instrument};

use crate::{Error, Result};

/// A cloned repository on local disk.
pub struct Repo {
    inner: Repository,
    url: String,
    workdir: PathBuf,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("url", &self.url)
            .field("workdir", &self.workdir)
            .finish()
    }
}

fn classify_clone_error(url: &str, err: git2::Error) -> Error {
    let auth_like = err.code() == ErrorCode::Auth
        || err.class() == ErrorClass::Http && err.message().contains("40")
        || err.message().contains("authentication")
        || err.message().contains("401")
        || err.message().contains("403");
    if auth_like {
        Error::RepoInvalidOrPrivate(url.to_string())
    } else {
        Error::Git(err)
    }
}

impl Repo {
    /// Clone `url` into `path`. Authentication failures surface as
    /// [`Error::RepoInvalidOrPrivate`] since the pipeline only rebuilds
    /// from public sources.
    #[instrument]
    pub fn clone(url: &str, path: &Path) -> Result<Self> {
        let inner =
            Repository::clone(url, path).map_err(|err| classify_clone_error(url, err))?;
        debug!(%url, ?path, "cloned repository");
        Ok(Self {
            inner,
            url: url.to_string(),
            workdir: path.to_path_buf(),
        })
    }

    /// Open an existing clone.
    pub fn open(url: &str, path: &Path) -> Result<Self> {
        let inner = Repository::open(path)?;
        Ok(Self {
            inner,
            url: url.to_string(),
            workdir: path.to_path_buf(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// All tag names in the repository.
    pub fn tags(&self) -> Result<Vec<String>> {
        let names = self.inner.tag_names(None)?;
        Ok(names.iter().flatten().map(String::from).collect())
    }

    /// Resolve any refish (tag, branch, hash prefix) to a full commit
    /// hash.
    pub fn resolve_commit(&self, refish: &str) -> Result<String> {
        let object = self.inner.revparse_single(refish)?;
        let commit = object.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// The commit a tag points at.
    pub fn tag_commit(&self, tag: &str) -> Result<String> {
        self.resolve_commit(&format!("refs/tags/{tag}"))
    }

    /// Commit hashes reachable from HEAD, newest first, up to `limit`.
    pub fn recent_commits(&self, limit: usize) -> Result<Vec<String>> {
        let mut walk = self.inner.revwalk()?;
        walk.push_head()?;
        let mut commits = Vec::new();
        for oid in walk.take(limit) {
            commits.push(oid?.to_string());
        }
        Ok(commits)
    }

    /// Read one file's contents at a commit; `None` when the path does
    /// not exist there.
    pub fn read_file_at(&self, commit: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let object = self.inner.revparse_single(commit)?;
        let tree = object.peel_to_commit()?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let object = entry.to_object(&self.inner)?;
        let blob = object
            .peel_to_blob()
            .map_err(|_| Error::Internal(format!("{path} is not a blob at {commit}")))?;
        Ok(Some(blob.content().to_vec()))
    }

    /// All file paths in the tree at a commit.
    pub fn list_files_at(&self, commit: &str) -> Result<Vec<String>> {
        let object = self.inner.revparse_single(commit)?;
        let tree = object.peel_to_commit()?.tree()?;
        let mut files = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    files.push(format!("{root}{name}"));
                }
            }
            TreeWalkResult::Ok
        })?;
        Ok(files)
    }

    /// The commit HEAD points at.
    pub fn head_commit(&self) -> Result<String> {
        self.resolve_commit("HEAD")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;

    /// Build a scratch repository with two commits and a tag on the
    /// second.
    fn scratch_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();

        std::fs::write(dir.join("pom.xml"), "<project><version>1.0</version></project>")
            .unwrap();
        std::fs::create_dir_all(dir.join("api")).unwrap();
        std::fs::write(dir.join("api/build.gradle"), "plugins {}").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("pom.xml")).unwrap();
        index.add_path(Path::new("api/build.gradle")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let first = {
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap()
        };

        std::fs::write(dir.join("pom.xml"), "<project><version>2.1</version></project>")
            .unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("pom.xml")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        {
            let tree = repo.find_tree(tree_id).unwrap();
            let parent = repo.find_commit(first).unwrap();
            let second = repo
                .commit(Some("HEAD"), &sig, &sig, "bump to 2.1", &tree, &[&parent])
                .unwrap();
            let object = repo.find_object(second, None).unwrap();
            repo.tag_lightweight("v2.1", &object, false).unwrap();
        }
        repo
    }

    #[test]
    fn reads_tags_commits_and_trees() {
        let dir = tempfile::tempdir().unwrap();
        scratch_repo(dir.path());
        let repo = Repo::open("file://test", dir.path()).unwrap();

        pretty_assert_eq!(repo.tags().unwrap(), vec!["v2.1".to_string()]);

        let commits = repo.recent_commits(10).unwrap();
        pretty_assert_eq!(commits.len(), 2);
        pretty_assert_eq!(repo.tag_commit("v2.1").unwrap(), commits[0]);
        pretty_assert_eq!(repo.head_commit().unwrap(), commits[0]);

        let head_pom = repo.read_file_at(&commits[0], "pom.xml").unwrap().unwrap();
        assert!(String::from_utf8(head_pom).unwrap().contains("2.1"));
        let old_pom = repo.read_file_at(&commits[1], "pom.xml").unwrap().unwrap();
        assert!(String::from_utf8(old_pom).unwrap().contains("1.0"));
        assert!(
            repo.read_file_at(&commits[0], "missing.txt")
                .unwrap()
                .is_none()
        );

        let mut files = repo.list_files_at(&commits[0]).unwrap();
        files.sort();
        pretty_assert_eq!(
            files,
            vec!["api/build.gradle".to_string(), "pom.xml".to_string()]
        );
    }
}
