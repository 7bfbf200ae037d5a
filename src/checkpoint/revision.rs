use git2::Repository;
use std::path::Path;

/// HEAD commit of the repository containing `root`, if any.
///
/// Returns `None` outside a repository and for unborn branches.
pub fn head_revision(root: &Path) -> Option<String> {
    let repo = Repository::discover(root).ok()?;
    let head = repo.head().ok()?;
    let commit = head.peel_to_commit().ok()?;
    Some(commit.id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::tempdir;

    #[test]
    fn test_no_repository() {
        let dir = tempdir().unwrap();
        assert!(head_revision(dir.path()).is_none());
    }

    #[test]
    fn test_unborn_branch() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        assert!(head_revision(dir.path()).is_none());
    }

    #[test]
    fn test_head_commit_from_subdirectory() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();

        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("changeflow", "changeflow@localhost").unwrap();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();

        assert_eq!(
            head_revision(&dir.path().join("src")),
            Some(oid.to_string())
        );
    }
}
