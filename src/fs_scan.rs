use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extension match, ASCII case-insensitive (`a.WEBP` counts as webp).
pub fn has_extension(p: &Path, ext: &str) -> bool {
    p.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Recursively list regular files under `root` with extension `ext`.
///
/// Single pass and lazy: the caller pulls paths as the walk proceeds.
/// An unreadable sub-directory shows up as one `Err` item and is not
/// descended into; the rest of the tree is still visited.
pub fn scan_targets(
    root: &Path,
    ext: &str,
) -> impl Iterator<Item = walkdir::Result<PathBuf>> + use<> {
    let ext = ext.to_owned();

    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(move |entry| match entry {
            Ok(e) if e.file_type().is_file() && has_extension(e.path(), &ext) => {
                Some(Ok(e.into_path()))
            }
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"x").unwrap();
    }

    #[test]
    fn extension_match_ignores_case() {
        assert!(has_extension(Path::new("a/b.webp"), "webp"));
        assert!(has_extension(Path::new("a/b.WebP"), "webp"));
        assert!(!has_extension(Path::new("a/b.png"), "webp"));
        assert!(!has_extension(Path::new("a/webp"), "webp"));
        assert!(!has_extension(Path::new("a/b.webp.tmp"), "webp"));
    }

    #[test]
    fn walks_recursively_and_filters() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, "a.webp");
        touch(root, "c.png");
        touch(root, "nested/deeper/b.webp");
        touch(root, "nested/readme.txt");
        fs::create_dir_all(root.join("dir.webp")).unwrap();

        let mut found: Vec<PathBuf> = scan_targets(root, "webp").map(|r| r.unwrap()).collect();
        found.sort();

        assert_eq!(
            found,
            vec![root.join("a.webp"), root.join("nested/deeper/b.webp")]
        );
    }

    #[test]
    fn missing_root_is_reported_not_swallowed() {
        let tmp = TempDir::new().unwrap();
        let results: Vec<_> = scan_targets(&tmp.path().join("nope"), "webp").collect();

        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdir_does_not_stop_the_walk() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, "ok/a.webp");
        touch(root, "locked/b.webp");
        let locked = root.join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // root ignores permission bits; nothing to observe then
        let readable = fs::read_dir(&locked).is_ok();

        let results: Vec<_> = scan_targets(root, "webp").collect();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let ok: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert!(ok.contains(&&root.join("ok/a.webp")));
        if !readable {
            assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        }
    }
}
