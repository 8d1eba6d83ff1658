#[cfg(test)]
mod tests {
    use crate::exclusion::ExclusionMatcher;
    use crate::hasher::{ContentSource, LocalSource};
    use crate::ComparisonEngine;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::io::{self, Read};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;
    use treecheck_common::{ComparisonResult, Status, TreeCheckError};

    /// Helper struct to manage a local tree and a reference tree
    struct TestFixture {
        _temp_dir: TempDir,
        local_dir: PathBuf,
        reference_dir: PathBuf,
    }

    impl TestFixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp directory");
            let local_dir = temp_dir.path().join("local");
            let reference_dir = temp_dir.path().join("reference");

            fs::create_dir(&local_dir).expect("Failed to create local dir");
            fs::create_dir(&reference_dir).expect("Failed to create reference dir");

            TestFixture {
                _temp_dir: temp_dir,
                local_dir,
                reference_dir,
            }
        }

        fn local_file(&self, path: &str, content: &str) {
            write_file(&self.local_dir, path, content);
        }

        fn reference_file(&self, path: &str, content: &str) {
            write_file(&self.reference_dir, path, content);
        }

        fn both(&self, path: &str, content: &str) {
            self.local_file(path, content);
            self.reference_file(path, content);
        }

        fn compare(&self, rules: &[&str]) -> Vec<ComparisonResult> {
            self.compare_with(ComparisonEngine::new(), rules)
        }

        fn compare_with(&self, engine: ComparisonEngine, rules: &[&str]) -> Vec<ComparisonResult> {
            let matcher = ExclusionMatcher::compile(rules.iter().copied());
            engine
                .compare(&self.local_dir, &self.reference_dir, &matcher)
                .expect("comparison failed")
        }
    }

    fn write_file(base: &Path, path: &str, content: &str) {
        let file_path = base.join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        fs::write(&file_path, content).expect("Failed to write file");
    }

    fn by_path(results: &[ComparisonResult]) -> HashMap<String, Status> {
        let map: HashMap<String, Status> = results
            .iter()
            .map(|r| (r.path.clone(), r.status))
            .collect();
        assert_eq!(map.len(), results.len(), "a path was classified twice: {:?}", results);
        map
    }

    fn sorted(mut results: Vec<ComparisonResult>) -> Vec<ComparisonResult> {
        results.sort_by(|a, b| a.path.cmp(&b.path));
        results
    }

    // ============================================================================
    // Classification
    // ============================================================================

    #[test]
    fn test_reference_scenario_with_excluded_directory() {
        let fixture = TestFixture::new();
        fixture.local_file("a.txt", "hello");
        fixture.local_file("b.txt", "world");
        fixture.local_file("secret/k.txt", "key");
        fixture.reference_file("a.txt", "hello");
        fixture.reference_file("c.txt", "x");

        let results = by_path(&fixture.compare(&["secret/"]));

        assert_eq!(results.len(), 3, "unexpected results: {:?}", results);
        assert_eq!(results["a.txt"], Status::Ok);
        assert_eq!(results["b.txt"], Status::Extra);
        assert_eq!(results["c.txt"], Status::Missing);
        assert!(!results.contains_key("secret"));
        assert!(!results.contains_key("secret/k.txt"));
    }

    #[test]
    fn test_excluded_extension_suppresses_extra() {
        let fixture = TestFixture::new();
        fixture.both("index.php", "<?php");
        fixture.local_file("debug.log", "trace");

        let results = by_path(&fixture.compare(&["*.log"]));

        assert_eq!(results.len(), 1);
        assert_eq!(results["index.php"], Status::Ok);
    }

    #[test]
    fn test_modified_file_detected() {
        let fixture = TestFixture::new();
        fixture.local_file("lib/weblib.php", "tampered");
        fixture.reference_file("lib/weblib.php", "original");

        let results = by_path(&fixture.compare(&[]));

        assert_eq!(results.len(), 1);
        assert_eq!(results["lib/weblib.php"], Status::Modified);
    }

    #[test]
    fn test_same_size_different_content_is_modified() {
        let fixture = TestFixture::new();
        fixture.local_file("f.bin", "abcd");
        fixture.reference_file("f.bin", "abce");

        let results = by_path(&fixture.compare(&[]));
        assert_eq!(results["f.bin"], Status::Modified);
    }

    #[test]
    fn test_matching_directories_emit_no_result() {
        let fixture = TestFixture::new();
        fixture.both("mod/forum/lib.php", "same");

        let results = by_path(&fixture.compare(&[]));

        assert_eq!(results.len(), 1);
        assert_eq!(results["mod/forum/lib.php"], Status::Ok);
    }

    #[test]
    fn test_local_only_directory_is_extra_with_contents() {
        let fixture = TestFixture::new();
        fixture.both("index.php", "<?php");
        fixture.local_file("backdoor/shell.php", "evil");
        fixture.local_file("backdoor/inner/more.php", "evil");

        let results = by_path(&fixture.compare(&[]));

        assert_eq!(results["backdoor"], Status::Extra);
        assert_eq!(results["backdoor/shell.php"], Status::Extra);
        assert_eq!(results["backdoor/inner"], Status::Extra);
        assert_eq!(results["backdoor/inner/more.php"], Status::Extra);
    }

    #[test]
    fn test_nested_missing_entries_detected() {
        let fixture = TestFixture::new();
        fixture.both("index.php", "<?php");
        fixture.reference_file("auth/ldap/lib.php", "ldap");

        let results = by_path(&fixture.compare(&[]));

        assert_eq!(results["auth"], Status::Missing);
        assert_eq!(results["auth/ldap"], Status::Missing);
        assert_eq!(results["auth/ldap/lib.php"], Status::Missing);
        assert_eq!(results["index.php"], Status::Ok);
    }

    #[test]
    fn test_missing_file_inside_shared_directory() {
        let fixture = TestFixture::new();
        fixture.both("admin/index.php", "a");
        fixture.reference_file("admin/settings.php", "s");

        let results = by_path(&fixture.compare(&[]));

        assert_eq!(results.len(), 2);
        assert_eq!(results["admin/settings.php"], Status::Missing);
    }

    #[test]
    fn test_excluded_reference_entries_not_missing() {
        let fixture = TestFixture::new();
        fixture.reference_file("install/lang/en.php", "x");
        fixture.reference_file("README.md", "docs");

        let results = fixture.compare(&["install/", "*.md"]);
        assert!(results.is_empty(), "unexpected results: {:?}", results);
    }

    #[test]
    fn test_kind_mismatch_classified_once() {
        let fixture = TestFixture::new();
        // Local file where the reference has a directory, and vice versa
        fixture.local_file("cache", "not a dir");
        fixture.reference_file("cache/entry.txt", "x");
        fixture.local_file("upgrade.txt/inner.txt", "y");
        fixture.reference_file("upgrade.txt", "z");

        let results = by_path(&fixture.compare(&[]));

        assert_eq!(results["cache"], Status::Extra);
        assert_eq!(results["cache/entry.txt"], Status::Missing);
        assert_eq!(results["upgrade.txt"], Status::Extra);
        assert_eq!(results["upgrade.txt/inner.txt"], Status::Extra);
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn test_empty_trees_produce_no_results() {
        let fixture = TestFixture::new();
        assert!(fixture.compare(&[]).is_empty());
    }

    #[test]
    fn test_comparison_is_idempotent() {
        let fixture = TestFixture::new();
        for i in 0..40 {
            fixture.both(&format!("dir_{}/file_{}.php", i % 4, i), &format!("content {}", i));
        }
        fixture.local_file("dir_0/file_0.php", "changed");
        fixture.local_file("extra.php", "x");
        fixture.reference_file("dir_9/missing.php", "y");

        let first = sorted(fixture.compare(&[]));
        let second = sorted(fixture.compare(&[]));

        assert_eq!(first, second);
    }

    #[test]
    fn test_results_independent_of_pool_width() {
        let fixture = TestFixture::new();
        for i in 0..25 {
            fixture.both(&format!("f{}.txt", i), "same");
        }
        fixture.local_file("f3.txt", "different");

        let serial = sorted(fixture.compare_with(ComparisonEngine::new().with_workers(1), &[]));
        let parallel = sorted(fixture.compare_with(ComparisonEngine::new().with_workers(8), &[]));

        assert_eq!(serial, parallel);
        assert_eq!(serial.len(), 25);
    }

    #[test]
    fn test_progress_callback_sees_every_result() {
        let fixture = TestFixture::new();
        fixture.both("a", "1");
        fixture.local_file("b", "2");
        fixture.reference_file("c", "3");

        let mut seen = Vec::new();
        let results = ComparisonEngine::new()
            .compare_with_progress(
                &fixture.local_dir,
                &fixture.reference_dir,
                &ExclusionMatcher::empty(),
                |result| seen.push(result.clone()),
            )
            .unwrap();

        assert_eq!(sorted(seen), sorted(results));
    }

    // ============================================================================
    // Failure handling
    // ============================================================================

    #[test]
    fn test_missing_local_root_is_fatal() {
        let fixture = TestFixture::new();
        let missing = fixture.local_dir.join("nope");

        let result = ComparisonEngine::new().compare(
            &missing,
            &fixture.reference_dir,
            &ExclusionMatcher::empty(),
        );
        assert!(matches!(result, Err(TreeCheckError::Walk { .. })));
    }

    #[test]
    fn test_missing_reference_root_is_fatal() {
        let fixture = TestFixture::new();
        let missing = fixture.reference_dir.join("nope");

        let result = ComparisonEngine::new().compare(
            &fixture.local_dir,
            &missing,
            &ExclusionMatcher::empty(),
        );
        assert!(matches!(result, Err(TreeCheckError::Walk { .. })));
    }

    /// Refuses to open any file whose name contains "unreadable"
    struct SelectiveFailureSource;

    impl ContentSource for SelectiveFailureSource {
        fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
            if path.to_string_lossy().contains("unreadable") {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            LocalSource.open(path)
        }
    }

    #[test]
    fn test_hash_failure_is_modified_never_ok() {
        let fixture = TestFixture::new();
        fixture.both("unreadable.php", "identical");
        fixture.both("fine.php", "identical");

        let engine = ComparisonEngine::new().with_source(Arc::new(SelectiveFailureSource));
        let results = by_path(&fixture.compare_with(engine, &[]));

        assert_eq!(results["unreadable.php"], Status::Modified);
        assert_eq!(results["fine.php"], Status::Ok);
    }

    // ============================================================================
    // Bounded concurrency
    // ============================================================================

    /// Counts how many files are open at the same time
    #[derive(Default)]
    struct CountingSource {
        in_flight: Arc<AtomicUsize>,
        peak: AtomicUsize,
        opened: AtomicUsize,
    }

    struct TrackedReader {
        inner: File,
        in_flight: Arc<AtomicUsize>,
    }

    impl Read for TrackedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Drop for TrackedReader {
        fn drop(&mut self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ContentSource for CountingSource {
        fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.opened.fetch_add(1, Ordering::SeqCst);

            // Widen the window in which other workers could overlap
            thread::sleep(Duration::from_millis(2));

            match File::open(path) {
                Ok(inner) => Ok(Box::new(TrackedReader {
                    inner,
                    in_flight: Arc::clone(&self.in_flight),
                })),
                Err(e) => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    Err(e)
                }
            }
        }
    }

    #[test]
    fn test_pool_width_bounds_open_files() {
        let fixture = TestFixture::new();
        for i in 0..100 {
            fixture.both(&format!("file_{:03}.txt", i), &format!("payload {}", i));
        }

        let source = Arc::new(CountingSource::default());
        let engine = ComparisonEngine::new()
            .with_workers(2)
            .with_source(Arc::clone(&source) as Arc<dyn ContentSource>);
        let results = fixture.compare_with(engine, &[]);

        assert_eq!(results.len(), 100);
        assert!(results.iter().all(|r| r.status == Status::Ok));
        assert_eq!(source.opened.load(Ordering::SeqCst), 200);
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 0);

        let peak = source.peak.load(Ordering::SeqCst);
        assert!(peak >= 1);
        assert!(peak <= 2, "{} files were open at once with 2 workers", peak);
    }

    #[cfg(target_os = "linux")]
    fn write_raw(base: &Path, name: &[u8], content: &str) {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        fs::write(base.join(OsStr::from_bytes(name)), content).expect("Failed to write file");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_name_is_not_confused_with_lossy_twin() {
        let fixture = TestFixture::new();
        fixture.both("a\u{FFFD}.php", "good");
        write_raw(&fixture.local_dir, b"a\xff.php", "<?php evil");

        let mut statuses: Vec<Status> = fixture.compare(&[]).iter().map(|r| r.status).collect();
        statuses.sort();

        // The valid name matches; the undecodable one has no reference copy
        assert_eq!(statuses, vec![Status::Ok, Status::Extra]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_name_in_both_trees_is_hashed() {
        let fixture = TestFixture::new();
        write_raw(&fixture.local_dir, b"b\xfe.php", "tampered");
        write_raw(&fixture.reference_dir, b"b\xfe.php", "pristine");
        write_raw(&fixture.reference_dir, b"c\xfe.php", "only upstream");

        let results = fixture.compare(&[]);
        let map = by_path(&results);

        assert_eq!(map.len(), 2);
        assert_eq!(map["b\u{FFFD}.php"], Status::Modified);
        assert_eq!(map["c\u{FFFD}.php"], Status::Missing);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_identical_non_utf8_name_is_flagged() {
        let fixture = TestFixture::new();
        write_raw(&fixture.local_dir, b"d\xff.php", "same");
        write_raw(&fixture.reference_dir, b"d\xff.php", "same");

        let results = fixture.compare(&[]);
        assert_eq!(results, vec![ComparisonResult::new("d\u{FFFD}.php", Status::Modified)]);
    }
}
