//! End-to-end crawls over real directory trees.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use dc_crawler::{CrawlError, Crawler, CrawlerConfig, FileOrigin};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// A file seen by the recording observer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Emitted {
    path: Utf8PathBuf,
    origin: FileOrigin,
    contents: Vec<u8>,
}

type Record = Arc<Mutex<Vec<Emitted>>>;

fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().expect("Failed to create temp dir");
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).expect("Non-UTF8 temp path");
    (temp, root)
}

fn write(path: &Utf8Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    std::fs::write(path, contents).expect("Failed to write file");
}

/// Writes a ZIP archive. `None` contents mark a directory entry.
fn write_zip(path: &Utf8Path, entries: &[(&str, Option<&str>)]) {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, contents) in entries {
        match contents {
            Some(text) => {
                writer.start_file(*name, options).expect("start_file failed");
                writer.write_all(text.as_bytes()).expect("write failed");
            }
            None => writer.add_directory(*name, options).expect("add_directory failed"),
        }
    }
    let bytes = writer.finish().expect("finish failed").into_inner();
    std::fs::write(path, bytes).expect("Failed to write archive");
}

fn crawler(parallel: usize, filter: &str) -> Crawler {
    Crawler::new(CrawlerConfig::default().with_parallel(parallel).with_filter(filter))
        .expect("valid config")
}

/// Subscribes an observer that reads every stream to the end and records it.
fn record(crawler: &Crawler) -> Record {
    let seen: Record = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    crawler.subscribe(move |event| {
        let path = event.path().to_owned();
        let origin = event.origin().clone();
        let sink = Arc::clone(&sink);
        if let Some(mut stream) = event.take_stream() {
            tokio::spawn(async move {
                let mut contents = Vec::new();
                stream
                    .read_to_end(&mut contents)
                    .await
                    .expect("stream read failed");
                sink.lock().push(Emitted {
                    path,
                    origin,
                    contents,
                });
            });
        }
    });
    seen
}

fn sorted_paths(seen: &Record) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = seen.lock().iter().map(|e| e.path.clone()).collect();
    paths.sort();
    paths
}

#[tokio::test]
async fn empty_directory_resolves_without_emissions() {
    let (_temp, root) = temp_dir();
    let crawler = crawler(5, "*");
    let seen = record(&crawler);

    crawler.crawl(&root).await.expect("crawl should succeed");

    assert!(seen.lock().is_empty());
    let stats = crawler.stats();
    assert_eq!(stats.directories, 1);
    assert_eq!(stats.emitted, 0);
}

#[tokio::test]
async fn missing_path_rejects_with_not_found() {
    let (_temp, root) = temp_dir();
    let crawler = crawler(5, "*");
    let missing = root.join("does-not-exist");

    let err = crawler.crawl(&missing).await.expect_err("crawl should fail");

    assert!(err.is_not_found());
    assert_eq!(err.path(), Some(missing.as_path()));
}

#[tokio::test]
async fn single_file_emits_its_own_path() {
    let (_temp, root) = temp_dir();
    let file = root.join("one.txt");
    write(&file, "one");

    let crawler = crawler(5, "*");
    let seen = record(&crawler);
    crawler.crawl(&file).await.expect("crawl should succeed");

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, file);
    assert_eq!(seen[0].origin, FileOrigin::Filesystem);
    assert_eq!(seen[0].contents, b"one");
}

#[tokio::test]
async fn nested_directories_emit_every_file() {
    let (_temp, root) = temp_dir();
    write(&root.join("one.txt"), "1");
    write(&root.join("a/two.txt"), "2");
    write(&root.join("a/b/three.txt"), "3");
    write(&root.join("a/b/c/d/four.txt"), "4");
    std::fs::create_dir_all(root.join("empty/inner")).expect("mkdir failed");

    let crawler = crawler(2, "*");
    let seen = record(&crawler);
    crawler.crawl(&root).await.expect("crawl should succeed");

    let mut expected = vec![
        root.join("one.txt"),
        root.join("a/two.txt"),
        root.join("a/b/three.txt"),
        root.join("a/b/c/d/four.txt"),
    ];
    expected.sort();
    assert_eq!(sorted_paths(&seen), expected);

    let stats = crawler.stats();
    assert_eq!(stats.emitted, 4);
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.bytes, 4);
    assert_eq!(stats.unsettled(), 0);
}

#[tokio::test]
async fn filter_selects_matching_file_only() {
    let (_temp, root) = temp_dir();
    write(&root.join("one.txt"), "1");
    write(&root.join("two.txt"), "2");
    write(&root.join("three.txt"), "3");

    let crawler = crawler(5, "three.txt");
    let seen = record(&crawler);
    crawler.crawl(&root).await.expect("crawl should succeed");

    assert_eq!(sorted_paths(&seen), vec![root.join("three.txt")]);
    assert_eq!(crawler.stats().filtered, 2);
}

#[tokio::test]
async fn default_filter_skips_dot_files() {
    let (_temp, root) = temp_dir();
    write(&root.join("visible.txt"), "v");
    write(&root.join(".hidden"), "h");

    let crawler = crawler(5, "*");
    let seen = record(&crawler);
    crawler.crawl(&root).await.expect("crawl should succeed");

    assert_eq!(sorted_paths(&seen), vec![root.join("visible.txt")]);
}

#[tokio::test]
async fn archive_entries_are_emitted_and_awaited() {
    let (_temp, root) = temp_dir();
    let archive = root.join("bundle.zip");
    write_zip(
        &archive,
        &[
            ("docs/", None),
            ("docs/a.txt", Some("alpha")),
            ("docs/b.txt", Some("beta")),
            ("readme.md", Some("skip me")),
            ("c.txt", Some("gamma")),
        ],
    );

    let crawler = crawler(1, "*.txt");
    let seen = record(&crawler);
    crawler.crawl(&root).await.expect("crawl should succeed");

    let mut seen = seen.lock().clone();
    seen.sort_by(|a, b| a.path.cmp(&b.path));
    let origin = FileOrigin::Archive {
        archive: archive.clone(),
    };
    assert_eq!(
        seen,
        vec![
            Emitted {
                path: "c.txt".into(),
                origin: origin.clone(),
                contents: b"gamma".to_vec(),
            },
            Emitted {
                path: "docs/a.txt".into(),
                origin: origin.clone(),
                contents: b"alpha".to_vec(),
            },
            Emitted {
                path: "docs/b.txt".into(),
                origin,
                contents: b"beta".to_vec(),
            },
        ]
    );

    let stats = crawler.stats();
    assert_eq!(stats.archives, 1);
    assert_eq!(stats.entries, 4);
    assert_eq!(stats.emitted, 3);
    assert_eq!(stats.completed, 3);
}

#[tokio::test]
async fn archive_can_be_crawled_directly() {
    let (_temp, root) = temp_dir();
    let archive = root.join("direct.zip");
    write_zip(&archive, &[("inner.txt", Some("inside"))]);

    let crawler = crawler(5, "*");
    let seen = record(&crawler);
    crawler.crawl(&archive).await.expect("crawl should succeed");

    assert_eq!(sorted_paths(&seen), vec![Utf8PathBuf::from("inner.txt")]);
}

#[tokio::test]
async fn archive_file_is_expanded_even_when_filter_excludes_it() {
    let (_temp, root) = temp_dir();
    write_zip(&root.join("bundle.zip"), &[("data.csv", Some("a,b"))]);

    let crawler = crawler(5, "*.csv");
    let seen = record(&crawler);
    crawler.crawl(&root).await.expect("crawl should succeed");

    assert_eq!(sorted_paths(&seen), vec![Utf8PathBuf::from("data.csv")]);
}

#[tokio::test]
async fn corrupt_archive_rejects_with_archive_error() {
    let (_temp, root) = temp_dir();
    let archive = root.join("broken.zip");
    write(&archive, "definitely not a zip file");

    let crawler = crawler(5, "*");
    let _seen = record(&crawler);
    let err = crawler.crawl(&root).await.expect_err("crawl should fail");

    assert!(matches!(err, CrawlError::Archive { ref path, .. } if *path == archive));
}

#[tokio::test]
async fn unread_archive_entry_holds_archive_completion() {
    let (_temp, root) = temp_dir();
    write_zip(
        &root.join("bundle.zip"),
        &[("read.txt", Some("read")), ("held.txt", Some("held"))],
    );

    let crawler = Arc::new(crawler(2, "*.txt"));
    let held = Arc::new(Mutex::new(Vec::new()));
    let holder = Arc::clone(&held);
    crawler.subscribe(move |event| {
        let Some(mut stream) = event.take_stream() else {
            return;
        };
        if event.path().as_str() == "held.txt" {
            holder.lock().push(stream);
        } else {
            tokio::spawn(async move {
                let mut contents = Vec::new();
                stream
                    .read_to_end(&mut contents)
                    .await
                    .expect("stream read failed");
            });
        }
    });

    let crawl = tokio::spawn({
        let crawler = Arc::clone(&crawler);
        let root = root.clone();
        async move { crawler.crawl(&root).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!crawl.is_finished(), "archive settled with an entry unread");
    let stats = crawler.stats();
    assert_eq!(stats.emitted, 2);
    assert_eq!(stats.completed, 1);

    let stream = held.lock().pop();
    let mut stream = stream.expect("held entry was never emitted");
    let mut contents = String::new();
    stream
        .read_to_string(&mut contents)
        .await
        .expect("stream read failed");
    assert_eq!(contents, "held");

    crawl
        .await
        .expect("crawl task panicked")
        .expect("crawl should succeed once the entry is read");
    assert_eq!(crawler.stats().completed, 2);
}

#[tokio::test]
async fn entry_failing_checksum_rejects_crawl() {
    let (_temp, root) = temp_dir();
    let archive = root.join("bundle.zip");
    let payload = "0123456789abcdef";
    write_zip(
        &archive,
        &[("good.txt", Some("fine")), ("bad.txt", Some(payload))],
    );

    // Stored entries keep their bytes verbatim, so flipping one breaks the CRC.
    let mut bytes = std::fs::read(&archive).expect("Failed to read archive");
    let offset = bytes
        .windows(payload.len())
        .position(|window| window == payload.as_bytes())
        .expect("payload not found in archive");
    bytes[offset + 8] ^= 0xff;
    std::fs::write(&archive, bytes).expect("Failed to rewrite archive");

    let crawler = crawler(1, "*.txt");
    crawler.subscribe(|event| {
        if let Some(mut stream) = event.take_stream() {
            tokio::spawn(async move {
                let mut contents = Vec::new();
                let _ = stream.read_to_end(&mut contents).await;
            });
        }
    });

    let err = tokio::time::timeout(Duration::from_secs(10), crawler.crawl(&root))
        .await
        .expect("crawl should settle")
        .expect_err("crawl should fail");

    assert!(
        matches!(err, CrawlError::Stream { .. } | CrawlError::Archive { .. }),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn stalled_observer_keeps_crawl_pending() {
    let (_temp, root) = temp_dir();
    write(&root.join("a.txt"), "a");

    let crawler = crawler(5, "*");
    let held = Arc::new(Mutex::new(Vec::new()));
    let holder = Arc::clone(&held);
    crawler.subscribe(move |event| {
        if let Some(stream) = event.take_stream() {
            holder.lock().push(stream);
        }
    });

    let outcome = tokio::time::timeout(Duration::from_millis(200), crawler.crawl(&root)).await;

    assert!(outcome.is_err(), "crawl must not settle while a stream is unread");
    assert_eq!(held.lock().len(), 1);
    assert_eq!(crawler.stats().unsettled(), 1);
}

#[tokio::test]
async fn observer_without_stream_consumer_keeps_crawl_pending() {
    let (_temp, root) = temp_dir();
    write(&root.join("a.txt"), "a");

    let crawler = crawler(5, "*");
    let outcome = tokio::time::timeout(Duration::from_millis(200), crawler.crawl(&root)).await;

    assert!(outcome.is_err(), "nobody took the stream");
}

#[tokio::test]
async fn consumer_failure_rejects_crawl() {
    let (_temp, root) = temp_dir();
    write(&root.join("bad.txt"), "x");

    let crawler = crawler(5, "*");
    crawler.subscribe(|event| {
        if let Some(stream) = event.take_stream() {
            stream.fail("checksum mismatch");
        }
    });

    let err = crawler.crawl(&root).await.expect_err("crawl should fail");

    assert!(matches!(err, CrawlError::Consumer { .. }));
    assert_eq!(err.path(), Some(root.join("bad.txt").as_path()));
    assert_eq!(crawler.stats().failed, 1);
}

#[tokio::test]
async fn discarded_streams_resolve() {
    let (_temp, root) = temp_dir();
    write(&root.join("a.txt"), "a");
    write(&root.join("b/c.txt"), "c");

    let crawler = crawler(1, "*");
    crawler.subscribe(|event| {
        if let Some(stream) = event.take_stream() {
            stream.discard();
        }
    });

    crawler.crawl(&root).await.expect("crawl should succeed");
    assert_eq!(crawler.stats().completed, 2);
}

#[tokio::test]
async fn relative_path_resolves_against_working_directory() {
    let cwd = Utf8PathBuf::try_from(std::env::current_dir().expect("cwd")).expect("Non-UTF8 cwd");
    let temp = tempfile::tempdir_in(&cwd).expect("Failed to create temp dir");
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).expect("Non-UTF8 temp path");
    write(&root.join("one.txt"), "1");

    let relative = root.strip_prefix(&cwd).expect("temp dir is inside cwd");
    let crawler = crawler(5, "*");
    let seen = record(&crawler);
    crawler
        .crawl(Utf8Path::new(".").join(relative))
        .await
        .expect("crawl should succeed");

    assert_eq!(sorted_paths(&seen), vec![cwd.join(relative).join("one.txt")]);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_are_followed() {
    let (_temp, root) = temp_dir();
    let (_target_temp, target_root) = temp_dir();
    write(&target_root.join("real.txt"), "real");
    write(&target_root.join("dir/nested.txt"), "nested");

    std::os::unix::fs::symlink(target_root.join("real.txt"), root.join("link.txt"))
        .expect("symlink failed");
    std::os::unix::fs::symlink(target_root.join("dir"), root.join("linked-dir"))
        .expect("symlink failed");

    let crawler = crawler(5, "*");
    let seen = record(&crawler);
    crawler.crawl(&root).await.expect("crawl should succeed");

    let mut seen = seen.lock().clone();
    seen.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].path, root.join("link.txt"));
    assert_eq!(seen[0].contents, b"real");
    assert_eq!(seen[1].path, root.join("linked-dir/nested.txt"));
    assert_eq!(seen[1].contents, b"nested");
}

#[cfg(unix)]
#[tokio::test]
async fn dangling_symlink_rejects_with_not_found() {
    let (_temp, root) = temp_dir();
    std::os::unix::fs::symlink(root.join("gone.txt"), root.join("dangling.txt"))
        .expect("symlink failed");

    let crawler = crawler(5, "*");
    let _seen = record(&crawler);
    let err = crawler.crawl(&root).await.expect_err("crawl should fail");

    assert!(err.is_not_found());
}

#[tokio::test]
async fn repeated_crawls_emit_the_same_paths() {
    let (_temp, root) = temp_dir();
    write(&root.join("x.txt"), "x");
    write(&root.join("y/z.txt"), "z");
    write_zip(&root.join("y/pack.zip"), &[("w.txt", Some("w"))]);

    let crawler = crawler(3, "*");
    let seen = record(&crawler);

    crawler.crawl(&root).await.expect("first crawl should succeed");
    let first = sorted_paths(&seen);
    seen.lock().clear();

    crawler.crawl(&root).await.expect("second crawl should succeed");
    let second = sorted_paths(&seen);

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    assert_eq!(crawler.stats().emitted, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_streams_never_exceed_parallel() {
    let (_temp, root) = temp_dir();
    for index in 0..20 {
        write(&root.join(format!("dir{}/file{index}.txt", index % 4)), "payload");
    }
    write_zip(
        &root.join("pack.zip"),
        &[("e1.txt", Some("1")), ("e2.txt", Some("2")), ("e3.txt", Some("3"))],
    );

    let crawler = crawler(3, "*");
    let seen: Record = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    crawler.subscribe(move |event| {
        let path = event.path().to_owned();
        let origin = event.origin().clone();
        let sink = Arc::clone(&sink);
        if let Some(mut stream) = event.take_stream() {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let mut contents = Vec::new();
                stream
                    .read_to_end(&mut contents)
                    .await
                    .expect("stream read failed");
                sink.lock().push(Emitted {
                    path,
                    origin,
                    contents,
                });
            });
        }
    });

    crawler.crawl(&root).await.expect("crawl should succeed");

    let stats = crawler.stats();
    assert_eq!(stats.emitted, 23);
    assert_eq!(stats.completed, 23);
    assert!(stats.peak_in_flight <= 3, "peak was {}", stats.peak_in_flight);
    assert!(stats.peak_in_flight >= 1);
}

#[tokio::test]
async fn unsubscribed_observer_sees_nothing() {
    let (_temp, root) = temp_dir();
    write(&root.join("a.txt"), "a");

    let crawler = crawler(5, "*");
    let _seen = record(&crawler);
    let silent = Arc::new(Mutex::new(0_usize));
    let counter = Arc::clone(&silent);
    let id = crawler.subscribe(move |_| *counter.lock() += 1);
    assert!(crawler.unsubscribe(id));

    crawler.crawl(&root).await.expect("crawl should succeed");
    assert_eq!(*silent.lock(), 0);
}

#[test]
fn archives_leave_blocking_threads_for_file_access() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .max_blocking_threads(4)
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    runtime.block_on(async {
        let (_temp, root) = temp_dir();
        let payload = "x".repeat(1 << 20);
        for index in 0..8 {
            write(&root.join(format!("plain{index}.txt")), "plain");
            write_zip(
                &root.join(format!("bundle{index}.zip")),
                &[
                    ("one.txt", Some(payload.as_str())),
                    ("two.txt", Some(payload.as_str())),
                ],
            );
        }

        let crawler = crawler(1, "*.txt");
        let seen = record(&crawler);
        tokio::time::timeout(Duration::from_secs(60), crawler.crawl(&root))
            .await
            .expect("crawl stalled")
            .expect("crawl should succeed");

        assert_eq!(seen.lock().len(), 24);
        let stats = crawler.stats();
        assert_eq!(stats.archives, 8);
        assert_eq!(stats.emitted, 24);
        assert_eq!(stats.completed, 24);
    });
}
