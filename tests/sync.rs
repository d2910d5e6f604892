mod common;

use std::str::FromStr;

use common::Fixture;
use facesync::Error;
use facesync::cache::ExtractionStatus;
use facesync::config::ConfDir;
use regex::Regex;
use rstest::*;
use tempfile::TempDir;

#[fixture]
fn gallery() -> Fixture {
    let fixture = Fixture::new();
    fixture.add_image("alice.jpg", "1,0,0");
    fixture.add_image("bob.jpg", "0,1,0");
    fixture
}

#[rstest]
#[tokio::test]
async fn sync_downloads_and_encodes(gallery: Fixture) {
    let db = gallery.open().await;
    let report = db.sync().await.unwrap();
    assert_eq!(report.new, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(db.cache().len(), 2);
    assert!(!db.cache().is_dirty());

    let local = db.engine().gallery().list_local_names().unwrap();
    assert!(local.contains("alice.jpg") && local.contains("bob.jpg"));
    // 缓存同时写入了远程容器
    assert!(gallery.store.get("encodings", "encodings.bin").is_some());
}

#[rstest]
#[tokio::test]
async fn second_sync_is_noop(gallery: Fixture) {
    let db = gallery.open().await;
    db.sync().await.unwrap();
    let calls = gallery.extractor.calls();
    assert_eq!(gallery.store.upserts(), 1);
    let saved = std::fs::metadata(gallery.conf_dir.path().join("encodings.bin")).unwrap().modified().unwrap();

    let report = db.sync().await.unwrap();
    assert_eq!(report.new, 0);
    assert_eq!(gallery.extractor.calls(), calls);
    // 没有变化时既不写本地副本也不上传
    assert_eq!(gallery.store.upserts(), 1);
    let after = std::fs::metadata(gallery.conf_dir.path().join("encodings.bin")).unwrap().modified().unwrap();
    assert_eq!(saved, after);
}

#[rstest]
#[tokio::test]
async fn failed_save_is_retried_once(gallery: Fixture) {
    let db = gallery.open().await;
    db.sync().await.unwrap();
    assert_eq!(gallery.store.upserts(), 1);

    gallery.add_image("carol.jpg", "0,0,1");
    gallery.store.set_upserts_failing(true);
    assert!(matches!(db.sync().await, Err(Error::RemoteUnavailable(_))));
    assert!(db.cache().is_dirty());
    assert!(db.cache().contains("carol.jpg"));

    gallery.store.set_upserts_failing(false);
    let report = db.sync().await.unwrap();
    assert_eq!(report.new, 0);
    assert_eq!(gallery.store.upserts(), 2);
    assert!(!db.cache().is_dirty());

    db.sync().await.unwrap();
    assert_eq!(gallery.store.upserts(), 2);
}

#[rstest]
#[tokio::test]
async fn unfetchable_object_does_not_block_others(gallery: Fixture) {
    gallery.add_image("flagged.jpg", "1,1,0");
    gallery.store.break_object("flagged.jpg");
    let db = gallery.open().await;

    let report = db.sync().await.unwrap();
    assert_eq!(report.new, 2);
    assert_eq!(report.deferred, 1);
    assert_eq!(db.cache().len(), 2);
    assert!(!db.cache().contains("flagged.jpg"));
    assert!(!db.engine().gallery().exists("flagged.jpg"));

    let report = db.sync().await.unwrap();
    assert_eq!(report.new, 0);
    assert_eq!(report.deferred, 1);
    assert_eq!(gallery.extractor.calls(), 2);

    let result = db.match_probe(b"1,0,0", None).await.unwrap();
    assert!(!result.degraded);
    assert_eq!(result.matched_with.as_deref(), Some("alice.jpg"));
}

#[rstest]
#[tokio::test]
async fn cache_reloaded_when_remote_recovers(gallery: Fixture) {
    gallery.open().await.sync().await.unwrap();
    let calls = gallery.extractor.calls();

    // 新的数据目录，启动时远程不可达
    let fresh = TempDir::new().unwrap();
    let conf_dir = ConfDir::from_str(fresh.path().to_str().unwrap()).unwrap();
    gallery.store.set_failing(true);
    let db = gallery.builder_in(conf_dir).open().await.unwrap();
    assert!(db.cache().is_empty());
    assert!(db.cache().is_load_pending());

    gallery.store.set_failing(false);
    let report = db.sync().await.unwrap();
    assert_eq!(report.new, 0);
    assert_eq!(db.cache().len(), 2);
    assert!(!db.cache().is_load_pending());
    assert_eq!(gallery.extractor.calls(), calls);
}

#[rstest]
#[tokio::test]
async fn concurrent_syncs_extract_once(gallery: Fixture) {
    let db = gallery.open().await;
    let (a, b) = tokio::join!(db.sync(), db.sync());
    assert_eq!(a.unwrap().new + b.unwrap().new, 2);
    assert_eq!(gallery.extractor.calls(), 2);
    assert_eq!(db.cache().len(), 2);
}

#[rstest]
#[tokio::test]
async fn match_finds_nearest(gallery: Fixture) {
    let db = gallery.open().await;
    let result = db.match_probe(b"0.9,0.1,0", Some("probe.jpg")).await.unwrap();
    assert!(result.is_match);
    assert_eq!(result.matched_with.as_deref(), Some("alice.jpg"));
    assert_eq!(result.probe.as_deref(), Some("probe.jpg"));
    assert!(result.distance.unwrap() < 0.4);
    assert!(!result.degraded);
}

#[rstest]
#[tokio::test]
async fn match_reports_distance_without_match(gallery: Fixture) {
    let db = gallery.open().await;
    let result = db.match_probe(b"0,0,1", None).await.unwrap();
    assert!(!result.is_match);
    assert_eq!(result.matched_with, None);
    assert!((result.distance.unwrap() - 1.0).abs() < 1e-6);
}

#[rstest]
#[tokio::test]
async fn match_sees_new_remote_images(gallery: Fixture) {
    let db = gallery.open().await;
    db.sync().await.unwrap();

    gallery.add_image("carol.jpg", "0,0,1");
    let result = db.match_probe(b"0,0.1,1", None).await.unwrap();
    assert_eq!(result.matched_with.as_deref(), Some("carol.jpg"));
    assert_eq!(db.cache().len(), 3);
}

#[rstest]
#[tokio::test]
async fn match_without_sync_uses_cache(gallery: Fixture) {
    let db = gallery.builder().sync_before_match(false).open().await.unwrap();
    let result = db.match_probe(b"1,0,0", None).await.unwrap();
    assert!(!result.is_match);
    assert_eq!(result.distance, None);
    assert!(db.cache().is_empty());
}

#[rstest]
#[tokio::test]
async fn match_is_idempotent(gallery: Fixture) {
    let db = gallery.open().await;
    let first = db.match_probe(b"0.2,1,0", None).await.unwrap();
    let second = db.match_probe(b"0.2,1,0", None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.matched_with.as_deref(), Some("bob.jpg"));
}

#[tokio::test]
async fn empty_gallery_never_matches() {
    let fixture = Fixture::new();
    let db = fixture.open().await;
    let result = db.match_probe(b"1,0,0", None).await.unwrap();
    assert!(!result.is_match);
    assert_eq!(result.matched_with, None);
    assert_eq!(result.distance, None);
}

#[tokio::test]
async fn equal_distances_pick_smallest_name() {
    let fixture = Fixture::new();
    fixture.add_image("zoe.jpg", "1,0,0");
    fixture.add_image("adam.jpg", "1,0,0");
    let db = fixture.open().await;
    let result = db.match_probe(b"1,0,0", None).await.unwrap();
    assert_eq!(result.matched_with.as_deref(), Some("adam.jpg"));
}

#[rstest]
#[tokio::test]
async fn match_degrades_when_store_fails(gallery: Fixture) {
    let db = gallery.open().await;
    db.sync().await.unwrap();

    gallery.store.set_failing(true);
    assert!(matches!(db.sync().await, Err(Error::RemoteUnavailable(_))));

    let result = db.match_probe(b"1,0,0", None).await.unwrap();
    assert!(result.degraded);
    assert_eq!(result.matched_with.as_deref(), Some("alice.jpg"));
}

#[rstest]
#[tokio::test]
async fn probe_errors(gallery: Fixture) {
    let db = gallery.open().await;
    assert!(matches!(db.match_probe(b"", None).await, Err(Error::InvalidInput(_))));
    assert!(matches!(db.match_probe(b"noface", None).await, Err(Error::NoFaceDetected)));
    assert!(matches!(db.match_probe(b"broken", None).await, Err(Error::InvalidInput(_))));
    assert!(matches!(db.match_probe(b"down", None).await, Err(Error::RemoteUnavailable(_))));
}

#[rstest]
#[tokio::test]
async fn failed_images_are_cached_and_not_retried(gallery: Fixture) {
    gallery.add_image("crowd.jpg", "noface");
    gallery.add_image("corrupt.jpg", "broken");
    let db = gallery.open().await;

    let report = db.sync().await.unwrap();
    assert_eq!(report.new, 4);
    assert_eq!(report.failed, 2);

    let snapshot = db.cache().snapshot();
    assert_eq!(snapshot["crowd.jpg"].status, ExtractionStatus::NoFace);
    assert_eq!(snapshot["corrupt.jpg"].status, ExtractionStatus::Failed);

    let calls = gallery.extractor.calls();
    assert_eq!(db.sync().await.unwrap().new, 0);
    assert_eq!(gallery.extractor.calls(), calls);
}

#[rstest]
#[tokio::test]
async fn unavailable_extractor_defers(gallery: Fixture) {
    gallery.add_image("later.jpg", "down");
    let db = gallery.open().await;

    let report = db.sync().await.unwrap();
    assert_eq!(report.new, 2);
    assert_eq!(report.deferred, 1);
    assert!(!db.cache().contains("later.jpg"));

    // 图片已在本地，下次同步会再次尝试提取
    let report = db.sync().await.unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(gallery.extractor.calls(), 4);
}

#[rstest]
#[tokio::test]
async fn local_images_missing_from_cache_are_recovered(gallery: Fixture) {
    let db = gallery.open().await;
    db.engine().gallery().write_local("alice.jpg", b"1,0,0").await.unwrap();

    let report = db.sync().await.unwrap();
    assert_eq!(report.new, 2);
    assert!(db.cache().contains("alice.jpg"));
}

#[rstest]
#[tokio::test]
async fn cache_survives_restart(gallery: Fixture) {
    gallery.open().await.sync().await.unwrap();
    let calls = gallery.extractor.calls();

    // 同一个数据目录，从本地副本加载
    let db = gallery.open().await;
    assert_eq!(db.cache().len(), 2);

    // 全新的数据目录，从远程容器加载，只恢复图片文件
    let fresh = TempDir::new().unwrap();
    let conf_dir = ConfDir::from_str(fresh.path().to_str().unwrap()).unwrap();
    let db = gallery.builder_in(conf_dir).open().await.unwrap();
    assert_eq!(db.cache().len(), 2);
    let report = db.sync().await.unwrap();
    assert_eq!(report.new, 0);
    assert_eq!(gallery.extractor.calls(), calls);
    assert!(db.engine().gallery().exists("alice.jpg"));
}

#[rstest]
#[tokio::test]
async fn removed_images_kept_without_prune(gallery: Fixture) {
    let db = gallery.open().await;
    db.sync().await.unwrap();

    gallery.store.delete("images", "bob.jpg");
    let report = db.sync().await.unwrap();
    assert_eq!(report.removed, 0);
    assert!(db.cache().contains("bob.jpg"));
}

#[rstest]
#[tokio::test]
async fn prune_removes_deleted_images(gallery: Fixture) {
    let db = gallery.builder().prune(true).open().await.unwrap();
    db.sync().await.unwrap();

    gallery.store.delete("images", "bob.jpg");
    let report = db.sync().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(!db.cache().contains("bob.jpg"));
    assert!(!db.engine().gallery().exists("bob.jpg"));
    assert!(db.cache().contains("alice.jpg"));
}

#[rstest]
#[tokio::test]
async fn suffix_filter_skips_other_files(gallery: Fixture) {
    gallery.add_image("notes.txt", "1,1,1");
    let db = gallery.builder().suffix(Regex::new(r"(?i)\.(jpg|png)$").unwrap()).open().await.unwrap();
    assert_eq!(db.sync().await.unwrap().new, 2);
    assert!(!db.cache().contains("notes.txt"));
}

#[rstest]
#[tokio::test]
async fn reset_starts_over(gallery: Fixture) {
    let db = gallery.open().await;
    db.sync().await.unwrap();

    db.reset().await.unwrap();
    assert!(db.cache().is_empty());
    assert!(db.engine().gallery().list_local_names().unwrap().is_empty());

    assert_eq!(db.sync().await.unwrap().new, 2);
}

#[tokio::test]
async fn unknown_model_requires_threshold() {
    let fixture = Fixture::new();
    let builder = facesync::FaceDBBuilder::new(fixture.conf_dir(), fixture.store.clone(), fixture.extractor.clone());
    assert!(matches!(builder.open().await, Err(Error::InvalidInput(_))));
}
