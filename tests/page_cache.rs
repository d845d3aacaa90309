use pagefold::{
    cache::{CacheEntry, PageCache},
    util::sha256_hex,
};

fn key(artifact: &str) -> String {
    sha256_hex(artifact.as_bytes())
}

#[test]
fn put_then_get_returns_payload_for_same_scope() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PageCache::open(dir.path());
    let h = key("imgX");

    assert_eq!(cache.get(&h, "modelA"), None);
    cache.put(&h, "modelA", "text1");
    assert_eq!(cache.get(&h, "modelA").as_deref(), Some("text1"));
    assert_eq!(cache.get(&h, "modelB"), None);
}

#[test]
fn scope_mismatch_read_keeps_the_entry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PageCache::open(dir.path());
    let h = key("imgX");

    cache.put(&h, "modelA", "text1");
    assert_eq!(cache.get(&h, "modelB"), None);
    assert_eq!(cache.get(&h, "modelA").as_deref(), Some("text1"));
}

#[test]
fn new_scope_overwrites_the_single_slot() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PageCache::open(dir.path());
    let h = key("imgX");

    cache.put(&h, "modelA", "text1");
    cache.put(&h, "modelB", "text2");
    assert_eq!(cache.get(&h, "modelA"), None);
    assert_eq!(cache.get(&h, "modelB").as_deref(), Some("text2"));
    assert_eq!(cache.stats().count, 1);
}

#[test]
fn entries_are_human_readable_json() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PageCache::open(dir.path());
    let h = key("page-7");
    cache.put(&h, "qwen-vl-max", "## Problem A. X");

    let raw = std::fs::read_to_string(dir.path().join(format!("{h}.json"))).unwrap();
    let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
    assert_eq!(entry.artifact_hash, h);
    assert_eq!(entry.scope, "qwen-vl-max");
    assert_eq!(entry.payload, "## Problem A. X");
    assert!(!entry.created_at.is_empty());
}

#[test]
fn corrupted_entry_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PageCache::open(dir.path());
    let h = key("broken");
    std::fs::write(dir.path().join(format!("{h}.json")), "{not json").unwrap();

    assert_eq!(cache.get(&h, "modelA"), None);
    cache.put(&h, "modelA", "fixed");
    assert_eq!(cache.get(&h, "modelA").as_deref(), Some("fixed"));
}

#[test]
fn malformed_keys_never_touch_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PageCache::open(dir.path());

    cache.put("../escape", "modelA", "x");
    assert_eq!(cache.get("../escape", "modelA"), None);
    assert_eq!(cache.stats().count, 0);
    assert!(!dir.path().parent().unwrap().join("escape.json").exists());
}

#[test]
fn failed_put_is_swallowed() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file in the way").unwrap();

    let cache = PageCache::open(&blocker);
    let h = key("imgX");
    cache.put(&h, "modelA", "text1");
    assert_eq!(cache.get(&h, "modelA"), None);
}

#[test]
fn stats_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PageCache::open(dir.path());
    std::fs::write(dir.path().join("notes.txt"), "unrelated").unwrap();

    for i in 0..3 {
        cache.put(&key(&format!("img{i}")), "modelA", "payload");
    }
    let stats = cache.stats();
    assert_eq!(stats.count, 3);
    assert!(stats.total_size_bytes > 0);

    cache.clear().unwrap();
    assert_eq!(cache.stats().count, 0);
    assert!(dir.path().join("notes.txt").exists());
}

#[test]
fn disabled_cache_never_hits() {
    let dir = tempfile::tempdir().unwrap();
    let h = key("imgX");
    PageCache::open(dir.path()).put(&h, "modelA", "text1");

    let off = PageCache::disabled(dir.path());
    assert_eq!(off.get(&h, "modelA"), None);
    off.put(&key("imgY"), "modelA", "text2");
    assert_eq!(PageCache::open(dir.path()).stats().count, 1);
}

#[test]
fn concurrent_puts_of_one_artifact_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PageCache::open(dir.path());
    let h = key("blank-page");

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| cache.put(&h, "modelA", "same text"));
        }
    });

    assert_eq!(cache.get(&h, "modelA").as_deref(), Some("same text"));
    assert_eq!(cache.stats().count, 1);
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
        .count();
    assert_eq!(leftovers, 0);
}
