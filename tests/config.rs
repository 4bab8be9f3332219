// tests/config.rs
use board_rss_archiver::ingest::config::{load_default, load_from};
use std::{env, fs};

const ENV_KEYS: [&str; 4] = [
    "ARCHIVER_CONFIG_PATH",
    "RSS_FEED_BASE_URL",
    "BOARD_IDS",
    "RETENTION_YEARS",
];

fn clear_env() {
    for k in ENV_KEYS {
        env::remove_var(k);
    }
}

#[test]
fn parse_toml_and_json_paths() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("archiver.toml");
    fs::write(
        &p_toml,
        r#"
feed_base_url = "https://www.knue.ac.kr/rssBbsNtt.do"
source_ids = [" 25 ", "", "26", "25"]
storage_root = "/var/lib/archiver"

[preview]
base_url = "https://preview.example.com/parse"
token = "t0ken"
"#,
    )
    .unwrap();
    let cfg = load_from(&p_toml).unwrap();
    assert_eq!(cfg.source_ids, vec!["25".to_string(), "26".to_string()]);
    assert_eq!(cfg.source_param, "bbsNo");
    assert_eq!(cfg.storage_root, std::path::PathBuf::from("/var/lib/archiver"));
    assert_eq!(cfg.preview.as_ref().unwrap().token, "t0ken");
    cfg.validate().unwrap();

    let p_json = dir.path().join("archiver.json");
    fs::write(
        &p_json,
        r#"{"feed_base_url":"https://x/rss","source_ids":["7"],"retry":{"max_retries":0}}"#,
    )
    .unwrap();
    let cj = load_from(&p_json).unwrap();
    assert_eq!(cj.source_ids, vec!["7".to_string()]);
    assert_eq!(cj.retry.max_retries, 0);
    assert_eq!(cj.retry.timeout_ms, 5000);
}

#[test]
fn unreadable_or_garbage_files_fail() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_from(&dir.path().join("missing.toml")).is_err());

    let p = dir.path().join("broken.toml");
    fs::write(&p, "feed_base_url = [").unwrap();
    let err = load_from(&p).unwrap_err();
    assert!(err.to_string().contains("unsupported archiver config format"));
}

#[serial_test::serial]
#[test]
fn default_uses_env_path_then_file_then_env() {
    // Isolate CWD so the repo's own config/ is never read.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // 1) Nothing at all -> missing base URL
    let err = load_default().unwrap_err();
    assert!(err.to_string().contains("RSS_FEED_BASE_URL"));

    // 2) Plain environment variables
    env::set_var("RSS_FEED_BASE_URL", "https://env/rss");
    env::set_var("BOARD_IDS", "25,26");
    env::set_var("RETENTION_YEARS", "5");
    let ce = load_default().unwrap();
    assert_eq!(ce.feed_base_url, "https://env/rss");
    assert_eq!(ce.retention_years, 5);

    // 3) ./config/archiver.toml wins over env
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(
        cfg_dir.join("archiver.toml"),
        r#"feed_base_url = "https://file/rss"
source_ids = ["1"]"#,
    )
    .unwrap();
    let cf = load_default().unwrap();
    assert_eq!(cf.feed_base_url, "https://file/rss");
    assert_eq!(cf.retention_years, 2);

    // 4) ARCHIVER_CONFIG_PATH wins over both
    let p_env = tmp.path().join("override.json");
    fs::write(&p_env, r#"{"feed_base_url":"https://override/rss","source_ids":["9"]}"#).unwrap();
    env::set_var("ARCHIVER_CONFIG_PATH", p_env.display().to_string());
    let co = load_default().unwrap();
    assert_eq!(co.source_ids, vec!["9".to_string()]);

    // 5) A dangling override is an error, not a silent fallback
    env::set_var("ARCHIVER_CONFIG_PATH", tmp.path().join("nope.toml").display().to_string());
    assert!(load_default().is_err());

    clear_env();
    env::set_current_dir(&old).unwrap();
}
