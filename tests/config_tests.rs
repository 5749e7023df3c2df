use std::fs;
use std::time::Duration;

use tempfile::TempDir;

use pacprism::config::Config;

fn write_config(contents: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pacprism.conf");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

#[test]
fn test_defaults_without_file() {
    let config = Config::new();
    assert_eq!(config.upstream(), "ftp.debian.org");
    assert_eq!(config.cache_dir(), "./cache");
    assert_eq!(config.max_retries(), 3);
    assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    assert_eq!(config.read_timeout(), Duration::from_secs(30));
    assert_eq!(config.port(), 9001);
    assert_eq!(config.bind_address(), "0.0.0.0");
    assert_eq!(config.liveness_threshold(), 3);
}

#[test]
fn test_load_key_values() {
    let (_dir, path) = write_config(
        "upstream = mirror.example.org:8080\n\
         cache_dir = /tmp/prism-cache\n\
         max_retries = 5\n\
         port = 8088\n",
    );
    let config = Config::load_from_file(&path).unwrap();

    assert_eq!(config.upstream(), "mirror.example.org:8080");
    assert_eq!(config.cache_dir(), "/tmp/prism-cache");
    assert_eq!(config.max_retries(), 5);
    assert_eq!(config.port(), 8088);
    // Untouched keys keep their defaults.
    assert_eq!(config.read_timeout(), Duration::from_secs(30));
}

#[test]
fn test_comments_and_blank_lines_skipped() {
    let (_dir, path) = write_config(
        "# pacPrism configuration\n\
         \n\
         port = 9002\n\
         # trailing comment\n",
    );
    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.port(), 9002);
    assert!(!config.has("# pacPrism configuration"));
}

#[test]
fn test_malformed_lines_skipped() {
    let (_dir, path) = write_config(
        "no equals sign here\n\
         = value-without-key\n\
         port = 9003\n",
    );
    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.port(), 9003);
    assert!(!config.has("no equals sign here"));
}

#[test]
fn test_unparseable_number_falls_back() {
    let (_dir, path) = write_config("max_retries = many\nconnect_timeout = soon\n");
    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.max_retries(), 3);
    assert_eq!(config.connect_timeout(), Duration::from_secs(10));
}

#[test]
fn test_later_key_overwrites_earlier() {
    let (_dir, path) = write_config("port = 1000\nport = 2000\n");
    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.port(), 2000);
}

#[test]
fn test_whitespace_trimmed() {
    let (_dir, path) = write_config("  upstream   =   deb.example.net  \n");
    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.upstream(), "deb.example.net");
}

#[test]
fn test_set_and_has() {
    let mut config = Config::new();
    assert!(!config.has("upstream"));
    config.set("upstream", "mirror.local");
    assert!(config.has("upstream"));
    assert_eq!(config.upstream(), "mirror.local");
}

#[test]
fn test_missing_file_is_error() {
    assert!(Config::load_from_file("/nonexistent/pacprism.conf").is_err());
}

#[test]
fn test_empty_value_uses_default() {
    let (_dir, path) = write_config("upstream =\n");
    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.upstream(), "ftp.debian.org");
}
