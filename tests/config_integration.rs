//! Integration tests wiring a config file into the engine.

use std::time::Duration;

use logwatch::config::{ConfigLoader, EditorConfig, LogwatchConfig};
use logwatch::index::FileOrigin;
use logwatch::watcher::{Engine, EngineEvent};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

async fn wait_for_scan(rx: &mut UnboundedReceiver<EngineEvent>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            if matches!(event, EngineEvent::ScanComplete { .. }) {
                return;
            }
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_configured_directory_is_watched() {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");
    std::fs::create_dir(&logs).unwrap();
    std::fs::write(logs.join("old.log"), "ERROR already there\n").unwrap();

    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "directories = ['{}']\n\
             index_path = '{}'\n\
             patterns = ['error', '^fatal:']\n\
             [editor]\n\
             kind = 'custom'\n\
             command_template = 'vim +{{line}} {{path}}'\n",
            logs.display(),
            dir.path().join("index.json").display()
        ),
    )
    .unwrap();

    let config = ConfigLoader::with_path(config_path).load().unwrap();
    assert!(matches!(config.editor, EditorConfig::Custom { .. }));

    let (engine, mut rx) = Engine::open(
        config.watch.engine_settings(),
        Some(config.index_path()),
        config.seeds().unwrap(),
    );
    assert!(engine.directories().is_empty());
    assert_eq!(engine.patterns().len(), 2);

    // First cycle adds the directory and starts its initial scan
    engine.poll_once().await;
    wait_for_scan(&mut rx).await;
    assert_eq!(engine.directories(), vec![logs.clone()]);
    let old = engine.file(logs.join("old.log")).unwrap();
    assert_eq!(old.origin, FileOrigin::Directory(logs.clone()));
    assert_eq!(old.offset, 20);

    std::fs::write(logs.join("new.log"), "fatal: boom\nok\n").unwrap();
    engine.poll_once().await;

    assert_eq!(engine.file(logs.join("old.log")).unwrap().match_count, 0);
    assert_eq!(engine.file(logs.join("new.log")).unwrap().match_count, 1);
    assert_eq!(engine.files_for_pattern("^fatal:"), vec![logs.join("new.log")]);
}

#[tokio::test]
async fn test_configured_seeds_merge_with_persisted_index() {
    let dir = TempDir::new().unwrap();
    let index_path = dir.path().join("index.json");
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "patterns = ['error']\nindex_path = '{}'\n",
            index_path.display()
        ),
    )
    .unwrap();
    let config = ConfigLoader::with_path(config_path.clone()).load().unwrap();

    {
        let (engine, _rx) = Engine::open(
            config.watch.engine_settings(),
            Some(config.index_path()),
            config.seeds().unwrap(),
        );
        assert!(engine
            .add_pattern(logwatch::matcher::Pattern::parse("panic"))
            .unwrap());
    }

    std::fs::write(
        &config_path,
        format!(
            "patterns = ['error', 'timeout']\nindex_path = '{}'\n",
            index_path.display()
        ),
    )
    .unwrap();
    let config = ConfigLoader::with_path(config_path).load().unwrap();
    let (engine, _rx) = Engine::open(
        config.watch.engine_settings(),
        Some(config.index_path()),
        config.seeds().unwrap(),
    );
    let texts: Vec<String> = engine.patterns().into_iter().map(|p| p.text).collect();
    assert_eq!(texts, vec!["error", "panic", "timeout"]);
}

fn open(config: &LogwatchConfig) -> (Engine, UnboundedReceiver<EngineEvent>) {
    Engine::open(
        config.watch.engine_settings(),
        Some(config.index_path()),
        config.seeds().unwrap(),
    )
}

#[tokio::test]
async fn test_removals_survive_restart_with_same_config() {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");
    std::fs::create_dir(&logs).unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "directories = ['{}']\n\
             index_path = '{}'\n\
             [datetime_filter]\n\
             start = '2024-01-01 00:00:00'\n",
            logs.display(),
            dir.path().join("index.json").display()
        ),
    )
    .unwrap();
    let config = ConfigLoader::with_path(config_path).load().unwrap();

    {
        let (engine, mut rx) = open(&config);
        engine.poll_once().await;
        wait_for_scan(&mut rx).await;
        assert_eq!(engine.patterns().len(), 5);
        assert!(engine.datetime_filter().is_active());

        assert!(engine.remove_pattern("error").is_some());
        assert!(engine.remove_directory(&logs));
        engine.clear_datetime_filter();
    }

    for _ in 0..2 {
        let (engine, _rx) = open(&config);
        engine.poll_once().await;
        let texts: Vec<String> = engine.patterns().into_iter().map(|p| p.text).collect();
        assert_eq!(texts, vec!["exception", "traceback", "failed", "critical"]);
        assert!(engine.directories().is_empty());
        assert!(!engine.datetime_filter().is_active());
    }
}

#[tokio::test]
async fn test_configured_directory_survives_command_only_session() {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");
    std::fs::create_dir(&logs).unwrap();
    std::fs::write(logs.join("app.log"), "old error\nold error\n").unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "directories = ['{}']\nindex_path = '{}'\n",
            logs.display(),
            dir.path().join("index.json").display()
        ),
    )
    .unwrap();
    let config = ConfigLoader::with_path(config_path).load().unwrap();

    // What `logwatch reset` does: open, commit, exit
    {
        let (engine, _rx) = open(&config);
        engine.reset_all_counts();
    }

    let (engine, mut rx) = open(&config);
    engine.poll_once().await;
    wait_for_scan(&mut rx).await;
    engine.poll_once().await;

    let file = engine.file(logs.join("app.log")).unwrap();
    assert_eq!(file.offset, 20);
    assert_eq!(file.match_count, 0);
}

#[test]
fn test_invalid_configured_filter_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "[datetime_filter]\nstart = '2024-02-01 00:00:00'\nend = '2024-01-01 00:00:00'\n",
    )
    .unwrap();
    let config = ConfigLoader::with_path(config_path).load().unwrap();
    assert!(config.seeds().is_err());
}
