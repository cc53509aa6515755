//! [`ConfigBackup`] on the local filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use md5::{Digest, Md5};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use portbridge_app::ports::{ConfigBackup, DeviceApi};
use portbridge_domain::backup::{
    BackupOutcome, HistoryEntry, LegacyLogEntry, LogsExportOutcome, RemoteEntry, SNAPSHOT_FORMAT,
    is_exportable_log, latest_snapshot, snapshot_name,
};
use portbridge_domain::device::Device;
use portbridge_domain::error::BridgeError;
use portbridge_domain::id::DeviceId;
use portbridge_domain::time::now;

use crate::config::BackupConfig;
use crate::error::BackupError;

const HISTORY_FILE: &str = "backup.log";
const LEGACY_FILE: &str = "log.json";
const TMP_SUFFIX: &str = ".tmp";
const REMOTE_LOGS_DIR: &str = "/logs";

/// A fetched remote file, named the way it is stored in a snapshot.
struct Fetched {
    name: String,
    content: Vec<u8>,
}

pub struct FsBackupManager<A> {
    api: Arc<A>,
    config: BackupConfig,
}

impl<A: DeviceApi> FsBackupManager<A> {
    pub fn new(api: Arc<A>, config: BackupConfig) -> Self {
        Self { api, config }
    }

    fn device_dir(&self, id: DeviceId) -> PathBuf {
        self.config.root_dir.join(id.to_string())
    }

    /// Download every remote config file; any failed download aborts.
    async fn fetch_config(
        &self,
        device: &Device,
        store_name: fn(&RemoteEntry) -> String,
    ) -> Result<Vec<Fetched>, BridgeError> {
        let ip = device.ip();
        let dir = self.config.remote_config_dir.trim_end_matches('/');
        let entries = self.api.list_dir(ip, dir).await?;
        let mut fetched = Vec::with_capacity(entries.len());
        for entry in entries.iter().filter(|entry| entry.is_file()) {
            let path = format!("{dir}/{}", entry.name);
            let content = self.api.fetch_file(ip, &path).await?;
            tracing::debug!(device_id = %device.id, %path, bytes = content.len(), "fetched");
            fetched.push(Fetched {
                name: store_name(entry),
                content,
            });
        }
        Ok(fetched)
    }

    async fn save_log(&self, ip: &str, remote: &str, name: &str) -> Result<(), BridgeError> {
        let content = self.api.fetch_file(ip, remote).await?;
        let text = String::from_utf8_lossy(&content);
        let path = self.config.logs_dir.join(name);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(BackupError::io(&path))?;
        file.write_all(format!("{}\n", text.trim()).as_bytes())
            .await
            .map_err(BackupError::io(&path))?;
        Ok(())
    }
}

async fn ensure_dir(path: &Path) -> Result<(), BackupError> {
    fs::create_dir_all(path).await.map_err(BackupError::io(path))
}

/// Names of the committed snapshots of a device directory.
async fn snapshots(dir: &Path) -> Result<Vec<String>, BackupError> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await.map_err(BackupError::io(dir))?;
    while let Some(entry) = entries.next_entry().await.map_err(BackupError::io(dir))? {
        let is_dir = entry
            .file_type()
            .await
            .map_err(BackupError::io(entry.path()))?
            .is_dir();
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_dir && !name.ends_with(TMP_SUFFIX) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Whether `name` in the previous snapshot has the same content hash.
async fn unchanged(previous: Option<&Path>, name: &str, content: &[u8]) -> bool {
    let Some(previous) = previous else {
        return false;
    };
    let path = previous.join(name);
    match fs::read(&path).await {
        Ok(old) => Md5::digest(&old) == Md5::digest(content),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "cannot read previous snapshot file");
            false
        }
    }
}

/// Write `files` into a fresh snapshot and return its name.
///
/// Names are UTC so they keep sorting chronologically across DST changes.
async fn write_snapshot(dir: &Path, files: &[Fetched]) -> Result<String, BackupError> {
    let name = snapshot_name(now().naive_utc(), &snapshots(dir).await?);
    let tmp = dir.join(format!("{name}{TMP_SUFFIX}"));
    if fs::try_exists(&tmp).await.map_err(BackupError::io(&tmp))? {
        fs::remove_dir_all(&tmp).await.map_err(BackupError::io(&tmp))?;
    }
    ensure_dir(&tmp).await?;
    for file in files {
        let path = tmp.join(&file.name);
        if let Err(source) = fs::write(&path, &file.content).await {
            if let Err(err) = fs::remove_dir_all(&tmp).await {
                tracing::warn!(path = %tmp.display(), %err, "cannot clean up partial snapshot");
            }
            return Err(BackupError::Io { path, source });
        }
    }
    let target = dir.join(&name);
    fs::rename(&tmp, &target)
        .await
        .map_err(BackupError::io(&target))?;
    Ok(name)
}

async fn append_history(dir: &Path, entry: &HistoryEntry) -> Result<(), BackupError> {
    let path = dir.join(HISTORY_FILE);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(BackupError::io(&path))?;
    file.write_all(format!("{}\n", entry.to_line()).as_bytes())
        .await
        .map_err(BackupError::io(&path))
}

/// Record the history line of the just committed `snapshot`.
///
/// A snapshot without its line would hide the change from every later
/// incremental run, so it is withdrawn when the line cannot be written.
async fn record_snapshot(dir: &Path, entry: &HistoryEntry) -> Result<(), BackupError> {
    let Err(err) = append_history(dir, entry).await else {
        return Ok(());
    };
    let snapshot = dir.join(&entry.label);
    if let Err(cleanup) = fs::remove_dir_all(&snapshot).await {
        tracing::error!(path = %snapshot.display(), err = %cleanup, "cannot withdraw unrecorded snapshot");
    }
    Err(err)
}

fn no_changes_entry() -> HistoryEntry {
    HistoryEntry {
        label: now().naive_utc().format(SNAPSHOT_FORMAT).to_string(),
        files: Vec::new(),
    }
}

fn names(files: &[Fetched]) -> Vec<String> {
    files.iter().map(|file| file.name.clone()).collect()
}

impl<A: DeviceApi> ConfigBackup for FsBackupManager<A> {
    #[tracing::instrument(skip_all, fields(device_id = %device.id))]
    async fn run_incremental_backup(&self, device: &Device) -> Result<BackupOutcome, BridgeError> {
        let dir = self.device_dir(device.id);
        ensure_dir(&dir).await?;
        let fetched = self
            .fetch_config(device, |entry| entry.basename().to_string())
            .await?;

        let previous = latest_snapshot(&snapshots(&dir).await?).map(|name| dir.join(name));
        let mut changed_files = Vec::new();
        for file in &fetched {
            if !unchanged(previous.as_deref(), &file.name, &file.content).await {
                changed_files.push(file.name.clone());
            }
        }

        if changed_files.is_empty() {
            append_history(&dir, &no_changes_entry()).await?;
            tracing::info!(files = fetched.len(), "no configuration change");
            return Ok(BackupOutcome {
                changed: false,
                snapshot: None,
                changed_files,
                files: names(&fetched),
            });
        }

        let snapshot = write_snapshot(&dir, &fetched).await?;
        record_snapshot(
            &dir,
            &HistoryEntry {
                label: snapshot.clone(),
                files: changed_files.clone(),
            },
        )
        .await?;
        tracing::info!(%snapshot, changed = changed_files.len(), "snapshot written");
        Ok(BackupOutcome {
            changed: true,
            snapshot: Some(snapshot),
            changed_files,
            files: names(&fetched),
        })
    }

    #[tracing::instrument(skip_all, fields(device_id = %device.id))]
    async fn run_forced_backup(&self, device: &Device) -> Result<BackupOutcome, BridgeError> {
        let dir = self.device_dir(device.id);
        ensure_dir(&dir).await?;
        let fetched = self
            .fetch_config(device, |entry| entry.name.replace('/', "_"))
            .await?;

        if fetched.is_empty() {
            append_history(&dir, &no_changes_entry()).await?;
            tracing::warn!("device returned no configuration files");
            return Ok(BackupOutcome::default());
        }

        let snapshot = write_snapshot(&dir, &fetched).await?;
        let files = names(&fetched);
        record_snapshot(
            &dir,
            &HistoryEntry {
                label: snapshot.clone(),
                files: files.clone(),
            },
        )
        .await?;
        tracing::info!(%snapshot, files = files.len(), "forced snapshot written");
        Ok(BackupOutcome {
            changed: true,
            snapshot: Some(snapshot),
            changed_files: files.clone(),
            files,
        })
    }

    #[tracing::instrument(skip_all, fields(device_id = %device.id))]
    async fn export_logs(&self, device: &Device) -> Result<LogsExportOutcome, BridgeError> {
        let ip = device.ip();
        let entries = self.api.list_dir(ip, REMOTE_LOGS_DIR).await?;
        ensure_dir(&self.config.logs_dir).await?;

        let mut outcome = LogsExportOutcome::default();
        for entry in entries.iter().filter(|entry| is_exportable_log(entry)) {
            let name = entry.basename();
            let remote = format!("{REMOTE_LOGS_DIR}/{name}");
            if let Err(err) = self.save_log(ip, &remote, name).await {
                tracing::warn!(file = name, %err, "log export failed");
                outcome.failed.push(name.to_string());
                continue;
            }
            outcome.exported.push(name.to_string());
            if device.params.remove_logs
                && let Err(err) = self.api.delete_file(ip, &remote).await
            {
                tracing::warn!(file = name, %err, "cannot remove exported log from device");
            }
        }
        Ok(outcome)
    }

    async fn history(&self, device_id: DeviceId) -> Result<Vec<HistoryEntry>, BridgeError> {
        let path = self.device_dir(device_id).join(HISTORY_FILE);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BackupError::io(&path)(err).into()),
        };
        Ok(text.lines().filter_map(HistoryEntry::parse_line).collect())
    }

    async fn migrate_legacy(&self, device_id: DeviceId) -> Result<bool, BridgeError> {
        let dir = self.device_dir(device_id);
        let legacy = dir.join(LEGACY_FILE);
        if !fs::try_exists(&legacy).await.map_err(BackupError::io(&legacy))? {
            return Ok(false);
        }

        let history = dir.join(HISTORY_FILE);
        if fs::try_exists(&history).await.map_err(BackupError::io(&history))? {
            fs::remove_file(&legacy)
                .await
                .map_err(BackupError::io(&legacy))?;
            tracing::debug!(%device_id, "dropped legacy log superseded by history");
            return Ok(false);
        }

        let raw = fs::read(&legacy).await.map_err(BackupError::io(&legacy))?;
        let entries: Vec<LegacyLogEntry> =
            serde_json::from_slice(&raw).map_err(|source| BackupError::LegacyLog {
                path: legacy.clone(),
                source,
            })?;
        let count = entries.len();
        let text: String = entries
            .into_iter()
            .map(|entry| format!("{}\n", HistoryEntry::from(entry).to_line()))
            .collect();
        fs::write(&history, text)
            .await
            .map_err(BackupError::io(&history))?;
        fs::remove_file(&legacy)
            .await
            .map_err(BackupError::io(&legacy))?;
        tracing::info!(%device_id, entries = count, "legacy log migrated");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portbridge_app::ports::{LineReader, LineWriter};
    use portbridge_domain::device::DeviceInfo;
    use portbridge_domain::error::{NotFoundError, UnavailableError};
    use serde_json::Value;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct NoStream;

    impl LineReader for NoStream {
        async fn next_line(&mut self) -> Option<Result<String, BridgeError>> {
            None
        }
    }

    impl LineWriter for NoStream {
        async fn send_line(&mut self, _line: String) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    /// Remote file system keyed by absolute path.
    #[derive(Default)]
    struct FakeApi {
        files: Mutex<BTreeMap<String, Vec<u8>>>,
        failing: Mutex<HashSet<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn put(&self, path: &str, content: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), content.as_bytes().to_vec());
        }

        fn fail(&self, path: &str) {
            self.failing.lock().unwrap().insert(path.to_string());
        }
    }

    impl DeviceApi for FakeApi {
        type Writer = NoStream;
        type Reader = NoStream;

        async fn fetch_values(&self, _ip: &str) -> Result<Value, BridgeError> {
            Ok(Value::Null)
        }

        async fn fetch_info(&self, _ip: &str) -> Result<DeviceInfo, BridgeError> {
            Ok(DeviceInfo::default())
        }

        async fn list_dir(&self, _ip: &str, dir: &str) -> Result<Vec<RemoteEntry>, BridgeError> {
            let prefix = format!("{dir}/");
            Ok(self
                .files
                .lock()
                .unwrap()
                .keys()
                .filter_map(|path| path.strip_prefix(&prefix))
                .map(|name| RemoteEntry {
                    name: name.to_string(),
                    kind: Some("file".to_string()),
                })
                .collect())
        }

        async fn fetch_file(&self, _ip: &str, path: &str) -> Result<Vec<u8>, BridgeError> {
            if self.failing.lock().unwrap().contains(path) {
                return Err(UnavailableError::ConnectionLost.into());
            }
            self.files.lock().unwrap().get(path).cloned().ok_or_else(|| {
                NotFoundError {
                    entity: "File",
                    id: path.to_string(),
                }
                .into()
            })
        }

        async fn delete_file(&self, _ip: &str, path: &str) -> Result<(), BridgeError> {
            self.files.lock().unwrap().remove(path);
            self.deleted.lock().unwrap().push(path.to_string());
            Ok(())
        }

        async fn open_stream(&self, _ip: &str) -> Result<(NoStream, NoStream), BridgeError> {
            Ok((NoStream, NoStream))
        }
    }

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        logs: PathBuf,
        api: Arc<FakeApi>,
        manager: FsBackupManager<FakeApi>,
        device: Device,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("backup");
        let logs = tmp.path().join("logs");
        let api = Arc::new(FakeApi::default());
        api.put("/config/config.json", "{\"a\":1}");
        api.put("/config/wifi.json", "{\"ssid\":\"home\"}");
        let manager = FsBackupManager::new(
            Arc::clone(&api),
            BackupConfig {
                root_dir: root.clone(),
                logs_dir: logs.clone(),
                remote_config_dir: "/config".to_string(),
            },
        );
        let device = Device::builder()
            .code("a1b2")
            .name("Hall")
            .ip("10.0.0.5")
            .build()
            .unwrap();
        Fixture {
            _tmp: tmp,
            root,
            logs,
            api,
            manager,
            device,
        }
    }

    impl Fixture {
        fn dir(&self) -> PathBuf {
            self.root.join(self.device.id.to_string())
        }

        fn snapshot_dirs(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.dir())
                .unwrap()
                .map(|entry| entry.unwrap())
                .filter(|entry| entry.file_type().unwrap().is_dir())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        fn history_lines(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir().join(HISTORY_FILE))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[tokio::test]
    async fn should_write_one_snapshot_when_nothing_changes_between_runs() {
        let fx = fixture();

        let first = fx.manager.run_incremental_backup(&fx.device).await.unwrap();
        let second = fx.manager.run_incremental_backup(&fx.device).await.unwrap();

        assert!(first.changed);
        assert_eq!(first.changed_files, vec!["config.json", "wifi.json"]);
        assert!(!second.changed);
        assert!(second.changed_files.is_empty());
        assert_eq!(second.files.len(), 2);
        assert_eq!(fx.snapshot_dirs().len(), 1);
        let lines = fx.history_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(": No changes"));
    }

    #[tokio::test]
    async fn should_snapshot_all_files_but_record_only_changed_ones() {
        let fx = fixture();
        fx.manager.run_incremental_backup(&fx.device).await.unwrap();
        fx.api.put("/config/wifi.json", "{\"ssid\":\"guest\"}");
        // second-granularity names: force a distinct, later snapshot name
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let outcome = fx.manager.run_incremental_backup(&fx.device).await.unwrap();

        assert_eq!(outcome.changed_files, vec!["wifi.json"]);
        let snapshots = fx.snapshot_dirs();
        assert_eq!(snapshots.len(), 2);
        let latest = fx.dir().join(&snapshots[1]);
        assert!(latest.join("config.json").exists());
        assert_eq!(
            std::fs::read_to_string(latest.join("wifi.json")).unwrap(),
            "{\"ssid\":\"guest\"}"
        );
        assert!(fx.history_lines()[1].ends_with(": wifi.json"));
    }

    #[tokio::test]
    async fn should_always_write_snapshot_when_forced() {
        let fx = fixture();

        let first = fx.manager.run_forced_backup(&fx.device).await.unwrap();
        let second = fx.manager.run_forced_backup(&fx.device).await.unwrap();

        assert!(first.changed && second.changed);
        assert_eq!(second.changed_files.len(), 2);
        assert_ne!(first.snapshot, second.snapshot);
        assert_eq!(fx.snapshot_dirs().len(), 2);
        assert_eq!(fx.history_lines().len(), 2);
    }

    #[tokio::test]
    async fn should_leave_no_trace_when_download_fails() {
        let fx = fixture();
        fx.api.fail("/config/wifi.json");

        let result = fx.manager.run_incremental_backup(&fx.device).await;

        assert!(matches!(result, Err(BridgeError::Unavailable(_))));
        assert!(fx.snapshot_dirs().is_empty());
        assert!(fx.history_lines().is_empty());
    }

    #[tokio::test]
    async fn should_withdraw_snapshot_when_history_cannot_be_written() {
        let fx = fixture();
        // a directory in place of the history file makes every append fail
        let blocker = fx.dir().join(HISTORY_FILE);
        std::fs::create_dir_all(&blocker).unwrap();

        let failed = fx.manager.run_incremental_backup(&fx.device).await;
        let forced = fx.manager.run_forced_backup(&fx.device).await;

        assert!(failed.is_err());
        assert!(forced.is_err());
        std::fs::remove_dir(&blocker).unwrap();
        assert!(fx.snapshot_dirs().is_empty());

        let retry = fx.manager.run_incremental_backup(&fx.device).await.unwrap();
        assert!(retry.changed);
        assert_eq!(retry.changed_files, vec!["config.json", "wifi.json"]);
        assert_eq!(fx.history_lines().len(), 1);
    }

    #[tokio::test]
    async fn should_name_snapshots_in_utc() {
        let fx = fixture();

        let outcome = fx.manager.run_forced_backup(&fx.device).await.unwrap();

        let name = outcome.snapshot.unwrap();
        let taken = chrono::NaiveDateTime::parse_from_str(&name, SNAPSHOT_FORMAT).unwrap();
        let drift = chrono::Utc::now().naive_utc() - taken;
        assert!(drift.num_seconds().abs() < 5, "{name} is not a UTC timestamp");
    }

    #[tokio::test]
    async fn should_read_history_back_in_order() {
        let fx = fixture();
        fx.manager.run_forced_backup(&fx.device).await.unwrap();
        fx.manager.run_incremental_backup(&fx.device).await.unwrap();

        let history = fx.manager.history(fx.device.id).await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].files.len(), 2);
        assert!(history[1].files.is_empty());
        assert!(fx.manager.history(DeviceId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_export_text_logs_and_remove_them_remotely() {
        let mut fx = fixture();
        fx.api.put("/logs/boot.txt", "line 1\n");
        fx.api.put("/logs/_.txt", "scratch");
        fx.api.put("/logs/clean.txt", "scratch");
        fx.api.put("/logs/dump.bin", "binary");
        fx.api.put("/logs/broken.txt", "never read");
        fx.api.fail("/logs/broken.txt");
        fx.device.params.remove_logs = true;

        let outcome = fx.manager.export_logs(&fx.device).await.unwrap();

        assert_eq!(outcome.exported, vec!["boot.txt"]);
        assert_eq!(outcome.failed, vec!["broken.txt"]);
        assert_eq!(*fx.api.deleted.lock().unwrap(), vec!["/logs/boot.txt"]);
        assert_eq!(
            std::fs::read_to_string(fx.logs.join("boot.txt")).unwrap(),
            "line 1\n"
        );
    }

    #[tokio::test]
    async fn should_keep_remote_logs_when_removal_disabled() {
        let mut fx = fixture();
        fx.api.put("/logs/boot.txt", "first");
        fx.device.params.remove_logs = false;

        fx.manager.export_logs(&fx.device).await.unwrap();
        fx.manager.export_logs(&fx.device).await.unwrap();

        assert!(fx.api.deleted.lock().unwrap().is_empty());
        assert_eq!(
            std::fs::read_to_string(fx.logs.join("boot.txt")).unwrap(),
            "first\nfirst\n"
        );
    }

    #[tokio::test]
    async fn should_migrate_legacy_log_once() {
        let fx = fixture();
        std::fs::create_dir_all(fx.dir()).unwrap();
        std::fs::write(
            fx.dir().join(LEGACY_FILE),
            r#"[{"timestamp": "2023-05-01_01-00-00", "changed_files": ["config.json"]},
                {"timestamp": "2023-05-02_01-00-00", "changed_files": []}]"#,
        )
        .unwrap();

        assert!(fx.manager.migrate_legacy(fx.device.id).await.unwrap());
        assert!(!fx.manager.migrate_legacy(fx.device.id).await.unwrap());

        assert!(!fx.dir().join(LEGACY_FILE).exists());
        assert_eq!(
            fx.history_lines(),
            vec![
                "2023-05-01_01-00-00: config.json",
                "2023-05-02_01-00-00: No changes"
            ]
        );
    }

    #[tokio::test]
    async fn should_drop_legacy_log_when_history_exists() {
        let fx = fixture();
        std::fs::create_dir_all(fx.dir()).unwrap();
        std::fs::write(fx.dir().join(HISTORY_FILE), "2024-01-01_00-00-00: a.json\n").unwrap();
        std::fs::write(fx.dir().join(LEGACY_FILE), "[]").unwrap();

        assert!(!fx.manager.migrate_legacy(fx.device.id).await.unwrap());

        assert!(!fx.dir().join(LEGACY_FILE).exists());
        assert_eq!(fx.history_lines().len(), 1);
    }
}
