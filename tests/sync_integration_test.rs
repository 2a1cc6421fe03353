use anyhow::Result;
use dropsync::core::engine::SyncStats;
use dropsync::core::snapshot::wait_until_in_sync;
use dropsync::server::Authorizer;
use dropsync::{ClientSettings, FtpEndpoint, FtpRemote, FtpServer, ServerOptions, SyncEngine};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const ASSERT_TIMEOUT: Duration = Duration::from_secs(20);
const ASSERT_STEP: Duration = Duration::from_millis(250);

type ServerHandle = (oneshot::Sender<()>, JoinHandle<dropsync::Result<()>>);

/// Serves `root` on `port` (0 picks a free one) until the sender fires.
async fn spawn_server(root: &Path, port: u16) -> Result<(u16, ServerHandle)> {
    let mut authorizer = Authorizer::new();
    authorizer.add_user("user", "12345", root, "elradfmwMT")?;
    let options = ServerOptions {
        port,
        ..ServerOptions::default()
    };
    let server = FtpServer::bind(options, authorizer).await?;
    let port = server.local_addr()?.port();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve_until(async {
        let _ = stopped.await;
    }));
    Ok((port, (stop, handle)))
}

/// A server and a syncing client, each over its own temporary directory.
struct Harness {
    client_dir: TempDir,
    server_dir: TempDir,
    port: u16,
    server: Option<ServerHandle>,
    stop_client: Option<oneshot::Sender<()>>,
    client: Option<JoinHandle<dropsync::Result<SyncStats>>>,
}

impl Harness {
    async fn start() -> Result<Self> {
        Self::start_with(|_, _| Ok(())).await
    }

    /// Lets the caller populate both trees before either side starts.
    async fn start_with<F>(prepare: F) -> Result<Self>
    where
        F: FnOnce(&Path, &Path) -> std::io::Result<()>,
    {
        let client_dir = TempDir::new()?;
        let server_dir = TempDir::new()?;
        prepare(client_dir.path(), server_dir.path())?;

        let (port, server) = spawn_server(server_dir.path(), 0).await?;

        let settings = ClientSettings {
            endpoint: FtpEndpoint {
                host: "127.0.0.1".to_string(),
                port,
                user: "user".to_string(),
                password: "12345".to_string(),
                timeout: Duration::from_secs(10),
            },
            root: client_dir.path().to_path_buf(),
            debounce_ms: 100,
            reconnect_attempts: 50,
            reconnect_delay_ms: 100,
            ..ClientSettings::default()
        };
        let remote = FtpRemote::connect(settings.endpoint.clone()).await?;
        let engine = SyncEngine::new(remote, settings)?;
        let (stop_client, client_stopped) = oneshot::channel::<()>();
        let client = tokio::spawn(engine.run(async {
            let _ = client_stopped.await;
        }));

        Ok(Self {
            client_dir,
            server_dir,
            port,
            server: Some(server),
            stop_client: Some(stop_client),
            client: Some(client),
        })
    }

    /// Stops the server and drops every open session, like a crash would.
    async fn stop_server(&mut self) -> Result<()> {
        if let Some((stop, handle)) = self.server.take() {
            let _ = stop.send(());
            handle.await??;
        }
        Ok(())
    }

    async fn restart_server(&mut self) -> Result<()> {
        self.stop_server().await?;
        let (_, server) = spawn_server(self.server_dir.path(), self.port).await?;
        self.server = Some(server);
        Ok(())
    }

    fn cpath(&self, relative: &str) -> std::path::PathBuf {
        self.client_dir.path().join(relative)
    }

    async fn assert_in_sync(&self) -> Result<()> {
        self.assert_in_sync_within(ASSERT_TIMEOUT).await
    }

    async fn assert_in_sync_within(&self, timeout: Duration) -> Result<()> {
        let diff = wait_until_in_sync(
            self.client_dir.path(),
            self.server_dir.path(),
            timeout,
            ASSERT_STEP,
        )
        .await?;
        assert!(
            diff.is_empty(),
            "only on client: {:?}\nonly on server: {:?}",
            diff.only_left,
            diff.only_right
        );
        Ok(())
    }

    async fn shutdown(mut self) -> Result<SyncStats> {
        if let Some(stop) = self.stop_client.take() {
            let _ = stop.send(());
        }
        let stats = match self.client.take() {
            Some(handle) => handle.await??,
            None => SyncStats::default(),
        };
        self.stop_server().await?;
        Ok(stats)
    }
}

fn create(path: impl AsRef<Path>, data: &str) -> std::io::Result<()> {
    fs::write(path, data)
}

fn wipe(path: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_add_single_file() -> Result<()> {
    let h = Harness::start().await?;
    h.assert_in_sync().await?;

    create(h.cpath("newfile.txt"), "contents")?;
    h.assert_in_sync().await?;

    let stats = h.shutdown().await?;
    assert!(stats.files_uploaded >= 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_file_completely_changes_3_times() -> Result<()> {
    let h = Harness::start().await?;

    for contents in ["contents", "contents more", "beginning contents more", "new content"] {
        create(h.cpath("newfile.txt"), contents)?;
        h.assert_in_sync().await?;
    }

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_file_change_and_remove() -> Result<()> {
    let h = Harness::start().await?;

    create(h.cpath("newfile.txt"), "contents")?;
    h.assert_in_sync().await?;
    fs::remove_file(h.cpath("newfile.txt"))?;
    h.assert_in_sync().await?;

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_dirs_and_files() -> Result<()> {
    let h = Harness::start().await?;

    fs::create_dir(h.cpath("newemptydir"))?;
    h.assert_in_sync().await?;

    for name in ["file1.txt", "file2.txt", "file3.txt"] {
        create(h.cpath(name), "")?;
    }
    h.assert_in_sync().await?;

    fs::remove_dir_all(h.cpath("newemptydir"))?;
    h.assert_in_sync().await?;

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_add_and_change_dir_name() -> Result<()> {
    let h = Harness::start().await?;

    fs::create_dir(h.cpath("newemptydir"))?;
    fs::rename(h.cpath("newemptydir"), h.cpath("new_empty_dir"))?;
    h.assert_in_sync().await?;
    assert!(h.server_dir.path().join("new_empty_dir").is_dir());

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_change_file_subdirectory() -> Result<()> {
    let h = Harness::start().await?;

    fs::create_dir(h.cpath("subdirectory1"))?;
    fs::create_dir(h.cpath("subdirectory1/subdirectory2"))?;
    h.assert_in_sync().await?;
    create(h.cpath("subdirectory1/subdirectory2/newfile.txt"), "content")?;
    h.assert_in_sync().await?;
    create(h.cpath("subdirectory1/newfile.txt"), "content")?;
    h.assert_in_sync().await?;
    fs::rename(h.cpath("subdirectory1/subdirectory2"), h.cpath("subdirectory2"))?;
    h.assert_in_sync().await?;

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_move_in_and_out_of_tree() -> Result<()> {
    let outside = TempDir::new()?;
    let h = Harness::start().await?;

    create(h.cpath("newfile.txt"), "contents")?;
    fs::create_dir(h.cpath("newemptydir"))?;
    h.assert_in_sync().await?;

    fs::rename(h.cpath("newfile.txt"), outside.path().join("test.txt"))?;
    fs::rename(h.cpath("newemptydir"), outside.path().join("test"))?;
    h.assert_in_sync().await?;

    let tree = outside.path().join("tree");
    fs::create_dir(&tree)?;
    fs::create_dir(tree.join("nested"))?;
    create(tree.join("newfile.txt"), "content")?;
    create(tree.join("nested/deep.txt"), "deeper")?;
    fs::rename(&tree, h.cpath("newemptydir"))?;
    h.assert_in_sync().await?;
    assert!(h.server_dir.path().join("newemptydir/nested/deep.txt").is_file());

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_files_grow_and_shrink() -> Result<()> {
    let h = Harness::start().await?;

    let big = "*".repeat(1_000_000);
    for name in ["file1.txt", "file2.txt", "file3.txt"] {
        create(h.cpath(name), &big)?;
    }
    h.assert_in_sync().await?;

    create(h.cpath("file1.txt"), &format!("1{}", big))?;
    h.assert_in_sync().await?;

    create(h.cpath("file1.txt"), "*")?;
    h.assert_in_sync().await?;

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_three_1mb_files_added_at_once() -> Result<()> {
    let h = Harness::start().await?;

    let big = "*".repeat(1_000_000);
    for name in ["file1.txt", "file2.txt", "file3.txt"] {
        create(h.cpath(name), &big)?;
    }
    h.assert_in_sync().await?;
    assert_eq!(fs::metadata(h.server_dir.path().join("file2.txt"))?.len(), 1_000_000);

    let stats = h.shutdown().await?;
    assert!(stats.files_uploaded >= 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_1mb_file_change_1_byte_at_beginning() -> Result<()> {
    let h = Harness::start().await?;

    let tail = "*".repeat(1_000_000);
    create(h.cpath("file1.txt"), &format!("0{}", tail))?;
    h.assert_in_sync().await?;

    // Same size, so only the content hash tells the versions apart
    create(h.cpath("file1.txt"), &format!("1{}", tail))?;
    h.assert_in_sync().await?;
    assert!(fs::read(h.server_dir.path().join("file1.txt"))?.starts_with(b"1*"));

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recovers_after_server_restart() -> Result<()> {
    let mut h = Harness::start().await?;

    create(h.cpath("before.txt"), "before")?;
    h.assert_in_sync().await?;

    h.stop_server().await?;
    create(h.cpath("offline.txt"), "written while the server was down")?;
    create(h.cpath("before.txt"), "changed while offline")?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    h.restart_server().await?;
    h.assert_in_sync().await?;

    // The watcher keeps feeding the reconnected session
    create(h.cpath("after.txt"), "after")?;
    h.assert_in_sync().await?;

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_initial_sync_restores_server_wiped_while_down() -> Result<()> {
    let mut h = Harness::start().await?;

    fs::create_dir(h.cpath("docs"))?;
    create(h.cpath("docs/a.txt"), "a")?;
    h.assert_in_sync().await?;

    h.stop_server().await?;
    wipe(h.server_dir.path())?;
    h.restart_server().await?;
    // The next upload finds its session gone and falls back to a full reconcile
    create(h.cpath("docs/b.txt"), "b")?;
    h.assert_in_sync().await?;

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_many_small_files() -> Result<()> {
    let h = Harness::start().await?;

    for i in 0..5000 {
        create(h.cpath(&format!("file_{}.txt", i)), &format!("contents_{}", i))?;
    }
    h.assert_in_sync_within(Duration::from_secs(120)).await?;

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_to_empty_dirs_and_back() -> Result<()> {
    let h = Harness::start().await?;

    for i in 0..10 {
        create(h.cpath(&format!("file_{}", i)), &format!("contents_{}", i))?;
    }
    h.assert_in_sync().await?;

    wipe(h.client_dir.path())?;
    for i in 0..10 {
        fs::create_dir(h.cpath(&format!("file_{}", i)))?;
    }
    h.assert_in_sync().await?;

    wipe(h.client_dir.path())?;
    for i in 0..10 {
        create(h.cpath(&format!("file_{}", i)), &format!("contents_{}", i))?;
    }
    h.assert_in_sync().await?;

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_initial_sync_of_prepopulated_trees() -> Result<()> {
    let h = Harness::start_with(|client, server| {
        create(client.join("newfile.txt"), "contents")?;
        fs::create_dir(client.join("newemptydir"))?;
        fs::create_dir(client.join("kept"))?;
        create(client.join("kept/same.txt"), "same")?;

        create(server.join("stale.txt"), "old")?;
        fs::create_dir_all(server.join("stale_dir/inner"))?;
        create(server.join("newemptydir"), "was a file")?;
        fs::create_dir(server.join("kept"))?;
        create(server.join("kept/same.txt"), "same")
    })
    .await?;

    h.assert_in_sync().await?;
    assert!(!h.server_dir.path().join("stale_dir").exists());

    let stats = h.shutdown().await?;
    assert_eq!(stats.files_unchanged, 1);
    Ok(())
}
