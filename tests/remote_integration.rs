//! Purpose: End-to-end tests for the inventory HTTP server and `RemoteStore`.
//! Exports: None (integration test module).
//! Role: Validate remote CRUD, server-side apply, and error propagation across TCP.
//! Invariants: Uses a loopback-only server with a temp data file.
//! Invariants: Bounded waits avoid test flakiness; servers are killed on drop.

use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

use stocktake::api::{
    Applied, Change, ErrorKind, Inventory, Item, ItemStore, Operation, RemoteStore,
};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(data: &Path, token: Option<&str>) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");
            let base_url = format!("http://{bind}");

            let mut command = Command::new(env!("CARGO_BIN_EXE_stocktake"));
            command
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .arg("--data")
                .arg(data)
                .env_remove("STOCKTAKE_TOKEN")
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            if let Some(token) = token {
                command.arg("--token").arg(token);
            }
            let mut child = command.spawn()?;

            match wait_for_server(&mut child, &base_url) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn store(&self) -> TestResult<RemoteStore> {
        Ok(RemoteStore::new(self.base_url.clone())?)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn wait_for_server(child: &mut Child, base_url: &str) -> TestResult<()> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let url = format!("{base_url}/healthz");
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_millis(200))
        .build();
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Err(format!("server exited early: {status}").into());
        }
        if agent.get(&url).call().is_ok() {
            return Ok(());
        }
        sleep(Duration::from_millis(20));
    }
    Err("server did not become healthy in time".into())
}

#[test]
fn remote_put_get_list_delete() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(&temp.path().join("inventory.json"), None)?;
    let store = server.store()?;

    assert!(store.list()?.is_empty());
    store.put("nuts/bolts 2", 7)?;
    store.put("Widget", 3)?;
    assert_eq!(store.get("nuts/bolts 2")?, Some(7));
    assert_eq!(store.get("widget")?, None);

    let mut items = store.list()?;
    items.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(
        items,
        vec![Item::new("Widget", 3), Item::new("nuts/bolts 2", 7)]
    );

    store.delete("Widget")?;
    store.delete("Widget")?;
    assert_eq!(store.get("Widget")?, None);
    Ok(())
}

#[test]
fn remote_apply_follows_change_rules() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(&temp.path().join("inventory.json"), None)?;
    let store = server.store()?;

    assert_eq!(
        store.apply("bolt", Change::Increment { by: 2 })?,
        Applied::Stored { quantity: 2 }
    );
    assert_eq!(
        store.apply("bolt", Change::Decrement)?,
        Applied::Stored { quantity: 1 }
    );
    assert_eq!(store.apply("bolt", Change::Decrement)?, Applied::Deleted);
    assert_eq!(store.apply("bolt", Change::Decrement)?, Applied::Unchanged);
    assert_eq!(store.get("bolt")?, None);
    Ok(())
}

#[test]
fn concurrent_remote_adds_do_not_lose_updates() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(&temp.path().join("inventory.json"), None)?;
    let store = Arc::new(server.store()?);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        handles.push(std::thread::spawn(move || {
            for _ in 0..10 {
                store
                    .apply("widget", Change::Increment { by: 1 })
                    .expect("apply");
            }
        }));
    }
    for handle in handles {
        handle.join().map_err(|_| "worker panicked")?;
    }
    assert_eq!(store.get("widget")?, Some(40));
    Ok(())
}

#[test]
fn inventory_over_http_refreshes_mirror() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let data = temp.path().join("inventory.json");
    let server = TestServer::start(&data, None)?;

    let mut inventory = Inventory::new(server.store()?);
    inventory.add("Widget", Some("3"))?;
    inventory.add("Widget", None)?;
    inventory.remove("Widget")?;
    assert_eq!(inventory.state().items, vec![Item::new("Widget", 3)]);
    let notification = inventory.state().notification.clone().expect("notification");
    assert_eq!(notification.operation, Operation::Remove);

    // The server persisted to its data file.
    let raw = std::fs::read_to_string(&data)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    assert_eq!(value["items"]["Widget"]["quantity"], 3);
    Ok(())
}

#[test]
fn token_is_enforced() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(&temp.path().join("inventory.json"), Some("s3cret"))?;

    let err = server.store()?.list().expect_err("missing token");
    assert_eq!(err.kind(), ErrorKind::Permission);

    let err = server
        .store()?
        .with_token("wrong")
        .list()
        .expect_err("wrong token");
    assert_eq!(err.kind(), ErrorKind::Permission);

    let store = server.store()?.with_token("s3cret");
    store.put("a", 1)?;
    assert_eq!(store.get("a")?, Some(1));
    Ok(())
}

#[test]
fn cli_talks_to_server_store() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(&temp.path().join("inventory.json"), None)?;

    let add = Command::new(env!("CARGO_BIN_EXE_stocktake"))
        .args(["--store", &server.base_url, "add", "gear", "4"])
        .env_remove("STOCKTAKE_TOKEN")
        .output()?;
    assert!(add.status.success(), "add failed: {add:?}");

    let list = Command::new(env!("CARGO_BIN_EXE_stocktake"))
        .args(["--store", &server.base_url, "list", "--json"])
        .env_remove("STOCKTAKE_TOKEN")
        .output()?;
    assert!(list.status.success());
    let value: serde_json::Value = serde_json::from_slice(&list.stdout)?;
    assert_eq!(value["rows"][0]["name"], "gear");
    assert_eq!(value["rows"][0]["quantity"], 4);
    Ok(())
}
