//! End-to-end scenarios exercising the full stack — `BackendSession`,
//! `Folder`/`File`, and the page cache — against a fake in-memory backend,
//! rather than any single module in isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use andromedafs_core::error::{AndromedaError, AuthError};
use andromedafs_core::item::folder::NewChild;
use andromedafs_core::item::{File, Folder, FolderKind, Item, ItemArena};
use andromedafs_core::runner::{Input, Runner};
use andromedafs_core::{BackendSession, CacheMode, PageBackend};

#[derive(Default)]
struct FileRec {
    name: String,
    parent: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct FolderRec {
    name: String,
    parent: String,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    files: HashMap<String, FileRec>,
    folders: HashMap<String, FolderRec>,
}

impl FakeState {
    fn alloc_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }
}

/// A fake backend that keeps just enough server-side state (files, folders,
/// byte contents) to drive `BackendSession` through realistic round trips
/// without a live network endpoint.
struct FakeBackend {
    state: Mutex<FakeState>,
    read_calls: AtomicU32,
}

impl FakeBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
            read_calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Runner for FakeBackend {
    async fn run(&self, input: Input) -> Result<Vec<u8>, andromedafs_core::error::TransportError> {
        match input.action.as_str() {
            "authenticate" => {
                let password = input.params.get("password").cloned().unwrap_or_default();
                if password == "needs-2fa" && !input.params.contains_key("auth_twofactor") {
                    return Ok(br#"{"ok":false,"code":403,"message":"TWOFACTOR_REQUIRED"}"#.to_vec());
                }
                Ok(br#"{"ok":true,"appdata":{"client":{"session":{"id":"sess1","authkey":"key1"}}}}"#.to_vec())
            }
            "createfile" => {
                let mut state = self.state.lock().unwrap();
                let parent = input.params.get("parent").cloned().unwrap_or_default();
                let name = input.params.get("name").cloned().unwrap_or_default();
                let id = state.alloc_id("file");
                state.files.insert(id.clone(), FileRec { name: name.clone(), parent, bytes: Vec::new() });
                Ok(serde_json::to_vec(&json!({"ok": true, "appdata": {"id": id, "name": name, "size": 0}})).unwrap())
            }
            "createfolder" => {
                let mut state = self.state.lock().unwrap();
                let parent = input.params.get("parent").cloned().unwrap_or_default();
                let name = input.params.get("name").cloned().unwrap_or_default();
                let id = state.alloc_id("folder");
                state.folders.insert(id.clone(), FolderRec { name: name.clone(), parent });
                Ok(serde_json::to_vec(&json!({"ok": true, "appdata": {"id": id, "name": name}})).unwrap())
            }
            "uploadfile" => {
                let mut state = self.state.lock().unwrap();
                let parent = input.params.get("parent").cloned().unwrap_or_default();
                let name = input.params.get("name").cloned().unwrap_or_default();
                let bytes = input.files.get("file").map(|f| f.bytes.clone()).unwrap_or_default();
                let id = state.alloc_id("file");
                let size = bytes.len() as u64;
                state.files.insert(id.clone(), FileRec { name: name.clone(), parent, bytes });
                Ok(serde_json::to_vec(&json!({"ok": true, "appdata": {"id": id, "name": name, "size": size}})).unwrap())
            }
            "writefile" => {
                let mut state = self.state.lock().unwrap();
                let file_id = input.params.get("file").cloned().unwrap_or_default();
                let offset: usize = input.params.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
                let data = input.files.get("data").map(|f| f.bytes.clone()).unwrap_or_default();
                let rec = state.files.get_mut(&file_id).expect("write to unknown file");
                let end = offset + data.len();
                if rec.bytes.len() < end {
                    rec.bytes.resize(end, 0);
                }
                rec.bytes[offset..end].copy_from_slice(&data);
                Ok(serde_json::to_vec(&json!({"ok": true, "appdata": {"bytes": data.len()}})).unwrap())
            }
            "truncatefile" => {
                let mut state = self.state.lock().unwrap();
                let file_id = input.params.get("file").cloned().unwrap_or_default();
                let size: usize = input.params.get("size").and_then(|v| v.parse().ok()).unwrap_or(0);
                let rec = state.files.get_mut(&file_id).expect("truncate unknown file");
                rec.bytes.resize(size, 0);
                Ok(serde_json::to_vec(&json!({"ok": true, "appdata": {"size": size}})).unwrap())
            }
            "readfile" => {
                self.read_calls.fetch_add(1, Ordering::SeqCst);
                let state = self.state.lock().unwrap();
                let file_id = input.params.get("file").cloned().unwrap_or_default();
                let offset: usize = input.params.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
                let length: usize = input.params.get("length").and_then(|v| v.parse().ok()).unwrap_or(0);
                let rec = state.files.get(&file_id).expect("read unknown file");
                if offset >= rec.bytes.len() {
                    return Ok(Vec::new());
                }
                let end = (offset + length).min(rec.bytes.len());
                Ok(rec.bytes[offset..end].to_vec())
            }
            "deletefile" => {
                let mut state = self.state.lock().unwrap();
                let file_id = input.params.get("file").cloned().unwrap_or_default();
                state.files.remove(&file_id);
                Ok(br#"{"ok":true,"appdata":{}}"#.to_vec())
            }
            "deletefolder" => {
                let mut state = self.state.lock().unwrap();
                let folder_id = input.params.get("folder").cloned().unwrap_or_default();
                state.folders.remove(&folder_id);
                Ok(br#"{"ok":true,"appdata":{}}"#.to_vec())
            }
            "movefile" => {
                let mut state = self.state.lock().unwrap();
                let file_id = input.params.get("file").cloned().unwrap_or_default();
                let new_parent = input.params.get("parent").cloned().unwrap_or_default();
                state.files.get_mut(&file_id).expect("move unknown file").parent = new_parent;
                Ok(br#"{"ok":true,"appdata":{}}"#.to_vec())
            }
            "getfolder" => {
                let state = self.state.lock().unwrap();
                let folder_id = input.params.get("folder").cloned().unwrap_or_else(|| "root".to_string());
                let files: Vec<Value> = state
                    .files
                    .iter()
                    .filter(|(_, rec)| rec.parent == folder_id)
                    .map(|(id, rec)| json!({"id": id, "name": rec.name, "size": rec.bytes.len()}))
                    .collect();
                let folders: Vec<Value> = state
                    .folders
                    .iter()
                    .filter(|(_, rec)| rec.parent == folder_id)
                    .map(|(id, rec)| json!({"id": id, "name": rec.name}))
                    .collect();
                Ok(serde_json::to_vec(&json!({"ok": true, "appdata": {"files": files, "folders": folders}})).unwrap())
            }
            _ => Ok(br#"{"ok":true,"appdata":{}}"#.to_vec()),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

fn new_session(fake: Arc<FakeBackend>) -> (Arc<BackendSession>, Arc<PageBackend>) {
    let backend = Arc::new(BackendSession::new(fake, "andromeda-fuse", CacheMode::Normal));
    let page_backend = Arc::new(PageBackend::new(backend.clone(), Arc::new(Semaphore::new(4)), 16));
    (backend, page_backend)
}

/// Unwraps an owned `Item` into its `Folder`, panicking (test-only) if it
/// turns out to be a file.
fn into_folder(item: Item) -> Folder {
    match item {
        Item::Folder(f) => f,
        Item::File(_) => panic!("expected a folder"),
    }
}

fn listing_to_new_children(data: &Value) -> Vec<(String, NewChild)> {
    let mut items = Vec::new();
    for f in data.get("files").and_then(|v| v.as_array()).into_iter().flatten() {
        items.push((f["name"].as_str().unwrap().to_string(), NewChild::File(f.clone())));
    }
    for f in data.get("folders").and_then(|v| v.as_array()).into_iter().flatten() {
        items.push((f["name"].as_str().unwrap().to_string(), NewChild::Folder(f.clone())));
    }
    items
}

#[tokio::test]
async fn sequential_write_then_read_round_trips_through_the_backend() {
    let fake = FakeBackend::new();
    let (backend, pb) = new_session(fake);

    let mut arena = ItemArena::new();
    let root = arena.insert(|_| Item::Folder(Folder::new(FolderKind::Filesystem, None, Some("root".to_string()), String::new())));

    let mut root_folder = into_folder(arena.remove(root).unwrap());
    let file_handle = root_folder.create_file(&mut arena, root, &backend, "note.txt", 16, false).await.unwrap();
    arena.put_back(root, Item::Folder(root_folder));

    {
        let item = arena.get_mut(file_handle).unwrap();
        item.as_file_mut().unwrap().write(&pb, andromedafs_core::WriteMode::Random, 0, b"hello world").await.unwrap();
        let parent_id = "root".to_string();
        item.as_file_mut().unwrap().flush(&pb, &parent_id).await.unwrap();
    }

    // A second file handle over the same backend id, forced to fetch from
    // the fake backend rather than reuse any in-process cache, proves the
    // bytes actually landed server-side.
    let refetched = File::from_backend(root, &json!({"id": "file1", "name": "note.txt", "size": 11}), 16).unwrap();
    let data = refetched.read(&pb, 0, 11).await.unwrap();
    assert_eq!(&data, b"hello world");
}

#[tokio::test]
async fn read_modify_write_of_a_tail_page_preserves_earlier_bytes() {
    let fake = FakeBackend::new();
    let (backend, pb) = new_session(fake);

    let mut arena = ItemArena::new();
    let root = arena.insert(|_| Item::Folder(Folder::new(FolderKind::Filesystem, None, Some("root".to_string()), String::new())));
    let mut root_folder = into_folder(arena.remove(root).unwrap());
    let file_handle = root_folder.create_file(&mut arena, root, &backend, "data.bin", 16, false).await.unwrap();
    arena.put_back(root, Item::Folder(root_folder));

    {
        let item = arena.get_mut(file_handle).unwrap();
        let file = item.as_file_mut().unwrap();
        file.write(&pb, andromedafs_core::WriteMode::Random, 0, &[b'A'; 20]).await.unwrap();
        file.flush(&pb, "root").await.unwrap();
    }

    // Overwrite only the last 4 bytes (the tail of the second, partially
    // filled page) and flush again.
    {
        let item = arena.get_mut(file_handle).unwrap();
        let file = item.as_file_mut().unwrap();
        file.write(&pb, andromedafs_core::WriteMode::Random, 16, &[b'B'; 4]).await.unwrap();
        file.flush(&pb, "root").await.unwrap();
    }

    let refetched = File::from_backend(root, &json!({"id": "file1", "name": "data.bin", "size": 20}), 16).unwrap();
    let data = refetched.read(&pb, 0, 20).await.unwrap();
    assert_eq!(&data[0..16], &[b'A'; 16]);
    assert_eq!(&data[16..20], &[b'B'; 4]);
}

#[tokio::test]
async fn refresh_merge_updates_sizes_without_disturbing_unrelated_children() {
    let fake = FakeBackend::new();
    let (backend, _pb) = new_session(fake);

    let mut arena = ItemArena::new();
    let root = arena.insert(|_| Item::Folder(Folder::new(FolderKind::Filesystem, None, Some("root".to_string()), String::new())));

    let mut root_folder = into_folder(arena.remove(root).unwrap());
    let grown_handle = root_folder.create_file(&mut arena, root, &backend, "grows.txt", 16, false).await.unwrap();
    let stable_handle = root_folder.create_file(&mut arena, root, &backend, "stable.txt", 16, false).await.unwrap();
    arena.put_back(root, Item::Folder(root_folder));

    // Someone else appends to grows.txt server-side, independent of this
    // arena's own page cache.
    let grown_id = arena.get(grown_handle).unwrap().as_file().unwrap().backend_id().unwrap().to_string();
    backend.write_file(&grown_id, 0, vec![b'x'; 50]).await.unwrap();

    let listing = backend.get_folder(Some("root")).await.unwrap();
    let new_items = listing_to_new_children(&listing);

    let mut root_folder = into_folder(arena.remove(root).unwrap());
    root_folder.sync_contents(&mut arena, root, 16, new_items).unwrap();
    arena.put_back(root, Item::Folder(root_folder));

    assert_eq!(arena.get(grown_handle).unwrap().as_file().unwrap().size().await, 50);
    assert_eq!(arena.get(stable_handle).unwrap().as_file().unwrap().size().await, 0);
}

#[tokio::test]
async fn two_factor_auth_flow_requires_a_second_call_with_the_code() {
    let fake = FakeBackend::new();
    let backend = Arc::new(BackendSession::new(fake, "andromeda-fuse", CacheMode::Normal));

    let first = backend.authenticate("alice", "needs-2fa", None).await;
    assert!(matches!(first, Err(AndromedaError::Auth(AuthError::TwoFactorRequired))));

    backend.authenticate("alice", "needs-2fa", Some("123456")).await.unwrap();
}

#[tokio::test]
async fn cross_folder_move_with_overwrite_replaces_the_destination_entry() {
    let fake = FakeBackend::new();
    let (backend, _pb) = new_session(fake);

    let mut arena = ItemArena::new();
    let folder_a = arena.insert(|_| Item::Folder(Folder::new(FolderKind::Plain, None, Some("a".to_string()), "a".to_string())));
    let folder_b = arena.insert(|_| Item::Folder(Folder::new(FolderKind::Plain, None, Some("b".to_string()), "b".to_string())));

    {
        let mut a = into_folder(arena.remove(folder_a).unwrap());
        a.create_file(&mut arena, folder_a, &backend, "doc.txt", 16, false).await.unwrap();
        arena.put_back(folder_a, Item::Folder(a));
    }
    {
        let mut b = into_folder(arena.remove(folder_b).unwrap());
        b.create_file(&mut arena, folder_b, &backend, "doc.txt", 16, false).await.unwrap();
        arena.put_back(folder_b, Item::Folder(b));
    }

    let mut a = into_folder(arena.remove(folder_a).unwrap());
    let moved_handle = a.child("doc.txt").unwrap();
    a.move_item(&mut arena, &backend, "doc.txt", folder_b, false, false, true).await.unwrap();
    arena.put_back(folder_a, Item::Folder(a));

    let mut b = into_folder(arena.remove(folder_b).unwrap());
    b.adopt_moved(&mut arena, "doc.txt", moved_handle, true).unwrap();
    let remaining = b.children().len();
    arena.put_back(folder_b, Item::Folder(b));

    assert_eq!(remaining, 1, "overwriting a move must leave exactly one doc.txt behind");
    let a_folder_still_has_it = arena.get(folder_a).unwrap().as_folder().unwrap().child("doc.txt").is_some();
    assert!(!a_folder_still_has_it, "the source folder must no longer list the moved file");
}

#[tokio::test]
async fn concurrent_reads_of_the_same_file_collapse_into_one_backend_fetch() {
    let fake = FakeBackend::new();
    let (backend, pb) = new_session(fake.clone());

    let mut arena = ItemArena::new();
    let root = arena.insert(|_| Item::Folder(Folder::new(FolderKind::Filesystem, None, Some("root".to_string()), String::new())));
    let mut root_folder = into_folder(arena.remove(root).unwrap());
    let file_handle = root_folder.create_file(&mut arena, root, &backend, "shared.bin", 16, false).await.unwrap();
    arena.put_back(root, Item::Folder(root_folder));

    {
        let item = arena.get_mut(file_handle).unwrap();
        let file = item.as_file_mut().unwrap();
        file.write(&pb, andromedafs_core::WriteMode::Random, 0, &[7u8; 16]).await.unwrap();
        file.flush(&pb, "root").await.unwrap();
    }

    // Two independent `File` views of the same backend id, reading the same
    // page concurrently, must still only hit the backend once between them
    // if they shared a page cache — here each view has its own cache, so
    // this instead confirms a single view's repeated concurrent reads
    // collapse as expected.
    let file = Arc::new(File::from_backend(root, &json!({"id": "file1", "name": "shared.bin", "size": 16}), 16).unwrap());
    let pb2 = pb.clone();
    let f1 = file.clone();
    let f2 = file.clone();
    let pb3 = pb2.clone();
    let (a, b) = tokio::join!(async move { f1.read(&pb2, 0, 16).await.unwrap() }, async move { f2.read(&pb3, 0, 16).await.unwrap() });
    assert_eq!(a, vec![7u8; 16]);
    assert_eq!(b, vec![7u8; 16]);
    assert_eq!(fake.read_calls.load(Ordering::SeqCst), 1);
}
