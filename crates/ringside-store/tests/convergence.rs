use std::sync::Arc;
use std::time::Duration;

use ringside_db::Database;
use ringside_store::EmbeddedStore;
use ringside_sync::{ChatHandle, ChatOptions, ChatSession, LocalCache, MemoryStore, ProfileStore};
use ringside_types::models::Message;

fn join(store: &Arc<EmbeddedStore>, name: &str) -> ChatSession {
    let cache = LocalCache::new(Arc::new(MemoryStore::new()));
    let profile = ProfileStore::load(cache.clone());
    profile.update(Some(name), None).unwrap();
    ChatSession::start(store.clone(), cache, profile, ChatOptions::default())
}

async fn wait_for_list(chat: &ChatHandle, what: &str, check: impl Fn(&[Message]) -> bool) -> Vec<Message> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let list = chat.snapshot();
        if check(&list) {
            return list;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}: {:?}", what, list);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn settled(list: &[Message], n: usize) -> bool {
    // Uuids are 36 characters; temporary ids are millisecond strings.
    list.len() == n && list.iter().all(|m| m.id.len() == 36)
}

#[tokio::test]
async fn two_sessions_converge_on_the_same_list() {
    let store = Arc::new(EmbeddedStore::new(Arc::new(Database::open_in_memory().unwrap())));
    let ana = join(&store, "ana");
    let bo = join(&store, "bo");
    tokio::time::sleep(Duration::from_millis(50)).await;

    ana.handle().send("jab").await;
    wait_for_list(&bo.handle(), "bo to see jab", |l| settled(l, 1)).await;

    bo.handle().send("cross").await;
    let seen_by_ana = wait_for_list(&ana.handle(), "ana to see both", |l| settled(l, 2)).await;
    let seen_by_bo = wait_for_list(&bo.handle(), "bo to settle", |l| settled(l, 2)).await;

    assert_eq!(seen_by_ana, seen_by_bo);
    assert_eq!(seen_by_ana[0].author, "ana");
    assert_eq!(seen_by_ana[1].author, "bo");

    ana.shutdown().await;
    bo.shutdown().await;
}

#[tokio::test]
async fn concurrent_sends_converge_after_a_reload() {
    let store = Arc::new(EmbeddedStore::new(Arc::new(Database::open_in_memory().unwrap())));
    let ana = join(&store, "ana");
    let bo = join(&store, "bo");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (a, b) = (ana.handle(), bo.handle());
    tokio::join!(a.send("hook"), b.send("uppercut"));
    wait_for_list(&a, "ana to settle", |l| settled(l, 2)).await;
    wait_for_list(&b, "bo to settle", |l| settled(l, 2)).await;

    a.on_focus().await;
    b.on_focus().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen_by_ana = wait_for_list(&a, "ana to reload", |l| settled(l, 2)).await;
    let seen_by_bo = wait_for_list(&b, "bo to reload", |l| settled(l, 2)).await;
    assert_eq!(seen_by_ana, seen_by_bo);

    ana.shutdown().await;
    bo.shutdown().await;
}

#[tokio::test]
async fn clearing_in_one_session_empties_the_store() {
    let store = Arc::new(EmbeddedStore::new(Arc::new(Database::open_in_memory().unwrap())));
    let ana = join(&store, "ana");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let chat = ana.handle();
    chat.send("bell").await;
    wait_for_list(&chat, "send to settle", |l| settled(l, 1)).await;

    chat.clear().await.unwrap();
    assert!(chat.snapshot().is_empty());

    let late = join(&store, "bo");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(late.handle().snapshot().is_empty());

    ana.shutdown().await;
    late.shutdown().await;
}
