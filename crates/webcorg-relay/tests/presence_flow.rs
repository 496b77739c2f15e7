//! End-to-end presence and routing flows through the lifecycle manager.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{relay, roster_emails, TestClient};
use webcorg_relay::{CloseCause, ConnectionId, ConnectionState, PresenceEvent};

#[tokio::test]
async fn test_two_user_conversation() {
    let relay = relay();

    let mut a = TestClient::connect(&relay);
    a.join("Ada", "a@x");
    assert!(roster_emails(&a.recv().await).is_empty());

    let mut b = TestClient::connect(&relay);
    b.join("Bob", "b@x");
    assert_eq!(roster_emails(&b.recv().await), vec!["a@x"]);

    let announce = a.recv().await;
    assert_eq!(announce["type"], "user_join");
    assert_eq!(announce["email"], "b@x");
    assert_eq!(announce["name"], "Bob");

    a.chat("a@x", "b@x", "hi");
    let chat = b.recv().await;
    assert_eq!(chat["type"], "chat_message");
    assert_eq!(chat["from"], "a@x");
    assert_eq!(chat["to"], "b@x");
    assert_eq!(chat["message"], "hi");

    relay.on_close(b.id, CloseCause::Voluntary);
    let left = a.recv().await;
    assert_eq!(left["type"], "user_left");
    assert_eq!(left["email"], "b@x");

    assert!(a.drain().is_empty());
}

#[tokio::test]
async fn test_joiner_never_sees_itself() {
    let relay = relay();
    let mut b = TestClient::connect(&relay);
    let mut c = TestClient::connect(&relay);
    b.join("Bob", "b@x");
    c.join("Cy", "c@x");
    b.drain();
    c.drain();

    let mut a = TestClient::connect(&relay);
    a.join("Ada", "a@x");

    let frames = a.drain();
    assert_eq!(frames.len(), 1, "joiner receives only its roster");
    let mut emails = roster_emails(&frames[0]);
    emails.sort();
    assert_eq!(emails, vec!["b@x", "c@x"]);

    for peer in [&mut b, &mut c] {
        let frames = peer.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "user_join");
        assert_eq!(frames[0]["email"], "a@x");
    }
}

#[tokio::test]
async fn test_duplicate_login_gets_exactly_one_delivery() {
    let relay = relay();
    let mut sender = TestClient::connect(&relay);
    let mut first = TestClient::connect(&relay);
    let mut second = TestClient::connect(&relay);
    sender.join("Ada", "a@x");
    first.join("Bob", "b@x");
    second.join("Bob", "b@x");
    sender.drain();
    first.drain();
    second.drain();

    sender.chat("a@x", "b@x", "which one?");

    let chats = |frames: Vec<serde_json::Value>| {
        frames
            .into_iter()
            .filter(|f| f["type"] == "chat_message")
            .count()
    };
    assert_eq!(chats(first.drain()), 1, "oldest session wins");
    assert_eq!(chats(second.drain()), 0);

    // Once the oldest session is gone the newer one takes over
    relay.on_close(first.id, CloseCause::Voluntary);
    second.drain();
    sender.chat("a@x", "b@x", "still there?");
    assert_eq!(chats(second.drain()), 1);
}

#[tokio::test]
async fn test_leave_only_for_joined_connections() {
    let relay = relay();
    let mut a = TestClient::connect(&relay);
    a.join("Ada", "a@x");
    a.drain();

    let lurker = TestClient::connect(&relay);
    relay.on_close(lurker.id, CloseCause::Error);
    assert!(a.drain().is_empty());

    let b = TestClient::connect(&relay);
    b.join("Bob", "b@x");
    a.drain();
    relay.on_close(b.id, CloseCause::Error);
    relay.on_close(b.id, CloseCause::Voluntary);
    let leaves: Vec<_> = a
        .drain()
        .into_iter()
        .filter(|f| f["type"] == "user_left")
        .collect();
    assert_eq!(leaves.len(), 1);
}

#[tokio::test]
async fn test_forced_disconnect_runs_normal_close_path() {
    let relay = relay();
    let mut a = TestClient::connect(&relay);
    let b = TestClient::connect(&relay);
    a.join("Ada", "a@x");
    b.join("Bob", "b@x");
    a.drain();

    // Socket task for b: wait for the close signal, then report it.
    let task_relay = Arc::clone(&relay);
    let b_id = b.id;
    let b_closed = b.closed.clone();
    let socket_task = tokio::spawn(async move {
        b_closed.cancelled().await;
        task_relay.on_close(b_id, CloseCause::Forced)
    });

    assert_eq!(relay.disconnect_email("b@x"), 1);
    let entry = socket_task.await.unwrap().expect("b had joined");
    assert_eq!(entry.identity.email, "b@x");

    let left = a.recv().await;
    assert_eq!(left["type"], "user_left");
    assert_eq!(left["email"], "b@x");
    assert_eq!(relay.state(b.id), ConnectionState::Closed);
    assert!(!relay.registry().contains(b.id));
}

#[tokio::test]
async fn test_broadcast_skips_closing_connection() {
    let relay = relay();
    let mut a = TestClient::connect(&relay);
    let b = TestClient::connect(&relay);
    a.join("Ada", "a@x");
    b.join("Bob", "b@x");
    a.drain();

    // b's socket is gone but its task has not reported the close yet
    drop(b.outbound);

    let mut c = TestClient::connect(&relay);
    c.join("Cy", "c@x");
    assert_eq!(roster_emails(&c.recv().await), vec!["a@x", "b@x"]);

    let announce = a.recv().await;
    assert_eq!(announce["email"], "c@x");
    // b is still registered until its close is processed
    assert!(relay.registry().contains(b.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connect_disconnect_leaves_clean_registry() {
    let relay = relay();
    let mut observer = TestClient::connect(&relay);
    observer.join("Watcher", "watch@x");
    observer.drain();

    let mut tasks = Vec::new();
    for n in 0..32 {
        let relay = Arc::clone(&relay);
        tasks.push(tokio::spawn(async move {
            let client = TestClient::connect(&relay);
            client.join(&format!("user{n}"), &format!("user{n}@x"));
            client.chat(&format!("user{n}@x"), "watch@x", "ping");
            tokio::task::yield_now().await;
            relay.on_close(client.id, CloseCause::Voluntary);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(relay.online_count(), 1);
    assert_eq!(relay.connection_count(), 1);
    assert_eq!(relay.registry().list_identities()[0].email, "watch@x");

    let frames = observer.drain();
    let count = |kind: &str| frames.iter().filter(|f| f["type"] == kind).count();
    assert_eq!(count("user_join"), 32);
    assert_eq!(count("user_left"), 32);
    assert_eq!(count("chat_message"), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_join_and_close_announce_in_pairs() {
    const CHURNED: usize = 64;

    let relay = relay();
    let mut keepers: Vec<TestClient> = (0..3)
        .map(|n| {
            let client = TestClient::connect(&relay);
            client.join(&format!("Keeper{n}"), &format!("keep{n}@x"));
            client
        })
        .collect();
    for keeper in keepers.iter_mut() {
        keeper.drain();
    }
    let mut events = relay.subscribe();

    // Join and close of each handle run on separate tasks and race each other
    let mut tasks = Vec::new();
    for n in 0..CHURNED {
        let relay = Arc::clone(&relay);
        tasks.push(tokio::spawn(async move {
            let client = TestClient::connect(&relay);
            let id = client.id;
            let joiner = {
                let relay = Arc::clone(&relay);
                let join = serde_json::json!({
                    "type": "user_join",
                    "name": format!("user{n}"),
                    "email": format!("user{n}@x"),
                })
                .to_string();
                tokio::spawn(async move { relay.on_message(id, &join) })
            };
            let closer = {
                let relay = Arc::clone(&relay);
                tokio::spawn(async move { relay.on_close(id, CloseCause::Error) })
            };
            joiner.await.unwrap();
            closer.await.unwrap();
            client
        }));
    }
    for task in tasks {
        let client = task.await.unwrap();
        assert_eq!(relay.state(client.id), ConnectionState::Closed);
    }

    assert_eq!(relay.online_count(), 3);
    assert_eq!(relay.connection_count(), 3);

    // Every keeper sees each churned user either joined-then-left or not at all
    let mut expected: Option<HashMap<String, (usize, usize)>> = None;
    for keeper in keepers.iter_mut() {
        let mut seen: HashMap<String, (usize, usize)> = HashMap::new();
        for frame in keeper.drain() {
            let email = frame["email"].as_str().unwrap_or_default().to_string();
            match frame["type"].as_str() {
                Some("user_join") => seen.entry(email).or_default().0 += 1,
                Some("user_left") => seen.entry(email).or_default().1 += 1,
                other => panic!("unexpected frame type {other:?}"),
            }
        }
        for (email, counts) in &seen {
            assert_eq!(*counts, (1, 1), "unbalanced announcements for {email}");
        }
        match &expected {
            Some(first) => assert_eq!(&seen, first, "keepers disagree"),
            None => expected = Some(seen),
        }
    }

    // Presence events for a handle never report the leave before the join
    let mut order: HashMap<ConnectionId, Vec<&'static str>> = HashMap::new();
    while let Ok(event) = events.try_recv() {
        match event {
            PresenceEvent::Joined { id, .. } => order.entry(id).or_default().push("joined"),
            PresenceEvent::Left { id, .. } => order.entry(id).or_default().push("left"),
        }
    }
    for (id, sequence) in &order {
        assert_eq!(sequence, &vec!["joined", "left"], "event order for {id}");
    }
    let joined = expected.map(|seen| seen.len()).unwrap_or_default();
    assert_eq!(order.len(), joined);
    assert!(joined <= CHURNED);
}
