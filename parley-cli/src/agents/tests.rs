use super::demo::{DemoOptions, demo_users, run_demo};
use super::gateway::{GATEWAY, Gateway};
use super::launcher::MeshWorkerLauncher;
use super::platform::{ChatPlatform, GENERIC_ERROR};
use super::registry::{Directory, REGISTRY, keys};
use super::worker::{WorkerCtx, worker_behaviour};
use async_trait::async_trait;
use parley::mesh::ListenerRegistry;
use parley::{
    AgentMesh, CacheKey, Identity, IdentityCache, InMemoryMesh, Message, ParleyConfig,
    RequestReplyChannel, StartupCoordinator,
};
use parley_testing::fixtures::{agent, chat_event};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn options(users: usize, events: usize) -> DemoOptions {
    DemoOptions {
        users,
        events_per_user: events,
        launch_delay: Duration::from_millis(50),
        ..DemoOptions::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burst_for_one_user_starts_one_worker() {
    let report = run_demo(&ParleyConfig::default(), options(1, 8)).await.unwrap();

    assert!(report.completed);
    assert_eq!(report.events_sent, 8);
    assert_eq!(report.texts_delivered, 8);
    assert_eq!(report.workers_launched, 1);
    assert_eq!(report.workers_live, vec!["user-u-1".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_worker_per_user() {
    let report = run_demo(&ParleyConfig::default(), options(3, 4)).await.unwrap();

    assert!(report.completed);
    assert_eq!(report.texts_delivered, 12);
    assert_eq!(report.workers_launched, 3);
    assert_eq!(report.workers_live.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refused_and_pending_users_get_no_worker() {
    let mut opts = options(3, 2);
    opts.directory = Directory {
        blocked: ["1".to_string()].into(),
        pending: ["2".to_string()].into(),
    };

    let report = run_demo(&ParleyConfig::default(), opts).await.unwrap();

    assert!(report.completed);
    assert_eq!(report.texts_delivered, 6);
    assert_eq!(report.workers_launched, 1);
}

#[test]
fn test_demo_users() {
    assert_eq!(demo_users(3), vec!["1", "2", "3"]);
    assert!(demo_users(0).is_empty());
}

#[derive(Default)]
struct RecordingChat {
    texts: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ChatPlatform for RecordingChat {
    fn name(&self) -> &str {
        "test"
    }

    async fn send_text(&self, user: &str, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .push((user.to_string(), text.to_string()));
    }

    async fn send_typing(&self, _user: &str) {}
}

#[tokio::test]
async fn test_worker_greets_then_chats() {
    let chat = Arc::new(RecordingChat::default());
    let mut fsm = worker_behaviour("user-u-9").unwrap();
    let mut ctx = WorkerCtx::new(Identity::new("u-9"), Arc::clone(&chat) as _);

    for body in ["hi", "how are you"] {
        let event = Message::new(agent("user-u-9"), body).with_metadata(keys::USER, "42");
        fsm.dispatch(&mut ctx, event).await.unwrap();
    }

    assert_eq!(fsm.current_state(), Some("chatting"));
    assert_eq!(ctx.handled, 2);
    assert_eq!(
        *chat.texts.lock().unwrap(),
        vec![
            ("42".to_string(), "Hello u-9, you said: hi".to_string()),
            ("42".to_string(), "You said: how are you".to_string()),
        ]
    );
    assert!(!chat.texts.lock().unwrap().iter().any(|(_, t)| t == GENERIC_ERROR));
}

#[tokio::test]
async fn test_worker_rejects_event_without_user() {
    let chat = Arc::new(RecordingChat::default());
    let mut fsm = worker_behaviour("user-u-9").unwrap();
    let mut ctx = WorkerCtx::new(Identity::new("u-9"), Arc::clone(&chat) as _);

    let dispatched = fsm
        .dispatch(&mut ctx, Message::new(agent("user-u-9"), "hi"))
        .await
        .unwrap();

    assert_eq!(dispatched, parley::behaviour::Dispatched::HandlerFailed);
    assert_eq!(fsm.current_state(), Some("greeting"));
    assert!(chat.texts.lock().unwrap().is_empty());
}

impl RecordingChat {
    fn texts(&self) -> Vec<(String, String)> {
        self.texts.lock().unwrap().clone()
    }

    async fn wait_for_texts(&self, count: usize) -> Vec<(String, String)> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.texts.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        self.texts()
    }
}

#[tokio::test]
async fn test_stopped_worker_is_relaunched_on_next_event() {
    let mesh = InMemoryMesh::default();
    let cancel = CancellationToken::new();
    let chat = Arc::new(RecordingChat::default());
    let launcher = Arc::new(MeshWorkerLauncher::new(
        mesh.clone(),
        Arc::clone(&chat) as _,
        Duration::ZERO,
        cancel.child_token(),
    ));
    let key = CacheKey::new("test", "9");
    let cache = Arc::new(IdentityCache::default());
    cache.insert(key.clone(), Identity::new("u-9"));

    let me = agent(GATEWAY);
    let gateway = Arc::new(Gateway {
        me: me.clone(),
        registry: agent(REGISTRY),
        mesh: Arc::new(mesh.clone()),
        requests: RequestReplyChannel::new(
            me.clone(),
            Arc::new(mesh.clone()),
            ListenerRegistry::new(),
            ParleyConfig::default().request_reply,
        ),
        coordinator: Arc::new(StartupCoordinator::new(cache)),
        presence: Arc::new(mesh.presence_for(me.clone())),
        launcher: Arc::clone(&launcher) as _,
        platform: Arc::clone(&chat) as _,
    });

    let event = |text: &str| chat_event(GATEWAY, "test", "9", text);
    Arc::clone(&gateway).deliver(key.clone(), event("hi")).await;
    chat.wait_for_texts(1).await;

    // The worker goes away without the gateway being told
    mesh.disconnect(&agent("user-u-9")).await.unwrap();

    Arc::clone(&gateway).deliver(key, event("still there?")).await;
    let texts = chat.wait_for_texts(2).await;

    assert_eq!(launcher.launches(), 2);
    assert_eq!(
        texts,
        vec![
            ("9".to_string(), "Hello u-9, you said: hi".to_string()),
            ("9".to_string(), "Hello u-9, you said: still there?".to_string()),
        ]
    );
    assert!(mesh.is_reachable(&agent("user-u-9")).await);
    cancel.cancel();
}
