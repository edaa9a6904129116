//! Startup coordination under cache pressure, driven by the parley-testing mocks

use parley_identity::{
    CacheKey, Identity, IdentityCache, IdentityCacheConfig, IdentityError, LaunchError,
    StartOutcome, StartupCoordinator,
};
use parley_mesh::AgentId;
use parley_testing::{MockLauncher, SwitchablePresence};
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;

fn key(user: &str) -> CacheKey {
    CacheKey::new("telegram", user)
}

fn coordinator(config: IdentityCacheConfig) -> Arc<StartupCoordinator> {
    Arc::new(StartupCoordinator::new(Arc::new(IdentityCache::new(config))))
}

#[tokio::test(start_paused = true)]
async fn test_pending_startup_survives_capacity_eviction() {
    let coordinator = coordinator(IdentityCacheConfig::unbounded().with_max_entries(1));
    let launcher = Arc::new(MockLauncher::new().with_delay(Duration::from_millis(200)));
    let presence = SwitchablePresence::new();
    coordinator.cache().insert(key("1"), Identity::new("u-1"));

    let starting = {
        let coordinator = Arc::clone(&coordinator);
        let launcher = Arc::clone(&launcher);
        tokio::spawn(async move {
            coordinator
                .ensure_started(&key("1"), &presence, async {}, launcher)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(coordinator.cache().is_starting(&key("1")));

    // Over capacity: the only idle entry is the newcomer
    coordinator.cache().insert(key("2"), Identity::new("u-2"));
    assert_eq!(coordinator.cache().evict(), 0);
    assert_eq!(coordinator.cache().get(&key("1")), Some(Identity::new("u-1")));
    assert_eq!(coordinator.cache().get(&key("2")), None);

    let outcome = starting.await.unwrap().unwrap();
    assert_eq!(outcome, StartOutcome::Launched(AgentId::new_unchecked("user-u-1")));
    assert_eq!(launcher.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remove_during_startup_cannot_cause_second_launch() {
    let coordinator = coordinator(IdentityCacheConfig::default());
    let launcher = Arc::new(MockLauncher::new().with_delay(Duration::from_secs(5)));
    let presence = Arc::new(SwitchablePresence::new());
    coordinator.cache().insert(key("42"), Identity::new("u-42"));

    let first = {
        let coordinator = Arc::clone(&coordinator);
        let launcher = Arc::clone(&launcher);
        let presence = Arc::clone(&presence);
        tokio::spawn(async move {
            coordinator
                .ensure_started(&key("42"), presence.as_ref(), async {}, launcher)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        coordinator.cache().remove(&key("42")),
        Err(IdentityError::StartupPending(key("42").to_string()))
    );
    coordinator.cache().insert(key("42"), Identity::new("u-42"));

    let second = coordinator
        .ensure_started(&key("42"), presence.as_ref(), async {}, Arc::clone(&launcher))
        .await;

    let worker = StartOutcome::Launched(AgentId::new_unchecked("user-u-42"));
    assert_eq!(first.await.unwrap(), Ok(worker.clone()));
    assert_eq!(second, Ok(worker));
    assert_eq!(launcher.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_launch_settles_after_every_caller_gave_up() {
    let coordinator = coordinator(IdentityCacheConfig::default());
    let launcher = Arc::new(MockLauncher::new().with_delay(Duration::from_millis(50)));
    coordinator.cache().insert(key("8"), Identity::new("u-8"));

    let gave_up = tokio::time::timeout(
        Duration::from_millis(10),
        coordinator.ensure_started(
            &key("8"),
            &SwitchablePresence::new(),
            async {},
            Arc::clone(&launcher),
        ),
    )
    .await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(launcher.call_count(), 1);
    assert!(!coordinator.cache().is_starting(&key("8")));
    assert_eq!(
        coordinator.cache().insert(key("8"), Identity::new("u-9")),
        Some(Identity::new("u-8"))
    );
    assert!(!coordinator.forget_worker(&key("8")));
}

#[tokio::test(start_paused = true)]
async fn test_unawaited_launch_can_be_forgotten() {
    let coordinator = coordinator(IdentityCacheConfig::default());
    let launcher = Arc::new(MockLauncher::new().with_delay(Duration::from_millis(50)));
    coordinator.cache().insert(key("8"), Identity::new("u-8"));

    let _ = tokio::time::timeout(
        Duration::from_millis(10),
        coordinator.ensure_started(
            &key("8"),
            &SwitchablePresence::new(),
            async {},
            Arc::clone(&launcher),
        ),
    )
    .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(coordinator.forget_worker(&key("8")));
    coordinator
        .ensure_started(&key("8"), &SwitchablePresence::new(), async {}, Arc::clone(&launcher))
        .await
        .unwrap();
    assert_eq!(launcher.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_identity_change_while_starting_is_ignored() {
    let coordinator = coordinator(IdentityCacheConfig::default());
    let launcher = Arc::new(MockLauncher::new().with_delay(Duration::from_millis(100)));
    coordinator.cache().insert(key("1"), Identity::new("u-1"));

    let starting = {
        let coordinator = Arc::clone(&coordinator);
        let launcher = Arc::clone(&launcher);
        tokio::spawn(async move {
            coordinator
                .ensure_started(&key("1"), &SwitchablePresence::new(), async {}, launcher)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(coordinator.cache().insert(key("1"), Identity::new("u-9")), None);
    assert_eq!(coordinator.cache().get(&key("1")), Some(Identity::new("u-1")));

    let outcome = starting.await.unwrap().unwrap();
    assert_eq!(outcome.worker(), &AgentId::new_unchecked("user-u-1"));
}

#[tokio::test(start_paused = true)]
async fn test_expired_identity_needs_a_new_lookup() {
    let coordinator =
        coordinator(IdentityCacheConfig::default().with_ttl(Duration::from_secs(60)));
    let launcher = Arc::new(MockLauncher::new());
    coordinator.cache().insert(key("1"), Identity::new("u-1"));

    tokio::time::advance(Duration::from_secs(61)).await;

    let result = coordinator
        .ensure_started(&key("1"), &SwitchablePresence::new(), async {}, Arc::clone(&launcher))
        .await;
    assert_eq!(result, Err(IdentityError::UnknownKey(key("1").to_string())));
    assert_eq!(launcher.call_count(), 0);
}

#[rstest]
#[case::first_try(0)]
#[case::one_retry(1)]
#[case::three_retries(3)]
#[tokio::test]
async fn test_each_failure_allows_a_retry(#[case] failures: usize) {
    let coordinator = coordinator(IdentityCacheConfig::default());
    let launcher = Arc::new(MockLauncher::new().with_failures(failures, "no capacity"));
    let presence = SwitchablePresence::new();
    coordinator.cache().insert(key("7"), Identity::new("u-7"));

    for _ in 0..failures {
        let result = coordinator
            .ensure_started(&key("7"), &presence, async {}, Arc::clone(&launcher))
            .await;
        assert_eq!(
            result,
            Err(IdentityError::Launch(LaunchError::failed("no capacity")))
        );
        assert!(!coordinator.cache().is_starting(&key("7")));
    }

    let outcome = coordinator
        .ensure_started(&key("7"), &presence, async {}, Arc::clone(&launcher))
        .await
        .unwrap();
    assert_eq!(outcome, StartOutcome::Launched(AgentId::new_unchecked("user-u-7")));
    assert_eq!(launcher.call_count(), failures + 1);
    assert!(launcher.call_history().iter().all(|k| *k == key("7")));
}

#[tokio::test]
async fn test_stopped_worker_is_relaunched_after_forget() {
    let coordinator = coordinator(IdentityCacheConfig::default());
    let launcher = Arc::new(MockLauncher::new());
    let presence = SwitchablePresence::new();
    let worker = AgentId::new_unchecked("user-u-3");
    coordinator.cache().insert(key("3"), Identity::new("u-3"));

    coordinator
        .ensure_started(&key("3"), &presence, async {}, Arc::clone(&launcher))
        .await
        .unwrap();
    presence.set_live(&worker, true);

    let outcome = coordinator
        .ensure_started(&key("3"), &presence, async {}, Arc::clone(&launcher))
        .await
        .unwrap();
    assert_eq!(outcome, StartOutcome::AlreadyLive(worker.clone()));

    // The worker goes away and the gateway notices
    presence.set_live(&worker, false);
    assert!(coordinator.forget_worker(&key("3")));

    let outcome = coordinator
        .ensure_started(&key("3"), &presence, async {}, Arc::clone(&launcher))
        .await
        .unwrap();
    assert_eq!(outcome, StartOutcome::Launched(worker));
    assert_eq!(launcher.call_count(), 2);
}
