//! Renewal watcher tests on paused time.

use std::sync::Arc;
use std::time::Duration;

use auth_vault_client::{
    RenewalOutcome, RenewalWatcher, Session, WatchState, WatcherConfig, WatcherError,
};
use test_utils::ScriptedBroker;
use test_utils::fixtures::grant;
use test_utils::mocks::rejected;

fn watcher(broker: &Arc<ScriptedBroker>) -> RenewalWatcher<ScriptedBroker> {
    RenewalWatcher::new(
        Arc::clone(broker),
        WatcherConfig {
            increment: Duration::from_secs(3600),
            renewal_threshold: 0.2,
            timeout: Duration::from_secs(10),
        },
    )
}

fn session(renewable: bool, lease_secs: u64) -> Session {
    Session::from_grant(grant("t1", renewable, lease_secs))
}

#[tokio::test(start_paused = true)]
async fn test_renews_until_failure() {
    let broker = Arc::new(ScriptedBroker::new());
    broker
        .push_renewal(Ok(Some(grant("t1", true, 100))))
        .push_renewal(Ok(Some(grant("t1", true, 90))))
        .push_renewal(Err(rejected("token not renewable")));

    let session = session(true, 100);
    let mut handle = watcher(&broker).watch(&session).unwrap();
    assert_eq!(handle.session_id(), session.id);
    assert_eq!(handle.state(), WatchState::Watching);

    let RenewalOutcome::Renewed(first) = handle.next_outcome().await else {
        panic!("expected a renewal");
    };
    assert_eq!(first.lease_duration, Duration::from_secs(100));
    assert!(first.renewable);

    let RenewalOutcome::Renewed(second) = handle.next_outcome().await else {
        panic!("expected a renewal");
    };
    assert_eq!(second.lease_duration, Duration::from_secs(90));
    assert_eq!(handle.state(), WatchState::Watching);

    let outcome = handle.next_outcome().await;
    assert!(matches!(outcome, RenewalOutcome::Failed(WatcherError::Renewal(_))));
    assert!(outcome.is_terminal());
    assert_eq!(handle.state(), WatchState::Failed);

    assert!(matches!(
        handle.next_outcome().await,
        RenewalOutcome::Failed(WatcherError::Stopped)
    ));
    assert_eq!(broker.renew_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_wait_loses_no_outcome() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_renewal(Ok(Some(grant("t1", true, 100))));

    let mut handle = watcher(&broker).watch(&session(true, 100)).unwrap();
    {
        let mut next = tokio_test::task::spawn(handle.next_outcome());
        tokio_test::assert_pending!(next.poll());
    }

    assert!(matches!(handle.next_outcome().await, RenewalOutcome::Renewed(_)));
    assert_eq!(broker.renew_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lease_inside_grace_is_exhausted() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_renewal(Ok(Some(grant("t1", true, 20))));

    let mut handle = watcher(&broker).watch(&session(true, 100)).unwrap();

    assert!(matches!(handle.next_outcome().await, RenewalOutcome::Renewed(_)));
    assert!(matches!(handle.next_outcome().await, RenewalOutcome::Expired));
    assert_eq!(handle.state(), WatchState::ExpiredNoRenewal);
    assert_eq!(broker.renew_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_renewal_that_drops_renewability_expires() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_renewal(Ok(Some(grant("t1", false, 3600))));

    let mut handle = watcher(&broker).watch(&session(true, 100)).unwrap();

    let RenewalOutcome::Renewed(lease) = handle.next_outcome().await else {
        panic!("expected a renewal");
    };
    assert!(!lease.renewable);
    assert!(matches!(handle.next_outcome().await, RenewalOutcome::Expired));
}

#[tokio::test(start_paused = true)]
async fn test_renewal_without_auth_block_fails() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_renewal(Ok(None));

    let mut handle = watcher(&broker).watch(&session(true, 100)).unwrap();

    assert!(matches!(
        handle.next_outcome().await,
        RenewalOutcome::Failed(WatcherError::NoAuthInfo)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_hung_renewal_times_out() {
    let broker = Arc::new(ScriptedBroker::new());

    let mut handle = watcher(&broker).watch(&session(true, 100)).unwrap();

    assert!(matches!(
        handle.next_outcome().await,
        RenewalOutcome::Failed(WatcherError::Renewal(_))
    ));
    assert_eq!(broker.renew_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_renew_uses_session_token_and_increment() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_renewal(Ok(Some(grant("t1", true, 100))));

    let mut handle = watcher(&broker).watch(&session(true, 100)).unwrap();
    handle.next_outcome().await;

    assert_eq!(
        broker.calls(),
        vec![test_utils::BrokerCall::Renew {
            token: "t1".into(),
            increment: Duration::from_secs(3600),
        }]
    );
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_renewals() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_renewal(Ok(Some(grant("t1", true, 100))));

    let handle = watcher(&broker).watch(&session(true, 100)).unwrap();
    handle.stop().await;

    tokio::time::sleep(Duration::from_secs(86_400)).await;
    assert_eq!(broker.renew_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_handle_halts_renewals() {
    let broker = Arc::new(ScriptedBroker::new());

    drop(watcher(&broker).watch(&session(true, 100)).unwrap());

    tokio::time::sleep(Duration::from_secs(86_400)).await;
    assert_eq!(broker.renew_count(), 0);
}

#[tokio::test]
async fn test_non_renewable_session_is_rejected() {
    let broker = Arc::new(ScriptedBroker::new());
    let session = session(false, 100);

    let err = watcher(&broker).watch(&session).unwrap_err();
    assert!(matches!(err, WatcherError::NotRenewable(id) if id == session.id));
}

#[tokio::test]
async fn test_session_without_lease_is_rejected() {
    let broker = Arc::new(ScriptedBroker::new());

    let err = watcher(&broker).watch(&session(true, 0)).unwrap_err();
    assert!(matches!(err, WatcherError::NoLease(_)));
}
