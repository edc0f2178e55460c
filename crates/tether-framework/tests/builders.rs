//! Operation builders against the deterministic ensemble.

use std::sync::Arc;
use std::time::Duration;

use tether_core::Acl;
use tether_core::CoordinationError;
use tether_core::CreateMode;
use tether_core::EventType;
use tether_core::Perms;
use tether_core::Result;
use tether_core::WatchedEvent;
use tether_core::paths::protected_prefix;
use tether_framework::Framework;
use tether_framework::FrameworkBuilder;
use tether_framework::FrameworkEvent;
use tether_framework::FrameworkEventType;
use tether_framework::FrameworkOps;
use tether_retry::RetryNTimes;
use tether_testing::DeferredExecutor;
use tether_testing::DeterministicDialer;
use tether_testing::DeterministicEnsemble;
use tether_testing::OpKind;
use tether_testing::RecordedOp;
use tether_testing::RecordingCompressionProvider;
use tether_testing::RecordingSleeper;
use tokio::sync::mpsc;

fn builder(ensemble: &Arc<DeterministicEnsemble>) -> FrameworkBuilder {
    let _ = tracing_subscriber::fmt().with_env_filter("tether_framework=debug,tether_client=info").with_test_writer().try_init();
    Framework::builder()
        .connect_string("zk1:2181")
        .dialer(DeterministicDialer::new(ensemble.clone()))
        .retry_policy(Arc::new(RetryNTimes::new(3, Duration::from_millis(10))))
        .retry_sleeper(Arc::new(RecordingSleeper::new()))
}

async fn started(builder: FrameworkBuilder) -> Framework {
    let framework = builder.build().unwrap();
    framework.start().await.unwrap();
    framework
}

fn create_paths(ensemble: &DeterministicEnsemble) -> Vec<String> {
    ensemble
        .operations_of(OpKind::Create)
        .into_iter()
        .filter_map(|op| match op {
            RecordedOp::Create { path, .. } => Some(path),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_create_with_parents() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble)).await;

    let created = framework
        .create()
        .creating_parents_if_needed()
        .for_path_with_data("/parent/child", b"data".to_vec())
        .await
        .unwrap();

    assert_eq!(created, "/parent/child");
    // The first attempt fails on the missing parent; the parent is created
    // once before the child is created once.
    assert_eq!(create_paths(&ensemble), vec!["/parent/child", "/parent", "/parent/child"]);
    assert_eq!(ensemble.data("/parent/child"), Some(b"data".to_vec()));
    assert_eq!(ensemble.acl("/parent"), Some(Acl::open_unsafe()));
    framework.close().await;
}

#[tokio::test]
async fn test_create_without_parents_fails() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble)).await;

    let err = framework.create().for_path("/parent/child").await.unwrap_err();
    assert!(matches!(err, CoordinationError::NoNode { .. }));
    assert!(!ensemble.contains("/parent"));
}

#[tokio::test]
async fn test_create_in_namespace() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble).namespace("parent")).await;

    let created = framework.create().for_path_with_data("/child", b"x".to_vec()).await.unwrap();

    assert_eq!(created, "/child");
    assert!(ensemble.contains("/parent"));
    assert!(ensemble.contains("/parent/child"));
    assert_eq!(create_paths(&ensemble), vec!["/parent", "/parent/child"]);
}

#[tokio::test]
async fn test_create_with_mode_and_acl() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble)).await;
    let acl = Acl::world(Perms::READ);

    let created = framework
        .create()
        .with_mode(CreateMode::PersistentSequential)
        .with_acl(acl.clone())
        .for_path("/seq-")
        .await
        .unwrap();

    assert_eq!(created, "/seq-0000000000");
    assert_eq!(ensemble.acl(&created), Some(acl));
}

#[tokio::test]
async fn test_protected_create_finds_earlier_attempt() {
    let ensemble = DeterministicEnsemble::new();
    ensemble.seed("/locks", b"").unwrap();
    let framework = started(builder(&ensemble)).await;
    ensemble.fail_next_after_apply(OpKind::Create, CoordinationError::ConnectionLoss);

    let created = framework.create().with_protection().for_path("/locks/lock-").await.unwrap();

    let name = created.strip_prefix("/locks/").unwrap();
    assert!(name.starts_with("_c_"));
    assert!(name.ends_with("-lock-"));
    assert_eq!(create_paths(&ensemble).len(), 1);
    assert_eq!(ensemble.children("/locks").len(), 1);
    assert!(ensemble.contains(&created));
}

#[tokio::test]
async fn test_protected_prefix_shape() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble)).await;

    let created = framework.create().with_protection().for_path("/node").await.unwrap();

    let id = created.trim_start_matches("/_c_").trim_end_matches("-node");
    assert_eq!(created, format!("/{}node", protected_prefix(id)));
}

#[tokio::test]
async fn test_compressed_set_and_get() {
    let ensemble = DeterministicEnsemble::new();
    ensemble.seed("/node", b"").unwrap();
    let compression = Arc::new(RecordingCompressionProvider::new());
    let framework = started(builder(&ensemble).compression_provider(compression.clone())).await;

    let stat = framework.set_data().compressed().for_path_with_data("/node", b"data".to_vec()).await.unwrap();

    assert_eq!(stat.version, 1);
    assert_eq!(compression.compress_calls(), vec![("/node".to_string(), b"data".to_vec())]);
    let writes = ensemble.operations_of(OpKind::Set);
    assert_eq!(writes, vec![RecordedOp::Set {
        path: "/node".to_string(),
        data: b"compressed(data)".to_vec(),
        version: -1,
    }]);

    let data = framework.get_data().decompressed().for_path("/node").await.unwrap();
    assert_eq!(data, b"data".to_vec());
    assert_eq!(compression.decompress_calls(), vec![("/node".to_string(), b"compressed(data)".to_vec())]);
}

#[tokio::test]
async fn test_set_data_version_conflict() {
    let ensemble = DeterministicEnsemble::new();
    ensemble.seed("/node", b"v0").unwrap();
    let framework = started(builder(&ensemble)).await;

    let err = framework.set_data().with_version(4).for_path_with_data("/node", b"v1".to_vec()).await.unwrap_err();
    assert!(matches!(err, CoordinationError::BadVersion { .. }));

    framework.set_data().with_version(0).for_path_with_data("/node", b"v1".to_vec()).await.unwrap();
    let (data, stat) = framework.get_data().for_path_with_stat("/node").await.unwrap();
    assert_eq!(data, b"v1".to_vec());
    assert_eq!(stat.version, 1);
}

#[tokio::test]
async fn test_default_data() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble).default_data(b"default".to_vec())).await;

    framework.create().for_path("/node").await.unwrap();

    assert_eq!(ensemble.data("/node"), Some(b"default".to_vec()));
}

#[tokio::test]
async fn test_exists() {
    let ensemble = DeterministicEnsemble::new();
    ensemble.seed("/node", b"x").unwrap();
    let framework = started(builder(&ensemble).namespace("ns")).await;

    assert!(framework.check_exists().for_path("/missing").await.unwrap().is_none());
    framework.create().for_path("/node").await.unwrap();
    let stat = framework.check_exists().for_path("/node").await.unwrap();
    assert!(stat.is_some());
}

#[tokio::test]
async fn test_exists_watch_reaches_watcher_without_namespace() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble).namespace("ns")).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let watcher = Arc::new(move |event: &WatchedEvent| {
        let _ = tx.send(event.clone());
    });
    let stat = framework.check_exists().using_watcher(watcher).for_path("/node").await.unwrap();
    assert!(stat.is_none());

    framework.create().for_path("/node").await.unwrap();
    let event = rx.recv().await.unwrap();
    assert_eq!(event.event_type, EventType::NodeCreated);
    assert_eq!(event.path, "/node");
}

#[tokio::test]
async fn test_watched_data_goes_to_event_listeners() {
    let ensemble = DeterministicEnsemble::new();
    ensemble.seed("/node", b"").unwrap();
    let framework = started(builder(&ensemble)).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    framework.event_listenable().add(Arc::new(move |event: &FrameworkEvent| -> Result<()> {
        if event.event_type() == FrameworkEventType::Watched && event.path().is_some() {
            let _ = tx.send(event.clone());
        }
        Ok(())
    }));

    framework.get_data().watched().for_path("/node").await.unwrap();
    framework.set_data().for_path_with_data("/node", b"changed".to_vec()).await.unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.path(), Some("/node"));
    assert_eq!(event.watched_event().map(|watched| watched.event_type), Some(EventType::NodeDataChanged));
}

#[tokio::test]
async fn test_watch_delivery_runs_on_executor() {
    let ensemble = DeterministicEnsemble::new();
    ensemble.seed("/node", b"").unwrap();
    let executor = Arc::new(DeferredExecutor::new());
    let framework = started(builder(&ensemble).executor(executor.clone())).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = Arc::new(move |event: &WatchedEvent| {
        let _ = tx.send(event.clone());
    });

    let pending = executor.pending();
    framework.get_data().using_watcher(watcher).for_path("/node").await.unwrap();
    assert_eq!(executor.pending(), pending + 1);

    framework.set_data().for_path_with_data("/node", b"changed".to_vec()).await.unwrap();
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());

    executor.run_all().await;
    let event = rx.try_recv().unwrap();
    assert_eq!(event.event_type, EventType::NodeDataChanged);
    assert_eq!(event.path, "/node");
}

#[tokio::test]
async fn test_children_and_acl() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble).namespace("app")).await;
    framework.create().creating_parents_if_needed().for_path("/jobs/a").await.unwrap();
    framework.create().for_path("/jobs/b").await.unwrap();

    let mut children = framework.get_children().for_path("/jobs").await.unwrap();
    children.sort();
    assert_eq!(children, vec!["a", "b"]);

    let acl = Acl::world(Perms::READ);
    let stat = framework.set_acl().with_acl(acl.clone()).for_path("/jobs/a").await.unwrap();
    assert_eq!(stat.aversion, 1);
    let (read, _) = framework.get_acl().for_path("/jobs/a").await.unwrap();
    assert_eq!(read, acl);
    assert_eq!(ensemble.acl("/app/jobs/a"), Some(acl));
}

#[tokio::test]
async fn test_sync_returns_path_inside_namespace() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble).namespace("app")).await;

    assert_eq!(framework.sync().for_path("/node").await.unwrap(), "/node");
    assert_eq!(ensemble.operations_of(OpKind::Sync), vec![RecordedOp::Sync {
        path: "/app/node".to_string()
    }]);
}

#[tokio::test]
async fn test_delete_children() {
    let ensemble = DeterministicEnsemble::new();
    for path in ["/tree", "/tree/a", "/tree/a/x", "/tree/b"] {
        ensemble.seed(path, b"").unwrap();
    }
    let framework = started(builder(&ensemble)).await;

    let err = framework.delete().for_path("/tree").await.unwrap_err();
    assert!(matches!(err, CoordinationError::NotEmpty { .. }));

    framework.delete().deleting_children_if_needed().for_path("/tree").await.unwrap();
    assert!(!ensemble.contains("/tree"));
    assert!(!ensemble.contains("/tree/a/x"));
}

#[tokio::test]
async fn test_delete_quietly() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble)).await;

    let err = framework.delete().for_path("/missing").await.unwrap_err();
    assert!(matches!(err, CoordinationError::NoNode { .. }));
    framework.delete().quietly().for_path("/missing").await.unwrap();
}

#[tokio::test]
async fn test_invalid_path_is_not_sent() {
    let ensemble = DeterministicEnsemble::new();
    let framework = started(builder(&ensemble)).await;

    let err = framework.create().for_path("no-slash").await.unwrap_err();
    assert!(matches!(err, CoordinationError::InvalidPath { .. }));
    assert!(ensemble.operations_of(OpKind::Create).is_empty());
}

#[tokio::test]
async fn test_retry_after_connection_loss() {
    let ensemble = DeterministicEnsemble::new();
    ensemble.seed("/node", b"x").unwrap();
    let sleeper = Arc::new(RecordingSleeper::new());
    let framework = started(builder(&ensemble).retry_sleeper(sleeper.clone())).await;
    ensemble.fail_next(OpKind::Get, CoordinationError::ConnectionLoss);

    let data = framework.get_data().for_path("/node").await.unwrap();

    assert_eq!(data, b"x".to_vec());
    assert_eq!(ensemble.operations_of(OpKind::Get).len(), 2);
    assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(10)]);
}

fn dial_refused() -> CoordinationError {
    CoordinationError::Dial {
        connection_string: "zk1:2181".to_string(),
        reason: "refused".to_string(),
    }
}

#[tokio::test]
async fn test_failed_dial_is_retried() {
    let ensemble = DeterministicEnsemble::new();
    let dialer = DeterministicDialer::new(ensemble.clone());
    dialer.fail_next_dial(dial_refused());
    dialer.fail_next_dial(dial_refused());
    let sleeper = Arc::new(RecordingSleeper::new());
    let framework = builder(&ensemble).dialer(dialer.clone()).retry_sleeper(sleeper.clone()).build().unwrap();

    assert!(matches!(framework.start().await, Err(CoordinationError::Dial { .. })));
    let created = framework.create().for_path("/node").await.unwrap();

    assert_eq!(created, "/node");
    assert!(ensemble.contains("/node"));
    assert_eq!(dialer.dial_count(), 3);
    assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(10)]);
}

#[tokio::test]
async fn test_exhausted_dial_retries_report_connection_loss() {
    let ensemble = DeterministicEnsemble::new();
    let dialer = DeterministicDialer::new(ensemble.clone());
    for _ in 0..3 {
        dialer.fail_next_dial(dial_refused());
    }
    let framework = builder(&ensemble)
        .dialer(dialer.clone())
        .retry_policy(Arc::new(RetryNTimes::new(1, Duration::from_millis(10))))
        .build()
        .unwrap();

    assert!(framework.start().await.is_err());
    let err = framework.create().for_path("/node").await.unwrap_err();

    assert_eq!(err, CoordinationError::ConnectionLoss);
    assert_eq!(dialer.dial_count(), 3);
    assert!(!ensemble.contains("/node"));
}

#[tokio::test]
async fn test_background_create_reports_to_callback() {
    let ensemble = DeterministicEnsemble::new();
    let executor = Arc::new(DeferredExecutor::new());
    let framework = started(builder(&ensemble).namespace("ns").executor(executor.clone())).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let returned = framework
        .create()
        .in_background_with_callback_and_context(
            move |event: FrameworkEvent| -> Result<()> {
                let _ = tx.send(event);
                Ok(())
            },
            "ctx",
        )
        .for_path_with_data("/node", b"x".to_vec())
        .await
        .unwrap();
    assert_eq!(returned, "");
    assert_eq!(executor.pending(), 1);
    assert!(!ensemble.contains("/ns/node"));

    executor.run_all().await;
    let event = rx.recv().await.unwrap();
    assert_eq!(event.event_type(), FrameworkEventType::Create);
    assert!(event.is_ok());
    assert_eq!(event.path(), Some("/node"));
    assert_eq!(event.name(), Some("node"));
    assert_eq!(event.data(), Some(&b"x"[..]));
    assert_eq!(event.context().and_then(|ctx| ctx.downcast_ref::<&str>()), Some(&"ctx"));
    assert!(ensemble.contains("/ns/node"));
}

#[tokio::test]
async fn test_background_failure_carries_caller_path() {
    let ensemble = DeterministicEnsemble::new();
    let executor = Arc::new(DeferredExecutor::new());
    let framework = started(builder(&ensemble).namespace("ns").executor(executor.clone())).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    framework
        .create()
        .in_background_with_callback(move |event: FrameworkEvent| -> Result<()> {
            let _ = tx.send(event);
            Ok(())
        })
        .for_path("/missing/child")
        .await
        .unwrap();
    executor.run_all().await;

    let event = rx.recv().await.unwrap();
    assert_eq!(event.path(), Some("/missing/child"));
    assert!(matches!(event.error(), Some(CoordinationError::NoNode { .. })));
}

#[tokio::test]
async fn test_background_without_callback_reaches_event_listeners() {
    let ensemble = DeterministicEnsemble::new();
    ensemble.seed("/node", b"payload").unwrap();
    let executor = Arc::new(DeferredExecutor::new());
    let framework = started(builder(&ensemble).executor(executor.clone())).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    framework.event_listenable().add(Arc::new(move |event: &FrameworkEvent| -> Result<()> {
        let _ = tx.send(event.clone());
        Ok(())
    }));

    let data = framework.get_data().in_background().for_path("/node").await.unwrap();
    assert!(data.is_empty());
    executor.run_all().await;

    let event = rx.recv().await.unwrap();
    assert_eq!(event.event_type(), FrameworkEventType::GetData);
    assert_eq!(event.data(), Some(&b"payload"[..]));
    assert_eq!(event.stat().map(|stat| stat.version), Some(0));
}

#[tokio::test]
async fn test_callback_error_reaches_unhandled_listeners() {
    let ensemble = DeterministicEnsemble::new();
    let executor = Arc::new(DeferredExecutor::new());
    let framework = started(builder(&ensemble).executor(executor.clone())).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    framework.unhandled_error_listenable().add(Arc::new(move |err: &CoordinationError| {
        let _ = tx.send(err.clone());
    }));

    framework
        .sync()
        .in_background_with_callback(|_event: FrameworkEvent| -> Result<()> {
            Err(CoordinationError::Api {
                reason: "callback failed".to_string(),
            })
        })
        .for_path("/node")
        .await
        .unwrap();
    executor.run_all().await;

    let err = rx.recv().await.unwrap();
    assert_eq!(err, CoordinationError::Api {
        reason: "callback failed".to_string()
    });
}
