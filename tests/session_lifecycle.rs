use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use vstream::config::Config;
use vstream::server::AppState;
use vstream::session::{SessionManager, SessionPhase, StubLauncher, WaitCondition, WorkflowStep};
use vstream_browser::{BrowserSession, StubBrowser};
use vstream_core_types::{Cookie, OriginState, SessionId, StorageItem, StorageStateBlob};
use vstream_crypto_envelope::EnvelopeKeyring;
use vstream_recorder::BRIDGE_FUNCTION;
use vstream_registry::SessionRegistry;
use vstream_storage_state::{MemoryRepo, PriorityLoader, RecordMetadata, StorageStateStore};

fn google_cookie(name: &str, expires: f64) -> Cookie {
    Cookie {
        name: name.into(),
        value: format!("{name}-value"),
        domain: ".google.com".into(),
        path: "/".into(),
        expires,
        http_only: true,
        secure: true,
        same_site: "Lax".into(),
    }
}

struct Harness {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    repo: Arc<MemoryRepo>,
    store: Arc<StorageStateStore>,
    manager: Arc<SessionManager>,
    launcher: Arc<StubLauncher>,
}

fn harness(feature_use_cookies: bool) -> Harness {
    let config = Arc::new(Config {
        feature_use_cookies,
        recorder_ready_timeout: Duration::from_millis(300),
        ..Config::default()
    });
    let repo = Arc::new(MemoryRepo::new());
    let store = Arc::new(StorageStateStore::new(
        Arc::clone(&repo) as Arc<dyn vstream_storage_state::StateRepo>,
        Arc::new(EnvelopeKeyring::generate("test-kid").expect("keyring")),
    ));
    let loader = Arc::new(PriorityLoader::new(
        Some(Arc::clone(&store)),
        None,
        None,
        config.cookie_verify_ttl_hours,
    ));
    let registry = Arc::new(SessionRegistry::new());
    let launcher = StubLauncher::new();
    let manager = SessionManager::new(
        Arc::clone(&config),
        Arc::clone(&registry),
        Some(Arc::clone(&store)),
        loader,
        Arc::clone(&launcher) as Arc<dyn vstream::session::BrowserLauncher>,
    );
    Harness {
        config,
        registry,
        repo,
        store,
        manager,
        launcher,
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_stub(launcher: &StubLauncher) -> Arc<StubBrowser> {
    wait_until("stub browser launch", || launcher.last().is_some()).await;
    launcher.last().expect("stub present")
}

async fn wait_for_phase(manager: &SessionManager, session_id: &SessionId, phase: SessionPhase) {
    wait_until(phase.as_str(), || manager.phase(session_id) == Some(phase)).await;
}

#[tokio::test]
async fn session_streams_events_and_auto_saves_verified_state() {
    let h = harness(false);

    let workflow = vec![
        WorkflowStep::Navigate {
            url: "https://accounts.google.com/signin".into(),
        },
        WorkflowStep::Wait {
            condition: WaitCondition::Millis { ms: 600 },
        },
    ];
    let session_id = h
        .manager
        .start_session("owner-1".into(), workflow, vec!["google".into()])
        .await;

    let stub = wait_for_stub(&h.launcher).await;
    wait_until("recorder bridge bound", || {
        stub.emit_from_page(BRIDGE_FUNCTION, r#"{"type":2,"timestamp":1,"data":{}}"#)
    })
    .await;
    stub.emit_from_page(BRIDGE_FUNCTION, r#"{"type":3,"timestamp":2,"data":{"source":1}}"#);

    // login happens mid-session: the jar now holds the google session cookies
    // plus one already-expired cookie that must not survive the save
    stub.seed_cookies(vec![
        google_cookie("SID", -1.0),
        google_cookie("SIDCC", -1.0),
        google_cookie("OSID", -1.0),
        google_cookie("stale", 1000.0),
    ]);

    // while running, the registry serves the session and counts our events
    wait_for_phase(&h.manager, &session_id, SessionPhase::WorkflowRunning).await;
    let entry = h.registry.lookup(&session_id).expect("session registered");
    wait_until("events processed", || {
        entry.streamer.status().events_processed >= 2
    })
    .await;
    assert!(entry.streamer.status().streaming_ready);

    wait_for_phase(&h.manager, &session_id, SessionPhase::Ended).await;
    assert!(h.registry.lookup(&session_id).is_none(), "entry removed");

    // scenario: a verified google record now exists, without the expired cookie
    let record = h
        .store
        .latest_verified("owner-1", &["google".to_string()], 24)
        .await
        .unwrap()
        .expect("auto-saved record");
    assert_eq!(record.verified["google"], true);
    assert!(record.metadata.auto_saved);
    let blob = h.store.load_plaintext(&record).unwrap();
    let names: Vec<&str> = blob.cookies.iter().map(|c| c.name.as_str()).collect();
    assert!(names.contains(&"SID"));
    assert!(names.contains(&"SIDCC"));
    assert!(names.contains(&"OSID"));
    assert!(!names.contains(&"stale"));
}

#[tokio::test]
async fn resumed_session_restores_cookies_and_local_storage() {
    let h = harness(true);

    // a prior run left a verified record behind
    let blob = StorageStateBlob {
        cookies: vec![
            google_cookie("SID", -1.0),
            google_cookie("SIDCC", -1.0),
            google_cookie("OSID", -1.0),
        ],
        origins: vec![OriginState {
            origin: "https://docs.google.com".into(),
            local_storage: vec![StorageItem {
                name: "session-token".into(),
                value: "resume-me".into(),
            }],
        }],
        env_metadata: None,
    };
    h.store
        .save("owner-2", blob, RecordMetadata::default())
        .await
        .unwrap();

    let workflow = vec![
        WorkflowStep::Navigate {
            url: "https://docs.google.com/document/d/1".into(),
        },
        WorkflowStep::Wait {
            condition: WaitCondition::Millis { ms: 400 },
        },
    ];
    let session_id = h
        .manager
        .start_session("owner-2".into(), workflow, vec!["google".into()])
        .await;

    let stub = wait_for_stub(&h.launcher).await;
    wait_until("cookies restored", || {
        let commands = stub.commands();
        commands.iter().any(|c| c.starts_with("set_cookies"))
    })
    .await;

    // the browser shows the logged-in state from the prior session
    let cookies = stub.cookies().await.unwrap();
    assert!(cookies.iter().any(|c| c.name == "SID"));

    // feed a snapshot so streaming becomes ready
    wait_until("recorder bridge bound", || {
        stub.emit_from_page(BRIDGE_FUNCTION, r#"{"type":2,"timestamp":1,"data":{}}"#)
    })
    .await;

    wait_for_phase(&h.manager, &session_id, SessionPhase::Ended).await;

    // current-origin local storage came back too
    let extracted = stub.extract_local_storage().await.unwrap();
    assert_eq!(extracted.len(), 1);
    assert_eq!(extracted[0].origin, "https://docs.google.com");
    assert_eq!(extracted[0].local_storage[0].value, "resume-me");
}

#[tokio::test]
async fn failed_workflow_still_finalizes_and_removes_session() {
    let h = harness(false);

    let session_id = h
        .manager
        .start_session(
            "owner-3".into(),
            vec![
                WorkflowStep::Wait {
                    condition: WaitCondition::Millis { ms: 300 },
                },
                WorkflowStep::Click {
                    selector: "#missing".into(),
                },
            ],
            vec![],
        )
        .await;

    let stub = wait_for_stub(&h.launcher).await;
    wait_until("recorder bridge bound", || {
        stub.emit_from_page(BRIDGE_FUNCTION, r#"{"type":2,"timestamp":1,"data":{}}"#)
    })
    .await;
    // the injection evaluation is done once the workflow is running; queue
    // the click step's "element not found" answer
    wait_for_phase(&h.manager, &session_id, SessionPhase::WorkflowRunning).await;
    stub.push_eval_result(serde_json::json!(false));

    wait_for_phase(&h.manager, &session_id, SessionPhase::Failed).await;
    assert!(h.registry.lookup(&session_id).is_none());
    // auto-save still ran: the failure left a (pending) record behind
    assert_eq!(h.repo.len(), 1);
    let summaries = h.manager.list();
    assert!(summaries
        .iter()
        .any(|s| s.session_id == session_id && s.phase == SessionPhase::Failed));
}

#[tokio::test]
async fn app_state_reports_session_counts() {
    let h = harness(false);
    let state = AppState {
        config: Arc::clone(&h.config),
        registry: Arc::clone(&h.registry),
        manager: Arc::clone(&h.manager),
        store: Some(Arc::clone(&h.store)),
    };

    let session_id = h
        .manager
        .start_session(
            "owner-4".into(),
            vec![WorkflowStep::Wait {
                condition: WaitCondition::Millis { ms: 400 },
            }],
            vec![],
        )
        .await;

    let stub = wait_for_stub(&h.launcher).await;
    wait_until("recorder bridge bound", || {
        stub.emit_from_page(BRIDGE_FUNCTION, r#"{"type":2,"timestamp":1,"data":{}}"#)
    })
    .await;

    wait_until("session registered", || state.registry.len() == 1).await;
    wait_for_phase(&h.manager, &session_id, SessionPhase::Ended).await;
    assert_eq!(state.registry.len(), 0);
}
