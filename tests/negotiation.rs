use loopback_rtc::engine::{LoopbackEngine, LoopbackOptions, RtcEngine};
use loopback_rtc::error::{NegotiationError, PhaseTimeout, SessionError};
use loopback_rtc::orchestrator::NegotiationOrchestrator;
use loopback_rtc::peer::connection::EndpointCoordinator;
use loopback_rtc::peer::types::{PeerConnectionState, SdpKind};
use loopback_rtc::session::run_session;
use loopback_rtc::NegotiationConfig;
use std::time::{Duration, Instant};

fn fast_config() -> NegotiationConfig {
    NegotiationConfig {
        poll_interval: Duration::from_millis(10),
        offer_timeout: Duration::from_millis(300),
        answer_timeout: Duration::from_millis(300),
        settle_delay: Duration::from_millis(30),
        gathering_timeout: Duration::from_secs(2),
        relay_interval: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(2),
        message_timeout: Duration::from_millis(300),
        ..Default::default()
    }
}

fn engine(options: LoopbackOptions) -> LoopbackEngine {
    LoopbackEngine::new(options)
}

async fn coordinators(
    engine: &LoopbackEngine,
    orchestrator: &NegotiationOrchestrator,
) -> (EndpointCoordinator, EndpointCoordinator) {
    let config = orchestrator.config();
    let offerer = EndpointCoordinator::new(
        engine,
        &config.offerer_name,
        &config.ice_servers,
        orchestrator.progress(),
    )
    .await
    .unwrap();
    let answerer = EndpointCoordinator::new(
        engine,
        &config.answerer_name,
        &config.ice_servers,
        orchestrator.progress(),
    )
    .await
    .unwrap();
    offerer
        .open_channel(&config.channel_label, config.channel_options.clone())
        .await
        .unwrap();
    (offerer, answerer)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_path_connects_and_exchanges_greetings() {
    let engine = engine(LoopbackOptions::default());
    let summary = run_session(&engine, fast_config()).await.unwrap();

    assert!(summary.report.offerer_connected);
    assert!(summary.report.answerer_connected);
    assert!(summary.report.messages_exchanged);
    assert!(summary.is_full_success());
    assert!(summary.report.timeouts.is_empty());
    assert_eq!(summary.report.relay.dropped, 0);
    assert_eq!(summary.report.relay.forwarded, 4);
    assert_eq!(engine.remote_candidate_calls(), 4);
    assert_eq!(summary.report.set_failures, 0);
    assert!(summary.offerer_state.gathering_complete);
    assert!(summary.answerer_state.message_received);
    assert_eq!(summary.offerer, "Peer1");
    assert_eq!(summary.answerer, "Peer2");
    assert!(summary.to_string().contains("Messages exchanged: Yes"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn each_side_receives_the_other_greeting() {
    let engine = engine(LoopbackOptions::default());
    let orchestrator = NegotiationOrchestrator::new(fast_config());
    let (offerer, answerer) = coordinators(&engine, &orchestrator).await;

    let report = orchestrator.run(&offerer, &answerer).await.unwrap();
    assert!(report.is_full_success());
    assert_eq!(
        offerer.channel().last_message().as_deref(),
        Some("Hello from Peer2!")
    );
    assert_eq!(
        answerer.channel().last_message().as_deref(),
        Some("Hello from Peer1!")
    );
    assert!(offerer.negotiation().sets_succeeded() >= 2);
    assert!(answerer.negotiation().sets_succeeded() >= 2);

    offerer.close().await;
    answerer.close().await;
    assert_eq!(
        offerer.endpoint().connection_state(),
        PeerConnectionState::Closed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_offer_aborts_before_any_relay() {
    let engine = engine(LoopbackOptions {
        stall_offer: true,
        ..Default::default()
    });
    let orchestrator = NegotiationOrchestrator::new(fast_config());
    let (offerer, answerer) = coordinators(&engine, &orchestrator).await;

    let err = orchestrator.run(&offerer, &answerer).await.unwrap_err();
    assert!(matches!(err, NegotiationError::Timeout { kind: SdpKind::Offer, .. }));

    // let any straggling engine task run
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.remote_candidate_calls(), 0);
    assert_eq!(offerer.negotiation().sets_succeeded(), 0);
    assert_eq!(answerer.negotiation().sets_succeeded(), 0);
    assert!(!offerer.is_connected());
    assert!(!answerer.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_offer_fails_the_session() {
    let engine = engine(LoopbackOptions {
        stall_offer: true,
        ..Default::default()
    });

    let err = run_session(&engine, fast_config()).await.unwrap_err();
    match err {
        SessionError::Negotiation(e) => assert_eq!(e.kind(), SdpKind::Offer),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offer_creation_failure_aborts_without_waiting_out_the_budget() {
    let engine = engine(LoopbackOptions {
        fail_offer: true,
        ..Default::default()
    });
    let config = NegotiationConfig {
        offer_timeout: Duration::from_secs(5),
        ..fast_config()
    };

    let started = Instant::now();
    let err = run_session(&engine, config).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Negotiation(NegotiationError::CreateFailed {
            kind: SdpKind::Offer,
            ..
        })
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_answer_is_fatal() {
    let engine = engine(LoopbackOptions {
        stall_answer: true,
        ..Default::default()
    });

    let err = run_session(&engine, fast_config()).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Negotiation(NegotiationError::Timeout {
            kind: SdpKind::Answer,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unparsable_candidates_from_one_side_are_dropped() {
    let engine = engine(LoopbackOptions {
        corrupt_candidates_from: Some(0),
        ..Default::default()
    });

    let summary = run_session(&engine, fast_config()).await.unwrap();

    assert!(summary.report.offerer_connected);
    assert!(summary.report.answerer_connected);
    assert_eq!(summary.report.relay.dropped, 2);
    assert_eq!(summary.report.relay.forwarded, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_candidates_time_out_connectivity_without_failing() {
    let engine = engine(LoopbackOptions {
        reject_remote_candidates: true,
        ..Default::default()
    });
    let config = NegotiationConfig {
        connect_timeout: Duration::from_millis(300),
        ..fast_config()
    };

    let summary = run_session(&engine, config).await.unwrap();

    assert!(!summary.report.offerer_connected);
    assert!(!summary.report.answerer_connected);
    assert!(!summary.report.messages_exchanged);
    assert_eq!(
        summary.report.timeouts,
        vec![PhaseTimeout::Connectivity(Duration::from_millis(300))]
    );
    assert_eq!(summary.report.relay.forwarded, 0);
    assert_eq!(summary.report.relay.dropped, 4);
    assert_eq!(engine.remote_candidate_calls(), 4);
    assert!(summary.offerer_state.gathering_complete);
    assert!(summary.to_string().contains("Peer1 connected: No"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_gathering_still_relays_and_connects() {
    let engine = engine(LoopbackOptions {
        stall_gathering: true,
        ..Default::default()
    });
    let config = NegotiationConfig {
        gathering_timeout: Duration::from_millis(200),
        ..fast_config()
    };

    let summary = run_session(&engine, config).await.unwrap();

    assert!(summary.report.offerer_connected);
    assert!(summary.report.answerer_connected);
    assert!(summary.report.messages_exchanged);
    assert_eq!(
        summary.report.timeouts,
        vec![PhaseTimeout::Gathering(Duration::from_millis(200))]
    );
    assert_eq!(summary.report.relay.forwarded, 4);
    assert!(!summary.offerer_state.gathering_complete);
    assert!(!summary.answerer_state.gathering_complete);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_gathering_and_refused_candidates_record_both_timeouts() {
    let engine = engine(LoopbackOptions {
        stall_gathering: true,
        reject_remote_candidates: true,
        ..Default::default()
    });
    let config = NegotiationConfig {
        gathering_timeout: Duration::from_millis(200),
        connect_timeout: Duration::from_millis(300),
        ..fast_config()
    };

    let summary = run_session(&engine, config).await.unwrap();

    assert!(!summary.report.offerer_connected);
    assert!(!summary.report.answerer_connected);
    assert!(!summary.report.messages_exchanged);
    assert_eq!(
        summary.report.timeouts,
        vec![
            PhaseTimeout::Gathering(Duration::from_millis(200)),
            PhaseTimeout::Connectivity(Duration::from_millis(300)),
        ]
    );
    assert_eq!(summary.report.relay.dropped, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unopened_channel_degrades_to_partial_success() {
    let engine = engine(LoopbackOptions {
        suppress_incoming_channel: true,
        ..Default::default()
    });

    let summary = run_session(&engine, fast_config()).await.unwrap();

    assert!(summary.report.offerer_connected);
    assert!(summary.report.answerer_connected);
    assert!(!summary.report.messages_exchanged);
    assert!(!summary.is_full_success());
    assert_eq!(
        summary.report.timeouts,
        vec![PhaseTimeout::Messages(Duration::from_millis(300))]
    );
    assert!(summary.to_string().contains("Partial/No"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connected_latch_survives_a_later_disconnect() {
    let engine = engine(LoopbackOptions {
        drop_after_connect: true,
        // keeps the run in the message wait until the drop has happened
        suppress_incoming_channel: true,
        ..Default::default()
    });

    let summary = run_session(&engine, fast_config()).await.unwrap();

    assert!(summary.report.offerer_connected);
    assert!(summary.report.answerer_connected);
    assert!(summary.offerer_state.ever_connected);
    assert_eq!(
        summary.offerer_state.connection,
        PeerConnectionState::Disconnected
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_greetings_are_counted() {
    let engine = engine(LoopbackOptions {
        fail_channel_sends: true,
        ..Default::default()
    });

    let summary = run_session(&engine, fast_config()).await.unwrap();

    assert!(summary.report.offerer_connected);
    assert!(!summary.report.messages_exchanged);
    assert_eq!(summary.report.send_failures, 2);
    assert!(summary.to_string().contains("Greeting send failures: 2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_ice_server_is_a_setup_error() {
    let config = NegotiationConfig {
        ice_servers: vec![loopback_rtc::peer::types::IceServerConfig::stun("  ")],
        ..fast_config()
    };

    let err = run_session(&engine(LoopbackOptions::default()), config)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Setup(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs UDP networking and a reachable STUN server"]
async fn real_engine_connects_over_loopback() {
    let engine = RtcEngine::initialize();
    let summary = run_session(&engine, NegotiationConfig::default())
        .await
        .unwrap();

    assert!(summary.report.offerer_connected);
    assert!(summary.report.answerer_connected);
}
