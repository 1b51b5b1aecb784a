//! End-to-end tests for the RPC protocol

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    identifier, init_tracing, memory_pair, memory_pair_limited, memory_pair_with, stream_pair,
    wait_until,
};
use exthost_rpc::handler::{arg, respond};
use exthost_rpc::{
    ChannelState, Error, ErrorCode, HandlerError, MethodRouter, RpcConfig, RpcProtocol, Side,
    Value, well_known,
};
use exthost_transport::TransportError;
use serde_json::json;
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;

fn echo_service() -> MethodRouter {
    MethodRouter::new().method("echo", |args, _cx| async move {
        let value: Value = arg(&args, 0)?;
        Ok(value)
    })
}

/// Echo, unregister, then close with a call in flight.
async fn run_echo_scenario(main: RpcProtocol, ext: RpcProtocol) {
    let commands = identifier(Side::Ext, well_known::COMMANDS);
    let languages = identifier(Side::Ext, well_known::LANGUAGES);

    ext.set(&commands, echo_service()).unwrap();
    ext.set(
        &languages,
        MethodRouter::new().method("hang", |_args, cx| async move {
            cx.cancelled().await;
            respond(())
        }),
    )
    .unwrap();

    let proxy = main.get_proxy(&commands).unwrap();
    let echoed: String = proxy.call("echo", ("hi",)).await.unwrap();
    assert_eq!(echoed, "hi");

    assert!(ext.unset(&commands).is_some());
    let result: Result<String, _> = proxy.call("echo", ("hi",)).await;
    assert!(matches!(result, Err(Error::NoSuchProxy(id)) if id == commands.id()));

    let hanging = main.get_proxy(&languages).unwrap().invoke("hang", Vec::new());
    wait_until(|| ext.in_progress_count() == 1).await;

    main.close().await;
    let result = timeout(Duration::from_secs(1), hanging)
        .await
        .expect("pending call was not settled by close");
    assert!(matches!(result, Err(Error::Disconnected)));

    timeout(Duration::from_secs(1), ext.closed())
        .await
        .expect("peer did not observe close");
    timeout(Duration::from_secs(1), ext.wait())
        .await
        .expect("peer tasks did not finish");
}

#[tokio::test]
async fn test_echo_scenario_over_memory() {
    init_tracing();

    let (main, ext) = memory_pair();
    run_echo_scenario(main, ext).await;
}

#[tokio::test]
async fn test_echo_scenario_over_stream() {
    init_tracing();

    let (main, ext) = stream_pair();
    run_echo_scenario(main, ext).await;
}

#[tokio::test]
async fn test_calls_in_both_directions() {
    init_tracing();

    let (main, ext) = memory_pair();
    let status_bar = identifier(Side::Main, well_known::STATUS_BAR);
    let documents = identifier(Side::Ext, well_known::DOCUMENTS);

    main.set(
        &status_bar,
        MethodRouter::new().method("set_text", |args, _cx| async move {
            let text: String = arg(&args, 0)?;
            respond(text.len())
        }),
    )
    .unwrap();
    ext.set(
        &documents,
        MethodRouter::new().method("line_count", |args, _cx| async move {
            let text: String = arg(&args, 0)?;
            respond(text.lines().count())
        }),
    )
    .unwrap();

    let from_ext: usize = ext
        .get_proxy(&status_bar)
        .unwrap()
        .call("set_text", ("$(sync) Indexing",))
        .await
        .unwrap();
    let from_main: usize = main
        .get_proxy(&documents)
        .unwrap()
        .call("line_count", ("a\nb\nc",))
        .await
        .unwrap();

    assert_eq!(from_ext, 16);
    assert_eq!(from_main, 3);
}

#[tokio::test]
async fn test_side_checks() {
    init_tracing();

    let (main, ext) = memory_pair();
    let main_owned = identifier(Side::Main, well_known::COMMANDS);
    let ext_owned = identifier(Side::Ext, well_known::COMMANDS);

    assert!(matches!(
        main.set(&ext_owned, echo_service()),
        Err(Error::WrongSide { usage: "hosted", side: Side::Main, .. })
    ));
    assert!(matches!(
        ext.get_proxy(&ext_owned),
        Err(Error::WrongSide { usage: "proxied", side: Side::Ext, .. })
    ));
    assert!(matches!(
        main.invoke(&main_owned, "echo", Vec::new()).await,
        Err(Error::WrongSide { .. })
    ));
    assert!(matches!(
        main.notify(&main_owned, "echo", Vec::new()),
        Err(Error::WrongSide { .. })
    ));

    // Same name, other side: allowed
    assert!(main.set(&main_owned, echo_service()).unwrap().is_none());
    assert!(main.get_proxy(&ext_owned).is_ok());
}

#[tokio::test]
async fn test_remote_errors_are_rehydrated() {
    init_tracing();

    let (main, ext) = memory_pair();
    let terminals = identifier(Side::Ext, well_known::TERMINALS);

    ext.set(
        &terminals,
        MethodRouter::new()
            .method("create", |_args, _cx| async move {
                Err(HandlerError::Failed {
                    message: "shell not found".to_string(),
                    details: Some(json!({"shell": "/bin/zsh"})),
                })
            })
            .method("resize", |args, _cx| async move {
                let cols: u16 = arg(&args, 0)?;
                respond(cols)
            }),
    )
    .unwrap();
    let proxy = main.get_proxy(&terminals).unwrap();

    match proxy.invoke("create", Vec::new()).await {
        Err(Error::Remote(err)) => {
            assert_eq!(err.code, ErrorCode::HandlerFailed);
            assert_eq!(err.message, "shell not found");
            assert_eq!(err.details, Some(json!({"shell": "/bin/zsh"})));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    match proxy.call::<u16>("resize", ("wide",)).await {
        Err(Error::Remote(err)) => assert_eq!(err.code, ErrorCode::InvalidArguments),
        other => panic!("unexpected result: {other:?}"),
    }

    match proxy.invoke("destroy", Vec::new()).await {
        Err(Error::Remote(err)) => assert_eq!(err.code, ErrorCode::NoSuchMethod),
        other => panic!("unexpected result: {other:?}"),
    }

    // A reply that does not fit the expected type fails locally
    let result = proxy.call::<String>("resize", (80,)).await;
    assert!(matches!(result, Err(Error::Codec(_))));
}

#[tokio::test]
async fn test_hot_reload_last_registration_wins() {
    init_tracing();

    let (main, ext) = memory_pair();
    let workspace = identifier(Side::Ext, well_known::WORKSPACE);
    let release = Arc::new(Notify::new());

    let first_release = Arc::clone(&release);
    ext.set(
        &workspace,
        MethodRouter::new().method("version", move |_args, _cx| {
            let release = Arc::clone(&first_release);
            async move {
                release.notified().await;
                respond("v1")
            }
        }),
    )
    .unwrap();

    let proxy = main.get_proxy(&workspace).unwrap();
    let running = proxy.call::<String>("version", ());
    wait_until(|| ext.in_progress_count() == 1).await;

    let previous = ext
        .set(
            &workspace,
            MethodRouter::new().method("version", |_args, _cx| async move { respond("v2") }),
        )
        .unwrap();
    assert!(previous.is_some());

    // New calls see the new handler while the old call is still running
    assert_eq!(proxy.call::<String>("version", ()).await.unwrap(), "v2");

    release.notify_one();
    assert_eq!(running.await.unwrap(), "v1");
    assert_eq!(ext.registry().len(), 1);
}

#[tokio::test]
async fn test_handler_panic_is_isolated() {
    init_tracing();

    let (main, ext) = memory_pair();
    let commands = identifier(Side::Ext, well_known::COMMANDS);

    ext.set(
        &commands,
        echo_service().method("explode", |_args, _cx| async move {
            if true {
                panic!("extension bug");
            }
            respond(())
        }),
    )
    .unwrap();
    let proxy = main.get_proxy(&commands).unwrap();

    match proxy.invoke("explode", Vec::new()).await {
        Err(Error::Remote(err)) => {
            assert_eq!(err.code, ErrorCode::HandlerPanicked);
            assert!(err.message.contains("extension bug"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let echoed: u32 = proxy.call("echo", (7,)).await.unwrap();
    assert_eq!(echoed, 7);
    assert!(!ext.is_closed());
}

#[tokio::test]
async fn test_handlers_run_concurrently() {
    init_tracing();

    let (main, ext) = memory_pair();
    let languages = identifier(Side::Ext, well_known::LANGUAGES);
    let gate = Arc::new(Notify::new());

    let wait_gate = Arc::clone(&gate);
    let open_gate = Arc::clone(&gate);
    ext.set(
        &languages,
        MethodRouter::new()
            .method("wait", move |_args, _cx| {
                let gate = Arc::clone(&wait_gate);
                async move {
                    gate.notified().await;
                    respond("released")
                }
            })
            .method("release", move |_args, _cx| {
                let gate = Arc::clone(&open_gate);
                async move {
                    gate.notify_one();
                    respond(true)
                }
            }),
    )
    .unwrap();

    let proxy = main.get_proxy(&languages).unwrap();
    let waiting = proxy.call::<String>("wait", ());

    let released: bool = timeout(Duration::from_secs(1), proxy.call("release", ()))
        .await
        .expect("dispatch blocked behind a running handler")
        .unwrap();
    assert!(released);
    assert_eq!(waiting.await.unwrap(), "released");
}

#[tokio::test]
async fn test_notifications() {
    init_tracing();

    let (main, ext) = memory_pair();
    let output = identifier(Side::Main, well_known::OUTPUT_CHANNELS);
    let (tx, mut rx) = mpsc::unbounded_channel();

    main.set(
        &output,
        MethodRouter::new()
            .method("append", move |args, cx| {
                let tx = tx.clone();
                async move {
                    let line: String = arg(&args, 0)?;
                    let _ = tx.send((line, cx.is_notification()));
                    respond(())
                }
            })
            .method("fail", |_args, _cx| async move {
                Err(HandlerError::failed("ignored"))
            }),
    )
    .unwrap();

    let proxy = ext.get_proxy(&output).unwrap();
    proxy.notify("fail", ()).unwrap();
    proxy.notify("append", ("first",)).unwrap();
    proxy.notify("append", ("second",)).unwrap();

    let mut lines = Vec::new();
    for _ in 0..2 {
        let received = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("notification not delivered")
            .expect("handler dropped");
        lines.push(received);
    }
    lines.sort();
    assert_eq!(
        lines,
        vec![("first".to_string(), true), ("second".to_string(), true)]
    );

    // Notifications leave nothing pending on either side
    assert_eq!(ext.pending_count(), 0);
    wait_until(|| main.in_progress_count() == 0).await;
}

#[tokio::test]
async fn test_notification_to_unregistered_service_is_dropped() {
    init_tracing();

    let (main, ext) = memory_pair();
    let commands = identifier(Side::Ext, well_known::COMMANDS);
    let documents = identifier(Side::Ext, well_known::DOCUMENTS);
    ext.set(&commands, echo_service()).unwrap();

    main.notify(&documents, "opened", vec![json!("a.rs")]).unwrap();

    let echoed: String = main
        .get_proxy(&commands)
        .unwrap()
        .call("echo", ("still alive",))
        .await
        .unwrap();
    assert_eq!(echoed, "still alive");
}

#[tokio::test]
async fn test_max_in_flight() {
    init_tracing();

    let (main, ext) = memory_pair_with(RpcConfig::main().with_max_in_flight(1), RpcConfig::ext());
    let languages = identifier(Side::Ext, well_known::LANGUAGES);
    ext.set(
        &languages,
        MethodRouter::new().cancellable_method("hang", |_args, cx| async move {
            cx.cancelled().await;
            respond(())
        }),
    )
    .unwrap();

    let proxy = main.get_proxy(&languages).unwrap();
    let first = proxy.invoke("hang", Vec::new());
    assert_eq!(main.pending_count(), 1);

    let second = proxy.invoke("hang", Vec::new()).await;
    assert!(matches!(
        second,
        Err(Error::TooManyInFlight { current: 1, max: 1 })
    ));

    assert!(first.cancel());
    assert!(matches!(first.await, Err(Error::Cancelled)));
    assert_eq!(main.pending_count(), 0);
}

#[tokio::test]
async fn test_peer_close_rejects_pending_calls() {
    init_tracing();

    let (main, ext) = memory_pair();
    let languages = identifier(Side::Ext, well_known::LANGUAGES);
    ext.set(
        &languages,
        MethodRouter::new().method("hang", |_args, cx| async move {
            cx.cancelled().await;
            respond(())
        }),
    )
    .unwrap();

    let proxy = main.get_proxy(&languages).unwrap();
    let calls: Vec<_> = (0..5).map(|_| proxy.invoke("hang", Vec::new())).collect();
    wait_until(|| ext.in_progress_count() == 5).await;

    ext.close().await;

    for call in calls {
        let result = timeout(Duration::from_secs(1), call)
            .await
            .expect("call left unsettled");
        assert!(matches!(result, Err(Error::Disconnected)));
    }

    timeout(Duration::from_secs(1), main.closed())
        .await
        .expect("close not observed");
    assert_eq!(main.state(), ChannelState::Closed);
    assert_eq!(main.pending_count(), 0);

    // Handlers saw their tokens fire and finished
    timeout(Duration::from_secs(1), ext.wait())
        .await
        .expect("handlers still running");
    assert_eq!(ext.in_progress_count(), 0);
}

#[tokio::test]
async fn test_calls_after_close_fail_fast() {
    init_tracing();

    let (main, _ext) = memory_pair();
    let commands = identifier(Side::Ext, well_known::COMMANDS);

    main.close().await;
    main.close().await;
    assert!(main.is_closed());

    let proxy = main.get_proxy(&commands).unwrap();
    assert!(matches!(
        proxy.invoke("echo", Vec::new()).await,
        Err(Error::Disconnected)
    ));
    assert!(matches!(proxy.notify("echo", ()), Err(Error::Disconnected)));

    timeout(Duration::from_secs(1), main.wait())
        .await
        .expect("background tasks did not stop");
}

#[tokio::test]
async fn test_debug_output() {
    init_tracing();

    let (main, _ext) = memory_pair();
    let debug = format!("{main:?}");

    assert!(debug.contains("RpcProtocol"));
    assert!(debug.contains("Main"));
    assert!(debug.contains("Open"));
}

/// An array nested `depth` levels deep.
fn nested(depth: usize) -> Value {
    (1..depth).fold(json!(0), |inner, _| Value::Array(vec![inner]))
}

#[tokio::test]
async fn test_over_deep_arguments_reject_locally() {
    init_tracing();

    let (main, ext) = memory_pair();
    let commands = identifier(Side::Ext, well_known::COMMANDS);
    ext.set(&commands, echo_service()).unwrap();
    let proxy = main.get_proxy(&commands).unwrap();

    let result = timeout(Duration::from_secs(1), proxy.invoke("echo", vec![nested(300)]))
        .await
        .expect("over-deep call left unsettled");
    assert!(matches!(result, Err(Error::Codec(_))));
    assert!(matches!(
        proxy.notify("echo", (nested(300),)),
        Err(Error::Codec(_))
    ));
    assert_eq!(main.pending_count(), 0);

    // Deep but decodable values still travel
    let echoed = proxy.invoke("echo", vec![nested(100)]).await.unwrap();
    assert_eq!(echoed, nested(100));
    assert!(!main.is_closed());
}

#[tokio::test]
async fn test_over_deep_reply_becomes_handler_failed() {
    init_tracing();

    let (main, ext) = memory_pair();
    let documents = identifier(Side::Ext, well_known::DOCUMENTS);
    ext.set(
        &documents,
        MethodRouter::new().method("tree", |args, _cx| async move {
            let depth: usize = arg(&args, 0)?;
            Ok(nested(depth))
        }),
    )
    .unwrap();
    let proxy = main.get_proxy(&documents).unwrap();

    let result = timeout(Duration::from_secs(1), proxy.invoke("tree", vec![json!(300)]))
        .await
        .expect("over-deep reply left the call unsettled");
    match result {
        Err(Error::Remote(err)) => assert_eq!(err.code, ErrorCode::HandlerFailed),
        other => panic!("unexpected result: {other:?}"),
    }

    let shallow = proxy.invoke("tree", vec![json!(3)]).await.unwrap();
    assert_eq!(shallow, json!([[0]]));
}

#[tokio::test]
async fn test_dropping_last_handle_closes_peer() {
    init_tracing();

    let (main, ext) = memory_pair();
    let status_bar = identifier(Side::Main, well_known::STATUS_BAR);
    main.set(
        &status_bar,
        MethodRouter::new().method("hang", |_args, cx| async move {
            cx.cancelled().await;
            respond(())
        }),
    )
    .unwrap();

    let call = ext.get_proxy(&status_bar).unwrap().invoke("hang", Vec::new());
    wait_until(|| main.in_progress_count() == 1).await;

    // A clone keeps the channel open
    let clone = main.clone();
    drop(main);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!ext.is_closed());
    assert!(!clone.is_closed());

    drop(clone);

    let result = timeout(Duration::from_secs(1), call)
        .await
        .expect("pending call survived the dropped peer");
    assert!(matches!(result, Err(Error::Disconnected)));
    timeout(Duration::from_secs(1), ext.closed())
        .await
        .expect("peer did not observe the dropped handle");
    assert_eq!(ext.pending_count(), 0);
}

#[tokio::test]
async fn test_oversized_request_rejects_with_transport_error() {
    init_tracing();

    let (main, ext) = memory_pair_limited(512);
    let commands = identifier(Side::Ext, well_known::COMMANDS);
    ext.set(&commands, echo_service()).unwrap();
    let proxy = main.get_proxy(&commands).unwrap();

    let large = vec![json!("x".repeat(4096))];
    let result = timeout(Duration::from_secs(1), proxy.invoke("echo", large))
        .await
        .expect("refused request left unsettled");
    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::FrameTooLarge { max: 512, .. }))
    ));
    assert_eq!(main.pending_count(), 0);

    // The refusal does not close the channel
    let echoed: String = proxy.call("echo", ("small",)).await.unwrap();
    assert_eq!(echoed, "small");
    assert!(!main.is_closed());
}

#[tokio::test]
async fn test_oversized_reply_becomes_handler_failed() {
    init_tracing();

    let (main, ext) = memory_pair_limited(512);
    let documents = identifier(Side::Ext, well_known::DOCUMENTS);
    ext.set(
        &documents,
        MethodRouter::new().method("content", |args, _cx| async move {
            let len: usize = arg(&args, 0)?;
            respond("x".repeat(len))
        }),
    )
    .unwrap();
    let proxy = main.get_proxy(&documents).unwrap();

    let result = timeout(Duration::from_secs(1), proxy.call::<String>("content", (4096,)))
        .await
        .expect("refused reply left the call unsettled");
    match result {
        Err(Error::Remote(err)) => {
            assert_eq!(err.code, ErrorCode::HandlerFailed);
            assert!(err.message.contains("could not be delivered"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let small: String = proxy.call("content", (4,)).await.unwrap();
    assert_eq!(small, "xxxx");
    assert!(!main.is_closed());
    assert!(!ext.is_closed());
}
