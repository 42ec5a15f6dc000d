//! Connection behaviour against a stub node: correlation, close semantics,
//! subscriptions, and the heartbeat.

mod common;

use std::time::Duration;

use futures::future::join_all;
use graphene_client::{
    ApiError, CloseReason, ConnectOptions, Connection, ConnectionEvent, ConnectionState, Listener,
    ServiceId,
};
use serde_json::json;
use tokio::time::timeout;

use common::{Action, StubNode};

const DATABASE: u64 = 2;

fn options() -> ConnectOptions {
    ConnectOptions::default().with_connect_timeout(Duration::from_secs(2))
}

async fn next_event(
    events: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>,
) -> ConnectionEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no lifecycle event")
        .expect("event channel closed")
}

#[tokio::test]
async fn replies_reach_callers_when_answered_out_of_order() {
    let node = StubNode::start_with(|call| {
        (call.method == "get_block").then(|| Action::Hold(json!(format!("block-{}", call.args[0]))))
    })
    .await;
    let conn = Connection::connect(&node.endpoint(), options()).await.unwrap();

    let calls = (0..6).map(|height| {
        let conn = conn.clone();
        async move {
            conn.call(ServiceId::Numeric(DATABASE), "get_block", vec![json!(height)], None)
                .await
        }
    });
    let pending = tokio::spawn(join_all(calls));

    node.wait_for_calls("get_block", 6).await;
    node.release_held();

    let replies = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
    for (height, reply) in replies.into_iter().enumerate() {
        assert_eq!(reply.unwrap(), json!(format!("block-{}", height)));
    }
}

#[tokio::test]
async fn remote_error_affects_only_its_call() {
    let node = StubNode::start_with(|call| {
        (call.method == "get_account_by_name").then(|| Action::Fail("Assert Exception".into()))
    })
    .await;
    let conn = Connection::connect(&node.endpoint(), options()).await.unwrap();

    let (bad, good) = tokio::join!(
        conn.call(DATABASE.into(), "get_account_by_name", vec![json!("nobody")], None),
        conn.call(DATABASE.into(), "get_chain_id", vec![], None),
    );

    match bad {
        Err(ApiError::Protocol(err)) => assert_eq!(err.message, "Assert Exception"),
        other => panic!("expected remote error, got {:?}", other),
    }
    assert_eq!(good.unwrap(), json!(common::CHAIN_ID));
    assert!(conn.is_open());
}

#[tokio::test]
async fn calls_are_addressed_as_given() {
    let node = StubNode::start().await;
    let conn = Connection::connect(&node.endpoint(), options()).await.unwrap();

    conn.call(ServiceId::from("database"), "get_chain_id", vec![], None)
        .await
        .unwrap();
    conn.call(ServiceId::Numeric(DATABASE), "get_chain_id", vec![], None)
        .await
        .unwrap();

    let seen: Vec<_> = node.calls_to("get_chain_id").into_iter().map(|c| (c.id, c.api)).collect();
    assert_eq!(seen, vec![(1, json!("database")), (2, json!(2))]);
}

#[tokio::test]
async fn close_rejects_every_outstanding_call_once() {
    let node =
        StubNode::start_with(|call| (call.method == "get_block").then_some(Action::Ignore)).await;
    let conn = Connection::connect(&node.endpoint(), options()).await.unwrap();
    let mut events = conn.events();

    let outstanding: Vec<_> = (0..5)
        .map(|height| {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.call(DATABASE.into(), "get_block", vec![json!(height)], None).await
            })
        })
        .collect();
    node.wait_for_calls("get_block", 5).await;

    conn.close().await;
    assert_eq!(conn.state(), ConnectionState::Closed);

    for handle in outstanding {
        assert_eq!(handle.await.unwrap(), Err(ApiError::ConnectionClosed));
    }
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Closed(CloseReason::Requested));

    // Second close is a no-op and emits nothing.
    timeout(Duration::from_secs(1), conn.close()).await.unwrap();
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn calls_after_close_are_not_sent() {
    let node = StubNode::start().await;
    let conn = Connection::connect(&node.endpoint(), options()).await.unwrap();
    conn.close().await;

    let err = conn.call(DATABASE.into(), "get_chain_id", vec![], None).await.unwrap_err();
    assert_eq!(err, ApiError::NotConnected);
    assert!(node.calls_to("get_chain_id").is_empty());
}

#[tokio::test]
async fn subscription_receives_notices_until_unsubscribed() {
    let node = StubNode::start().await;
    let conn = Connection::connect(&node.endpoint(), options()).await.unwrap();
    let (listener, mut notices) = Listener::channel();

    conn.call(
        DATABASE.into(),
        "subscribe_to_market",
        vec![json!("1.3.0"), json!("1.3.121")],
        Some(listener.clone()),
    )
    .await
    .unwrap();

    let subscribe = &node.calls_to("subscribe_to_market")[0];
    assert_eq!(subscribe.args, vec![json!(subscribe.id), json!("1.3.0"), json!("1.3.121")]);

    for n in 0..3 {
        node.push_notice(subscribe.id, json!([{ "fill": n }]));
    }
    for n in 0..3 {
        let payload = timeout(Duration::from_secs(2), notices.recv()).await.unwrap().unwrap();
        assert_eq!(payload, json!([{ "fill": n }]));
    }

    conn.call(
        DATABASE.into(),
        "unsubscribe_from_market",
        vec![json!("1.3.0"), json!("1.3.121")],
        Some(listener),
    )
    .await
    .unwrap();

    node.push_notice(subscribe.id, json!([{ "fill": "late" }]));
    // The retired listener is dropped, so the channel may close; it must
    // never carry the late payload.
    let late = timeout(Duration::from_millis(200), notices.recv()).await;
    assert!(!matches!(late, Ok(Some(_))), "late notice delivered: {:?}", late);
}

#[tokio::test]
async fn unsubscribe_with_foreign_listener_is_a_usage_error() {
    let node = StubNode::start().await;
    let conn = Connection::connect(&node.endpoint(), options()).await.unwrap();
    let (listener, mut notices) = Listener::channel();
    conn.call(DATABASE.into(), "set_block_applied_callback", vec![], Some(listener))
        .await
        .unwrap();
    let subscription_id = node.calls_to("set_block_applied_callback")[0].id;

    let (stranger, _ignored) = Listener::channel();
    let err = conn
        .call(DATABASE.into(), "unsubscribe_from_market", vec![], Some(stranger))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Usage(_)));
    assert!(node.calls_to("unsubscribe_from_market").is_empty());

    node.push_notice(subscription_id, json!(["still here"]));
    let payload = timeout(Duration::from_secs(2), notices.recv()).await.unwrap().unwrap();
    assert_eq!(payload, json!(["still here"]));
}

#[tokio::test]
async fn silent_node_is_force_closed() {
    let node = StubNode::start_with(|_| Some(Action::Ignore)).await;
    let options = options().with_heartbeat(Duration::from_millis(40), 2, 4);
    let conn = Connection::connect(&node.endpoint(), options).await.unwrap();
    let mut events = conn.events();

    let waiting = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.call(DATABASE.into(), "get_block", vec![json!(1)], None).await
        })
    };

    assert_eq!(
        timeout(Duration::from_secs(5), waiting).await.unwrap().unwrap(),
        Err(ApiError::ConnectionClosed)
    );
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Closed(CloseReason::DeadConnection)
    );
    assert_eq!(conn.state(), ConnectionState::Closed);

    let probe = &node.calls_to("get_objects")[0];
    assert_eq!(probe.api, json!("database"));
    assert_eq!(probe.args, vec![json!(["2.1.0"])]);
}

#[tokio::test]
async fn keepalive_probes_hold_an_idle_link_open() {
    let node = StubNode::start().await;
    let options = options().with_heartbeat(Duration::from_millis(40), 2, 4);
    let conn = Connection::connect(&node.endpoint(), options).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(conn.is_open());
    assert!(node.calls_to("get_objects").len() >= 2);
    conn.close().await;
}

#[tokio::test]
async fn remote_hangup_closes_without_reconnect() {
    let node = StubNode::start().await;
    let conn = Connection::connect(&node.endpoint(), options()).await.unwrap();
    let mut events = conn.events();

    node.hangup();

    loop {
        match next_event(&mut events).await {
            ConnectionEvent::Error(_) => continue,
            ConnectionEvent::Closed(reason) => {
                assert!(matches!(reason, CloseReason::Remote | CloseReason::Transport(_)));
                break;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(node.connections(), 1);
}

#[tokio::test]
async fn dropped_socket_is_replaced_once_when_reconnect_is_enabled() {
    let node = StubNode::start().await;
    let conn = Connection::connect(&node.endpoint(), options().with_auto_reconnect(true))
        .await
        .unwrap();
    let mut events = conn.events();

    node.hangup();

    loop {
        match next_event(&mut events).await {
            ConnectionEvent::Error(_) => continue,
            ConnectionEvent::Reconnected => break,
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(conn.is_open());
    assert_eq!(node.connections(), 2);

    let reply = conn.call(DATABASE.into(), "get_chain_id", vec![], None).await.unwrap();
    assert_eq!(reply, json!(common::CHAIN_ID));
}

#[tokio::test]
async fn refused_connection_is_reported() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = Connection::connect(&format!("ws://{}/", addr), options()).await.unwrap_err();
    assert!(matches!(err, ApiError::ConnectFailed { .. }), "{:?}", err);
}

#[tokio::test]
async fn unresponsive_handshake_times_out() {
    // Accepts TCP (via the backlog) but never speaks WebSocket.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let options = options().with_connect_timeout(Duration::from_millis(200));
    let err = Connection::connect(&format!("ws://{}/", addr), options).await.unwrap_err();
    assert_eq!(
        err,
        ApiError::ConnectTimeout {
            endpoint: format!("ws://{}/", addr),
            timeout_ms: 200
        }
    );
    drop(listener);
}
