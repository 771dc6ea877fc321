//! End-to-end session tests over the in-process transport

use async_trait::async_trait;
use cellhost_core::wire::{
    CellOp, DefEntry, Login, MsgKind, PinRequest, PinState, PinStatus, RegisterDefs, TxMsg, Uid,
};
use cellhost_core::{
    App, AppInstance, Host, HostConfig, HostError, HostSession, InProcTransport, PinContext, PinPhase, Result,
    TextVal, Transport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TICKER: u64 = 11;
const HOLD: u64 = 12;
const GATE: u64 = 13;

/// Streams `text:value` upserts until the pin closes
struct Ticker {
    value_attr: u32,
}

#[async_trait]
impl AppInstance for Ticker {
    async fn pin_cell(&self, pin: PinContext) -> Result<()> {
        let attr = self.value_attr;
        tokio::spawn(async move {
            let mut n = 0;
            loop {
                let mut tx = pin.new_tx();
                let val = TextVal(format!("tick {n}"));
                pin.marshal_cell_op(&mut tx, CellOp::upsert(pin.cell(), attr), Some(&val));
                if pin.push_tx(&tx).await.is_err() {
                    break;
                }
                n += 1;
                tokio::select! {
                    _ = pin.closing() => break,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
            }
        });
        Ok(())
    }
}

/// Accepts pins and sends nothing
struct Hold {
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl AppInstance for Hold {
    async fn pin_cell(&self, _pin: PinContext) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Refuses every pin
struct Gate;

#[async_trait]
impl AppInstance for Gate {
    async fn pin_cell(&self, pin: PinContext) -> Result<()> {
        Err(HostError::PinDenied(format!("{} is private", pin.cell())))
    }
}

struct Harness {
    host: Arc<Host>,
    session: HostSession,
    client: InProcTransport,
    created: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

fn harness() -> Harness {
    // Nothing drains the client side in most tests, so keep back-pressure short
    let config = HostConfig::default().with_push_timeout(Duration::from_millis(300));
    let host = Host::new(config).unwrap();
    let created = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicBool::new(false));

    host.registry()
        .register_app(
            App::from_fn(TICKER, "ticker", |ctx| {
                let value_attr = ctx.resolve_attr("text:value")?.id;
                Ok(Arc::new(Ticker { value_attr }) as Arc<dyn AppInstance>)
            })
            .with_invocation("app://ticker")
            .with_attr("text:value"),
        )
        .unwrap();

    let (count, flag) = (created.clone(), stopped.clone());
    host.registry()
        .register_app(
            App::from_fn(HOLD, "hold", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Hold { stopped: flag.clone() }) as Arc<dyn AppInstance>)
            })
            .with_invocation("app://hold"),
        )
        .unwrap();

    host.registry()
        .register_app(App::from_fn(GATE, "gate", |_| Ok(Arc::new(Gate) as Arc<dyn AppInstance>)).with_invocation("app://gate"))
        .unwrap();

    let (host_side, client) = InProcTransport::pair(16);
    let session = host.start_new_session(Arc::new(host_side)).unwrap();
    Harness {
        host,
        session,
        client,
        created,
        stopped,
    }
}

fn pin_request(req_id: u64, invocation: &str) -> TxMsg {
    let req = PinRequest {
        invocation: invocation.to_string(),
        ..PinRequest::default()
    };
    TxMsg::json(req_id, MsgKind::PinRequest, &req).unwrap()
}

/// Next message from the host matching `kind` and `req_id`
async fn next_msg(client: &InProcTransport, kind: MsgKind, req_id: u64) -> TxMsg {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let msg = client.recv_tx().await.unwrap();
            if msg.kind == kind && msg.req_id == req_id {
                return msg;
            }
        }
    })
    .await
    .expect("timed out waiting for host message")
}

async fn next_msg_of_kind(client: &InProcTransport, kind: MsgKind) -> TxMsg {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let msg = client.recv_tx().await.unwrap();
            if msg.kind == kind {
                return msg;
            }
        }
    })
    .await
    .expect("timed out waiting for host message")
}

async fn pin_directly(session: &HostSession, req_id: u64, invocation: &str) -> Result<PinContext> {
    let req = PinRequest {
        invocation: invocation.to_string(),
        ..PinRequest::default()
    };
    let params = session.new_pin_request(req_id, req)?;
    session.pin_cell(params).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pin_streams_translated_ops() {
    let h = harness();
    let defs = RegisterDefs {
        attrs: vec![DefEntry::new(40, "text:value")],
        ..RegisterDefs::default()
    };
    h.client
        .send_tx(&TxMsg::json(0, MsgKind::RegisterDefs, &defs).unwrap())
        .await
        .unwrap();
    h.client.send_tx(&pin_request(7, "app://ticker/a")).await.unwrap();

    let msg = next_msg(&h.client, MsgKind::CellOps, 7).await;
    let ops = msg.cell_ops().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].attr, 40);
    assert!(String::from_utf8_lossy(&ops[0].value).starts_with("tick "));

    h.session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unpin_reports_closed() {
    let h = harness();
    h.client.send_tx(&pin_request(7, "app://hold")).await.unwrap();

    // Wait for the pin to exist before unpinning it
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.session.pin(7).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    h.client.send_tx(&TxMsg::new(7, MsgKind::Unpin)).await.unwrap();
    let status: PinStatus = next_msg(&h.client, MsgKind::PinStatus, 7).await.decode_json().unwrap();
    assert_eq!(status.state, PinState::Closed);
    assert_eq!(h.session.open_pins(), 0);

    h.session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refused_pins_report_status() {
    let h = harness();
    h.client.send_tx(&pin_request(9, "app://gate/secret")).await.unwrap();
    h.client.send_tx(&pin_request(10, "app://video")).await.unwrap();

    // The two requests are served concurrently, so replies may come in either order
    let mut statuses = HashMap::new();
    while statuses.len() < 2 {
        let msg = next_msg_of_kind(&h.client, MsgKind::PinStatus).await;
        let status: PinStatus = msg.decode_json().unwrap();
        statuses.insert(msg.req_id, status.state);
    }
    assert_eq!(statuses[&9], PinState::Denied);
    assert_eq!(statuses[&10], PinState::Failed);
    assert!(h.session.scope().is_active());

    h.session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pin_cell_errors() {
    let h = harness();

    let err = pin_directly(&h.session, 1, "app://video").await.unwrap_err();
    assert!(matches!(err, HostError::AppNotFound(_)));

    let err = pin_directly(&h.session, 2, "app://gate").await.unwrap_err();
    assert!(matches!(err, HostError::PinDenied(_)));

    let err = pin_directly(&h.session, 0, "app://hold").await.unwrap_err();
    assert!(matches!(err, HostError::InvalidRequest(_)));

    pin_directly(&h.session, 3, "app://hold").await.unwrap();
    let err = pin_directly(&h.session, 3, "app://hold").await.unwrap_err();
    assert!(matches!(err, HostError::InvalidRequest(_)));

    assert_eq!(h.session.open_pins(), 1);
    h.session.close().await;

    let err = pin_directly(&h.session, 4, "app://hold").await.unwrap_err();
    assert!(matches!(err, HostError::AlreadyClosing));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_get_app_instance_creates_once() {
    let h = harness();

    let callers: Vec<_> = (0..16)
        .map(|_| {
            let session = h.session.clone();
            tokio::spawn(async move { session.get_app_instance(Uid(HOLD), true).await })
        })
        .collect();
    for caller in callers {
        caller.await.unwrap().unwrap();
    }
    assert_eq!(h.created.load(Ordering::SeqCst), 1);

    // Without auto-create a missing instance is an error, not a start
    assert!(matches!(
        h.session.get_app_instance(Uid(TICKER), false).await,
        Err(HostError::AppNotFound(_))
    ));

    h.session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_close_closes_every_pin_first() {
    let h = harness();
    let mut pins = Vec::new();
    for req_id in 1..=5 {
        pins.push(pin_directly(&h.session, req_id, "app://hold").await.unwrap());
    }
    pins.push(pin_directly(&h.session, 6, "app://ticker/x").await.unwrap());
    assert!(pins.iter().all(|p| p.state() == PinPhase::Active));

    h.session.close().await;

    assert!(pins.iter().all(|p| p.state() == PinPhase::Closed));
    assert_eq!(h.session.open_pins(), 0);
    assert!(h.stopped.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_app_closes_its_pins_only() {
    let h = harness();
    let held = pin_directly(&h.session, 1, "app://hold").await.unwrap();
    let ticking = pin_directly(&h.session, 2, "app://ticker").await.unwrap();

    h.session.stop_app(Uid(HOLD)).await.unwrap();

    assert_eq!(held.state(), PinPhase::Closed);
    assert_eq!(ticking.state(), PinPhase::Active);
    assert!(h.stopped.load(Ordering::SeqCst));
    assert!(h.session.stop_app(Uid(HOLD)).await.is_err());

    h.session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_login_is_recorded() {
    let h = harness();
    let login = Login {
        user: "ada".to_string(),
        device: "laptop".to_string(),
        token: None,
    };
    h.client
        .send_tx(&TxMsg::json(0, MsgKind::Login, &login).unwrap())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.session.login_info().user != "ada" {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(h.session.login_info().device, "laptop");

    h.session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conflicting_defs_reported_on_session_meta() {
    let h = harness();
    let first = RegisterDefs {
        attrs: vec![DefEntry::new(40, "text:value")],
        ..RegisterDefs::default()
    };
    let second = RegisterDefs {
        attrs: vec![DefEntry::new(40, "text:other")],
        ..RegisterDefs::default()
    };
    for defs in [&first, &second] {
        h.client
            .send_tx(&TxMsg::json(0, MsgKind::RegisterDefs, defs).unwrap())
            .await
            .unwrap();
    }

    let status: PinStatus = next_msg(&h.client, MsgKind::SessionMeta, 0).await.decode_json().unwrap();
    assert_eq!(status.state, PinState::Failed);
    assert_eq!(h.session.registry().client_symbols().name_of(40).as_deref(), Some("text:value"));

    h.session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_hangup_closes_session() {
    let h = harness();
    pin_directly(&h.session, 1, "app://hold").await.unwrap();
    h.client.close().await;

    tokio::time::timeout(Duration::from_secs(2), h.session.closed())
        .await
        .unwrap();
    assert_eq!(h.session.open_pins(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_host_shutdown_closes_sessions() {
    let h = harness();
    let (second_side, _second_client) = InProcTransport::pair(4);
    let second = h.host.start_new_session(Arc::new(second_side)).unwrap();
    assert_eq!(h.host.session_count(), 2);

    pin_directly(&second, 1, "app://hold").await.unwrap();
    h.host.shutdown().await;

    assert_eq!(h.host.session_count(), 0);
    assert!(second.is_closing());
    assert!(h.session.is_closing());
    assert!(!h.host.scope().is_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_control_overtakes_queued_pin_traffic() {
    let host = Host::new(HostConfig::default()).unwrap();
    // A two-slot transport the client does not read, so egress stalls
    let (host_side, client) = InProcTransport::pair(2);
    let session = host.start_new_session(Arc::new(host_side)).unwrap();

    for n in 0..10u8 {
        let mut tx = TxMsg::new(5, MsgKind::CellOps);
        tx.data.push(n);
        session.send_tx(&tx).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.send_tx(&TxMsg::new(0, MsgKind::SessionMeta)).await.unwrap();

    let mut order = Vec::new();
    for _ in 0..11 {
        let msg = tokio::time::timeout(Duration::from_secs(2), client.recv_tx())
            .await
            .unwrap()
            .unwrap();
        order.push(msg);
    }

    // Only what was already in the transport or in flight precedes control
    let control_at = order.iter().position(|m| m.is_control()).unwrap();
    assert_eq!(order[control_at].kind, MsgKind::SessionMeta);
    assert!(control_at <= 3, "control message arrived at position {control_at}");

    let data: Vec<u8> = order
        .iter()
        .filter(|m| !m.is_control())
        .map(|m| m.data[0])
        .collect();
    assert_eq!(data, (0..10).collect::<Vec<u8>>());

    session.close().await;
    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_app_waits_for_starting_instance() {
    const SLOW: u64 = 14;
    let h = harness();
    let created = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicBool::new(false));

    let (count, flag) = (created.clone(), stopped.clone());
    h.host
        .registry()
        .register_app(
            App::from_fn(SLOW, "slow", move |_| {
                std::thread::sleep(Duration::from_millis(150));
                count.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Hold { stopped: flag.clone() }) as Arc<dyn AppInstance>)
            })
            .with_invocation("app://slow"),
        )
        .unwrap();

    let starting = {
        let session = h.session.clone();
        tokio::spawn(async move { session.get_app_instance(Uid(SLOW), true).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    h.session.stop_app(Uid(SLOW)).await.unwrap();
    assert!(stopped.load(Ordering::SeqCst));

    let running = starting.await.unwrap().unwrap();
    assert!(!running.ctx.scope().is_active());
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(matches!(
        h.session.get_app_instance(Uid(SLOW), false).await,
        Err(HostError::AppNotFound(_))
    ));

    h.session.close().await;
}
