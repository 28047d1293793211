// Verify the wire format the broker, daemon and client rely on.
// Old clients talk to new brokers; these shapes must not drift.

use quickterm_core::CommandConfiguration;
use quickterm_protocol::frames::{EventFrame, InboundFrame, ReqFrame, ResFrame};
use quickterm_protocol::messages::{
    CommandParams, EvictedNotice, ExecutorHello, QueueReply, RegisterParams,
};
use quickterm_protocol::methods::{COMMAND_QUEUE, EVENT_EXECUTOR_EVICTED, EXECUTOR_REGISTER};

#[test]
fn register_request_parses() {
    let json = r#"{"type":"req","id":"r-1","method":"executor.register","params":{"endpoint":"/run/qt/executor.sock"}}"#;
    let frame: InboundFrame = serde_json::from_str(json).unwrap();
    let req = frame.as_req().unwrap();

    assert_eq!(req.method, EXECUTOR_REGISTER);
    let params: RegisterParams = req.params_as().unwrap();
    assert_eq!(params.endpoint, "/run/qt/executor.sock");
}

#[test]
fn queue_request_carries_full_configuration() {
    let cfg = CommandConfiguration::new("/home/me", "make test")
        .with_shell("zsh")
        .with_timeout(30.0)
        .with_keep(true);
    let req = ReqFrame::new(COMMAND_QUEUE, CommandParams { configuration: cfg.clone() });
    let json = serde_json::to_string(&req).unwrap();

    assert!(json.contains(r#""type":"req""#));
    assert!(json.contains(r#""method":"command.queue""#));
    assert!(json.contains(r#""workingDirectory":"/home/me""#));
    assert!(json.contains(r#""command":"make test""#));

    let frame: InboundFrame = serde_json::from_str(&json).unwrap();
    let params: CommandParams = frame.as_req().unwrap().params_as().unwrap();
    assert_eq!(params.configuration, cfg);
}

#[test]
fn request_without_params_omits_field() {
    let req = ReqFrame::new("ping", ());
    let json = serde_json::to_string(&req).unwrap();
    assert!(!json.contains(r#""params""#));
}

#[test]
fn queue_reply_false_is_still_ok_frame() {
    let res = ResFrame::ok("r-2", QueueReply { queued: false });
    let json = serde_json::to_string(&res).unwrap();

    assert!(json.contains(r#""ok":true"#));
    assert!(json.contains(r#""queued":false"#));
    assert!(!json.contains(r#""error""#));
}

#[test]
fn res_err_serialization() {
    let res = ResFrame::err("r-3", "EXECUTOR_REJECTED", "no hello");
    let json = serde_json::to_string(&res).unwrap();

    assert!(json.contains(r#""ok":false"#));
    assert!(json.contains(r#""EXECUTOR_REJECTED""#));
    assert!(!json.contains(r#""payload""#));
}

#[test]
fn evicted_event_round_trips() {
    let ev = EventFrame::new(
        EVENT_EXECUTOR_EVICTED,
        EvictedNotice { replaced_by: "/tmp/b.sock".into() },
    );
    let json = serde_json::to_string(&ev).unwrap();
    assert!(json.contains(r#""type":"event""#));
    assert!(json.contains(r#""event":"executor.evicted""#));

    let frame: InboundFrame = serde_json::from_str(&json).unwrap();
    assert!(frame.as_req().is_none());
    let ev = frame.as_event().unwrap();
    let notice: EvictedNotice = serde_json::from_value(ev.payload.unwrap()).unwrap();
    assert_eq!(notice.replaced_by, "/tmp/b.sock");
}

#[test]
fn executor_hello_compatibility() {
    assert!(ExecutorHello::current().is_compatible());

    let json = r#"{"role":"presenter","protocol":1}"#;
    let hello: ExecutorHello = serde_json::from_str(json).unwrap();
    assert!(!hello.is_compatible());

    let json = r#"{"role":"executor","protocol":99}"#;
    let hello: ExecutorHello = serde_json::from_str(json).unwrap();
    assert!(!hello.is_compatible());
}

#[test]
fn inbound_frame_rejects_wrong_kind() {
    let json = r#"{"type":"res","id":"x","ok":true}"#;
    let frame: InboundFrame = serde_json::from_str(json).unwrap();
    assert!(frame.as_req().is_none());
    assert!(frame.as_event().is_none());
    assert!(frame.as_res().unwrap().ok);
}

#[test]
fn hello_params_identify_the_broker() {
    use quickterm_protocol::messages::HelloParams;
    use quickterm_protocol::methods::EXECUTOR_HELLO;

    let req = ReqFrame::new(EXECUTOR_HELLO, HelloParams::broker());
    let json = serde_json::to_string(&req).unwrap();
    assert!(json.contains(r#""params":{"peer":"broker"}"#));

    let frame: InboundFrame = serde_json::from_str(&json).unwrap();
    let params: HelloParams = frame.as_req().unwrap().params_as().unwrap();
    assert!(params.is_broker());
    assert!(!HelloParams::client().is_broker());
}
