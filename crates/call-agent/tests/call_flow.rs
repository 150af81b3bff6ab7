//! Line state machine scenarios driven from the gateway side

mod common;

use common::*;

use mgcp_call_agent::registry::MAX_EXTENSION_LEN;
use mgcp_call_agent::{
    AgentError, CallEvent, CallRequestOutcome, CallerId, ConnectionMode, HangupCause, HookState,
    LegState,
};

#[tokio::test]
async fn test_line_originated_call() {
    let mut h = Harness::new().await;

    h.notify("L/hd");
    let sent = h.take_sent();
    assert_eq!(responses(&sent)[0].verb, "200");

    let crcx = requests_with_verb(&sent, "CRCX");
    assert_eq!(crcx.len(), 1);
    assert_eq!(crcx[0].header("M"), "recvonly");
    assert!(crcx[0].header("L").starts_with("p:20, a:PCMU"));
    assert!(!crcx[0].header("C").is_empty());
    assert_eq!(crcx[0].sdp('c'), "IN IP4 10.0.0.1");

    let rqnt = requests_with_verb(&sent, "RQNT");
    assert_eq!(rqnt.len(), 1);
    assert_eq!(rqnt[0].header("S"), "L/dl");
    assert_eq!(rqnt[0].header("R"), "L/hu(N),L/hf(N),D/[0-9#*](N)");

    let leg = match h.drain_events().as_slice() {
        [CallEvent::NewChannel {
            leg,
            endpoint,
            context,
            state,
            caller,
        }] => {
            assert_eq!(endpoint, LINE);
            assert_eq!(context, "local");
            assert_eq!(*state, LegState::Down);
            assert_eq!(caller, &CallerId::new("5551000", "Alice"));
            *leg
        }
        other => panic!("unexpected events {:?}", other),
    };

    // The connection answer starts media towards the gateway
    h.respond(crcx[0], 200);
    let acks = h.take_sent();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].verb, "000");
    assert_eq!(acks[0].identifier, crcx[0].identifier);
    {
        let started = h.media.started.lock();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].0, leg);
        assert_eq!(started[0].1, "10.0.0.5:4000".parse::<std::net::SocketAddr>().unwrap());
    }
    h.respond(rqnt[0], 200);

    for digit in ["D/1", "D/0", "D/0"] {
        h.notify(digit);
        h.answer_all();
    }
    let events = h.drain_events();
    assert!(events.contains(&CallEvent::StartPbx {
        leg,
        context: "local".to_string(),
        exten: "100".to_string(),
        caller: CallerId::new("5551000", "Alice"),
    }));

    h.notify("L/hu");
    assert_eq!(
        h.drain_events(),
        vec![CallEvent::Hangup {
            leg,
            cause: HangupCause::OnHook
        }]
    );

    h.agent.hangup(leg).unwrap();
    let released = h.answer_all();
    let dlcx = requests_with_verb(&released, "DLCX");
    assert_eq!(dlcx.len(), 1);
    assert_eq!(dlcx[0].header("I"), "CX1");
    assert!(requests_with_verb(&released, "RQNT")
        .iter()
        .any(|r| r.header("S") == "L/vmwi(-)"));
    assert_eq!(h.media.released.lock().as_slice(), &[leg]);

    assert!(matches!(h.agent.hangup(leg), Err(AgentError::LegNotFound(_))));
    let gateways = h.agent.list_gateways();
    let summary = &gateways[0].endpoints[0];
    assert_eq!(summary.hookstate, HookState::OnHook);
    assert!(summary.subchannels.iter().all(|s| s.owner.is_none()));
}

#[tokio::test]
async fn test_incoming_call_rings_and_is_answered() {
    let mut h = Harness::new().await;

    let leg = match h
        .agent
        .request_call(LINE, CallerId::new("5552000", "Bob"))
        .unwrap()
    {
        CallRequestOutcome::Placed(leg) => leg,
        other => panic!("unexpected outcome {:?}", other),
    };

    let sent = h.take_sent();
    let crcx = requests_with_verb(&sent, "CRCX");
    assert_eq!(crcx[0].header("M"), "recvonly");
    let rqnt = requests_with_verb(&sent, "RQNT");
    let signal = rqnt[0].header("S");
    assert!(signal.starts_with("L/rg,L/ci("), "{}", signal);
    assert!(signal.ends_with(",5552000,Bob)"), "{}", signal);
    assert_eq!(rqnt[0].header("R"), "L/hd(N)");

    h.respond(crcx[0], 200);
    assert_eq!(h.drain_events(), vec![CallEvent::Ringing { leg }]);
    h.answer_all();

    h.notify("L/hd");
    let sent = h.take_sent();
    let mdcx = requests_with_verb(&sent, "MDCX");
    assert_eq!(mdcx.len(), 1);
    assert_eq!(mdcx[0].header("M"), "sendrecv");
    assert_eq!(mdcx[0].header("I"), "CX1");
    assert!(h.drain_events().contains(&CallEvent::Answer { leg }));

    let gateways = h.agent.list_gateways();
    let summary = &gateways[0].endpoints[0];
    assert_eq!(summary.hookstate, HookState::OffHook);
    assert_eq!(summary.subchannels[0].owner, Some(leg));
    assert_eq!(summary.subchannels[0].mode, ConnectionMode::SendRecv);
}

#[tokio::test]
async fn test_answer_before_connection_ack() {
    let mut h = Harness::new().await;

    let leg = match h
        .agent
        .request_call(LINE, CallerId::new("5552000", "Bob"))
        .unwrap()
    {
        CallRequestOutcome::Placed(leg) => leg,
        other => panic!("unexpected outcome {:?}", other),
    };
    let sent = h.take_sent();
    let crcx = requests_with_verb(&sent, "CRCX");
    h.respond(requests_with_verb(&sent, "RQNT")[0], 200);

    // Picked up while the gateway has not confirmed the connection yet
    h.notify("L/hd");
    let before = h.take_sent();
    assert_eq!(verbs(&before), vec!["200", "RQNT"]);
    assert!(h.drain_events().contains(&CallEvent::Answer { leg }));

    h.respond(crcx[0], 200);
    let after = h.take_sent();
    let mdcx = requests_with_verb(&after, "MDCX");
    assert_eq!(mdcx.len(), 1);
    assert_eq!(mdcx[0].header("M"), "sendrecv");
    assert_eq!(mdcx[0].header("I"), "CX1");

    h.respond(mdcx[0], 200);
    assert!(requests_with_verb(&h.answer_all(), "MDCX").is_empty());
    let gateways = h.agent.list_gateways();
    assert_eq!(gateways[0].endpoints[0].subchannels[0].mode, ConnectionMode::SendRecv);
}

#[tokio::test]
async fn test_answer_while_dialing_is_rejected() {
    let mut h = Harness::new().await;
    let leg = h.go_off_hook();

    assert!(matches!(h.agent.answer(leg), Err(AgentError::InvalidState(_))));
    assert!(h.take_sent().is_empty());

    for digit in ["D/1", "D/0", "D/0"] {
        h.notify(digit);
        h.answer_all();
    }
    h.drain_events();

    h.agent.answer(leg).unwrap();
    let sent = h.take_sent();
    assert_eq!(requests_with_verb(&sent, "MDCX")[0].header("M"), "sendrecv");
}

#[tokio::test]
async fn test_digits_while_ringing_are_bounded() {
    let mut h = Harness::new().await;
    h.agent
        .request_call(LINE, CallerId::new("5552000", "Bob"))
        .unwrap();
    h.answer_all();

    for _ in 0..MAX_EXTENSION_LEN + 20 {
        h.notify("D/5");
    }
    h.answer_all();
    let gateways = h.agent.list_gateways();
    assert_eq!(gateways[0].endpoints[0].digits.len(), MAX_EXTENSION_LEN);

    // Going off hook starts from an empty buffer
    h.notify("L/hd");
    let gateways = h.agent.list_gateways();
    assert!(gateways[0].endpoints[0].digits.is_empty());
}

/// Answer an incoming call on the line and return its leg
fn answered_call(h: &mut Harness, number: &str) -> mgcp_call_agent::CallLegId {
    let leg = match h.agent.request_call(LINE, CallerId::new(number, "Caller")).unwrap() {
        CallRequestOutcome::Placed(leg) => leg,
        other => panic!("unexpected outcome {:?}", other),
    };
    h.answer_all();
    h.notify("L/hd");
    h.answer_all();
    h.drain_events();
    leg
}

#[tokio::test]
async fn test_call_waiting_and_flip_flop() {
    let mut h = Harness::new().await;
    let first = answered_call(&mut h, "5552000");

    let second = match h
        .agent
        .request_call(LINE, CallerId::new("5553000", "Carol"))
        .unwrap()
    {
        CallRequestOutcome::Placed(leg) => leg,
        other => panic!("unexpected outcome {:?}", other),
    };

    let sent = h.answer_all();
    let mdcx_modes: Vec<&str> = requests_with_verb(&sent, "MDCX")
        .iter()
        .map(|m| m.header("M"))
        .collect();
    assert_eq!(mdcx_modes, vec!["recvonly", "sendrecv"]);
    let rqnt = requests_with_verb(&sent, "RQNT");
    assert!(rqnt.iter().any(|r| r.header("S").starts_with("L/wt,L/ci(")));
    assert_eq!(requests_with_verb(&sent, "CRCX").len(), 1);

    // Both subchannels are taken
    let third = h.agent.request_call(LINE, CallerId::new("5554000", "Dave"));
    assert!(matches!(third, Err(AgentError::Busy(_))));

    h.drain_events();
    h.notify("L/hf");
    let sent = h.answer_all();
    let events = h.drain_events();
    assert!(events.contains(&CallEvent::Hold { leg: first }));
    assert!(events.contains(&CallEvent::Answer { leg: second }));
    assert!(requests_with_verb(&sent, "MDCX")
        .iter()
        .any(|m| m.header("M") == "inactive"));

    let gateways = h.agent.list_gateways();
    let summary = &gateways[0].endpoints[0];
    assert_eq!(summary.master, 1);
}

#[tokio::test]
async fn test_incompatible_codecs_hang_up_without_media() {
    let mut h = Harness::new().await;

    h.notify("L/hd");
    let sent = h.take_sent();
    let crcx = requests_with_verb(&sent, "CRCX");
    let leg = h.drain_events()[0].leg();

    h.from_gateway(&format!(
        "200 {} OK\r\nI: CX9\r\n\r\nv=0\r\nc=IN IP4 10.0.0.5\r\nm=audio 4000 RTP/AVP 18\r\n",
        crcx[0].identifier
    ));

    assert_eq!(
        h.drain_events(),
        vec![CallEvent::Hangup {
            leg,
            cause: HangupCause::NoCompatibleCodecs
        }]
    );
    assert!(h.media.started.lock().is_empty());
}

#[tokio::test]
async fn test_unknown_extension_abandons_collection() {
    let mut h = Harness::new().await;
    let leg = h.go_off_hook();

    h.notify("D/9");
    let sent = h.answer_all();
    assert_eq!(h.drain_events(), vec![CallEvent::ChannelGone { leg }]);
    assert_eq!(requests_with_verb(&sent, "DLCX").len(), 1);
    assert!(requests_with_verb(&sent, "RQNT")
        .iter()
        .any(|r| r.header("S") == "L/ro"));
}

#[tokio::test(start_paused = true)]
async fn test_inter_digit_timeout_plays_congestion() {
    let mut h = Harness::new().await;
    let leg = h.go_off_hook();

    h.notify("D/1");
    h.answer_all();
    h.drain_events();

    tokio::time::sleep(std::time::Duration::from_millis(8500)).await;

    assert!(h.drain_events().contains(&CallEvent::ChannelGone { leg }));
    let sent = h.take_sent();
    assert!(requests_with_verb(&sent, "RQNT")
        .iter()
        .any(|r| r.header("S") == "G/cg"));
}

#[tokio::test]
async fn test_do_not_disturb_feature_code() {
    let mut h = Harness::new().await;
    let leg = h.go_off_hook();

    for digit in ["D/*", "D/7", "D/8"] {
        h.notify(digit);
        h.answer_all();
    }
    let sent_stutter = h.transport.sent().iter().any(|s| s.message().header("S") == "L/sl");
    assert!(sent_stutter);

    h.notify("L/hu");
    h.agent.hangup(leg).unwrap();
    h.answer_all();
    h.drain_events();

    let result = h.agent.request_call(LINE, CallerId::new("5552000", "Bob"));
    assert!(matches!(result, Err(AgentError::Busy(_))));
}

#[tokio::test]
async fn test_call_forward_feature_code() {
    let mut line = line_config();
    line.cancallforward = true;
    let mut h = Harness::with_config(config_with_line(line)).await;
    let leg = h.go_off_hook();

    for digit in ["D/*", "D/7", "D/2", "D/2", "D/0", "D/0", "D/0"] {
        h.notify(digit);
        h.answer_all();
    }
    assert!(h.drain_events().contains(&CallEvent::ChannelGone { leg }));

    let result = h.agent.request_call(LINE, CallerId::new("5552000", "Bob"));
    assert_eq!(result.unwrap(), CallRequestOutcome::Forwarded("2000".to_string()));
}

#[tokio::test]
async fn test_core_digits_use_rfc2833_and_signal() {
    let mut h = Harness::new().await;
    let leg = answered_call(&mut h, "5552000");

    h.agent.send_digit(leg, '5').unwrap();
    assert_eq!(h.media.dtmf.lock().as_slice(), &[(leg, '5')]);
    let sent = h.take_sent();
    assert_eq!(requests_with_verb(&sent, "RQNT")[0].header("S"), "D/5");
}

#[tokio::test]
async fn test_digits_during_call_are_reported() {
    let mut h = Harness::new().await;
    let leg = answered_call(&mut h, "5552000");

    h.notify("D/4");
    assert!(h
        .drain_events()
        .contains(&CallEvent::Dtmf { leg, digit: '4' }));
}
