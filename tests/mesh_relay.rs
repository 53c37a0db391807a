mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{FakeChat, FakeLink, ScriptedModel};
use meshcord::bridge::{BridgeEvent, BridgeServer, CrossThreadRelay};
use meshcord::meshtastic::{MeshEvent, MeshEventSink, TextPacket};

fn packet(sender: &str, channel: u32, payload: &[u8]) -> MeshEvent {
    MeshEvent::Text(TextPacket {
        sender_id: Some(sender.to_string()),
        channel_index: channel,
        payload: payload.to_vec(),
        received_at: Utc::now(),
    })
}

fn drain(events: &mut tokio::sync::mpsc::UnboundedReceiver<BridgeEvent>) -> Vec<BridgeEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn radio_thread_order_is_preserved() {
    let (relay, mut events) = CrossThreadRelay::new();
    let sink: Arc<dyn MeshEventSink> = Arc::new(relay);

    let producer = std::thread::spawn(move || {
        for i in 0..200 {
            let sender = if i % 2 == 0 { "!0000000a" } else { "!0000000b" };
            sink.on_mesh_event(packet(sender, 0, format!("msg {}", i).as_bytes()));
        }
    });
    producer.join().unwrap();

    let texts: Vec<String> = drain(&mut events)
        .into_iter()
        .map(|e| match e {
            BridgeEvent::MeshText(m) => m.text,
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    let expected: Vec<String> = (0..200).map(|i| format!("msg {}", i)).collect();
    assert_eq!(texts, expected);
}

#[tokio::test]
async fn only_primary_channel_text_reaches_chat() {
    let (relay, mut events) = CrossThreadRelay::new();
    for channel in 0..8 {
        relay.on_mesh_event(packet("!a1b2", channel, format!("on {}", channel).as_bytes()));
    }
    relay.on_mesh_event(packet("!a1b2", 0, b"   "));
    relay.on_mesh_event(packet("!a1b2", 0, &[0xff, 0xfe, 0x41]));
    relay.on_mesh_event(packet("!a1b2", 0, b"after the bad one"));

    let link = FakeLink::new();
    let chat = FakeChat::new();
    let model = ScriptedModel::replying("noted");
    let mut settings = common::settings();
    settings.unattended_at_startup = true;
    let mut server = BridgeServer::new(settings, link.clone(), chat.clone(), model.clone());
    for event in drain(&mut events) {
        server.handle_event(event).await;
    }
    server.shutdown().await;

    let echoes: Vec<String> = chat
        .sent_texts()
        .into_iter()
        .filter(|t| t.starts_with("**[Mesh]**"))
        .collect();
    assert_eq!(
        echoes,
        vec![
            "**[Mesh]** Message from !a1b2: on 0".to_string(),
            "**[Mesh]** Message from !a1b2: after the bad one".to_string(),
        ]
    );
    assert_eq!(model.prompt_count(), 2);
    assert_eq!(link.texts().len(), 2);
}

#[tokio::test]
async fn traceroute_results_are_posted_to_the_relay_channel() {
    let (relay, mut events) = CrossThreadRelay::new();
    relay.on_mesh_event(MeshEvent::TracerouteResult {
        destination: "!0000a1b2".to_string(),
        route: vec!["!00000001".to_string(), "!00000002".to_string(), "!0000a1b2".to_string()],
    });

    let chat = FakeChat::new();
    let mut server = BridgeServer::new(common::settings(), FakeLink::new(), chat.clone(), ScriptedModel::replying("x"));
    for event in drain(&mut events) {
        server.handle_event(event).await;
    }

    assert_eq!(
        chat.sent_texts(),
        vec!["Traceroute to !0000a1b2: !00000001 > !00000002 > !0000a1b2".to_string()]
    );
}
