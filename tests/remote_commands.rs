mod common;

use std::sync::Arc;

use common::{FakeChat, FakeLink, LinkCall};
use meshcord::bridge::commands::{CommandDispatcher, CommandReply};
use meshcord::bridge::views::SessionKind;
use meshcord::bridge::UnattendedMode;
use meshcord::chat::{ChatMessage, CommandOptions, OptionValue};
use meshcord::meshtastic::{ChannelInfo, ChannelRole};

fn options(pairs: &[(&str, OptionValue)]) -> CommandOptions {
    CommandOptions(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
}

fn s(value: &str) -> OptionValue {
    OptionValue::String(value.to_string())
}

fn dispatcher(link: &Arc<FakeLink>, chat: &Arc<FakeChat>) -> CommandDispatcher {
    CommandDispatcher::new(link.clone(), chat.clone(), UnattendedMode::new(false), 1)
}

fn message(reply: CommandReply) -> ChatMessage {
    match reply {
        CommandReply::Message(m) => m,
        other => panic!("expected a message, got {:?}", other),
    }
}

fn text(reply: CommandReply) -> String {
    message(reply).content.unwrap_or_default()
}

#[tokio::test]
async fn malformed_hex_never_reaches_the_radio() {
    let link = FakeLink::new();
    let chat = FakeChat::new();
    let reply = dispatcher(&link, &chat)
        .dispatch("senddata", &options(&[("port", OptionValue::Integer(256)), ("data", s("0g12"))]))
        .await;

    let msg = message(reply);
    assert!(msg.ephemeral);
    assert!(msg.content.unwrap().starts_with("Invalid arguments: data is not a valid hex string"));
    assert!(link.calls().is_empty());
}

#[tokio::test]
async fn senddata_sends_decoded_bytes() {
    let link = FakeLink::new();
    let chat = FakeChat::new();
    let reply = dispatcher(&link, &chat)
        .dispatch("senddata", &options(&[("port", OptionValue::Integer(256)), ("data", s("01 02 ff"))]))
        .await;

    assert_eq!(text(reply), "Data sent on port 256: 0102ff");
    assert_eq!(
        link.calls(),
        vec![LinkCall::RawData {
            payload: vec![0x01, 0x02, 0xff],
            port: 256
        }]
    );
}

#[tokio::test]
async fn lora_uses_the_default_channel_unless_given() {
    let link = FakeLink::new();
    let chat = FakeChat::new();
    let d = dispatcher(&link, &chat);

    let first = d.dispatch("lora", &options(&[("message", s("hello mesh"))])).await;
    assert_eq!(text(first), "Message sent over LoRa on channel 1: hello mesh");
    let second = d
        .dispatch("lora", &options(&[("message", s("on three")), ("channel", OptionValue::Integer(3))]))
        .await;
    assert_eq!(text(second), "Message sent over LoRa on channel 3: on three");

    assert_eq!(
        link.texts(),
        vec![("hello mesh".to_string(), 1, None), ("on three".to_string(), 3, None)]
    );
}

#[tokio::test]
async fn direct_message_reports_link_failures() {
    let link = FakeLink::new();
    let chat = FakeChat::new();
    let d = dispatcher(&link, &chat);

    let ok = d
        .dispatch("message", &options(&[("nodeid", s("!a1b2")), ("message", s("hi"))]))
        .await;
    assert_eq!(text(ok), "Direct message sent to !0000a1b2: hi");
    assert_eq!(link.texts(), vec![("hi".to_string(), 0, Some(0xa1b2))]);

    link.fail_sends();
    let failed = message(
        d.dispatch("message", &options(&[("nodeid", s("!a1b2")), ("message", s("hi again"))]))
            .await,
    );
    assert!(!failed.ephemeral);
    assert!(failed
        .content
        .unwrap()
        .starts_with("Error sending direct message to !0000a1b2: device did not complete"));
}

#[tokio::test]
async fn out_of_range_arguments_make_no_link_calls() {
    let link = FakeLink::new();
    let chat = FakeChat::new();
    let d = dispatcher(&link, &chat);

    let cases = [
        ("position", options(&[("latitude", OptionValue::Number(95.0)), ("longitude", OptionValue::Number(0.0))])),
        ("position", options(&[("latitude", OptionValue::Number(10.0)), ("longitude", OptionValue::Number(-181.0))])),
        ("lora", options(&[("message", s("x")), ("channel", OptionValue::Integer(8))])),
        ("trace", options(&[("destination", s("!a1b2")), ("hoplimit", OptionValue::Integer(11))])),
        ("trace", options(&[("destination", s("not-a-node"))])),
        ("message", options(&[("nodeid", s("!a1b2")), ("message", s("   "))])),
        ("senddata", options(&[("port", OptionValue::Integer(512)), ("data", s("00"))])),
        ("lora", CommandOptions::default()),
    ];
    for (name, opts) in cases.iter() {
        let msg = message(d.dispatch(name, opts).await);
        assert!(msg.ephemeral, "/{} should be rejected privately", name);
        assert!(msg.content.unwrap().starts_with("Invalid arguments:"), "/{}", name);
    }
    assert!(link.calls().is_empty());
}

#[tokio::test]
async fn device_commands_confirm_what_they_sent() {
    let link = FakeLink::new();
    let chat = FakeChat::new();
    let d = dispatcher(&link, &chat);

    let position = d
        .dispatch(
            "position",
            &options(&[
                ("latitude", OptionValue::Number(45.5)),
                ("longitude", OptionValue::Number(-122.25)),
                ("altitude", OptionValue::Integer(30)),
            ]),
        )
        .await;
    assert_eq!(text(position), "Position sent: lat=45.5, lon=-122.25, alt=30");
    assert_eq!(text(d.dispatch("telemetry", &CommandOptions::default()).await), "Telemetry request sent.");
    assert_eq!(
        text(d.dispatch("trace", &options(&[("destination", s("a1b2"))])).await),
        "Traceroute request sent to !0000a1b2 with hoplimit 10 on channel 0."
    );
    assert_eq!(text(d.dispatch("ping", &CommandOptions::default()).await), "Heartbeat sent to Meshtastic node.");

    assert_eq!(
        link.calls(),
        vec![
            LinkCall::Position {
                latitude: 45.5,
                longitude: -122.25,
                altitude: 30
            },
            LinkCall::Telemetry,
            LinkCall::Traceroute {
                destination: 0xa1b2,
                hop_limit: 10,
                channel: 0
            },
            LinkCall::Heartbeat,
        ]
    );
}

#[tokio::test]
async fn view_commands_open_sessions_without_link_traffic() {
    let link = FakeLink::new();
    let chat = FakeChat::new();
    let d = dispatcher(&link, &chat);

    assert_eq!(d.dispatch("nodes", &CommandOptions::default()).await, CommandReply::OpenView(SessionKind::NodeList));
    assert_eq!(d.dispatch("dm", &CommandOptions::default()).await, CommandReply::OpenView(SessionKind::DmPicker));
    assert_eq!(d.dispatch("info", &CommandOptions::default()).await, CommandReply::OpenView(SessionKind::DeviceInfo));
    assert!(link.calls().is_empty());
}

#[tokio::test]
async fn channels_lists_enabled_channels_only() {
    let link = FakeLink::new();
    *link.channels.lock().unwrap() = vec![
        ChannelInfo {
            index: 0,
            name: String::new(),
            role: ChannelRole::Primary,
        },
        ChannelInfo {
            index: 1,
            name: "ops".to_string(),
            role: ChannelRole::Secondary,
        },
        ChannelInfo {
            index: 2,
            name: "unused".to_string(),
            role: ChannelRole::Disabled,
        },
    ];
    let chat = FakeChat::new();

    let msg = message(dispatcher(&link, &chat).dispatch("channels", &CommandOptions::default()).await);
    let embed = &msg.embeds[0];
    let fields: Vec<(&str, &str)> = embed.fields.iter().map(|f| (f.name.as_str(), f.value.as_str())).collect();
    assert_eq!(
        fields,
        vec![("Channel 0", "(default) (primary)"), ("Channel 1", "ops (secondary)")]
    );
    assert!(link.calls().is_empty());
}

#[tokio::test]
async fn unknown_command_is_rejected() {
    let link = FakeLink::new();
    let chat = FakeChat::new();
    let msg = message(dispatcher(&link, &chat).dispatch("reboot", &CommandOptions::default()).await);
    assert!(msg.ephemeral);
    assert_eq!(msg.content.as_deref(), Some("Invalid arguments: unknown command 'reboot'"));
}
