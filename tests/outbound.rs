use std::{sync::Arc, time::Duration};

use event_alerts::{
    ChannelConfig, DispatchReport, OutboundMessage, OutboundQueueBuilder, SendError, Truncation,
    test_utils::RecordingSink,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn failing_message_does_not_block_its_channel() {
    let queue = OutboundQueueBuilder::new()
        .default_channel(ChannelConfig::default().max_payload(1))
        .build()
        .unwrap();
    let sink = RecordingSink::new().fail_matching("A", 1, SendError::Transient("429".into()));
    for body in ["A", "B", "C"] {
        queue.enqueue(OutboundMessage::new("market", body));
    }

    let first = queue.dispatch_once(&sink).await;
    let second = queue.dispatch_once(&sink).await;

    assert_eq!(first, DispatchReport { sent: 2, requeued: 1, dropped: 0 });
    assert_eq!(second.sent, 1);
    assert_eq!(sink.bodies(), vec!["B", "C", "A"]);
}

#[tokio::test]
async fn multibyte_bodies_are_truncated_on_char_boundaries() {
    let queue = OutboundQueueBuilder::new()
        .channel("seasons", ChannelConfig::default().truncation(Truncation::KeepTail))
        .build()
        .unwrap();
    let sink = RecordingSink::new();
    let body = "🌱".repeat(3000);
    queue.enqueue(OutboundMessage::new("field", body.clone()));
    queue.enqueue(OutboundMessage::new("seasons", format!("{body}end")));

    queue.dispatch_once(&sink).await;

    let field = sink.sent_to(&"field".into());
    let seasons = sink.sent_to(&"seasons".into());
    assert_eq!(field.len(), 1);
    assert_eq!(field[0].chars().count(), 1950);
    assert!(field[0].chars().all(|c| c == '🌱'));
    assert_eq!(seasons[0].chars().count(), 1950);
    assert!(seasons[0].ends_with("end"));
}

#[tokio::test]
async fn channels_are_independent() {
    let queue = OutboundQueueBuilder::new().build().unwrap();
    let sink = RecordingSink::new().fail_matching(
        "pod listing",
        usize::MAX,
        SendError::Transient("503".into()),
    );
    queue.enqueue(OutboundMessage::new("market", "pod listing"));
    queue.enqueue(OutboundMessage::new("silo", "deposit"));

    queue.dispatch_once(&sink).await;

    assert_eq!(sink.sent_to(&"silo".into()), vec!["deposit".to_string()]);
    assert_eq!(queue.pending(&"market".into()), 1);
}

#[tokio::test(start_paused = true)]
async fn dispatcher_drains_messages_enqueued_while_running() -> anyhow::Result<()> {
    let queue = OutboundQueueBuilder::new().dispatch_interval(Duration::from_millis(400)).build()?;
    let sink = Arc::new(RecordingSink::new());
    let cancel = CancellationToken::new();
    let dispatcher = queue.spawn_dispatcher(sink.clone(), cancel.clone());

    queue.enqueue(OutboundMessage::new("field", "sow"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    queue.enqueue(OutboundMessage::new("field", "harvest"));
    queue.enqueue(OutboundMessage::new("field", "plant"));
    tokio::time::sleep(Duration::from_secs(1)).await;

    cancel.cancel();
    dispatcher.await?;

    assert_eq!(sink.bodies(), vec!["sow", "harvest\n\nplant"]);
    assert!(queue.is_empty());
    Ok(())
}
