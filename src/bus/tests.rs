use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

use super::event::{Delivery, decode_delivery};
use super::{BusEvent, Callback, Channel, ChannelBus, ChannelSet, EventKind};
use crate::upstream::MemoryUpstream;
use crate::utils::error::DeliveryError;

type Seen = (EventKind, String, Value);

fn recorder() -> (Callback, UnboundedReceiver<Seen>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: Callback = Arc::new(move |event: &BusEvent| -> Result<(), DeliveryError> {
        let _ = tx.send((event.kind, event.channel.clone(), event.body_value()));
        Ok(())
    });
    (callback, rx)
}

fn setup() -> (Arc<ChannelBus>, Arc<MemoryUpstream>) {
    let upstream = Arc::new(MemoryUpstream::new());
    let bus = ChannelBus::new(upstream.clone());
    (bus, upstream)
}

fn object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

async fn next(rx: &mut UnboundedReceiver<Seen>) -> Seen {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("callback dropped")
}

#[test]
fn test_channel_subscribe_replaces() {
    let (cb1, _) = recorder();
    let (cb2, _) = recorder();
    let mut channel = Channel::new("a");
    assert!(channel.subscribe("s1".to_string(), cb1).is_none());
    assert!(channel.subscribe("s1".to_string(), cb2).is_some());
    assert_eq!(channel.len(), 1);
    assert!(channel.unsubscribe(&"s1".to_string()).is_some());
    assert!(channel.is_empty());
}

#[test]
fn test_channel_set_dedups_in_order() {
    let set = ChannelSet::from(vec!["b", "a", "b", "c", "a"]);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    assert_eq!(ChannelSet::from("solo").len(), 1);
}

#[test]
fn test_decode_delivery() {
    let tagged =
        decode_delivery(r#"{"__relay_origin":"o-1","__relay_body":{"text":"hi"}}"#).unwrap();
    assert_eq!(
        tagged,
        Delivery {
            origin: Some("o-1".to_string()),
            body: json!({"text": "hi"})
        }
    );

    let plain = decode_delivery(r#"{"event":"publish","stream":"cam1"}"#).unwrap();
    assert_eq!(plain.origin, None);
    assert_eq!(plain.body, json!({"event": "publish", "stream": "cam1"}));

    assert!(decode_delivery("{nope").is_err());
}

#[test]
fn test_foreign_origin_body_object_is_delivered_whole() {
    let raw = r#"{"origin":"sensor-7","body":{"temp":21}}"#;
    let delivery = decode_delivery(raw).unwrap();
    assert_eq!(delivery.origin, None);
    assert_eq!(
        delivery.body,
        json!({"origin": "sensor-7", "body": {"temp": 21}})
    );

    let extra = r#"{"__relay_origin":"o-1","__relay_body":1,"more":true}"#;
    let delivery = decode_delivery(extra).unwrap();
    assert_eq!(delivery.origin, None);
    assert_eq!(delivery.body["more"], json!(true));
}

#[tokio::test]
async fn test_upstream_subscribe_once_per_channel_lifetime() {
    let (bus, upstream) = setup();
    let (cb, _rx) = recorder();

    bus.subscribe("a", &"s1".to_string(), cb.clone()).await.unwrap();
    bus.subscribe("a", &"s2".to_string(), cb.clone()).await.unwrap();
    assert_eq!(upstream.subscribe_count("a"), 1);
    assert_eq!(upstream.listen_count(), 1);
    assert_eq!(bus.subscriber_count("a").await, 2);

    bus.unsubscribe("a", &"s1".to_string()).await.unwrap();
    assert_eq!(upstream.unsubscribe_count("a"), 0);

    bus.unsubscribe("a", &"s2".to_string()).await.unwrap();
    assert_eq!(upstream.unsubscribe_count("a"), 1);
    assert_eq!(bus.channel_count().await, 0);
    assert!(!upstream.is_subscribed("a"));

    bus.subscribe("a", &"s3".to_string(), cb).await.unwrap();
    assert_eq!(upstream.subscribe_count("a"), 2);
    assert_eq!(upstream.listen_count(), 1);
}

#[tokio::test]
async fn test_subscribe_many_channels_at_once() {
    let (bus, upstream) = setup();
    let (cb, _rx) = recorder();

    bus.subscribe(["a", "b", "a"], &"s1".to_string(), cb)
        .await
        .unwrap();
    assert_eq!(bus.channel_count().await, 2);
    assert_eq!(upstream.subscribe_count("a"), 1);
    assert_eq!(upstream.subscribe_count("b"), 1);

    bus.unsubscribe(vec!["a", "b"], &"s1".to_string())
        .await
        .unwrap();
    assert_eq!(bus.channel_count().await, 0);
}

#[tokio::test]
async fn test_unsubscribe_unknown_channel_is_noop() {
    let (bus, upstream) = setup();
    bus.unsubscribe("ghost", &"s1".to_string()).await.unwrap();
    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_sends_synthetic_event() {
    let (bus, _upstream) = setup();
    let (cb, mut rx) = recorder();
    bus.subscribe("a", &"s1".to_string(), cb).await.unwrap();
    bus.unsubscribe("a", &"s1".to_string()).await.unwrap();

    let (kind, channel, body) = rx.try_recv().expect("unsubscribe event");
    assert_eq!(kind, EventKind::Unsubscribe);
    assert_eq!(channel, "a");
    assert_eq!(body, Value::Null);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_publish_delivers_locally_before_returning() {
    let (bus, upstream) = setup();
    let (cb1, mut rx1) = recorder();
    let (cb2, mut rx2) = recorder();
    bus.subscribe("a", &"s1".to_string(), cb1).await.unwrap();
    bus.subscribe("a", &"s2".to_string(), cb2).await.unwrap();

    bus.publish("a", object(json!({"text": "hi"}))).await.unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let (kind, channel, body) = rx.try_recv().expect("delivered synchronously");
        assert_eq!(kind, EventKind::Message);
        assert_eq!(channel, "a");
        assert_eq!(body, json!({"text": "hi"}));
        assert!(rx.try_recv().is_err());
    }

    let published = upstream.published("a");
    assert_eq!(published.len(), 1);
    let envelope: Value = serde_json::from_str(&published[0]).unwrap();
    assert_eq!(envelope["__relay_origin"], json!(bus.origin()));
    assert_eq!(envelope["__relay_body"], json!({"text": "hi"}));
}

#[tokio::test]
async fn test_publish_to_two_channels_delivers_once_per_channel() {
    let (bus, upstream) = setup();
    let (both, mut rx_both) = recorder();
    let (only_b, mut rx_b) = recorder();
    bus.subscribe(["a", "b"], &"s1".to_string(), both)
        .await
        .unwrap();
    bus.subscribe("b", &"s2".to_string(), only_b).await.unwrap();

    bus.publish(["a", "b"], object(json!({"n": 1})))
        .await
        .unwrap();

    let mut channels = vec![rx_both.try_recv().unwrap().1, rx_both.try_recv().unwrap().1];
    channels.sort();
    assert_eq!(channels, vec!["a", "b"]);
    assert!(rx_both.try_recv().is_err());

    assert_eq!(rx_b.try_recv().unwrap().1, "b");
    assert!(rx_b.try_recv().is_err());

    assert_eq!(upstream.published("a").len(), 1);
    assert_eq!(upstream.published("b").len(), 1);
}

#[tokio::test]
async fn test_publish_without_local_subscribers_still_goes_upstream() {
    let (bus, upstream) = setup();
    bus.publish("nobody", object(json!({"x": 1}))).await.unwrap();
    assert_eq!(upstream.published("nobody").len(), 1);
}

#[tokio::test]
async fn test_callback_failures_are_isolated() {
    let (bus, _upstream) = setup();
    let failing: Callback = Arc::new(|_: &BusEvent| -> Result<(), DeliveryError> {
        Err(DeliveryError::SessionClosed("gone".to_string()))
    });
    let panicking: Callback = Arc::new(|_: &BusEvent| -> Result<(), DeliveryError> {
        panic!("callback blew up")
    });
    let (healthy, mut rx) = recorder();

    bus.subscribe("a", &"failing".to_string(), failing)
        .await
        .unwrap();
    bus.subscribe("a", &"panicking".to_string(), panicking)
        .await
        .unwrap();
    bus.subscribe("a", &"healthy".to_string(), healthy)
        .await
        .unwrap();

    bus.publish("a", object(json!({"text": "still here"})))
        .await
        .unwrap();
    let (_, _, body) = rx.try_recv().expect("healthy subscriber still served");
    assert_eq!(body, json!({"text": "still here"}));

    // the bus keeps working afterwards
    bus.publish("a", object(json!({"text": "again"})))
        .await
        .unwrap();
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_resubscribe_replaces_callback() {
    let (bus, upstream) = setup();
    let (old, mut rx_old) = recorder();
    let (new, mut rx_new) = recorder();
    bus.subscribe("a", &"s1".to_string(), old).await.unwrap();
    bus.subscribe("a", &"s1".to_string(), new).await.unwrap();
    assert_eq!(bus.subscriber_count("a").await, 1);
    assert_eq!(upstream.subscribe_count("a"), 1);

    bus.publish("a", object(json!({}))).await.unwrap();
    assert!(rx_old.try_recv().is_err());
    assert!(rx_new.try_recv().is_ok());
}

#[tokio::test]
async fn test_upstream_failure_is_reported_and_rolled_back() {
    let (bus, upstream) = setup();
    let (cb, _rx) = recorder();

    upstream.set_offline(true);
    let err = bus
        .subscribe("a", &"s1".to_string(), cb.clone())
        .await
        .unwrap_err();
    assert!(err.is_upstream());
    assert_eq!(bus.channel_count().await, 0);
    assert!(!bus.is_listening().await);

    upstream.set_offline(false);
    bus.subscribe("a", &"s1".to_string(), cb.clone())
        .await
        .unwrap();

    upstream.set_offline(true);
    let err = bus
        .subscribe("b", &"s1".to_string(), cb)
        .await
        .unwrap_err();
    assert!(err.is_upstream());
    assert_eq!(bus.channel_count().await, 1);
    assert!(!bus.is_subscribed("b", &"s1".to_string()).await);

    let err = bus.publish("a", object(json!({}))).await.unwrap_err();
    assert!(err.is_upstream());
}

#[tokio::test]
async fn test_unsubscribe_completes_locally_when_upstream_fails() {
    let (bus, upstream) = setup();
    let (cb, mut rx) = recorder();
    let id = "s1".to_string();
    bus.subscribe(["a", "b"], &id, cb).await.unwrap();

    upstream.set_offline(true);
    let err = bus.unsubscribe(["a", "b"], &id).await.unwrap_err();
    assert!(err.is_upstream());

    assert_eq!(bus.channel_count().await, 0);
    assert!(!bus.is_subscribed("a", &id).await);
    assert!(!bus.is_subscribed("b", &id).await);
    for expected in ["a", "b"] {
        let (kind, channel, _) = rx.try_recv().expect("unsubscribe event");
        assert_eq!(kind, EventKind::Unsubscribe);
        assert_eq!(channel, expected);
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_upstream_delivery_fans_out() {
    let (bus, upstream) = setup();
    let (cb1, mut rx1) = recorder();
    let (cb2, mut rx2) = recorder();
    bus.subscribe("a", &"s1".to_string(), cb1).await.unwrap();
    bus.subscribe("a", &"s2".to_string(), cb2).await.unwrap();

    assert!(upstream.deliver(&["a"], r#"{"text":"from elsewhere"}"#));

    for rx in [&mut rx1, &mut rx2] {
        let (kind, channel, body) = next(rx).await;
        assert_eq!(kind, EventKind::Message);
        assert_eq!(channel, "a");
        assert_eq!(body, json!({"text": "from elsewhere"}));
    }
}

#[tokio::test]
async fn test_upstream_delivery_order_is_preserved() {
    let (bus, upstream) = setup();
    let (cb, mut rx) = recorder();
    bus.subscribe("a", &"s1".to_string(), cb).await.unwrap();

    for n in 0..20 {
        assert!(upstream.deliver(&["a"], &format!(r#"{{"n":{n}}}"#)));
    }
    for n in 0..20 {
        let (_, _, body) = next(&mut rx).await;
        assert_eq!(body, json!({"n": n}));
    }
}

#[tokio::test]
async fn test_malformed_upstream_payload_is_dropped() {
    let (bus, upstream) = setup();
    let (cb, mut rx) = recorder();
    bus.subscribe("a", &"s1".to_string(), cb).await.unwrap();

    assert!(upstream.deliver(&["a"], "this is not json"));
    assert!(upstream.deliver(&["a"], r#"{"ok":true}"#));

    let (_, _, body) = next(&mut rx).await;
    assert_eq!(body, json!({"ok": true}));
    assert!(bus.is_listening().await);
}

#[tokio::test]
async fn test_own_echo_is_ignored() {
    let (bus, upstream) = setup();
    let (cb, mut rx) = recorder();
    bus.subscribe("a", &"s1".to_string(), cb).await.unwrap();

    let echo = json!({"__relay_origin": bus.origin(), "__relay_body": {"mine": true}}).to_string();
    let foreign =
        json!({"__relay_origin": "another-process", "__relay_body": {"mine": false}}).to_string();
    assert!(upstream.deliver(&["a"], &echo));
    assert!(upstream.deliver(&["a"], &foreign));

    let (_, _, body) = next(&mut rx).await;
    assert_eq!(body, json!({"mine": false}));
}

#[tokio::test]
async fn test_disconnect_tears_down_and_relistens() {
    let (bus, upstream) = setup();
    let (cb, mut rx) = recorder();
    bus.subscribe(["a", "b"], &"s1".to_string(), cb.clone())
        .await
        .unwrap();

    upstream.disconnect();

    let mut torn_down = vec![next(&mut rx).await, next(&mut rx).await];
    torn_down.sort_by(|x, y| x.1.cmp(&y.1));
    assert_eq!(torn_down[0].0, EventKind::Disconnect);
    assert_eq!(torn_down[0].1, "a");
    assert_eq!(torn_down[1].0, EventKind::Disconnect);
    assert_eq!(torn_down[1].1, "b");

    assert_eq!(bus.channel_count().await, 0);
    assert!(!bus.is_listening().await);

    bus.subscribe("a", &"s1".to_string(), cb).await.unwrap();
    assert_eq!(upstream.listen_count(), 2);
    assert_eq!(upstream.subscribe_count("a"), 2);
    assert!(upstream.is_subscribed("a"));
}

#[tokio::test]
async fn test_close_clears_everything() {
    let (bus, upstream) = setup();
    let (cb, mut rx) = recorder();
    bus.subscribe("a", &"s1".to_string(), cb).await.unwrap();

    bus.close().await;
    assert_eq!(bus.channel_count().await, 0);
    assert!(!bus.is_listening().await);
    assert_eq!(upstream.unsubscribe_count("a"), 1);
    assert_eq!(rx.try_recv().unwrap().0, EventKind::Disconnect);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribers_share_one_upstream_subscription() {
    let (bus, upstream) = setup();
    let mut tasks = Vec::new();
    for n in 0..32 {
        let bus = bus.clone();
        tasks.push(tokio::spawn(async move {
            let (cb, _rx) = recorder();
            bus.subscribe("hot", &format!("s{n}"), cb).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(upstream.subscribe_count("hot"), 1);
    assert_eq!(upstream.listen_count(), 1);
    assert_eq!(bus.subscriber_count("hot").await, 32);

    let mut tasks = Vec::new();
    for n in 0..32 {
        let bus = bus.clone();
        tasks.push(tokio::spawn(async move {
            bus.unsubscribe("hot", &format!("s{n}")).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(upstream.unsubscribe_count("hot"), 1);
    assert_eq!(bus.channel_count().await, 0);
}
