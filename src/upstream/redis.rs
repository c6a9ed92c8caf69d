//! Redis upstream
//!
//! Uses two TCP connections: the subscriber connection (SUBSCRIBE /
//! UNSUBSCRIBE, read by a background task that turns pushes into
//! [`UpstreamEvent`]s) and a command connection for PUBLISH, since a Redis
//! connection in subscribe mode refuses other commands. Both reconnect
//! lazily: the command connection on the next publish, the subscriber
//! connection on the next `listen`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use super::resp::{self, RespValue};
use super::{Upstream, UpstreamEvent, UpstreamEvents};
use crate::utils::error::UpstreamError;

const READ_BUFFER_SIZE: usize = 16 * 1024;

type SubscriberWriter = Arc<Mutex<Option<(u64, OwnedWriteHalf)>>>;

pub struct RedisUpstream {
    addr: String,
    command: Mutex<Option<CommandConnection>>,
    subscriber: SubscriberWriter,
    generation: AtomicU64,
}

impl RedisUpstream {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            command: Mutex::new(None),
            subscriber: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn send_subscriber_command(&self, args: &[&str]) -> Result<(), UpstreamError> {
        let mut out = BytesMut::new();
        resp::encode_command(args, &mut out);

        let mut guard = self.subscriber.lock().await;
        let Some((_, writer)) = guard.as_mut() else {
            return Err(UpstreamError::Closed);
        };
        writer.write_all(&out).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisUpstream")
            .field("addr", &self.addr)
            .finish()
    }
}

#[async_trait]
impl Upstream for RedisUpstream {
    async fn listen(&self) -> Result<UpstreamEvents, UpstreamError> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *self.subscriber.lock().await = Some((generation, writer));
        info!(addr = %self.addr, generation, "Redis subscriber connected");

        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::clone(&self.subscriber);
        let addr = self.addr.clone();

        tokio::spawn(async move {
            let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
            'read: loop {
                loop {
                    match resp::decode(&mut buffer) {
                        Ok(Some(value)) => {
                            if let Some(event) = subscriber_reply(&addr, value) {
                                if tx.send(event).is_err() {
                                    break 'read;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(addr = %addr, error = %e, "Malformed reply from Redis");
                            break 'read;
                        }
                    }
                }
                match reader.read_buf(&mut buffer).await {
                    Ok(0) => {
                        debug!(addr = %addr, "Redis subscriber connection closed");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(addr = %addr, error = %e, "Redis subscriber read failed");
                        break;
                    }
                }
            }

            let mut guard = slot.lock().await;
            if matches!(guard.as_ref(), Some((current, _)) if *current == generation) {
                guard.take();
            }
            drop(guard);
            let _ = tx.send(UpstreamEvent::Disconnect);
        });

        Ok(rx)
    }

    async fn subscribe(&self, channel: &str) -> Result<(), UpstreamError> {
        self.send_subscriber_command(&["SUBSCRIBE", channel]).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), UpstreamError> {
        self.send_subscriber_command(&["UNSUBSCRIBE", channel]).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), UpstreamError> {
        let mut guard = self.command.lock().await;
        if guard.is_none() {
            *guard = Some(CommandConnection::connect(&self.addr).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(UpstreamError::Closed);
        };

        match conn.execute(&["PUBLISH", channel, payload]).await {
            Ok(RespValue::Error(message)) => Err(UpstreamError::Reply(message)),
            Ok(_) => Ok(()),
            Err(e) => {
                // force a reconnect on the next publish
                guard.take();
                Err(e)
            }
        }
    }
}

struct CommandConnection {
    stream: TcpStream,
    buffer: BytesMut,
}

impl CommandConnection {
    async fn connect(addr: &str) -> Result<Self, UpstreamError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(addr = %addr, "Redis command connection opened");
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        })
    }

    async fn execute(&mut self, args: &[&str]) -> Result<RespValue, UpstreamError> {
        let mut out = BytesMut::new();
        resp::encode_command(args, &mut out);
        self.stream.write_all(&out).await?;

        loop {
            if let Some(value) = resp::decode(&mut self.buffer)? {
                return Ok(value);
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(UpstreamError::Closed);
            }
        }
    }
}

/// Handle one reply read on the subscriber connection. Error replies,
/// such as a refused SUBSCRIBE, are logged and produce no event.
pub fn subscriber_reply(addr: &str, value: RespValue) -> Option<UpstreamEvent> {
    if let RespValue::Error(message) = &value {
        warn!(addr = %addr, error = %message, "Redis rejected a subscriber command");
        return None;
    }
    push_event(value)
}

/// Map a push from the subscriber connection to an event.
///
/// Anything that is not a `message`, `subscribe` or `unsubscribe` push is
/// ignored.
pub fn push_event(value: RespValue) -> Option<UpstreamEvent> {
    let RespValue::Array(Some(items)) = value else {
        return None;
    };
    let mut items = items.into_iter();
    let kind = items.next()?.into_string()?;
    let channel = items.next()?.into_string()?;
    let last = items.next()?;

    match kind.as_str() {
        "message" => Some(UpstreamEvent::Message {
            channels: vec![channel],
            body: last.into_string()?,
        }),
        "subscribe" => Some(UpstreamEvent::Subscribed {
            channel,
            count: last.as_integer()?,
        }),
        "unsubscribe" => Some(UpstreamEvent::Unsubscribed {
            channel,
            count: last.as_integer()?,
        }),
        _ => None,
    }
}
