//! The `code#value` line stream carried over a WebSocket.
//!
//! A controller may pack several lines into one text frame; the reader
//! hands them out one at a time. Non-text frames are ignored.
//!
//! The reader also pings the controller and fails once nothing at all
//! arrived for [`Keepalive::interval`] plus [`Keepalive::timeout`]. A
//! controller that lost power never closes its socket.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use portbridge_app::ports::{LineReader, LineWriter};
use portbridge_domain::error::BridgeError;

use crate::error::DeviceError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

const MIN_PING_INTERVAL: Duration = Duration::from_millis(10);

/// Liveness checks of an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Pause between two pings.
    pub interval: Duration,
    /// Silence tolerated on top of `interval`.
    pub timeout: Duration,
}

impl Keepalive {
    fn idle_limit(self) -> Duration {
        self.interval + self.timeout
    }
}

/// Open `ws://{host}:{port}/` and split it into its two halves.
///
/// # Errors
///
/// Returns [`DeviceError::Timeout`] when the handshake takes longer than
/// `timeout`, or the underlying WebSocket error.
pub async fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
    keepalive: Keepalive,
) -> Result<(WsLineWriter, WsLineReader), DeviceError> {
    let url = format!("ws://{host}:{port}/");
    tracing::debug!(%url, "opening device stream");
    let (ws, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| DeviceError::Timeout)??;
    let (sink, stream) = ws.split();
    let sink = Arc::new(Mutex::new(sink));

    let every = keepalive.interval.max(MIN_PING_INTERVAL);
    let mut ping = tokio::time::interval_at(Instant::now() + every, every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let idle_limit = keepalive.idle_limit();

    Ok((
        WsLineWriter {
            sink: Arc::clone(&sink),
        },
        WsLineReader {
            stream,
            sink,
            pending: VecDeque::new(),
            ping,
            idle_limit,
            deadline: Instant::now() + idle_limit,
        },
    ))
}

pub struct WsLineWriter {
    sink: SharedSink,
}

impl LineWriter for WsLineWriter {
    async fn send_line(&mut self, line: String) -> Result<(), BridgeError> {
        self.sink
            .lock()
            .await
            .send(Message::text(line))
            .await
            .map_err(DeviceError::from)?;
        Ok(())
    }
}

pub struct WsLineReader {
    stream: SplitStream<WsStream>,
    sink: SharedSink,
    pending: VecDeque<String>,
    ping: Interval,
    idle_limit: Duration,
    /// Pushed forward by every inbound frame, pongs included.
    deadline: Instant,
}

impl WsLineReader {
    async fn send_ping(&self) -> Result<(), DeviceError> {
        self.sink
            .lock()
            .await
            .send(Message::Ping(Default::default()))
            .await?;
        Ok(())
    }
}

impl LineReader for WsLineReader {
    async fn next_line(&mut self) -> Option<Result<String, BridgeError>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(line));
            }
            tokio::select! {
                () = tokio::time::sleep_until(self.deadline) => {
                    tracing::warn!(idle = ?self.idle_limit, "device stream went silent");
                    return Some(Err(DeviceError::Silent.into()));
                }
                _ = self.ping.tick() => {
                    if let Err(err) = self.send_ping().await {
                        return Some(Err(err.into()));
                    }
                }
                frame = self.stream.next() => {
                    let Some(frame) = frame else {
                        return None;
                    };
                    self.deadline = Instant::now() + self.idle_limit;
                    match frame {
                        Ok(Message::Text(text)) => self.pending.extend(split_lines(text.as_str())),
                        Ok(Message::Close(frame)) => {
                            tracing::debug!(?frame, "device closed the stream");
                            return None;
                        }
                        Ok(_) => {}
                        Err(err) => return Some(Err(DeviceError::from(err).into())),
                    }
                }
            }
        }
    }
}

fn split_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const KEEPALIVE: Keepalive = Keepalive {
        interval: Duration::from_secs(20),
        timeout: Duration::from_secs(10),
    };

    /// Accept one WebSocket on a free port and hand it to `serve`.
    async fn device<F, Fut>(serve: F) -> u16
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            serve(ws).await;
        });
        port
    }

    #[test]
    fn should_split_packed_frame_into_lines() {
        let lines: Vec<String> = split_lines("t1#22.0\r\n\nr1#1\n").collect();
        assert_eq!(lines, vec!["t1#22.0", "r1#1"]);
    }

    #[tokio::test]
    async fn should_read_lines_and_write_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            ws.send(Message::text("t1#22.0\nr1#1")).await.unwrap();
            let command = loop {
                if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
                    break text.as_str().to_string();
                }
            };
            ws.close(None).await.unwrap();
            command
        });

        let (mut writer, mut reader) = connect("127.0.0.1", port, Duration::from_secs(2), KEEPALIVE)
            .await
            .unwrap();

        assert_eq!(reader.next_line().await.unwrap().unwrap(), "t1#22.0");
        assert_eq!(reader.next_line().await.unwrap().unwrap(), "r1#1");
        writer.send_line("r1#0".to_string()).await.unwrap();
        assert!(reader.next_line().await.is_none());
        assert_eq!(server.await.unwrap(), "r1#0");
    }

    #[tokio::test]
    async fn should_fail_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect("127.0.0.1", port, Duration::from_secs(2), KEEPALIVE).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn should_fail_when_device_goes_silent() {
        let port = device(|ws| async move {
            // holds the socket open without ever reading or answering pings
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(ws);
        })
        .await;
        let keepalive = Keepalive {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(100),
        };
        let (_writer, mut reader) = connect("127.0.0.1", port, Duration::from_secs(2), keepalive)
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), reader.next_line())
            .await
            .expect("silence should end the stream");

        assert!(matches!(
            result,
            Some(Err(BridgeError::Unavailable(
                portbridge_domain::error::UnavailableError::Unreachable
            )))
        ));
    }

    #[tokio::test]
    async fn should_stay_open_while_device_answers_pings() {
        let port = device(|mut ws| async move {
            let quiet_until = Instant::now() + Duration::from_millis(400);
            while Instant::now() < quiet_until {
                // reading lets the server answer pings with pongs
                let _ = tokio::time::timeout_at(quiet_until, ws.next()).await;
            }
            ws.send(Message::text("t1#1")).await.unwrap();
            let _ = ws.next().await;
        })
        .await;
        let keepalive = Keepalive {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(100),
        };
        let (_writer, mut reader) = connect("127.0.0.1", port, Duration::from_secs(2), keepalive)
            .await
            .unwrap();

        assert_eq!(reader.next_line().await.unwrap().unwrap(), "t1#1");
    }
}
