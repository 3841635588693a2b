// SPDX-FileCopyrightText: 2024 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2024 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde_json::Value as JSONValue;
use std::net::SocketAddr;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::{timeout, Duration},
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// The far end of a session connection, speaking newline-delimited JSON by hand.
pub struct MockPeer {
    writer_tx: mpsc::Sender<String>,
    reader_rx: mpsc::Receiver<String>,
}

impl MockPeer {
    /// Connects to a listening session.
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Could not connect to session");
        Self::from_stream(stream)
    }

    /// Listens for a session to connect to us. The peer becomes usable once it has.
    pub async fn listen() -> (SocketAddr, tokio::task::JoinHandle<Self>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Could not bind mock peer");
        let addr = listener.local_addr().expect("Listener should have an address");
        let accepted = tokio::spawn(async move {
            let (stream, _) = listener
                .accept()
                .await
                .expect("Could not accept connection");
            Self::from_stream(stream)
        });
        (addr, accepted)
    }

    fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        let (writer_tx, mut writer_rx) = mpsc::channel::<String>(16);
        let (reader_tx, reader_rx) = mpsc::channel::<String>(16);

        tokio::spawn(async move {
            let mut writer = BufWriter::new(writer);
            while let Some(message) = writer_rx.recv().await {
                if writer.write_all(message.as_bytes()).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buffer = String::new();
            // A read of zero bytes means the session hung up.
            while matches!(reader.read_line(&mut buffer).await, Ok(n) if n > 0) {
                if reader_tx.send(buffer.clone()).await.is_err() {
                    break;
                }
                buffer.clear();
            }
        });

        Self {
            writer_tx,
            reader_rx,
        }
    }

    /// Sends one line. The newline is added if missing.
    pub async fn send(&mut self, message: &str) {
        let mut line = message.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.writer_tx
            .send(line)
            .await
            .expect("Could not send message");
    }

    pub async fn send_json(&mut self, message: &JSONValue) {
        self.send(&message.to_string()).await;
    }

    pub async fn recv(&mut self) -> JSONValue {
        self.recv_within(RECV_TIMEOUT)
            .await
            .expect("Expected a message from the session")
    }

    /// Returns `None` if nothing arrives in time, or the session closed the connection.
    pub async fn recv_within(&mut self, duration: Duration) -> Option<JSONValue> {
        let line = timeout(duration, self.reader_rx.recv()).await.ok()??;
        Some(serde_json::from_str(&line).expect("Could not parse JSON"))
    }
}
