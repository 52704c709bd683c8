//! An in-process memcached stand-in speaking the `get`/`set` text protocol.
//!
//! It can be told to drop connections without answering, which is how a
//! server restart or an idle-timeout reset looks to a client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMode {
    Normal,
    /// The first `n` connections are closed after reading one command.
    DropConnections(usize),
    /// Every connection is closed after reading one command.
    DropAll,
    /// Every command is answered with `SERVER_ERROR`.
    ServerError,
}

type Store = Arc<Mutex<HashMap<String, Vec<u8>>>>;

pub struct FakeMemcached {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    commands: Arc<AtomicUsize>,
    store: Store,
    task: JoinHandle<()>,
}

impl FakeMemcached {
    pub async fn start(mode: FakeMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake memcached");
        let addr = listener.local_addr().expect("fake memcached address");

        let connections = Arc::new(AtomicUsize::new(0));
        let commands = Arc::new(AtomicUsize::new(0));
        let store: Store = Arc::new(Mutex::new(HashMap::new()));

        let task = {
            let connections = connections.clone();
            let commands = commands.clone();
            let store = store.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let n = connections.fetch_add(1, Ordering::SeqCst) + 1;
                    let drop_after_read = match mode {
                        FakeMode::DropConnections(k) => n <= k,
                        FakeMode::DropAll => true,
                        _ => false,
                    };
                    let commands = commands.clone();
                    let store = store.clone();
                    tokio::spawn(async move {
                        let _ = serve(stream, mode, drop_after_read, commands, store).await;
                    });
                }
            })
        };

        Self {
            addr,
            connections,
            commands,
            store,
            task,
        }
    }

    /// `host:port` for the client.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    pub async fn stored(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().await.get(key).cloned()
    }
}

impl Drop for FakeMemcached {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    mode: FakeMode,
    drop_after_read: bool,
    commands: Arc<AtomicUsize>,
    store: Store,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        commands.fetch_add(1, Ordering::SeqCst);
        if drop_after_read {
            return Ok(());
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["get", key] => {
                if mode == FakeMode::ServerError {
                    writer.write_all(b"SERVER_ERROR out of memory\r\n").await?;
                    continue;
                }
                let value = store.lock().await.get(*key).cloned();
                if let Some(value) = value {
                    writer
                        .write_all(format!("VALUE {} 0 {}\r\n", key, value.len()).as_bytes())
                        .await?;
                    writer.write_all(&value).await?;
                    writer.write_all(b"\r\n").await?;
                }
                writer.write_all(b"END\r\n").await?;
            }
            ["set", key, _flags, _exptime, len] => {
                let len: usize = len.parse().unwrap_or(0);
                let mut data = vec![0u8; len + 2];
                reader.read_exact(&mut data).await?;
                data.truncate(len);
                if mode == FakeMode::ServerError {
                    writer.write_all(b"SERVER_ERROR out of memory\r\n").await?;
                    continue;
                }
                store.lock().await.insert(key.to_string(), data);
                writer.write_all(b"STORED\r\n").await?;
            }
            _ => writer.write_all(b"ERROR\r\n").await?,
        }
    }
}
