//! An in-process Redis stand-in speaking enough RESP2 for `GET`, `SET`
//! and `SETEX`. Connection setup commands are acknowledged with `+OK`.
//!
//! With a per-connection command limit it hangs up after answering,
//! which is what a client sees when the server restarts underneath it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type Store = Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>;

pub struct FakeRedis {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    store: Store,
    task: JoinHandle<()>,
}

impl FakeRedis {
    /// Serve until dropped. `close_after` caps the commands answered per connection.
    pub async fn start(close_after: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake redis");
        let addr = listener.local_addr().expect("fake redis address");

        let connections = Arc::new(AtomicUsize::new(0));
        let store: Store = Arc::new(Mutex::new(HashMap::new()));

        let task = {
            let connections = connections.clone();
            let store = store.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let store = store.clone();
                    tokio::spawn(async move {
                        let _ = serve(stream, close_after, store).await;
                    });
                }
            })
        };

        Self {
            addr,
            connections,
            store,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}/0", self.addr)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn stored(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().await.get(key.as_bytes()).cloned()
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, close_after: Option<usize>, store: Store) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut answered = 0;

    while let Some(args) = read_command(&mut reader).await? {
        let name = args
            .first()
            .map(|a| String::from_utf8_lossy(a).to_uppercase())
            .unwrap_or_default();
        match (name.as_str(), args.as_slice()) {
            ("GET", [_, key]) => match store.lock().await.get(key).cloned() {
                Some(value) => {
                    writer
                        .write_all(format!("${}\r\n", value.len()).as_bytes())
                        .await?;
                    writer.write_all(&value).await?;
                    writer.write_all(b"\r\n").await?;
                }
                None => writer.write_all(b"$-1\r\n").await?,
            },
            ("SET", [_, key, value, ..]) | ("SETEX", [_, key, _, value]) => {
                store.lock().await.insert(key.clone(), value.clone());
                writer.write_all(b"+OK\r\n").await?;
            }
            _ => writer.write_all(b"+OK\r\n").await?,
        }

        answered += 1;
        if close_after.is_some_and(|limit| answered >= limit) {
            writer.flush().await?;
            return Ok(());
        }
    }
    Ok(())
}

/// One `*N` array of bulk strings; `None` at end of stream.
async fn read_command<R>(reader: &mut BufReader<R>) -> std::io::Result<Option<Vec<Vec<u8>>>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count: usize = line.trim().trim_start_matches('*').parse().unwrap_or(0);

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len: usize = line.trim().trim_start_matches('$').parse().unwrap_or(0);
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data).await?;
        data.truncate(len);
        args.push(data);
    }
    Ok(Some(args))
}
