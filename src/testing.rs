//! In-process stand-in for qubesd, used by unit and CLI tests.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// One decoded call as seen by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRequest {
    pub source: String,
    pub method: String,
    pub dest: String,
    pub arg: String,
    pub payload: Vec<u8>,
}

impl FakeRequest {
    fn decode(raw: &[u8]) -> Option<Self> {
        let mut fields = raw.splitn(5, |&b| b == 0);
        let mut text = || fields.next().map(|f| String::from_utf8_lossy(f).into_owned());
        let source = text()?;
        let method = text()?;
        let dest = text()?;
        let arg = text()?;
        let payload = fields.next()?.to_vec();
        Some(Self {
            source,
            method,
            dest,
            arg,
            payload,
        })
    }
}

/// Success reply carrying `payload`.
pub fn ok(payload: &[u8]) -> Vec<u8> {
    let mut reply = b"0\0".to_vec();
    reply.extend_from_slice(payload);
    reply
}

/// Exception reply with a fully formatted message.
pub fn exception(exc_type: &str, message: &str) -> Vec<u8> {
    format!("2\0{exc_type}\0\0{message}\0").into_bytes()
}

type Handler = dyn Fn(&FakeRequest) -> Vec<u8> + Send + Sync;

/// A qubesd double listening on a socket in the temp dir.
///
/// Every request is recorded and answered by the handler. The socket is
/// removed when the value is dropped.
pub struct FakeQubesd {
    path: PathBuf,
    requests: Arc<Mutex<Vec<FakeRequest>>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

static COUNTER: AtomicUsize = AtomicUsize::new(0);

impl FakeQubesd {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&FakeRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "qvm-fake-qubesd-{}-{n}.sock",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).expect("bind fake qubesd socket");

        let handler: Arc<Handler> = Arc::new(handler);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let requests = requests.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                for conn in listener.incoming() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(mut conn) = conn else { continue };
                    let mut raw = Vec::new();
                    if conn.read_to_end(&mut raw).is_err() {
                        continue;
                    }
                    let Some(req) = FakeRequest::decode(&raw) else {
                        continue;
                    };
                    let reply = handler(&req);
                    requests.lock().unwrap().push(req);
                    let _ = conn.write_all(&reply);
                }
            })
        };

        Self {
            path,
            requests,
            stop,
            thread: Some(thread),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<FakeRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Methods received so far, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.method).collect()
    }
}

impl Drop for FakeQubesd {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // wake the accept loop
        let _ = UnixStream::connect(&self.path);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}
