//! Transports
//!
//! A transport is a bidirectional request/response channel: one message out,
//! one message back. Two are provided:
//!
//! - [`HttpTransport`]: POSTs each message to the server URL
//! - [`ProcessTransport`]: spawns the server and talks netstrings over its stdio
//!
//! A [`CancelHandle`] attached to a transport shuts the channel down from
//! another thread, so an `exchange` blocked on the server returns
//! `ProtocolError::Disconnected`.

use std::io::{BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ProtocolError;

use super::MAX_MESSAGE_SIZE;

/// Request/response channel
pub trait Transport: Send {
    /// Send one message and wait for the reply
    fn exchange(&mut self, message: &str) -> Result<String, ProtocolError>;

    /// Close the channel. Any request in flight is abandoned.
    fn close(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Make `cancel` abort an `exchange` in flight
    ///
    /// Without an override, cancelling only stops further requests; one
    /// already sent runs to completion.
    fn attach_cancel(&mut self, cancel: &CancelHandle) {
        let _ = cancel;
    }
}

type CancelHook = Box<dyn Fn() + Send>;

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    hooks: Mutex<Vec<CancelHook>>,
}

/// Cloneable switch that shuts a channel down from any thread
#[derive(Clone, Default)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel; later calls do nothing
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("cancelling verification channel");
        for hook in lock(&self.state.hooks).iter() {
            hook();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Run `hook` on cancel, or right away when already cancelled
    pub fn on_cancel(&self, hook: impl Fn() + Send + 'static) {
        let mut hooks = lock(&self.state.hooks);
        if self.is_cancelled() {
            drop(hooks);
            hook();
        } else {
            hooks.push(Box::new(hook));
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn check_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_MESSAGE_SIZE {
        Err(ProtocolError::MessageTooLarge {
            size,
            limit: MAX_MESSAGE_SIZE,
        })
    } else {
        Ok(())
    }
}

type Reply = Result<String, ProtocolError>;

/// HTTP transport (one POST per message)
///
/// Each POST runs on a worker thread so a cancel can release the caller; the
/// abandoned request finishes in the background and its reply is dropped.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    url: String,
    pending: Arc<Mutex<Option<mpsc::Sender<Reply>>>>,
    cancel: Option<CancelHandle>,
}

impl HttpTransport {
    /// `timeout: None` waits indefinitely
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, ProtocolError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            pending: Arc::new(Mutex::new(None)),
            cancel: None,
        })
    }

    fn post(client: &reqwest::blocking::Client, url: &str, message: String) -> Reply {
        let response = client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(message)
            .send()?
            .error_for_status()?;

        if let Some(length) = response.content_length() {
            check_size(usize::try_from(length).unwrap_or(usize::MAX))?;
        }
        let mut body = Vec::new();
        response
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_to_end(&mut body)
            .map_err(|e| ProtocolError::io("reading response body", e))?;
        check_size(body.len())?;

        String::from_utf8(body).map_err(|_| ProtocolError::malformed("response body is not valid UTF-8"))
    }
}

impl Transport for HttpTransport {
    fn exchange(&mut self, message: &str) -> Result<String, ProtocolError> {
        check_size(message.len())?;

        let (tx, rx) = mpsc::channel();
        *lock(&self.pending) = Some(tx.clone());
        if self.cancel.as_ref().is_some_and(CancelHandle::is_cancelled) {
            lock(&self.pending).take();
            return Err(ProtocolError::Disconnected);
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let body = message.to_string();
        std::thread::spawn(move || {
            let _ = tx.send(Self::post(&client, &url, body));
        });

        let reply = rx.recv().unwrap_or(Err(ProtocolError::Disconnected));
        lock(&self.pending).take();
        reply
    }

    fn attach_cancel(&mut self, cancel: &CancelHandle) {
        let pending = Arc::clone(&self.pending);
        cancel.on_cancel(move || {
            if let Some(tx) = lock(&pending).take() {
                let _ = tx.send(Err(ProtocolError::Disconnected));
            }
        });
        self.cancel = Some(cancel.clone());
    }
}

/// Child-process transport
///
/// Messages are framed as netstrings (`<len>:<payload>,`) on the child's
/// stdin and stdout. Cancelling kills the child, which ends a blocked read.
pub struct ProcessTransport {
    child: Arc<Mutex<Child>>,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl ProcessTransport {
    pub fn spawn(command: &str, args: &[String]) -> Result<Self, ProtocolError> {
        debug!(command, ?args, "spawning verification server");
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ProtocolError::io(format!("spawning `{command}`"), e))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProtocolError::malformed("server process has no stdout"))?;

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// OS process id of the server
    pub fn id(&self) -> u32 {
        lock(&self.child).id()
    }
}

fn kill_child(child: &mut Child) {
    if let Ok(None) = child.try_wait() {
        if let Err(e) = child.kill() {
            warn!(error = %e, "failed to kill verification server");
        }
    }
}

impl Transport for ProcessTransport {
    fn exchange(&mut self, message: &str) -> Result<String, ProtocolError> {
        let stdin = self.stdin.as_mut().ok_or(ProtocolError::Disconnected)?;
        write_netstring(stdin, message)?;
        read_netstring(&mut self.stdout)
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        // closing stdin asks the server to exit; kill covers a server that ignores it
        drop(self.stdin.take());
        let mut child = lock(&self.child);
        kill_child(&mut child);
        child
            .wait()
            .map_err(|e| ProtocolError::io("waiting for server exit", e))?;
        Ok(())
    }

    fn attach_cancel(&mut self, cancel: &CancelHandle) {
        let child = Arc::clone(&self.child);
        cancel.on_cancel(move || kill_child(&mut lock(&child)));
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.close();
        }
    }
}

/// Write `payload` as a netstring and flush
pub fn write_netstring<W: Write>(writer: &mut W, payload: &str) -> Result<(), ProtocolError> {
    check_size(payload.len())?;
    write!(writer, "{}:", payload.len())
        .and_then(|_| writer.write_all(payload.as_bytes()))
        .and_then(|_| writer.write_all(b","))
        .and_then(|_| writer.flush())
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => ProtocolError::Disconnected,
            _ => ProtocolError::io("writing request", e),
        })
}

/// Read one netstring
pub fn read_netstring<R: Read>(reader: &mut R) -> Result<String, ProtocolError> {
    let mut length: usize = 0;
    let mut digits = 0;
    loop {
        let byte = match read_byte(reader)? {
            Some(byte) => byte,
            None if digits == 0 => return Err(ProtocolError::Disconnected),
            None => return Err(ProtocolError::malformed("connection closed inside a frame header")),
        };
        match byte {
            b'0'..=b'9' => {
                digits += 1;
                length = length
                    .checked_mul(10)
                    .and_then(|l| l.checked_add(usize::from(byte - b'0')))
                    .ok_or_else(|| ProtocolError::malformed("frame length overflows"))?;
                check_size(length)?;
            }
            b':' if digits > 0 => break,
            other => {
                return Err(ProtocolError::malformed(format!(
                    "unexpected byte {other:#04x} in frame header"
                )));
            }
        }
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => ProtocolError::malformed("connection closed inside a frame"),
        _ => ProtocolError::io("reading response", e),
    })?;

    match read_byte(reader)? {
        Some(b',') => {}
        _ => return Err(ProtocolError::malformed("frame is missing its trailing comma")),
    }

    String::from_utf8(payload).map_err(|_| ProtocolError::malformed("frame is not valid UTF-8"))
}

fn read_byte<R: Read>(reader: &mut R) -> Result<Option<u8>, ProtocolError> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProtocolError::io("reading response", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_netstring_round_trip() {
        let mut buf = Vec::new();
        write_netstring(&mut buf, r#"{"id":1}"#).unwrap();
        assert_eq!(buf, b"8:{\"id\":1},");

        let mut reader = Cursor::new(buf);
        assert_eq!(read_netstring(&mut reader).unwrap(), r#"{"id":1}"#);
        assert!(matches!(read_netstring(&mut reader), Err(ProtocolError::Disconnected)));
    }

    #[test]
    fn test_netstring_empty_payload() {
        let mut reader = Cursor::new(b"0:,".to_vec());
        assert_eq!(read_netstring(&mut reader).unwrap(), "");
    }

    #[test]
    fn test_netstring_missing_comma() {
        let mut reader = Cursor::new(b"2:hi;".to_vec());
        assert!(matches!(read_netstring(&mut reader), Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn test_netstring_truncated() {
        let mut reader = Cursor::new(b"10:short".to_vec());
        assert!(matches!(read_netstring(&mut reader), Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn test_netstring_bad_header() {
        let mut reader = Cursor::new(b":abc,".to_vec());
        assert!(matches!(read_netstring(&mut reader), Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn test_cancel_runs_hooks_once() {
        let cancel = CancelHandle::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        cancel.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let other = cancel.clone();
        assert!(!other.is_cancelled());
        other.cancel();
        cancel.cancel();
        assert!(cancel.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // registered after the fact: runs immediately
        let counter = Arc::clone(&calls);
        cancel.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_netstring_too_large() {
        let header = format!("{}:", MAX_MESSAGE_SIZE + 1);
        let mut reader = Cursor::new(header.into_bytes());
        assert!(matches!(
            read_netstring(&mut reader),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }
}
