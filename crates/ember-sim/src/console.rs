//! TCP pseudo-serial console.
//!
//! Emulates the firmware's UART with a non-blocking TCP socket: at most one
//! client, received bytes are interpreted as newline-terminated command
//! lines, and outbound messages are queued as text lines and drained
//! opportunistically. A lost client is tolerated; the simulator keeps
//! running without a console.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;
use std::sync::Arc;

use ember_sched::{Message, MessageSink, SchedState, TaskWake};
use ember_time::CLOCK_FREQ;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("failed to bind console listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },
    #[error("failed to configure console socket: {0}")]
    Configure(#[from] io::Error),
}

fn identify_line() -> String {
    format!("identify mcu=ember-sim clock_freq={CLOCK_FREQ}")
}

fn format_message(msg: Message) -> String {
    match msg {
        Message::Starting => "starting".to_string(),
        Message::Shutdown {
            clock,
            static_string_id,
        } => format!("shutdown clock={clock} static_string_id={static_string_id}"),
        Message::IsShutdown { static_string_id } => {
            format!("is_shutdown static_string_id={static_string_id}")
        }
        Message::Stats { count, sum, sumsq } => {
            format!("stats count={count} sum={sum} sumsq={sumsq}")
        }
        Message::Clock { clock } => format!("clock clock={clock}"),
    }
}

#[derive(Default)]
struct Inner {
    listener: Option<TcpListener>,
    client: Option<TcpStream>,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    wake: Option<Arc<TaskWake>>,
}

impl Inner {
    fn queue_line(&mut self, line: &str) {
        self.tx.extend(line.as_bytes());
        self.tx.push_back(b'\n');
    }

    fn drop_client(&mut self) {
        if self.client.take().is_some() {
            info!("console client disconnected");
        }
        self.rx.clear();
        self.tx.clear();
    }

    /// Splits complete lines out of the receive buffer, leaving any partial
    /// trailing line in place.
    fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.rx.iter().position(|&b| b == b'\n') {
            let rest = self.rx.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.rx, rest);
            line.pop();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }
}

/// Handle to the console; clones share the same socket and buffers.
#[derive(Clone)]
pub struct Console {
    addr: SocketAddr,
    inner: Rc<RefCell<Inner>>,
}

impl Console {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            inner: Rc::new(RefCell::new(Inner::default())),
        }
    }

    /// Binds the listener. Run from an init function; on failure the
    /// simulator comes up without a console.
    pub fn init(&self) -> Result<(), ConsoleError> {
        let addr = self.addr;
        let listener = TcpListener::bind(addr).map_err(|source| ConsoleError::Bind {
            addr,
            source,
        })?;
        listener.set_nonblocking(true)?;
        info!(%addr, "console listening");
        self.inner.borrow_mut().listener = Some(listener);
        Ok(())
    }

    /// The address the listener actually bound (port 0 resolves on bind).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        let inner = self.inner.borrow();
        inner.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Ties outbound messages to the task-wake flag so queued bytes are
    /// drained promptly.
    pub fn set_wake(&self, wake: Arc<TaskWake>) {
        self.inner.borrow_mut().wake = Some(wake);
    }

    /// The scheduler-facing message sink for this console.
    pub fn sink(&self) -> ConsoleSink {
        ConsoleSink {
            inner: self.inner.clone(),
        }
    }

    /// Services the socket: accepts a client, reads command lines, executes
    /// them against the scheduler, and drains pending output.
    pub fn pump(&self, sched: &mut SchedState) {
        let lines = {
            let mut inner = self.inner.borrow_mut();
            self.accept(&mut inner);
            self.receive(&mut inner);
            inner.take_lines()
        };
        for line in lines {
            self.handle_line(sched, &line);
        }
        self.flush();
    }

    fn accept(&self, inner: &mut Inner) {
        if inner.client.is_some() {
            return;
        }
        let Some(listener) = inner.listener.as_ref() else {
            return;
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    warn!(%err, "failed to configure console client");
                    return;
                }
                info!(%peer, "console client connected");
                inner.client = Some(stream);
                let line = identify_line();
                inner.queue_line(&line);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => warn!(%err, "console accept failed"),
        }
    }

    fn receive(&self, inner: &mut Inner) {
        let mut buf = [0u8; 256];
        loop {
            let Some(client) = inner.client.as_mut() else {
                return;
            };
            match client.read(&mut buf) {
                Ok(0) => {
                    inner.drop_client();
                    return;
                }
                Ok(n) => inner.rx.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    warn!(%err, "console read failed");
                    inner.drop_client();
                    return;
                }
            }
        }
    }

    fn handle_line(&self, sched: &mut SchedState, line: &str) {
        match line {
            "" => {}
            "identify" => {
                let reply = identify_line();
                self.inner.borrow_mut().queue_line(&reply);
            }
            "get_clock" => {
                let clock = sched.read_time();
                sched.send(Message::Clock { clock });
            }
            "report_shutdown" => sched.report_shutdown(),
            "clear_shutdown" => sched.clear_shutdown(),
            other => debug!(line = other, "unknown console command"),
        }
    }

    fn flush(&self) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        loop {
            if inner.tx.is_empty() {
                return;
            }
            let Some(client) = inner.client.as_mut() else {
                return;
            };
            let (chunk, _) = inner.tx.as_slices();
            match client.write(chunk) {
                Ok(0) => {
                    inner.drop_client();
                    return;
                }
                Ok(n) => {
                    inner.tx.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    warn!(%err, "console write failed");
                    inner.drop_client();
                    return;
                }
            }
        }
    }
}

/// Message sink that formats core messages as console lines.
pub struct ConsoleSink {
    inner: Rc<RefCell<Inner>>,
}

impl MessageSink for ConsoleSink {
    fn send(&mut self, msg: Message) {
        let line = format_message(msg);
        let mut inner = self.inner.borrow_mut();
        inner.queue_line(&line);
        if let Some(wake) = inner.wake.as_ref() {
            wake.wake();
        }
    }
}
