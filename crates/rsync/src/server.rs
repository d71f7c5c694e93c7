//! Snapshot transfer server
//!
//! One acceptor task owns the listening socket. Each connection gets a
//! frame-reader task and a response-writer task; parsed requests are handed
//! as owned tasks to a bounded pool of blocking worker threads, which do
//! the registry lookups and file reads and push responses back through the
//! connection's channel. Responses go out in handler-completion order;
//! replicas correlate by `(filename, offset)`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::TrySendError;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{RsyncError, RsyncResult};
use crate::protocol::{read_frame, write_frame, Code, Request, RequestKind, Response, ResponseKind};
use crate::reader::read_dump_file;
use crate::registry::SlotRegistry;

/// Server tunables
#[derive(Debug, Clone)]
pub struct RsyncServerOptions {
    /// Worker threads executing handlers
    pub worker_num: usize,
    /// Bound of the pending-task queue
    pub queue_depth: usize,
    /// A connection with no complete frame for this long is closed
    pub idle_timeout: Duration,
    /// Accept cap; connections over it are closed immediately
    pub max_connections: usize,
}

impl Default for RsyncServerOptions {
    fn default() -> Self {
        Self {
            worker_num: 2,
            queue_depth: 100_000,
            idle_timeout: Duration::from_secs(60),
            max_connections: 20_000,
        }
    }
}

/// An owned unit of work: the parsed request plus the handle the worker
/// answers through. The connection never owns the task.
struct Task {
    request: Request,
    resp_tx: mpsc::Sender<Response>,
}

/// Snapshot transfer server
pub struct RsyncServer {
    registry: Arc<dyn SlotRegistry>,
    addr: SocketAddr,
    opts: RsyncServerOptions,
}

/// Running server: bound address plus shutdown control
pub struct RsyncServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl RsyncServer {
    pub fn new(
        registry: Arc<dyn SlotRegistry>,
        addr: SocketAddr,
        opts: RsyncServerOptions,
    ) -> Self {
        Self {
            registry,
            addr,
            opts,
        }
    }

    /// Bind the listener, start the worker pool and the acceptor
    pub async fn start(self) -> RsyncResult<RsyncServerHandle> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        info!("rsync server listening on {}", local_addr);

        let (task_tx, task_rx) = crossbeam_channel::bounded::<Task>(self.opts.queue_depth);

        let mut workers = Vec::with_capacity(self.opts.worker_num);
        for i in 0..self.opts.worker_num {
            let rx = task_rx.clone();
            let registry = self.registry.clone();
            let handle = thread::Builder::new()
                .name(format!("rsync-worker-{}", i))
                .spawn(move || worker_loop(rx, registry))?;
            workers.push(handle);
        }
        drop(task_rx);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let acceptor = tokio::spawn(accept_loop(listener, task_tx, shutdown_rx, self.opts));

        Ok(RsyncServerHandle {
            local_addr,
            shutdown_tx,
            acceptor,
            workers,
        })
    }
}

impl RsyncServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close connections, drain queued tasks to
    /// completion, then join the workers
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.acceptor.await {
            error!("rsync acceptor task failed: {}", e);
        }
        let workers = self.workers;
        let _ = tokio::task::spawn_blocking(move || {
            for worker in workers {
                let _ = worker.join();
            }
        })
        .await;
        info!("rsync server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    task_tx: crossbeam_channel::Sender<Task>,
    mut shutdown_rx: watch::Receiver<bool>,
    opts: RsyncServerOptions,
) {
    let conn_count = Arc::new(AtomicUsize::new(0));
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("rsync server stopped accepting");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("rsync accept failed: {}", e);
                        continue;
                    }
                };
                if conn_count.load(Ordering::SeqCst) >= opts.max_connections {
                    warn!("rsync connection cap reached, closing {}", peer);
                    continue;
                }
                conn_count.fetch_add(1, Ordering::SeqCst);
                info!("rsync connection accepted from {}", peer);

                let task_tx = task_tx.clone();
                let shutdown_rx = shutdown_rx.clone();
                let conn_count = conn_count.clone();
                let idle_timeout = opts.idle_timeout;
                tokio::spawn(async move {
                    if let Err(e) =
                        handle_connection(stream, task_tx, shutdown_rx, idle_timeout).await
                    {
                        warn!("rsync connection {} closed: {}", peer, e);
                    }
                    conn_count.fetch_sub(1, Ordering::SeqCst);
                });
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    task_tx: crossbeam_channel::Sender<Task>,
    mut shutdown_rx: watch::Receiver<bool>,
    idle_timeout: Duration,
) -> RsyncResult<()> {
    let (mut reader, writer) = tokio::io::split(stream);
    let (resp_tx, resp_rx) = mpsc::channel::<Response>(64);

    let writer_task = tokio::spawn(write_loop(writer, resp_rx));
    let result = read_loop(
        &mut reader,
        &task_tx,
        &resp_tx,
        &mut shutdown_rx,
        idle_timeout,
    )
    .await;

    // dropping the last sender lets the writer drain and exit
    drop(resp_tx);
    let _ = writer_task.await;
    result
}

async fn read_loop(
    reader: &mut ReadHalf<TcpStream>,
    task_tx: &crossbeam_channel::Sender<Task>,
    resp_tx: &mpsc::Sender<Response>,
    shutdown_rx: &mut watch::Receiver<bool>,
    idle_timeout: Duration,
) -> RsyncResult<()> {
    loop {
        let payload = tokio::select! {
            _ = shutdown_rx.changed() => return Ok(()),
            _ = resp_tx.closed() => {
                warn!("rsync write side closed, dropping connection");
                return Ok(());
            }
            read = tokio::time::timeout(idle_timeout, read_frame(reader)) => match read {
                Err(_) => {
                    warn!("rsync connection idle timeout");
                    return Ok(());
                }
                Ok(Err(RsyncError::Io(e)))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(payload)) => payload,
            }
        };

        let request = Request::decode(&payload)?;
        let task = Task {
            request,
            resp_tx: resp_tx.clone(),
        };
        match task_tx.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("rsync worker queue full, dropping request");
            }
            Err(TrySendError::Disconnected(_)) => return Ok(()),
        }
    }
}

async fn write_loop(mut writer: WriteHalf<TcpStream>, mut resp_rx: mpsc::Receiver<Response>) {
    while let Some(response) = resp_rx.recv().await {
        let payload = match response.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("rsync response serialization failed: {}", e);
                break;
            }
        };
        if let Err(e) = write_frame(&mut writer, &payload).await {
            warn!("rsync response write failed: {}", e);
            break;
        }
    }
    // the receiver drops here; the reader observes the closed channel and
    // tears the connection down
}

fn worker_loop(rx: crossbeam_channel::Receiver<Task>, registry: Arc<dyn SlotRegistry>) {
    for task in rx.iter() {
        let Task { request, resp_tx } = task;
        let response = match &request.kind {
            RequestKind::Meta => handle_meta_request(registry.as_ref(), &request),
            RequestKind::File {
                filename,
                offset,
                count,
            } => handle_file_request(registry.as_ref(), &request, filename, *offset, *count),
        };
        if let Some(response) = response {
            // send failure means the connection went away; drop the response
            let _ = resp_tx.blocking_send(response);
        }
    }
}

fn meta_error(request: &Request) -> Response {
    Response {
        code: Code::Err,
        db_name: request.db_name.clone(),
        slot_id: request.slot_id,
        snapshot_uuid: String::new(),
        kind: ResponseKind::Meta {
            filenames: Vec::new(),
        },
    }
}

fn file_error(request: &Request, filename: &str, offset: u64, snapshot_uuid: String) -> Response {
    Response {
        code: Code::Err,
        db_name: request.db_name.clone(),
        slot_id: request.slot_id,
        snapshot_uuid,
        kind: ResponseKind::File {
            filename: filename.to_string(),
            offset,
            count: 0,
            data: Vec::new(),
            eof: false,
            checksum: String::new(),
        },
    }
}

/// A `None` return means no response frame is written at all: while a
/// background save runs the request is dropped and the replica's retry
/// backoff carries liveness.
fn handle_meta_request(registry: &dyn SlotRegistry, request: &Request) -> Option<Response> {
    let Some(slot) = registry.slot(&request.db_name, request.slot_id) else {
        warn!(
            "cannot find slot for db_name: {} slot_id: {}",
            request.db_name, request.slot_id
        );
        return Some(meta_error(request));
    };
    if slot.is_bg_saving() {
        warn!("waiting bgsave done...");
        return None;
    }
    let Some(meta) = slot.dump_meta() else {
        warn!(
            "no dump advertised for db_name: {} slot_id: {}",
            request.db_name, request.slot_id
        );
        return Some(meta_error(request));
    };

    info!(
        "rsync meta request, snapshot_uuid: {} files count: {}",
        meta.snapshot_uuid,
        meta.filenames.len()
    );
    Some(Response {
        code: Code::Ok,
        db_name: request.db_name.clone(),
        slot_id: request.slot_id,
        snapshot_uuid: meta.snapshot_uuid,
        kind: ResponseKind::Meta {
            filenames: meta.filenames,
        },
    })
}

fn handle_file_request(
    registry: &dyn SlotRegistry,
    request: &Request,
    filename: &str,
    offset: u64,
    count: u64,
) -> Option<Response> {
    let Some(slot) = registry.slot(&request.db_name, request.slot_id) else {
        warn!(
            "cannot find slot for db_name: {} slot_id: {}",
            request.db_name, request.slot_id
        );
        return Some(file_error(request, filename, offset, String::new()));
    };
    let Some(snapshot_uuid) = slot.dump_uuid() else {
        warn!("rsync server get snapshot uuid failed");
        return Some(file_error(request, filename, offset, String::new()));
    };
    let Some(dump_dir) = slot.dump_dir() else {
        warn!("rsync server get dump directory failed");
        return Some(file_error(request, filename, offset, snapshot_uuid));
    };

    // filenames come from our own meta listing; anything trying to leave
    // the dump directory is rejected
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        warn!("rejecting rsync filename {:?}", filename);
        return Some(file_error(request, filename, offset, snapshot_uuid));
    }

    let filepath = dump_dir.join(filename);
    let (data, checksum) = match read_dump_file(&filepath, offset, count) {
        Ok(read) => read,
        Err(e) => {
            warn!("unable to read from {}: {}", filepath.display(), e);
            return Some(file_error(request, filename, offset, snapshot_uuid));
        }
    };

    let eof = checksum.is_some();
    Some(Response {
        code: Code::Ok,
        db_name: request.db_name.clone(),
        slot_id: request.slot_id,
        snapshot_uuid,
        kind: ResponseKind::File {
            filename: filename.to_string(),
            offset,
            count: data.len() as u64,
            data,
            eof,
            checksum: checksum.unwrap_or_default(),
        },
    })
}
