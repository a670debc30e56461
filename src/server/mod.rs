//! TCP front end: accept loop, connection tasks, response writing.
//!
//! The listener thread only accepts; each connection is handed to the
//! worker pool, where it loops reading one JSON request per recv (up to
//! 8 KiB) and writing one response, until the peer disconnects, errors,
//! or asks to leave via the `exit` action.

pub mod handler;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::scheduler::Scheduler;

/// Maximum size of a single request payload.
const REQUEST_BUFFER: usize = 8192;

pub struct Server {
    db: Arc<Database>,
    config: Config,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn new(db: Arc<Database>, config: Config) -> Self {
        Self {
            db,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Binds the listener and serves until [`Server::stop`] is called.
    /// Worker threads drain their connections before this returns.
    pub fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))?;
        let pool = Scheduler::new(self.config.workers);
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(port = self.config.port, workers = self.config.workers, "listening");

        for stream in listener.incoming() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    if let Ok(peer) = stream.peer_addr() {
                        tracing::debug!(%peer, "connection accepted");
                    }
                    let db = Arc::clone(&self.db);
                    let running = Arc::clone(&self.running);
                    pool.enqueue(move || handle_client(&db, stream, &running));
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        tracing::error!(error = %e, "accept failed");
                    } else {
                        break;
                    }
                }
            }
        }

        pool.shutdown();
        tracing::info!("server loop terminated");
        Ok(())
    }

    /// Requests shutdown. The accept loop observes the flag on its next
    /// wakeup; in-flight storage operations always run to completion.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn handle_client(db: &Database, mut stream: TcpStream, running: &AtomicBool) {
    let mut buffer = [0u8; REQUEST_BUFFER];

    while running.load(Ordering::SeqCst) {
        let read = match stream.read(&mut buffer) {
            Ok(0) => {
                tracing::debug!("client disconnected");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "socket read failed");
                break;
            }
        };

        let request = String::from_utf8_lossy(&buffer[..read]);
        let response = handler::process(db, request.trim());

        if stream.write_all(response.as_bytes()).is_err() {
            break;
        }
        if response.contains("\"status\":\"goodbye\"") {
            tracing::debug!("client left via exit");
            break;
        }
    }
}
