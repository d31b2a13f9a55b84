//! Outbound message queue.
//!
//! The consensus thread must never block on the network. Encoded messages
//! are pushed into a bounded queue and a dedicated thread hands them to the
//! [`Transport`]. When the queue is full the newest message is dropped; the
//! protocol tolerates loss through timeouts and recovery.

use {
    crate::{
        error::{Result, ServiceError},
        transport::Transport,
    },
    crossbeam_channel::{Sender, TrySendError},
    log::*,
    std::{
        sync::Arc,
        thread::{self, Builder, JoinHandle},
    },
};

pub struct Broadcaster {
    sender: Option<Sender<Vec<u8>>>,
    thread: Option<JoinHandle<()>>,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn Transport>, capacity: usize) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded::<Vec<u8>>(capacity);
        let thread = Builder::new()
            .name("dbftBroadcast".to_string())
            .spawn(move || {
                for bytes in receiver {
                    if let Err(err) = transport.broadcast(&bytes) {
                        warn!("Broadcaster: delivery incomplete: {err}");
                    }
                }
                debug!("Broadcaster: queue closed");
            })
            .map_err(|source| ServiceError::Spawn {
                name: "dbftBroadcast",
                source,
            })?;

        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    /// Queue `bytes` for broadcast. Returns `false` if it was dropped.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(bytes) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Broadcaster: outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Broadcaster: broadcast thread gone, dropping message");
                false
            }
        }
    }

    /// Flush the queue and wait for the broadcast thread.
    pub fn join(mut self) -> thread::Result<()> {
        self.sender.take();
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        // Closing the channel ends the thread; it is detached if not joined.
        self.sender.take();
    }
}
