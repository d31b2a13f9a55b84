//! The long-running dBFT consensus service.
//!
//! One thread owns the [`DbftAdapter`] and serializes every event into it:
//! raw messages from the transport, ledger notifications and timer
//! expiries. Outbound messages are encoded and handed to the
//! [`Broadcaster`] thread so the consensus thread never blocks on the
//! network.
//!
//! ```text
//!  ┌─────────────────────────────────────────────────────┐
//!  │                    DbftService                      │
//!  │                                                     │
//!  │  inbound ──┐                                        │
//!  │            ├─▶ select! ─▶ DbftAdapter ─▶ Broadcaster ─▶ Transport
//!  │  events ───┘       ▲          │                     │
//!  │                    │          ▼                     │
//!  │             TimeoutScheduler  finalized blocks, ───────▶ Subscribers
//!  │                               evidence               │
//!  └─────────────────────────────────────────────────────┘
//! ```

use {
    crate::{
        adapter::{AdapterOutput, DbftAdapter},
        broadcaster::Broadcaster,
        config::ServiceConfig,
        error::{Result, ServiceError},
        transport::{InboundMessage, Transport},
    },
    crossbeam_channel::{never, select, Receiver, Sender},
    dbft_consensus::{BlockIndex, ConflictingPayloadEvidence, ConsensusEngine, FinalizedBlock},
    log::*,
    solana_hash::Hash,
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{self, Builder, JoinHandle},
        time::Duration,
    },
};

/// Notifications from the ledger and transaction pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEvent {
    /// A block arrived through sync rather than local consensus.
    ExternalBlockFinalized(BlockIndex),
    /// A transaction entered the local pool.
    TransactionAvailable(Hash),
}

/// Where the service forwards what consensus produces besides network
/// traffic. Unset channels are skipped.
#[derive(Debug, Default, Clone)]
pub struct Subscribers {
    pub finalized: Option<Sender<FinalizedBlock>>,
    /// Conflicting payloads, drained from the engine after every event.
    pub evidence: Option<Sender<ConflictingPayloadEvidence>>,
}

/// Why the event loop woke up.
enum Wake {
    Inbound(InboundMessage),
    Event(LedgerEvent),
    InboundClosed,
    EventsClosed,
    Idle,
}

/// Runs the consensus event loop on a dedicated thread.
#[derive(Debug)]
pub struct DbftService {
    thread: JoinHandle<Result<()>>,
}

impl DbftService {
    /// Validate `config`, then spawn the broadcast and consensus threads.
    ///
    /// The service stops when `exit` is set or the inbound channel
    /// disconnects. A fatal engine error also stops it, and is returned
    /// from [`join`](Self::join).
    pub fn new(
        config: ServiceConfig,
        engine: ConsensusEngine,
        inbound: Receiver<InboundMessage>,
        events: Receiver<LedgerEvent>,
        transport: Arc<dyn Transport>,
        subscribers: Subscribers,
        exit: Arc<AtomicBool>,
    ) -> Result<Self> {
        config.validate()?;
        let broadcaster = Broadcaster::new(transport, config.outbound_queue_capacity)?;
        let poll_interval = config.poll_interval();
        let mut adapter = DbftAdapter::new(engine);

        let thread = Builder::new()
            .name("dbftConsensus".to_string())
            .spawn(move || {
                let result = Self::run(
                    &mut adapter,
                    poll_interval,
                    &inbound,
                    events,
                    &broadcaster,
                    &subscribers,
                    &exit,
                );
                if let Err(err) = &result {
                    error!("DbftService: consensus stopped: {err}");
                }
                if broadcaster.join().is_err() {
                    warn!("DbftService: broadcast thread panicked");
                }
                result
            })
            .map_err(|source| ServiceError::Spawn {
                name: "dbftConsensus",
                source,
            })?;

        Ok(Self { thread })
    }

    /// Wait for the consensus thread to finish.
    pub fn join(self) -> thread::Result<Result<()>> {
        self.thread.join()
    }

    fn run(
        adapter: &mut DbftAdapter,
        poll_interval: Duration,
        inbound: &Receiver<InboundMessage>,
        mut events: Receiver<LedgerEvent>,
        broadcaster: &Broadcaster,
        subscribers: &Subscribers,
        exit: &AtomicBool,
    ) -> Result<()> {
        let output = adapter.start()?;
        info!(
            "DbftService: starting at height {:?} (identity: {})",
            adapter.block_index(),
            adapter.engine().identity()
        );
        Self::dispatch(output, broadcaster, subscribers);

        loop {
            if exit.load(Ordering::Relaxed) {
                info!("DbftService: exit signal received, shutting down");
                break;
            }

            let wait = adapter
                .time_to_next_timeout()
                .map_or(poll_interval, |d| d.min(poll_interval));

            let wake = select! {
                recv(inbound) -> message => message.map_or(Wake::InboundClosed, Wake::Inbound),
                recv(events) -> event => event.map_or(Wake::EventsClosed, Wake::Event),
                default(wait) => Wake::Idle,
            };
            let output = match wake {
                Wake::Inbound(message) => {
                    trace!(
                        "DbftService: {} bytes from {}",
                        message.bytes.len(),
                        message.sender_addr
                    );
                    adapter.handle_wire(&message.bytes)?
                }
                Wake::Event(LedgerEvent::ExternalBlockFinalized(height)) => {
                    adapter.on_external_block(height)?
                }
                Wake::Event(LedgerEvent::TransactionAvailable(hash)) => {
                    adapter.on_transaction(hash)?
                }
                Wake::InboundClosed => {
                    info!("DbftService: inbound channel disconnected, shutting down");
                    break;
                }
                Wake::EventsClosed => {
                    debug!("DbftService: ledger event channel closed");
                    events = never();
                    AdapterOutput::default()
                }
                Wake::Idle => AdapterOutput::default(),
            };
            Self::dispatch(output, broadcaster, subscribers);

            let output = adapter.check_timeouts()?;
            Self::dispatch(output, broadcaster, subscribers);
        }

        info!(
            "DbftService: consensus loop exited at height {:?} view {:?}",
            adapter.block_index(),
            adapter.view_number()
        );
        Ok(())
    }

    fn dispatch(output: AdapterOutput, broadcaster: &Broadcaster, subscribers: &Subscribers) {
        for message in &output.messages {
            match message.encode() {
                Ok(bytes) => {
                    trace!(
                        "DbftService: broadcasting {} for h={} v={}",
                        message.kind(),
                        message.block_index(),
                        message.view_number()
                    );
                    broadcaster.send(bytes);
                }
                Err(err) => warn!("DbftService: failed to encode {}: {err}", message.kind()),
            }
        }
        for evidence in output.evidence {
            warn!(
                "DbftService: {} by {} at h={} v={}",
                evidence.kind, evidence.validator, evidence.block_index, evidence.view_number
            );
            if let Some(sender) = &subscribers.evidence {
                if sender.send(evidence).is_err() {
                    debug!("DbftService: no evidence subscriber");
                }
            }
        }
        if let (Some(block), Some(sender)) = (output.finalized, &subscribers.finalized) {
            if sender.send(block).is_err() {
                debug!("DbftService: no finalized block subscriber");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{error::TransportError, transport::ChannelTransport},
        assert_matches::assert_matches,
        dbft_consensus::{
            test_utils::{make_committee, make_signers, MemoryLedger, StaticTransactionSource},
            DbftConfig, EngineError, SystemClock,
        },
        std::time::Instant,
    };

    struct NullTransport;

    impl Transport for NullTransport {
        fn broadcast(&self, _bytes: &[u8]) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    fn service_config(block_time_ms: u64) -> ServiceConfig {
        ServiceConfig {
            dbft: DbftConfig {
                block_time_ms,
                ..DbftConfig::dev_default()
            },
            poll_interval_ms: 5,
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn test_four_validators_finalize_blocks() {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = service_config(50);
        let (keypairs, validators) = make_committee(4);
        let signers = make_signers(&keypairs);
        let mesh = ChannelTransport::mesh(4, 1_024);
        let exit = Arc::new(AtomicBool::new(false));
        let (finalized_sender, finalized_receiver) = crossbeam_channel::unbounded();

        let mut ledgers = Vec::new();
        let mut services = Vec::new();
        let mut event_senders = Vec::new();
        for (signer, (transport, inbox)) in signers.into_iter().zip(mesh) {
            let ledger = MemoryLedger::new(0, validators.clone());
            let engine = ConsensusEngine::new(
                config.dbft.clone(),
                Box::new(ledger.clone()),
                Box::new(StaticTransactionSource::default()),
                Box::new(signer),
                Box::new(SystemClock),
            );
            let (event_sender, events) = crossbeam_channel::unbounded();
            let service = DbftService::new(
                config.clone(),
                engine,
                inbox,
                events,
                Arc::new(transport),
                Subscribers {
                    finalized: Some(finalized_sender.clone()),
                    ..Subscribers::default()
                },
                exit.clone(),
            )
            .unwrap();
            ledgers.push(ledger);
            services.push(service);
            event_senders.push(event_sender);
        }

        let deadline = Instant::now() + Duration::from_secs(20);
        while ledgers.iter().any(|l| l.blocks().len() < 2) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        exit.store(true, Ordering::Relaxed);
        for service in services {
            service.join().unwrap().unwrap();
        }

        for height in 0..2 {
            let hashes: Vec<Hash> = ledgers
                .iter()
                .map(|l| l.block_at(height).expect("block finalized").hash())
                .collect();
            assert!(hashes.windows(2).all(|w| w[0] == w[1]));
        }
        assert!(finalized_receiver.try_iter().count() >= 8);
    }

    #[test]
    fn test_persist_failure_stops_service() {
        let config = service_config(5);
        let (keypairs, validators) = make_committee(1);
        let ledger = MemoryLedger::new(0, validators);
        ledger.set_fail_persist(true);
        let engine = ConsensusEngine::new(
            config.dbft.clone(),
            Box::new(ledger),
            Box::new(StaticTransactionSource::default()),
            Box::new(make_signers(&keypairs).remove(0)),
            Box::new(SystemClock),
        );
        let (_inbound_sender, inbound) = crossbeam_channel::unbounded();
        let (_event_sender, events) = crossbeam_channel::unbounded();
        let service = DbftService::new(
            config,
            engine,
            inbound,
            events,
            Arc::new(NullTransport),
            Subscribers::default(),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert_matches!(
            service.join().unwrap(),
            Err(ServiceError::Engine(EngineError::Persist(_)))
        );
    }

    #[test]
    fn test_inbound_disconnect_stops_service() {
        let config = service_config(1_000);
        let (keypairs, validators) = make_committee(4);
        let engine = ConsensusEngine::new(
            config.dbft.clone(),
            Box::new(MemoryLedger::new(0, validators)),
            Box::new(StaticTransactionSource::default()),
            Box::new(make_signers(&keypairs).remove(1)),
            Box::new(SystemClock),
        );
        let (inbound_sender, inbound) = crossbeam_channel::unbounded();
        let (event_sender, events) = crossbeam_channel::unbounded();
        drop(event_sender);
        let service = DbftService::new(
            config,
            engine,
            inbound,
            events,
            Arc::new(NullTransport),
            Subscribers::default(),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        drop(inbound_sender);
        assert_matches!(service.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ServiceConfig {
            outbound_queue_capacity: 0,
            ..ServiceConfig::default()
        };
        let (keypairs, validators) = make_committee(1);
        let engine = ConsensusEngine::new(
            config.dbft.clone(),
            Box::new(MemoryLedger::new(0, validators)),
            Box::new(StaticTransactionSource::default()),
            Box::new(make_signers(&keypairs).remove(0)),
            Box::new(SystemClock),
        );
        let (_inbound_sender, inbound) = crossbeam_channel::unbounded();
        let (_event_sender, events) = crossbeam_channel::unbounded();
        let result = DbftService::new(
            config,
            engine,
            inbound,
            events,
            Arc::new(NullTransport),
            Subscribers::default(),
            Arc::new(AtomicBool::new(false)),
        );
        assert_matches!(result, Err(ServiceError::InvalidQueueCapacity));
    }
}
