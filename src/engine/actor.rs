use super::{
    ingress::{Mailbox, Message},
    Config, Error, Status,
};
use crate::{
    block::{Block, BlockSummary},
    chain::Chain,
    record::{RecordId, VoteRecord},
    sealer,
    store::{self, Store},
    validator::{self, Report},
};
use futures::{
    channel::{mpsc, oneshot},
    StreamExt,
};
use std::{
    collections::HashSet,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Results reported back to the event loop by seal and persistence tasks.
enum Event {
    Sealed {
        epoch: u64,
        sealed: HashSet<RecordId>,
        result: Result<Block, sealer::Error>,
    },
    Saved(Result<(), store::Error>),
}

/// Requests to the persistence task.
enum Flush {
    Append(Block),
    Rewrite(Vec<Block>),
}

/// The ledger's single writer: owns the chain and applies every mutation
/// from one event loop.
pub struct Engine<S: Store> {
    store: S,
    receiver: mpsc::Receiver<Message>,
    state: State,
}

struct State {
    config: Config,
    chain: Chain,
    /// Cached validation result; cleared on every mutation.
    report: Option<Report>,
    degraded: bool,
    sealing: bool,
    /// Bumped on reinitialize so in-flight seal results are discarded.
    epoch: u64,
    waiters: Vec<oneshot::Sender<Result<Option<BlockSummary>, Error>>>,
}

impl<S: Store> Engine<S> {
    /// Load the chain from `store` (mining a fresh genesis if the store is
    /// empty) and return the engine alongside its mailbox.
    ///
    /// A load failure does not abort startup: the ledger starts from a fresh
    /// genesis in memory-only mode and flags itself degraded.
    pub async fn init(mut store: S, config: Config) -> Result<(Self, Mailbox), Error> {
        let mut degraded = false;
        let chain = match store.load().await {
            Ok(blocks) if blocks.is_empty() => {
                let chain = Chain::genesis(now_ms(), config.difficulty, config.max_attempts)?;
                if let Err(err) = store.rewrite(chain.blocks()).await {
                    error!(?err, "failed to persist genesis; running memory-only");
                    degraded = true;
                }
                info!(digest = %chain.latest().digest(), "created genesis block");
                chain
            }
            Ok(blocks) => {
                info!(blocks = blocks.len(), "loaded chain");
                Chain::from_blocks(blocks)
            }
            Err(err) => {
                error!(?err, "failed to load chain; starting fresh memory-only");
                degraded = true;
                Chain::genesis(now_ms(), config.difficulty, config.max_attempts)?
            }
        };

        let report = validator::validate(chain.blocks(), config.difficulty);
        if !report.valid {
            warn!(
                index = ?report.first_invalid,
                fault = ?report.fault,
                "loaded chain fails validation"
            );
        }

        let (sender, receiver) = mpsc::channel(config.mailbox_size);
        let engine = Self {
            store,
            receiver,
            state: State {
                config,
                chain,
                report: Some(report),
                degraded,
                sealing: false,
                epoch: 0,
                waiters: Vec::new(),
            },
        };
        Ok((engine, Mailbox::new(sender)))
    }

    /// Run the event loop until every mailbox clone is dropped.
    pub async fn run(self) {
        let Self {
            store,
            mut receiver,
            mut state,
        } = self;

        let (events_tx, mut events) = unbounded_channel();
        let (flush_tx, flush_rx) = unbounded_channel();
        tokio::spawn(flusher(store, flush_rx, events_tx.clone()));

        let mut ticker = tokio::time::interval(state.config.seal_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                message = receiver.next() => {
                    let Some(message) = message else { break };
                    state.handle(message, &events_tx, &flush_tx);
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    state.handle_event(event, &flush_tx);
                }
                _ = ticker.tick() => {
                    if !state.sealing && !state.chain.mempool().is_empty() {
                        state.start_seal(&events_tx);
                    }
                }
            }
        }
        debug!("mailbox closed; engine stopped");
    }
}

impl State {
    fn handle(
        &mut self,
        message: Message,
        events: &UnboundedSender<Event>,
        flush: &UnboundedSender<Flush>,
    ) {
        match message {
            Message::Admit {
                election_id,
                candidate_id,
                voter_id,
                response,
            } => {
                let result = self.admit(election_id, candidate_id, voter_id);
                let _ = response.send(result);
                if self.chain.mempool().len() >= self.config.seal_threshold && !self.sealing {
                    self.start_seal(events);
                }
            }
            Message::Mine { response } => {
                if self.sealing {
                    self.waiters.push(response);
                } else if self.chain.mempool().is_empty() {
                    let _ = response.send(Ok(None));
                } else {
                    self.start_seal(events);
                    self.waiters.push(response);
                }
            }
            Message::Verify { id, response } => {
                let _ = response.send(self.chain.locate(&id));
            }
            Message::HasVoted {
                election_id,
                voter_id,
                response,
            } => {
                let _ = response.send(self.chain.has_voted(&election_id, &voter_id));
            }
            Message::RecordsForElection {
                election_id,
                response,
            } => {
                let records = self
                    .chain
                    .records_for_election(&election_id)
                    .cloned()
                    .collect();
                let _ = response.send(records);
            }
            Message::VoterHistory { voter_id, response } => {
                let _ = response.send(self.chain.voter_history(&voter_id));
            }
            Message::Tally {
                election_id,
                response,
            } => {
                let _ = response.send(self.chain.tally(&election_id));
            }
            Message::Status { response } => {
                let _ = response.send(self.status());
            }
            Message::Reinitialize { response } => {
                let _ = response.send(self.reinitialize(flush));
            }
        }
    }

    fn admit(
        &mut self,
        election_id: String,
        candidate_id: String,
        voter_id: String,
    ) -> Result<RecordId, Error> {
        let record = VoteRecord::new(
            election_id,
            candidate_id,
            voter_id,
            now_ms(),
            &self.config.secret,
        )?;
        let id = record.id();
        self.chain.admit(record)?;
        debug!(%id, pending = self.chain.mempool().len(), "admitted record");
        Ok(id)
    }

    /// Dispatch a proof-of-work search over a snapshot of the mempool. The
    /// search runs on the blocking pool; admissions proceed meanwhile and any
    /// record admitted after this snapshot survives the drain.
    fn start_seal(&mut self, events: &UnboundedSender<Event>) {
        let batch = self.chain.batch();
        debug_assert!(!batch.is_empty());
        let sealed: HashSet<RecordId> = batch.iter().map(|record| record.id()).collect();
        let index = self.chain.height();
        let previous = self.chain.latest().digest();
        let sealed_at = now_ms();
        let difficulty = self.config.difficulty;
        let max_attempts = self.config.max_attempts;
        let epoch = self.epoch;
        self.sealing = true;
        debug!(index, records = batch.len(), "sealing batch");

        let events = events.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                sealer::seal(index, sealed_at, &batch, previous, difficulty, max_attempts)
            })
            .await
            .expect("sealer task panicked");
            let _ = events.send(Event::Sealed {
                epoch,
                sealed,
                result,
            });
        });
    }

    fn handle_event(&mut self, event: Event, flush: &UnboundedSender<Flush>) {
        match event {
            Event::Sealed { epoch, .. } if epoch != self.epoch => {
                debug!("discarding seal from a reinitialized ledger");
            }
            Event::Sealed { sealed, result, .. } => {
                self.sealing = false;
                match result {
                    Ok(block) => {
                        let summary = BlockSummary::from(&block);
                        info!(
                            index = summary.index,
                            records = summary.records,
                            digest = %summary.digest,
                            "sealed block"
                        );
                        self.chain.push(block.clone());
                        self.chain.drain(&sealed);
                        self.report = None;
                        let request = if self.degraded {
                            Flush::Rewrite(self.chain.blocks().to_vec())
                        } else {
                            Flush::Append(block)
                        };
                        let _ = flush.send(request);
                        for waiter in self.waiters.drain(..) {
                            let _ = waiter.send(Ok(Some(summary.clone())));
                        }
                    }
                    Err(err) => {
                        warn!(?err, "sealing failed; batch retained for retry");
                        for waiter in self.waiters.drain(..) {
                            let _ = waiter.send(Err(Error::Sealer(err)));
                        }
                    }
                }
            }
            Event::Saved(Ok(())) => {
                if self.degraded {
                    info!("persistence recovered");
                    self.degraded = false;
                }
            }
            Event::Saved(Err(err)) => {
                error!(?err, "failed to persist chain; continuing memory-only");
                self.degraded = true;
            }
        }
    }

    fn status(&mut self) -> Status {
        let report = match self.report {
            Some(report) => report,
            None => {
                let report = validator::validate(self.chain.blocks(), self.config.difficulty);
                self.report = Some(report);
                report
            }
        };
        Status {
            chain_length: self.chain.height(),
            mempool_size: self.chain.mempool().len(),
            latest: BlockSummary::from(self.chain.latest()),
            valid: report.valid,
            degraded: self.degraded,
        }
    }

    fn reinitialize(&mut self, flush: &UnboundedSender<Flush>) -> Result<(), Error> {
        warn!("reinitializing ledger; discarding all sealed blocks and pending records");
        let chain = Chain::genesis(now_ms(), self.config.difficulty, self.config.max_attempts)?;
        self.chain = chain;
        self.epoch += 1;
        self.sealing = false;
        self.report = None;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(None));
        }
        let _ = flush.send(Flush::Rewrite(self.chain.blocks().to_vec()));
        Ok(())
    }
}

/// Owns the store and applies flush requests in order, reporting each result
/// back to the event loop.
///
/// After a failed append the store may be behind the in-memory chain, so
/// further appends are skipped (they would leave a gap) until a rewrite
/// resynchronizes the file wholesale.
async fn flusher<S: Store>(
    mut store: S,
    mut requests: UnboundedReceiver<Flush>,
    events: UnboundedSender<Event>,
) {
    let mut dirty = false;
    while let Some(request) = requests.recv().await {
        let result = match request {
            Flush::Append(_) if dirty => Err(store::Error::Io(std::io::Error::other(
                "append skipped while store is out of sync",
            ))),
            Flush::Append(block) => store.append(&block).await,
            Flush::Rewrite(blocks) => store.rewrite(&blocks).await,
        };
        dirty = result.is_err();
        if events.send(Event::Saved(result)).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{self, Verification},
        store::{disk::Disk, memory::Memory},
    };
    use rand::Rng;
    use std::{env, time::Duration};

    fn config() -> Config {
        let mut config = Config::new(b"test-secret".to_vec());
        config.difficulty = 1;
        config.seal_interval = Duration::from_secs(3600);
        config
    }

    async fn start(store: Memory, config: Config) -> Mailbox {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .try_init();
        let (engine, mailbox) = Engine::init(store, config).await.unwrap();
        tokio::spawn(engine.run());
        mailbox
    }

    async fn wait_for(mailbox: &mut Mailbox, condition: impl Fn(&Status) -> bool) -> Status {
        // Generous budget: the nonce search time is geometrically distributed
        // and can stretch well past a few seconds on a slow single-core host.
        for _ in 0..6000 {
            let status = mailbox.status().await.unwrap();
            if condition(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_threshold_seal_and_verify() {
        let mut config = config();
        config.seal_threshold = 3;
        let mut mailbox = start(Memory::new(), config).await;

        let mut ids = Vec::new();
        for voter in ["v1", "v2", "v3"] {
            ids.push(mailbox.admit("e1", "c1", voter).await.unwrap());
        }
        let status = wait_for(&mut mailbox, |s| s.chain_length == 2).await;
        assert_eq!(status.mempool_size, 0);
        assert!(status.valid);
        assert_eq!(status.latest.index, 1);
        assert_eq!(status.latest.records, 3);

        for id in &ids {
            assert_eq!(
                mailbox.verify(*id).await.unwrap(),
                Verification::Included {
                    index: 1,
                    digest: status.latest.digest
                }
            );
        }
        assert!(mailbox.has_voted("e1", "v1").await.unwrap());

        // A voter already sealed into block 1 is still guarded.
        assert_eq!(
            mailbox.admit("e1", "c2", "v1").await,
            Err(Error::Chain(chain::Error::Duplicate))
        );
    }

    #[tokio::test]
    async fn test_manual_mine() {
        let mut config = config();
        config.seal_threshold = 100;
        let mut mailbox = start(Memory::new(), config).await;

        assert_eq!(mailbox.mine().await.unwrap(), None);

        mailbox.admit("e1", "c1", "v1").await.unwrap();
        mailbox.admit("e1", "c2", "v2").await.unwrap();
        let summary = mailbox.mine().await.unwrap().unwrap();
        assert_eq!(summary.index, 1);
        assert_eq!(summary.records, 2);

        let status = mailbox.status().await.unwrap();
        assert_eq!(status.chain_length, 2);
        assert_eq!(status.mempool_size, 0);
    }

    #[tokio::test]
    async fn test_pending_records_are_visible() {
        let mut config = config();
        config.seal_threshold = 100;
        let mut mailbox = start(Memory::new(), config).await;

        let id = mailbox.admit("e1", "c1", "v1").await.unwrap();
        assert!(mailbox.has_voted("e1", "v1").await.unwrap());
        assert_eq!(mailbox.verify(id).await.unwrap(), Verification::Pending);

        let history = mailbox.voter_history("v1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].sealed.is_none());

        let counts = mailbox.tally("e1").await.unwrap();
        assert_eq!(counts.get("c1"), Some(&1));

        let records = mailbox.records_for_election("e1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].voter_id(), "v1");
    }

    #[tokio::test]
    async fn test_rejects_malformed_admissions() {
        let mut mailbox = start(Memory::new(), config()).await;
        assert!(matches!(
            mailbox.admit("", "c1", "v1").await,
            Err(Error::Record(_))
        ));
    }

    #[tokio::test]
    async fn test_timer_seals_below_threshold() {
        let mut config = config();
        config.seal_threshold = 100;
        config.seal_interval = Duration::from_millis(100);
        let mut mailbox = start(Memory::new(), config).await;

        mailbox.admit("e1", "c1", "v1").await.unwrap();
        let status = wait_for(&mut mailbox, |s| s.chain_length == 2).await;
        assert_eq!(status.mempool_size, 0);
    }

    #[tokio::test]
    async fn test_admit_during_seal_survives_drain() {
        let mut config = config();
        config.seal_threshold = 1;
        // A slow search, so the second admit lands while the first seal is
        // still in flight.
        config.difficulty = 5;
        let mut mailbox = start(Memory::new(), config).await;

        mailbox.admit("e1", "c1", "v1").await.unwrap();
        let id = mailbox.admit("e1", "c1", "v2").await.unwrap();

        // Only the snapshot taken at the first admit is sealed; the later
        // record stays pending instead of being drained away with it.
        let status = wait_for(&mut mailbox, |s| s.chain_length == 2).await;
        assert_eq!(status.latest.records, 1);
        assert_eq!(status.mempool_size, 1);
        assert_eq!(mailbox.verify(id).await.unwrap(), Verification::Pending);

        let summary = mailbox.mine().await.unwrap().unwrap();
        assert_eq!(summary.index, 2);
        assert_eq!(summary.records, 1);
        assert_eq!(
            mailbox.verify(id).await.unwrap(),
            Verification::Included {
                index: 2,
                digest: summary.digest
            }
        );
    }

    #[tokio::test]
    async fn test_reinitialize_resets_to_genesis() {
        let mut config = config();
        config.seal_threshold = 1;
        let store = Memory::new();
        let mut mailbox = start(store.clone(), config).await;

        let id = mailbox.admit("e1", "c1", "v1").await.unwrap();
        wait_for(&mut mailbox, |s| s.chain_length == 2).await;

        mailbox.reinitialize().await.unwrap();
        let status = wait_for(&mut mailbox, |s| s.chain_length == 1).await;
        assert_eq!(status.mempool_size, 0);
        assert!(status.valid);
        assert_eq!(mailbox.verify(id).await.unwrap(), Verification::NotFound);

        // The store converges to just the fresh genesis.
        for _ in 0..500 {
            if store.blocks().len() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store not rewritten");
    }

    #[tokio::test]
    async fn test_degraded_mode_and_recovery() {
        let mut config = config();
        config.seal_threshold = 1;
        let store = Memory::new();
        let mut mailbox = start(store.clone(), config).await;

        mailbox.admit("e1", "c1", "v1").await.unwrap();
        wait_for(&mut mailbox, |s| s.chain_length == 2 && !s.degraded).await;
        assert_eq!(store.blocks().len(), 2);

        // Persistence goes away: the ledger keeps sealing, memory-only.
        store.set_offline(true);
        mailbox.admit("e1", "c1", "v2").await.unwrap();
        wait_for(&mut mailbox, |s| s.chain_length == 3 && s.degraded).await;
        mailbox.admit("e1", "c1", "v3").await.unwrap();
        wait_for(&mut mailbox, |s| s.chain_length == 4).await;
        assert_eq!(store.blocks().len(), 2);

        // Once it returns, the next seal resynchronizes the whole chain.
        store.set_offline(false);
        mailbox.admit("e1", "c1", "v4").await.unwrap();
        let status = wait_for(&mut mailbox, |s| s.chain_length == 5 && !s.degraded).await;
        assert!(status.valid);
        assert_eq!(store.blocks().len(), 5);
    }

    #[tokio::test]
    async fn test_restart_preserves_ledger() {
        let mut config = config();
        config.seal_threshold = 2;
        let store = Memory::new();
        let mut mailbox = start(store.clone(), config.clone()).await;

        let id = mailbox.admit("e1", "c1", "v1").await.unwrap();
        mailbox.admit("e1", "c2", "v2").await.unwrap();
        wait_for(&mut mailbox, |s| s.chain_length == 2).await;
        for _ in 0..500 {
            if store.blocks().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(mailbox);

        let mut mailbox = start(store, config).await;
        let status = mailbox.status().await.unwrap();
        assert_eq!(status.chain_length, 2);
        assert!(status.valid);
        assert!(!status.degraded);
        assert!(matches!(
            mailbox.verify(id).await.unwrap(),
            Verification::Included { index: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_disk_restart_preserves_ledger() {
        let dir = env::temp_dir().join(format!(
            "vote_ledger_engine_{}",
            rand::thread_rng().gen::<u64>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("chain");

        let mut config = config();
        config.seal_threshold = 1;
        let (engine, mut mailbox) = Engine::init(Disk::new(path.clone()), config.clone())
            .await
            .unwrap();
        tokio::spawn(engine.run());

        let id = mailbox.admit("e1", "c1", "v1").await.unwrap();
        wait_for(&mut mailbox, |s| s.chain_length == 2).await;
        // Wait until both blocks are on disk before restarting.
        for _ in 0..500 {
            if Disk::new(path.clone()).load().await.unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(mailbox);

        let (engine, mut mailbox) = Engine::init(Disk::new(path), config).await.unwrap();
        tokio::spawn(engine.run());
        let status = mailbox.status().await.unwrap();
        assert_eq!(status.chain_length, 2);
        assert!(status.valid);
        assert!(matches!(
            mailbox.verify(id).await.unwrap(),
            Verification::Included { index: 1, .. }
        ));
    }
}
