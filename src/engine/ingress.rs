use super::{Error, Status};
use crate::{
    block::BlockSummary,
    chain::{HistoryEntry, Verification},
    record::{RecordId, VoteRecord},
};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use std::collections::BTreeMap;

/// Requests accepted by the engine.
pub enum Message {
    Admit {
        election_id: String,
        candidate_id: String,
        voter_id: String,
        response: oneshot::Sender<Result<RecordId, Error>>,
    },
    Mine {
        response: oneshot::Sender<Result<Option<BlockSummary>, Error>>,
    },
    Verify {
        id: RecordId,
        response: oneshot::Sender<Verification>,
    },
    HasVoted {
        election_id: String,
        voter_id: String,
        response: oneshot::Sender<bool>,
    },
    RecordsForElection {
        election_id: String,
        response: oneshot::Sender<Vec<VoteRecord>>,
    },
    VoterHistory {
        voter_id: String,
        response: oneshot::Sender<Vec<HistoryEntry>>,
    },
    Tally {
        election_id: String,
        response: oneshot::Sender<BTreeMap<String, u64>>,
    },
    Status {
        response: oneshot::Sender<Status>,
    },
    Reinitialize {
        response: oneshot::Sender<Result<(), Error>>,
    },
}

/// Clonable handle for submitting requests to the engine.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &mut self,
        message: Message,
        receiver: oneshot::Receiver<T>,
    ) -> Result<T, Error> {
        self.sender
            .send(message)
            .await
            .map_err(|_| Error::Shutdown)?;
        receiver.await.map_err(|_| Error::Shutdown)
    }

    /// Admit a vote into the mempool, returning its ledger-wide record id.
    pub async fn admit(
        &mut self,
        election_id: impl Into<String>,
        candidate_id: impl Into<String>,
        voter_id: impl Into<String>,
    ) -> Result<RecordId, Error> {
        let (response, receiver) = oneshot::channel();
        self.request(
            Message::Admit {
                election_id: election_id.into(),
                candidate_id: candidate_id.into(),
                voter_id: voter_id.into(),
                response,
            },
            receiver,
        )
        .await?
    }

    /// Seal the current mempool now, regardless of threshold. Returns the new
    /// block's summary, or None if there was nothing to seal.
    pub async fn mine(&mut self) -> Result<Option<BlockSummary>, Error> {
        let (response, receiver) = oneshot::channel();
        self.request(Message::Mine { response }, receiver).await?
    }

    /// Locate a record: sealed, pending, or unknown.
    pub async fn verify(&mut self, id: RecordId) -> Result<Verification, Error> {
        let (response, receiver) = oneshot::channel();
        self.request(Message::Verify { id, response }, receiver)
            .await
    }

    pub async fn has_voted(
        &mut self,
        election_id: impl Into<String>,
        voter_id: impl Into<String>,
    ) -> Result<bool, Error> {
        let (response, receiver) = oneshot::channel();
        self.request(
            Message::HasVoted {
                election_id: election_id.into(),
                voter_id: voter_id.into(),
                response,
            },
            receiver,
        )
        .await
    }

    pub async fn records_for_election(
        &mut self,
        election_id: impl Into<String>,
    ) -> Result<Vec<VoteRecord>, Error> {
        let (response, receiver) = oneshot::channel();
        self.request(
            Message::RecordsForElection {
                election_id: election_id.into(),
                response,
            },
            receiver,
        )
        .await
    }

    pub async fn voter_history(
        &mut self,
        voter_id: impl Into<String>,
    ) -> Result<Vec<HistoryEntry>, Error> {
        let (response, receiver) = oneshot::channel();
        self.request(
            Message::VoterHistory {
                voter_id: voter_id.into(),
                response,
            },
            receiver,
        )
        .await
    }

    /// Per-candidate counts for an election, across sealed and pending
    /// records.
    pub async fn tally(
        &mut self,
        election_id: impl Into<String>,
    ) -> Result<BTreeMap<String, u64>, Error> {
        let (response, receiver) = oneshot::channel();
        self.request(
            Message::Tally {
                election_id: election_id.into(),
                response,
            },
            receiver,
        )
        .await
    }

    pub async fn status(&mut self) -> Result<Status, Error> {
        let (response, receiver) = oneshot::channel();
        self.request(Message::Status { response }, receiver).await
    }

    /// Discard every block above genesis and the whole mempool. Privileged
    /// and irreversible; the caller decides who may invoke it.
    pub async fn reinitialize(&mut self) -> Result<(), Error> {
        let (response, receiver) = oneshot::channel();
        self.request(Message::Reinitialize { response }, receiver)
            .await?
    }
}
