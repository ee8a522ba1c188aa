use crate::error::{MinqError, Result};
use mongodb::{Client, ClientSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Open,
    Committed,
    Aborted,
    Failed,
}

impl TransactionStatus {
    /// True once the transaction has left `Open`; no further state
    /// transition is permitted.
    pub fn consumed(self) -> bool {
        self != Self::Open
    }
}

/// An explicit session wrapper binding multiple operations into one atomic
/// unit.
///
/// Obtained from [`Minq::transaction`](crate::Minq::transaction) and
/// attached to request chains via
/// [`RequestChain::on_transaction`](crate::RequestChain::on_transaction).
/// Commit and abort come in a strict form (error on reuse) and a soft `try_`
/// form (false on reuse, `Failed` state on an engine error).
#[derive(Debug)]
pub struct Transaction {
    session: ClientSession,
    status: TransactionStatus,
}

impl Transaction {
    pub(crate) async fn start(client: &Client) -> Result<Self> {
        let mut session = client.start_session().await?;
        session.start_transaction().await?;

        Ok(Self {
            session,
            status: TransactionStatus::Open,
        })
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn consumed(&self) -> bool {
        self.status.consumed()
    }

    /// Commits the transaction, or fails with
    /// [`MinqError::TransactionState`] if it was already committed or
    /// aborted. An engine failure propagates and leaves the state `Open`.
    pub async fn commit(&mut self) -> Result<()> {
        self.enforce_not_consumed()?;
        self.session.commit_transaction().await?;
        self.status = TransactionStatus::Committed;
        Ok(())
    }

    /// Aborts the transaction; same contract as [`commit`](Self::commit).
    pub async fn abort(&mut self) -> Result<()> {
        self.enforce_not_consumed()?;
        self.session.abort_transaction().await?;
        self.status = TransactionStatus::Aborted;
        Ok(())
    }

    /// Soft commit: returns `false` instead of erroring when the
    /// transaction was already consumed, so a second call never reaches the
    /// engine. An engine failure is logged and moves the state to `Failed`.
    pub async fn try_commit(&mut self) -> bool {
        if self.consumed() {
            return false;
        }

        match self.session.commit_transaction().await {
            Ok(()) => {
                self.status = TransactionStatus::Committed;
                true
            }
            Err(error) => {
                self.status = TransactionStatus::Failed;
                tracing::error!(error = %error, "unable to commit transaction");
                false
            }
        }
    }

    /// Soft abort; same contract as [`try_commit`](Self::try_commit).
    pub async fn try_abort(&mut self) -> bool {
        if self.consumed() {
            return false;
        }

        match self.session.abort_transaction().await {
            Ok(()) => {
                self.status = TransactionStatus::Aborted;
                tracing::warn!("MINQ transaction aborted");
                true
            }
            Err(error) => {
                self.status = TransactionStatus::Failed;
                tracing::error!(error = %error, "unable to abort transaction");
                false
            }
        }
    }

    pub(crate) fn session_mut(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    fn enforce_not_consumed(&self) -> Result<()> {
        if self.consumed() {
            return Err(MinqError::TransactionState {
                status: self.status,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_the_only_unconsumed_state() {
        assert!(!TransactionStatus::Open.consumed());
        assert!(TransactionStatus::Committed.consumed());
        assert!(TransactionStatus::Aborted.consumed());
        assert!(TransactionStatus::Failed.consumed());
    }
}
