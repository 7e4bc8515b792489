use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::blob::Blob;
use crate::error::{IteratorError, StoreError};

use super::BucketIterator;

const CHANNEL_CAPACITY: usize = 64;

pub fn channel() -> (ProducerHandle, ChannelBucketIterator) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = CancelFlag(Arc::new(std::sync::atomic::AtomicBool::new(false)));
    let failure = Arc::new(Mutex::new(None));
    (
        ProducerHandle { tx, cancel: cancel.clone(), failure: failure.clone() },
        ChannelBucketIterator { rx: Some(rx), cancel, terminal: None, failure },
    )
}

#[derive(Clone)]
pub struct CancelFlag(Arc<std::sync::atomic::AtomicBool>);

impl CancelFlag {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

pub struct ProducerHandle {
    tx: mpsc::Sender<Blob>,
    cancel: CancelFlag,
    failure: Arc<Mutex<Option<StoreError>>>,
}

impl ProducerHandle {
    pub async fn send(&self, blob: Blob) -> Result<(), mpsc::error::SendError<Blob>> {
        self.tx.send(blob).await
    }

    pub fn blocking_send(&self, blob: Blob) -> Result<(), mpsc::error::SendError<Blob>> {
        self.tx.blocking_send(blob)
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Dropping `self` after this closes the channel; the consumer surfaces
    /// `err` the next time it observes the channel closed.
    pub fn fail(&self, err: StoreError) {
        *self.failure.lock().unwrap() = Some(err);
    }
}

#[derive(Clone)]
enum Terminal {
    EndOfIteration,
    Aborted,
    Failed(Arc<str>),
}

impl From<&Terminal> for IteratorError {
    fn from(t: &Terminal) -> Self {
        match t {
            Terminal::EndOfIteration => IteratorError::EndOfIteration,
            Terminal::Aborted => IteratorError::Aborted,
            Terminal::Failed(msg) => IteratorError::Store(StoreError::Backend(anyhow::anyhow!(msg.to_string()))),
        }
    }
}

pub struct ChannelBucketIterator {
    rx: Option<mpsc::Receiver<Blob>>,
    cancel: CancelFlag,
    terminal: Option<Terminal>,
    failure: Arc<Mutex<Option<StoreError>>>,
}

impl ChannelBucketIterator {
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

#[async_trait::async_trait]
impl BucketIterator for ChannelBucketIterator {
    async fn next(&mut self) -> Result<Blob, IteratorError> {
        if let Some(terminal) = &self.terminal {
            return Err(terminal.into());
        }

        if self.cancel.is_cancelled() {
            self.terminal = Some(Terminal::Aborted);
            self.rx = None;
            return Err(IteratorError::Aborted);
        }

        let Some(rx) = self.rx.as_mut() else {
            self.terminal = Some(Terminal::EndOfIteration);
            return Err(IteratorError::EndOfIteration);
        };

        match rx.recv().await {
            Some(blob) => Ok(blob),
            None => {
                self.rx = None;
                if let Some(err) = self.failure.lock().unwrap().take() {
                    self.terminal = Some(Terminal::Failed(err.to_string().into()));
                    return Err(IteratorError::Store(err));
                }
                self.terminal = Some(Terminal::EndOfIteration);
                Err(IteratorError::EndOfIteration)
            }
        }
    }

    fn done(&mut self) {
        self.cancel.cancel();
        self.rx = None;
        self.terminal = Some(Terminal::Aborted);
    }
}

pub struct EmptyBucketIterator;

#[async_trait::async_trait]
impl BucketIterator for EmptyBucketIterator {
    async fn next(&mut self) -> Result<Blob, IteratorError> {
        Err(IteratorError::EndOfIteration)
    }

    fn done(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Blob;

    #[tokio::test]
    async fn fatal_producer_error_surfaces_once_then_stays_terminal() {
        let (tx, mut rx) = channel();
        tx.send(Blob::new("cc-resources/a")).await.unwrap();
        tx.fail(StoreError::BucketMissing("cc-resources".into()));
        drop(tx);

        assert!(rx.next().await.is_ok());
        assert!(matches!(rx.next().await, Err(IteratorError::Store(StoreError::BucketMissing(_)))));
        assert!(matches!(rx.next().await, Err(IteratorError::Store(_))));
    }
}
