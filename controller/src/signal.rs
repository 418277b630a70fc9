use tokio::sync::watch;

/// Single-slot notification with overwrite semantics: a newer signal replaces
/// an unconsumed older one, it never queues behind it. Used to hand commands
/// from connection handlers to the task that may act on them.
#[derive(Debug, Clone)]
pub struct Latest<T> {
    tx: watch::Sender<Option<T>>,
}

/// Consuming side of a [`Latest`] signal. Not cloneable; exactly one task
/// waits on a given slot.
#[derive(Debug)]
pub struct LatestListener<T> {
    rx: watch::Receiver<Option<T>>,
}

pub fn latest<T: Clone>() -> (Latest<T>, LatestListener<T>) {
    let (tx, rx) = watch::channel(None);
    (Latest { tx }, LatestListener { rx })
}

impl<T: Clone> Latest<T> {
    pub fn signal(&self, value: T) {
        self.tx.send_replace(Some(value));
    }
}

impl<T: Clone> LatestListener<T> {
    /// Waits for the next signal and returns the most recent value. Returns
    /// `None` only when every sender handle has been dropped.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            self.rx.changed().await.ok()?;
            let value = self.rx.borrow_and_update().clone();
            if let Some(value) = value {
                return Some(value);
            }
        }
    }
}
