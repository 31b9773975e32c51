use std::thread;
use tokio::sync::{mpsc, oneshot};
use anyhow::Result;
use shared::types::AccessoryRecord;
use crate::store::db::AccessoryDb;

/// Commands sent to the store thread
pub enum StoreCommand {
    Insert(AccessoryRecord, oneshot::Sender<Result<bool>>),
    Remove(String, oneshot::Sender<Result<bool>>),
    GetAll(oneshot::Sender<Result<Vec<AccessoryRecord>>>),
    Shutdown,
}

/// Handle to interact with the accessory database
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn a new store thread owning the given database
    pub fn spawn(db: AccessoryDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Insert(record, reply) => {
                        let _ = reply.send(db.insert(&record));
                    }
                    StoreCommand::Remove(id, reply) => {
                        let _ = reply.send(db.remove(&id));
                    }
                    StoreCommand::GetAll(reply) => {
                        let _ = reply.send(db.get_all());
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Persist a new accessory. Returns false if the id already existed.
    pub async fn insert(&self, record: AccessoryRecord) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Insert(record, reply)).await?;
        rx.await?
    }

    /// Forget an accessory
    pub async fn remove(&self, id: String) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Remove(id, reply)).await?;
        rx.await?
    }

    /// Every persisted accessory
    pub async fn get_all(&self) -> Result<Vec<AccessoryRecord>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::GetAll(reply)).await?;
        rx.await?
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(StoreCommand::Shutdown).await?;
        Ok(())
    }
}
