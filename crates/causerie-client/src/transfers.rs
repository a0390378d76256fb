//! File-transfer bookkeeping.
//!
//! Each transfer gets a store record tracking its progress. Finished and
//! cancelled-by-peer records linger for a few seconds so the user sees the
//! final state before the entry disappears; a local cancel removes the
//! record immediately.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use causerie_shared::constants::TRANSFER_LINGER_MS;
use causerie_shared::SessionError;
use causerie_signal::{
    FilePayload, FileTransferHandle, SignalingTransport, TransferStatus,
};

use crate::store::{FileTransferRecord, RoomStore, TransferDirection};

pub struct TransferManager {
    store: Arc<RoomStore>,
}

impl TransferManager {
    pub fn new(store: Arc<RoomStore>) -> Self {
        Self { store }
    }

    /// Registers a transfer announced by the transport and spawns its
    /// progress watcher. Inbound payloads are delivered through `save`.
    pub fn track<F>(&self, handle: Arc<dyn FileTransferHandle>, save: F) -> Uuid
    where
        F: Fn(&str, Vec<u8>) + Send + Sync + 'static,
    {
        let info = handle.info();
        let id = Uuid::new_v4();
        let direction = if info.up {
            TransferDirection::Outbound
        } else {
            TransferDirection::Inbound
        };

        debug!(name = %info.name, size = info.size, ?direction, "Tracking file transfer");

        self.store.transfers.insert(
            id,
            FileTransferRecord {
                id,
                direction,
                username: info.username.clone(),
                name: info.name.clone(),
                size: info.size,
                status: TransferStatus::Pending,
                handle: handle.clone(),
            },
        );

        let Some(mut events) = handle.take_events() else {
            warn!(name = %info.name, "Transfer events already consumed");
            return id;
        };

        let store = self.store.clone();
        let name = info.name;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                store.transfers.update(&id, |record| {
                    if record.status == event.status {
                        false
                    } else {
                        record.status = event.status;
                        true
                    }
                });

                match event.status {
                    TransferStatus::Done => {
                        if let Some(data) = event.data {
                            info!(name = %name, bytes = data.len(), "File received");
                            save(&name, data);
                        }
                        linger_and_remove(store, id).await;
                        break;
                    }
                    TransferStatus::Cancelled => {
                        linger_and_remove(store, id).await;
                        break;
                    }
                    _ => {}
                }
            }
        });

        id
    }

    /// Accepts an inbound transfer.
    pub fn accept(&self, id: &Uuid) -> Result<(), SessionError> {
        let record = self
            .store
            .transfers
            .get(id)
            .ok_or_else(|| SessionError::Transport("unknown transfer".to_string()))?;
        record.handle.receive();
        Ok(())
    }

    /// Cancels a transfer and removes its record immediately.
    pub fn cancel(&self, id: &Uuid) -> Result<(), SessionError> {
        let record = self
            .store
            .transfers
            .remove(id)
            .ok_or_else(|| SessionError::Transport("unknown transfer".to_string()))?;
        record.handle.cancel();
        Ok(())
    }

    /// Offers a file to another participant.
    pub async fn send(
        &self,
        transport: &Arc<dyn SignalingTransport>,
        dest: &causerie_shared::types::ParticipantId,
        payload: FilePayload,
    ) -> Result<Uuid, SessionError> {
        let handle = transport.send_file(dest, payload).await?;
        Ok(self.track(handle, |_, _| {}))
    }
}

async fn linger_and_remove(store: Arc<RoomStore>, id: Uuid) {
    tokio::time::sleep(Duration::from_millis(TRANSFER_LINGER_MS)).await;
    store.transfers.remove(&id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use causerie_signal::testing::FakeTransfer;
    use causerie_signal::{TransferEvent, TransferInfo};

    fn inbound_info() -> TransferInfo {
        TransferInfo {
            sender: "u1".into(),
            username: Some("ada".to_string()),
            name: "notes.txt".to_string(),
            size: 42,
            up: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn done_lingers_then_disappears() {
        let store = RoomStore::new();
        let manager = TransferManager::new(store.clone());
        let (fake, tx) = FakeTransfer::new(inbound_info());
        let id = manager.track(fake, |_, _| {});

        tx.send(TransferEvent {
            status: TransferStatus::Done,
            data: None,
        })
        .await
        .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(
            store.transfers.get(&id).unwrap().status,
            TransferStatus::Done
        );

        tokio::time::advance(Duration::from_millis(TRANSFER_LINGER_MS + 100)).await;
        tokio::task::yield_now().await;
        assert!(store.transfers.get(&id).is_none());
    }

    #[tokio::test]
    async fn inbound_payload_reaches_save_hook() {
        let store = RoomStore::new();
        let manager = TransferManager::new(store);
        let (fake, tx) = FakeTransfer::new(inbound_info());

        let saved = Arc::new(Mutex::new(None));
        let s = saved.clone();
        let _id = manager.track(fake.clone(), move |name, data| {
            *s.lock().unwrap() = Some((name.to_string(), data));
        });

        manager.accept(&_id).unwrap();
        assert!(fake.was_received());

        tx.send(TransferEvent {
            status: TransferStatus::Done,
            data: Some(b"hello".to_vec()),
        })
        .await
        .unwrap();
        tokio::task::yield_now().await;

        let saved = saved.lock().unwrap().clone().unwrap();
        assert_eq!(saved.0, "notes.txt");
        assert_eq!(saved.1, b"hello");
    }

    #[tokio::test]
    async fn local_cancel_removes_immediately() {
        let store = RoomStore::new();
        let manager = TransferManager::new(store.clone());
        let (fake, _tx) = FakeTransfer::new(inbound_info());
        let id = manager.track(fake.clone(), |_, _| {});

        manager.cancel(&id).unwrap();
        assert!(fake.was_cancelled());
        assert!(store.transfers.get(&id).is_none());
    }

    #[tokio::test]
    async fn progress_updates_record_status() {
        let store = RoomStore::new();
        let manager = TransferManager::new(store.clone());
        let (fake, tx) = FakeTransfer::new(inbound_info());
        let id = manager.track(fake, |_, _| {});

        for status in [TransferStatus::Connecting, TransferStatus::Transferring] {
            tx.send(TransferEvent { status, data: None }).await.unwrap();
            tokio::task::yield_now().await;
            assert_eq!(store.transfers.get(&id).unwrap().status, status);
        }
    }
}
