//! Downstream subscription handling.
//!
//! Each incoming stream gets a watcher task that consumes its event
//! channel: tracks are attached to the stream record, receiver stats feed
//! the remote voice-activity indicator, and a close removes the record
//! unless the server is about to replace the stream in place.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use causerie_media::activity::RemoteActivity;
use causerie_shared::constants::REMOTE_STATS_INTERVAL_MS;
use causerie_signal::{DownstreamHandle, StreamEvent, StreamStats};

use crate::store::{RoomStore, StreamRecord};

/// Registers a new downstream and spawns its watcher. Returns the watcher
/// task handle, mostly so tests can await its termination.
pub fn watch_downstream(
    store: Arc<RoomStore>,
    down: Arc<dyn DownstreamHandle>,
) -> JoinHandle<()> {
    let id = down.id();
    store.streams.insert(
        id.clone(),
        StreamRecord {
            id: id.clone(),
            local_id: down.local_id(),
            label: down.label(),
            source: down.source(),
            username: down.username(),
            tracks: Vec::new(),
        },
    );

    down.set_stats_interval(REMOTE_STATS_INTERVAL_MS);

    let Some(mut events) = down.take_events() else {
        warn!(stream = %id, "Downstream events already consumed");
        return tokio::spawn(async {});
    };

    debug!(stream = %id, label = %down.label(), "Watching downstream");

    tokio::spawn(async move {
        let mut activity = RemoteActivity::new();
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Error(e) => {
                    warn!(stream = %id, error = %e, "Downstream error");
                    store.last_error.set(Some(e));
                }
                StreamEvent::Close { replace } => {
                    if replace {
                        debug!(stream = %id, "Downstream closed for replacement");
                    } else {
                        store.streams.remove(&id);
                        store.speaking.remove(&id);
                    }
                    break;
                }
                StreamEvent::Status(status) => {
                    debug!(stream = %id, %status, "Downstream status");
                }
                StreamEvent::DownTrack { track } => {
                    store.streams.update(&id, |record| {
                        if record.tracks.contains(&track) {
                            false
                        } else {
                            record.tracks.push(track.clone());
                            true
                        }
                    });
                }
                StreamEvent::Stats(stats) => {
                    let energy = StreamStats::max_audio_energy(&stats);
                    if let Some(speaking) = activity.on_energy(energy, Instant::now()) {
                        store.speaking.insert(id.clone(), speaking);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use causerie_media::MediaTrack;
    use causerie_signal::testing::FakeDownstream;

    fn down(id: &str) -> (Arc<FakeDownstream>, tokio::sync::mpsc::Sender<StreamEvent>) {
        FakeDownstream::new(id, "camera", Some("u1".into()), Some("ada".to_string()))
    }

    #[tokio::test]
    async fn downstream_registers_record_and_stats_interval() {
        let store = RoomStore::new();
        let (fake, _tx) = down("s1");
        let _task = watch_downstream(store.clone(), fake.clone());

        let record = store.streams.get(&"s1".to_string()).unwrap();
        assert_eq!(record.label, "camera");
        assert_eq!(record.username.as_deref(), Some("ada"));
        assert_eq!(fake.stats_interval(), Some(REMOTE_STATS_INTERVAL_MS));
    }

    #[tokio::test]
    async fn tracks_attach_to_the_record() {
        let store = RoomStore::new();
        let (fake, tx) = down("s1");
        let task = watch_downstream(store.clone(), fake);

        tx.send(StreamEvent::DownTrack {
            track: MediaTrack::video(),
        })
        .await
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let record = store.streams.get(&"s1".to_string()).unwrap();
        assert_eq!(record.tracks.len(), 1);
    }

    #[tokio::test]
    async fn close_removes_record_unless_replacing() {
        let store = RoomStore::new();

        let (fake, tx) = down("s1");
        let task = watch_downstream(store.clone(), fake);
        tx.send(StreamEvent::Close { replace: false }).await.unwrap();
        task.await.unwrap();
        assert!(store.streams.get(&"s1".to_string()).is_none());

        let (fake, tx) = down("s2");
        let task = watch_downstream(store.clone(), fake);
        tx.send(StreamEvent::Close { replace: true }).await.unwrap();
        task.await.unwrap();
        assert!(store.streams.get(&"s2".to_string()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stats_drive_speaking_indicator_with_holdover() {
        let store = RoomStore::new();
        let (fake, tx) = down("s1");
        let _task = watch_downstream(store.clone(), fake);

        let loud = vec![StreamStats {
            audio_energy: 1e-3,
            ..Default::default()
        }];
        let quiet = vec![StreamStats::default()];

        tx.send(StreamEvent::Stats(loud)).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(store.speaking.get(&"s1".to_string()), Some(true));

        // Quiet within the holdover window: still speaking.
        tokio::time::advance(Duration::from_millis(500)).await;
        tx.send(StreamEvent::Stats(quiet.clone())).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(store.speaking.get(&"s1".to_string()), Some(true));

        // Past the holdover: cleared.
        tokio::time::advance(Duration::from_millis(600)).await;
        tx.send(StreamEvent::Stats(quiet)).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(store.speaking.get(&"s1".to_string()), Some(false));
    }

    #[tokio::test]
    async fn errors_surface_in_the_store() {
        let store = RoomStore::new();
        let (fake, tx) = down("s1");
        let task = watch_downstream(store.clone(), fake);

        tx.send(StreamEvent::Error("ICE failed".to_string()))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(store.last_error.get().as_deref(), Some("ICE failed"));
    }
}
