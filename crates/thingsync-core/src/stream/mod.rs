// ── Catalog change streams ──
//
// A consumer holds one `CatalogStream` and sees the device list it cares
// about: the whole catalog, or only devices matching a `DeviceFilter`.

mod filter;

use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::Device;

pub use filter::DeviceFilter;

type Snapshot = Arc<Vec<Arc<Device>>>;

/// Subscription to catalog snapshots, optionally narrowed by a filter.
pub struct CatalogStream {
    receiver: watch::Receiver<Snapshot>,
    filter: Option<Arc<DeviceFilter>>,
    current: Vec<Arc<Device>>,
}

impl CatalogStream {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow().to_vec();
        Self {
            receiver,
            filter: None,
            current,
        }
    }

    /// Narrow this stream to devices matching `filter`.
    pub fn filtered(mut self, filter: DeviceFilter) -> Self {
        let filter = Arc::new(filter);
        self.current = select(&self.receiver.borrow(), Some(&filter));
        self.filter = Some(filter);
        self
    }

    /// Devices as of creation or the last [`changed`](Self::changed).
    pub fn current(&self) -> &[Arc<Device>] {
        &self.current
    }

    /// Devices as of now, without waiting.
    pub fn latest(&self) -> Vec<Arc<Device>> {
        select(&self.receiver.borrow(), self.filter.as_ref())
    }

    /// Wait for the next catalog change. `None` once the catalog is gone.
    pub async fn changed(&mut self) -> Option<&[Arc<Device>]> {
        self.receiver.changed().await.ok()?;
        self.current = select(&self.receiver.borrow_and_update(), self.filter.as_ref());
        Some(&self.current)
    }

    /// Yields the current selection first, then one per catalog change.
    pub fn into_stream(self) -> impl Stream<Item = Vec<Arc<Device>>> + Send + Unpin {
        let filter = self.filter;
        WatchStream::new(self.receiver).map(move |snap| select(&snap, filter.as_ref()))
    }
}

fn select(snapshot: &Snapshot, filter: Option<&Arc<DeviceFilter>>) -> Vec<Arc<Device>> {
    match filter {
        None => snapshot.to_vec(),
        Some(f) => snapshot.iter().filter(|d| f.matches(d)).cloned().collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::DeviceType;
    use serde_json::json;
    use thingsync_api::ThingMeta;

    fn device(name: &str, kind: &str) -> Arc<Device> {
        let meta: ThingMeta = serde_json::from_value(json!({ "type": kind })).unwrap();
        Arc::new(Device::from_meta(name, &meta))
    }

    #[tokio::test]
    async fn changed_applies_the_filter() {
        let (tx, rx) = watch::channel(Arc::new(vec![device("Lamp", "light")]));
        let mut stream =
            CatalogStream::new(rx).filtered(DeviceFilter::ByType(DeviceType::Switch));
        assert!(stream.current().is_empty());

        tx.send_replace(Arc::new(vec![device("Lamp", "light"), device("Plug", "switch")]));
        let names: Vec<&str> = stream
            .changed()
            .await
            .unwrap()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, ["Plug"]);

        drop(tx);
        assert!(stream.changed().await.is_none());
    }

    #[tokio::test]
    async fn into_stream_yields_current_then_updates() {
        let (tx, rx) = watch::channel(Arc::new(Vec::new()));
        let mut stream = CatalogStream::new(rx).into_stream();

        assert!(stream.next().await.unwrap().is_empty());
        tx.send_replace(Arc::new(vec![device("Lamp", "light")]));
        assert_eq!(stream.next().await.unwrap()[0].name, "Lamp");
    }
}
